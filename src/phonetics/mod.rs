//! Text and phoneme to IPA conversion.
//!
//! Conversion is unit-wise: each word, character, or phoneme symbol is handed
//! to a [`Transliterator`] once. A unit that fails is replaced in the output
//! by `[ERROR:<unit>]` and the remaining units are still converted, so the
//! output always has one entry per input unit, in order.

use tracing::debug;

pub mod arpabet;
pub mod english;

pub use arpabet::Arpabet;
pub use english::EnglishOrthography;

/// Reasons a single unit could not be transliterated.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TransliterationError {
    #[error("no rule for grapheme {grapheme:?} in {unit:?}")]
    UnmappedGrapheme { unit: String, grapheme: char },
    #[error("unknown phoneme symbol {0:?}")]
    UnknownPhoneme(String),
    #[error("empty unit")]
    EmptyUnit,
}

/// Converts one unit of text or phoneme symbols into IPA.
pub trait Transliterator: Send + Sync {
    fn transliterate(&self, unit: &str) -> Result<String, TransliterationError>;
}

impl<F> Transliterator for F
where
    F: Fn(&str) -> Result<String, TransliterationError> + Send + Sync,
{
    fn transliterate(&self, unit: &str) -> Result<String, TransliterationError> {
        self(unit)
    }
}

/// Result of converting one unit.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnitOutcome {
    pub unit: String,
    pub result: Result<String, TransliterationError>,
}

impl UnitOutcome {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }

    /// The IPA string, or the `[ERROR:<unit>]` sentinel for a failed unit.
    pub fn render(&self) -> String {
        match &self.result {
            Ok(ipa) => ipa.clone(),
            Err(_) => error_marker(&self.unit),
        }
    }
}

/// Sentinel that stands in for a unit the engine rejected.
pub fn error_marker(unit: &str) -> String {
    format!("[ERROR:{unit}]")
}

/// Transliterates every unit exactly once, keeping order and length.
pub fn convert_units<I, S>(engine: &dyn Transliterator, units: I) -> Vec<UnitOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    units
        .into_iter()
        .map(|unit| {
            let unit = unit.as_ref();
            let result = engine.transliterate(unit);
            if let Err(err) = &result {
                debug!(unit, error = %err, "transliteration failed");
            }
            UnitOutcome {
                unit: unit.to_string(),
                result,
            }
        })
        .collect()
}

/// Converts text character by character.
pub fn text_to_phonemes(engine: &dyn Transliterator, text: &str) -> Vec<String> {
    render_all(&convert_units(engine, text.chars().map(String::from)))
}

/// Converts text word by word, splitting on whitespace.
pub fn words_to_phonemes(engine: &dyn Transliterator, text: &str) -> Vec<String> {
    render_all(&convert_units(engine, text.split_whitespace()))
}

/// Converts a phoneme sequence and joins the results with single spaces.
pub fn phonemes_to_ipa<S: AsRef<str>>(engine: &dyn Transliterator, phonemes: &[S]) -> String {
    render_all(&convert_units(engine, phonemes)).join(" ")
}

fn render_all(outcomes: &[UnitOutcome]) -> Vec<String> {
    outcomes.iter().map(UnitOutcome::render).collect()
}

/// IPA result for a whole transcription.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IpaOutcome {
    Converted(String),
    Failed(String),
}

impl IpaOutcome {
    pub fn ipa(&self) -> Option<&str> {
        match self {
            Self::Converted(ipa) => Some(ipa),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Converted(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Converts a decoded transcription to IPA, word by word.
///
/// Individual failed words become sentinels. The step as a whole only fails
/// when the transcription has words and none of them could be converted.
pub fn convert_to_ipa(engine: &dyn Transliterator, transcription: &str) -> IpaOutcome {
    let lowered = transcription.to_lowercase();
    let outcomes = convert_units(engine, lowered.split_whitespace());

    if !outcomes.is_empty() && outcomes.iter().all(UnitOutcome::is_err) {
        let first = outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err())
            .map(ToString::to_string)
            .unwrap_or_default();
        return IpaOutcome::Failed(format!(
            "could not transliterate any of {} word(s): {first}",
            outcomes.len()
        ));
    }

    IpaOutcome::Converted(render_all(&outcomes).join(" "))
}
