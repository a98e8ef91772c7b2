//! Rule-based English (Latin script) grapheme to IPA conversion.

use super::{TransliterationError, Transliterator};

/// Multigraphs, longest first within each length band.
const MULTIGRAPHS: &[(&str, &str)] = &[
    ("tch", "tʃ"),
    ("dge", "dʒ"),
    ("igh", "aɪ"),
    ("ch", "tʃ"),
    ("sh", "ʃ"),
    ("th", "θ"),
    ("ph", "f"),
    ("ng", "ŋ"),
    ("ck", "k"),
    ("wh", "w"),
    ("qu", "kw"),
    ("ee", "iː"),
    ("ea", "iː"),
    ("oo", "uː"),
    ("ou", "aʊ"),
    ("ow", "aʊ"),
    ("oi", "ɔɪ"),
    ("oy", "ɔɪ"),
    ("ai", "eɪ"),
    ("ay", "eɪ"),
    ("au", "ɔː"),
    ("aw", "ɔː"),
    ("er", "ɚ"),
    ("ar", "ɑɹ"),
    ("or", "ɔɹ"),
];

fn single(letter: u8) -> &'static str {
    match letter {
        b'a' => "æ",
        b'b' => "b",
        b'c' => "k",
        b'd' => "d",
        b'e' => "ɛ",
        b'f' => "f",
        b'g' => "ɡ",
        b'h' => "h",
        b'i' => "ɪ",
        b'j' => "dʒ",
        b'k' => "k",
        b'l' => "l",
        b'm' => "m",
        b'n' => "n",
        b'o' => "ɑ",
        b'p' => "p",
        b'q' => "k",
        b'r' => "ɹ",
        b's' => "s",
        b't' => "t",
        b'u' => "ʌ",
        b'v' => "v",
        b'w' => "w",
        b'x' => "ks",
        b'y' => "j",
        b'z' => "z",
        _ => "",
    }
}

fn is_vowel(letter: u8) -> bool {
    matches!(letter, b'a' | b'e' | b'i' | b'o' | b'u')
}

/// English orthography rules (`eng-Latn`).
///
/// Input is lowercased. Letters, apostrophes, and whitespace are accepted;
/// anything else fails the unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishOrthography;

impl Transliterator for EnglishOrthography {
    fn transliterate(&self, unit: &str) -> Result<String, TransliterationError> {
        if unit.is_empty() {
            return Err(TransliterationError::EmptyUnit);
        }

        let lowered = unit.to_lowercase();
        if let Some(bad) = lowered
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || *c == '\'' || c.is_whitespace()))
        {
            return Err(TransliterationError::UnmappedGrapheme {
                unit: unit.to_string(),
                grapheme: bad,
            });
        }

        Ok(lowered
            .split(char::is_whitespace)
            .map(convert_word)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn convert_word(word: &str) -> String {
    let bytes = word.as_bytes();
    let mut out = String::with_capacity(word.len() * 2);
    let mut i = 0;

    while i < bytes.len() {
        let letter = bytes[i];
        if letter == b'\'' {
            i += 1;
            continue;
        }

        if let Some((graph, ipa)) = MULTIGRAPHS
            .iter()
            .find(|(graph, _)| bytes[i..].starts_with(graph.as_bytes()))
        {
            out.push_str(ipa);
            i += graph.len();
            continue;
        }

        let doubled = i > 0 && bytes[i - 1] == letter && !is_vowel(letter);
        if !doubled && !is_silent_final_e(bytes, i) {
            out.push_str(single(letter));
        }
        i += 1;
    }

    out
}

fn is_silent_final_e(word: &[u8], idx: usize) -> bool {
    idx + 1 == word.len()
        && idx >= 2
        && word[idx] == b'e'
        && !is_vowel(word[idx - 1])
        && word[..idx - 1].iter().copied().any(is_vowel)
}
