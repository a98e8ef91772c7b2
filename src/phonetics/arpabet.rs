//! ARPAbet phoneme symbols to IPA.

use super::{TransliterationError, Transliterator};

/// Table-driven ARPAbet converter.
///
/// Symbols are case-insensitive and may carry a CMUdict stress digit
/// (`0`, `1`, `2`). Unstressed `AH` and `ER` reduce to `ə` and `ɚ`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arpabet;

impl Transliterator for Arpabet {
    fn transliterate(&self, unit: &str) -> Result<String, TransliterationError> {
        let trimmed = unit.trim();
        if trimmed.is_empty() {
            return Err(TransliterationError::EmptyUnit);
        }

        let upper = trimmed.to_ascii_uppercase();
        let (symbol, stress) = match upper.as_bytes().last() {
            Some(&d) if (b'0'..=b'2').contains(&d) => (&upper[..upper.len() - 1], Some(d - b'0')),
            _ => (upper.as_str(), None),
        };

        let ipa = match (symbol, stress) {
            ("AH", Some(0)) => "ə",
            ("ER", Some(0)) => "ɚ",
            _ => lookup(symbol)
                .ok_or_else(|| TransliterationError::UnknownPhoneme(trimmed.to_string()))?,
        };
        Ok(ipa.to_string())
    }
}

fn lookup(symbol: &str) -> Option<&'static str> {
    let ipa = match symbol {
        "AA" => "ɑ",
        "AE" => "æ",
        "AH" => "ʌ",
        "AO" => "ɔ",
        "AW" => "aʊ",
        "AX" => "ə",
        "AY" => "aɪ",
        "B" => "b",
        "CH" => "tʃ",
        "D" => "d",
        "DH" => "ð",
        "DX" => "ɾ",
        "EH" => "ɛ",
        "ER" => "ɝ",
        "EY" => "eɪ",
        "F" => "f",
        "G" => "ɡ",
        "HH" => "h",
        "IH" => "ɪ",
        "IY" => "i",
        "JH" => "dʒ",
        "K" => "k",
        "L" => "l",
        "M" => "m",
        "N" => "n",
        "NG" => "ŋ",
        "OW" => "oʊ",
        "OY" => "ɔɪ",
        "P" => "p",
        "R" => "ɹ",
        "S" => "s",
        "SH" => "ʃ",
        "T" => "t",
        "TH" => "θ",
        "UH" => "ʊ",
        "UW" => "u",
        "V" => "v",
        "W" => "w",
        "Y" => "j",
        "Z" => "z",
        "ZH" => "ʒ",
        _ => return None,
    };
    Some(ipa)
}
