//! CTC vocabulary and greedy decoding.

use std::collections::HashMap;
use std::path::Path;

use crate::error::AppError;

const SPECIAL_TOKENS: &[&str] = &["<pad>", "<s>", "</s>", "<unk>"];
const WORD_DELIMITER: &str = "|";

/// Token table of a CTC head, indexed by class id.
#[derive(Debug, Clone)]
pub struct CtcVocabulary {
    tokens: Vec<Option<String>>,
    blank_id: usize,
    word_delimiter_id: Option<usize>,
}

impl CtcVocabulary {
    /// Builds the table from a `token -> id` map such as `vocab.json`.
    ///
    /// `size` is the width of the model head; every id must fall below it.
    pub fn from_map(
        map: HashMap<String, usize>,
        blank_id: usize,
        size: usize,
    ) -> Result<Self, AppError> {
        if let Some((token, id)) = map.iter().find(|(_, id)| **id >= size) {
            return Err(AppError::config(format!(
                "token {token:?} has id {id} but the model head has {size} classes"
            )));
        }
        if blank_id >= size {
            return Err(AppError::config(format!(
                "blank id {blank_id} is outside the vocabulary of {size} tokens"
            )));
        }

        let mut tokens = vec![None; size];
        let mut word_delimiter_id = None;
        for (token, id) in map {
            if token == WORD_DELIMITER {
                word_delimiter_id = Some(id);
            }
            tokens[id] = Some(token);
        }

        Ok(Self {
            tokens,
            blank_id,
            word_delimiter_id,
        })
    }

    /// Reads `vocab.json`.
    pub fn load(path: &Path, blank_id: usize, size: usize) -> Result<Self, AppError> {
        let data = std::fs::read_to_string(path)
            .map_err(|err| AppError::internal(format!("failed to read {path:?}: {err}")))?;
        let map: HashMap<String, usize> = serde_json::from_str(&data)
            .map_err(|err| AppError::internal(format!("failed to parse {path:?}: {err}")))?;
        Self::from_map(map, blank_id, size)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Collapses a per-frame id sequence into text.
    ///
    /// Runs of the same id count once, the blank separates genuine repeats,
    /// special tokens are dropped, and the word delimiter becomes a space.
    pub fn decode(&self, frame_ids: &[u32]) -> String {
        let mut text = String::new();
        let mut previous: Option<u32> = None;

        for &id in frame_ids {
            if previous == Some(id) {
                continue;
            }
            previous = Some(id);

            let idx = id as usize;
            if idx == self.blank_id {
                continue;
            }
            if Some(idx) == self.word_delimiter_id {
                text.push(' ');
                continue;
            }
            match self.tokens.get(idx).and_then(Option::as_deref) {
                Some(token) if !SPECIAL_TOKENS.contains(&token) => text.push_str(token),
                _ => {}
            }
        }

        normalize_text(&text)
    }
}

/// Normalizes transcript text by collapsing all whitespace runs to one space.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
