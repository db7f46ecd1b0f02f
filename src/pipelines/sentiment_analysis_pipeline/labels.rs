use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::DecodeInvariantError;

/// The fixed set of labels the classifier decodes to.
///
/// Class ids are 1-indexed: arg-max column `i` maps to class id `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    #[serde(rename = "Negative")]
    Negative,
    #[serde(rename = "Neutral")]
    Neutral,
    #[serde(rename = "Positive")]
    Positive,
    #[serde(rename = "Very Positive")]
    VeryPositive,
    #[serde(rename = "Very Negative")]
    VeryNegative,
}

impl SentimentLabel {
    pub const COUNT: usize = 5;

    pub const ALL: [SentimentLabel; Self::COUNT] = [
        SentimentLabel::Negative,
        SentimentLabel::Neutral,
        SentimentLabel::Positive,
        SentimentLabel::VeryPositive,
        SentimentLabel::VeryNegative,
    ];

    pub fn from_class_id(class_id: usize) -> Result<Self, DecodeInvariantError> {
        match class_id {
            1 => Ok(SentimentLabel::Negative),
            2 => Ok(SentimentLabel::Neutral),
            3 => Ok(SentimentLabel::Positive),
            4 => Ok(SentimentLabel::VeryPositive),
            5 => Ok(SentimentLabel::VeryNegative),
            _ => Err(DecodeInvariantError::UnknownClass { class_id }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Positive => "Positive",
            SentimentLabel::VeryPositive => "Very Positive",
            SentimentLabel::VeryNegative => "Very Negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of the largest value; ties go to the lowest index.
/// `None` when the row is empty or contains NaN.
fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in row.iter().enumerate() {
        if value.is_nan() {
            return None;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Decode a `(batch, classes)` logits matrix into labels, one per row.
pub fn decode_logits(rows: &[Vec<f32>]) -> Result<Vec<SentimentLabel>, DecodeInvariantError> {
    rows.iter()
        .enumerate()
        .map(|(row, logits)| {
            if logits.len() != SentimentLabel::COUNT {
                return Err(DecodeInvariantError::Width {
                    row,
                    width: logits.len(),
                    expected: SentimentLabel::COUNT,
                });
            }
            let column = argmax(logits).ok_or(DecodeInvariantError::NonFinite { row })?;
            SentimentLabel::from_class_id(column + 1)
        })
        .collect()
}
