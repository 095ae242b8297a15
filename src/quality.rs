//! Quality gate: score extracted text and decide whether it needs refinement.
//!
//! Everything here is pure computation. The orchestrator calls
//! [`QualityAssessor::assess`] for every page and routes pages for which
//! [`QualityAssessor::should_retry`] returns `true` to the refinement backend.
//!
//! ## Corruption checks
//!
//! Five independent checks, OR-combined:
//!
//! 1. separator tokens (`<sep/>`) appearing twice or more on one line
//! 2. a non-whitespace character repeated 20+ times in a row
//! 3. a long run of characters from the configured [`ScriptBlock`]
//! 4. empty or whitespace-only text
//! 5. text without a single word character

use crate::config::{QualityThresholds, ScriptBlock};
use crate::error::QualityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Confidence used when the caller supplies none.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Run length at which one repeated character counts as corruption.
const REPEATED_CHAR_RUN: usize = 20;

/// Average word length that scores a perfect readability of 1.0.
const IDEAL_WORD_LENGTH: f64 = 5.0;

static RE_REPEATED_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<sep/>.*<sep/>").unwrap());

/// Scores derived from one text sample. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Backend confidence in [0, 1]; [`DEFAULT_CONFIDENCE`] when unreported.
    pub confidence_score: f64,
    /// Character count.
    pub text_length: usize,
    /// Whitespace-delimited tokens.
    pub word_count: usize,
    /// Share of characters that are neither alphanumeric nor whitespace.
    pub special_char_ratio: f64,
    /// 1.0 when the average word is 5 characters long, decaying with distance.
    pub readability_score: f64,
    pub has_corrupted_output: bool,
}

/// Scores text and applies the configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct QualityAssessor {
    thresholds: QualityThresholds,
}

impl QualityAssessor {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Score `text`. A missing or non-finite confidence becomes
    /// [`DEFAULT_CONFIDENCE`]; finite values are clamped into [0, 1].
    pub fn assess(&self, text: &str, confidence: Option<f64>) -> QualityMetrics {
        let confidence = match confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => DEFAULT_CONFIDENCE,
        };
        self.score(text, confidence)
    }

    /// Like [`assess`](Self::assess) but rejects a confidence outside [0, 1]
    /// instead of clamping it. Used where the confidence comes from a backend
    /// that may report garbage.
    pub fn try_assess(
        &self,
        text: &str,
        confidence: Option<f64>,
    ) -> Result<QualityMetrics, QualityError> {
        match confidence {
            Some(c) if !(0.0..=1.0).contains(&c) => Err(QualityError::InvalidConfidence(c)),
            Some(c) => Ok(self.score(text, c)),
            None => Ok(self.score(text, DEFAULT_CONFIDENCE)),
        }
    }

    /// `true` when the text should be sent to refinement.
    pub fn should_retry(&self, metrics: &QualityMetrics) -> bool {
        let t = &self.thresholds;
        metrics.has_corrupted_output
            || metrics.confidence_score < t.min_confidence
            || metrics.special_char_ratio > t.max_special_char_ratio
            || metrics.word_count < t.min_word_count
    }

    /// Run the five corruption checks.
    pub fn is_corrupted(&self, text: &str) -> bool {
        RE_REPEATED_SEPARATOR.is_match(text)
            || has_repeated_char_run(text, REPEATED_CHAR_RUN)
            || self
                .thresholds
                .script_block
                .as_ref()
                .is_some_and(|block| has_script_run(text, block))
            || text.trim().is_empty()
            || !text.chars().any(is_word_char)
    }

    fn score(&self, text: &str, confidence: f64) -> QualityMetrics {
        let text_length = text.chars().count();
        let word_count = text.split_whitespace().count();
        let special = text
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        let special_char_ratio = special as f64 / text_length.max(1) as f64;

        let readability_score = if word_count == 0 {
            0.0
        } else {
            let avg_word_length = text_length as f64 / word_count as f64;
            (1.0 / (1.0 + 0.1 * (avg_word_length - IDEAL_WORD_LENGTH).abs())).min(1.0)
        };

        QualityMetrics {
            confidence_score: confidence,
            text_length,
            word_count,
            special_char_ratio,
            readability_score,
            has_corrupted_output: self.is_corrupted(text),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn has_repeated_char_run(text: &str, min_run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= min_run && !c.is_whitespace() {
            return true;
        }
    }
    false
}

fn has_script_run(text: &str, block: &ScriptBlock) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if block.contains(c) {
            run += 1;
            if run >= block.min_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
