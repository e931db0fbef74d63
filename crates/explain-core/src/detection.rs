//! Detection records produced by the evaluation network
//!
//! A detection row has a fixed layout of [`DETECTION_ROW_WIDTH`] values:
//! `[image_id, label, confidence, tp_flag, fp_flag, xmin, ymin, xmax, ymax, instance_index]`.
//! The `(tp_flag, fp_flag)` pair is the outcome code that classifies the detection
//! against ground truth.

use crate::error::ExplainError;
use e2x_common::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of values in one raw detection row
pub const DETECTION_ROW_WIDTH: usize = 10;

/// Number of values in one ground-truth label row
pub const GROUND_TRUTH_ROW_WIDTH: usize = 8;

/// Classification of a detection against ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    FalseNegative,
    Unknown,
}

impl Outcome {
    #[must_use]
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Outcome::TruePositive => "TP",
            Outcome::FalsePositive => "FP",
            Outcome::FalseNegative => "FN",
            Outcome::Unknown => "??",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Two-valued outcome code attached to every detection row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCode {
    pub tp: f32,
    pub fp: f32,
}

impl OutcomeCode {
    pub const TRUE_POSITIVE: OutcomeCode = OutcomeCode { tp: 1.0, fp: 0.0 };
    pub const FALSE_POSITIVE: OutcomeCode = OutcomeCode { tp: 0.0, fp: 1.0 };
    pub const FALSE_NEGATIVE: OutcomeCode = OutcomeCode { tp: 1.0, fp: 1.0 };

    /// Decode the flag pair; flags are read as set when above 0.5
    #[must_use]
    pub fn decode(&self) -> Outcome {
        match (self.tp > 0.5, self.fp > 0.5) {
            (true, false) => Outcome::TruePositive,
            (false, true) => Outcome::FalsePositive,
            (true, true) => Outcome::FalseNegative,
            (false, false) => Outcome::Unknown,
        }
    }
}

/// One candidate object instance reported by the evaluation network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub image_id: f32,
    pub label: u32,
    pub confidence: f32,
    pub outcome: OutcomeCode,
    pub bbox: BoundingBox,
    /// Instance index used to address this detection in the gradient network output
    pub instance_index: usize,
}

impl Detection {
    /// Parse a detection from a raw row
    pub fn from_row(row: &[f32]) -> Result<Self, ExplainError> {
        if row.len() < DETECTION_ROW_WIDTH {
            return Err(ExplainError::MalformedDetection {
                expected: DETECTION_ROW_WIDTH,
                actual: row.len(),
            });
        }

        Ok(Self {
            image_id: row[0],
            label: row[1].max(0.0) as u32,
            confidence: row[2],
            outcome: OutcomeCode {
                tp: row[3],
                fp: row[4],
            },
            bbox: BoundingBox::new(row[5], row[6], row[7], row[8]),
            instance_index: row[9].max(0.0) as usize,
        })
    }

    #[must_use]
    pub fn to_row(&self) -> [f32; DETECTION_ROW_WIDTH] {
        [
            self.image_id,
            self.label as f32,
            self.confidence,
            self.outcome.tp,
            self.outcome.fp,
            self.bbox.xmin,
            self.bbox.ymin,
            self.bbox.xmax,
            self.bbox.ymax,
            self.instance_index as f32,
        ]
    }

    #[must_use]
    pub fn decode(&self) -> Outcome {
        self.outcome.decode()
    }

    /// Rewrite the outcome code of a missed true positive so it reads as a false negative
    pub fn mark_false_negative(&mut self) {
        self.outcome.fp = OutcomeCode::FALSE_NEGATIVE.fp;
    }
}

/// Parse a flat row-major buffer of detection rows
///
/// The first `skip_rows` rows are class declaration rows and are dropped.
pub fn parse_detection_rows(
    data: &[f32],
    row_width: usize,
    skip_rows: usize,
) -> Result<Vec<Detection>, ExplainError> {
    if row_width < DETECTION_ROW_WIDTH || data.len() % row_width != 0 {
        return Err(ExplainError::MalformedDetection {
            expected: DETECTION_ROW_WIDTH,
            actual: row_width,
        });
    }

    data.chunks_exact(row_width)
        .skip(skip_rows)
        .map(Detection::from_row)
        .collect()
}

/// Ground-truth object annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthBox {
    pub label: u32,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub difficult: bool,
}

impl GroundTruthBox {
    /// Label row consumed by the evaluation network:
    /// `[image_id, label, instance_id, xmin, ymin, xmax, ymax, difficult]`
    #[must_use]
    pub fn to_row(&self, image_id: usize, instance_id: usize) -> [f32; GROUND_TRUTH_ROW_WIDTH] {
        [
            image_id as f32,
            self.label as f32,
            instance_id as f32,
            self.bbox.xmin,
            self.bbox.ymin,
            self.bbox.xmax,
            self.bbox.ymax,
            if self.difficult { 1.0 } else { 0.0 },
        ]
    }
}
