//! Shared value types for the detection pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Multi-hot image-level label vector over the object classes.
///
/// Ground truth exists only at image level: a 1.0 in slot `c` means
/// "class c appears somewhere in this image". Labels never attach to
/// individual regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLabels {
    values: Vec<f32>,
}

impl ImageLabels {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Build from the indices of the classes present in the image.
    pub fn from_positive_classes(num_classes: usize, positives: &[usize]) -> Self {
        let mut values = vec![0.0; num_classes];
        for &c in positives {
            if c < num_classes {
                values[c] = 1.0;
            }
        }
        Self { values }
    }

    /// All-negative label vector (image with no annotated class).
    pub fn empty(num_classes: usize) -> Self {
        Self {
            values: vec![0.0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Indices of the classes marked present.
    pub fn positive_classes(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.5)
            .map(|(c, _)| c)
            .collect()
    }

    pub fn is_positive(&self, class: usize) -> bool {
        self.values.get(class).is_some_and(|&v| v > 0.5)
    }

    /// Check the label dimension against the configured class count.
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        if self.values.len() != num_classes {
            return Err(Error::LabelDimMismatch {
                expected: num_classes,
                actual: self.values.len(),
            });
        }
        Ok(())
    }
}

/// The pair of confidence thresholds gating pseudo-label assignment.
///
/// A region whose supervision-source score reaches `gt` counts as
/// positive evidence; a score in `[ign, gt)` is too ambiguous to
/// penalize either way and drops out of the loss; below `ign` the
/// region is background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LambdaPair {
    pub gt: f32,
    pub ign: f32,
}

impl LambdaPair {
    pub fn new(gt: f32, ign: f32) -> Self {
        Self { gt, ign }
    }

    /// Both thresholds must be probabilities, and `gt >= ign`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gt) || !(0.0..=1.0).contains(&self.ign) {
            return Err(Error::Schedule(format!(
                "lambda thresholds out of [0,1]: gt={}, ign={}",
                self.gt, self.ign
            )));
        }
        if self.gt < self.ign {
            return Err(Error::Schedule(format!(
                "lambda_gt ({}) < lambda_ign ({})",
                self.gt, self.ign
            )));
        }
        Ok(())
    }
}
