//! Distillation head.
//!
//! A single student stage trained to match the consensus of the whole
//! refinement chain: its supervision source is the elementwise average
//! of all K refinement score matrices, pushed through the identical
//! pseudo-labeling and weighted cross-entropy routine the refinement
//! stages use, with the same lambda pair of that forward pass.

use candle_core::Tensor;
use candle_nn::ops::softmax;
use candle_nn::{linear, Linear, VarBuilder};

use candle_core::Module;
use wsod_core::{Error, ImageLabels, LambdaPair, Result, RoiBox};

use crate::refinement::refinement_loss;

/// Student classifier distilling the refinement chain.
pub struct DistillationHead {
    head: Linear,
    num_classes: usize,
}

impl DistillationHead {
    pub fn new(feature_dim: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let head = linear(feature_dim, num_classes + 1, vb.pp("student"))?;
        Ok(Self { head, num_classes })
    }

    /// Score the regions: [n_regions, num_classes + 1], softmaxed per
    /// region, background column last.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let logits = self.head.forward(features)?;
        Ok(softmax(&logits, 1)?)
    }

    /// Distillation loss against the averaged refinement output.
    pub fn loss(
        &self,
        boxes: &[RoiBox],
        refine_scores: &[Tensor],
        labels: &ImageLabels,
        student_scores: &Tensor,
        lambda: LambdaPair,
    ) -> Result<Tensor> {
        let supervision = average_scores(refine_scores)?;
        refinement_loss(
            boxes,
            &supervision,
            labels,
            student_scores,
            lambda,
            self.num_classes,
        )
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Elementwise average of the K refinement score matrices.
///
/// Accumulated fresh on every call; there is no running state carried
/// between forward passes.
pub fn average_scores(refine_scores: &[Tensor]) -> Result<Tensor> {
    let first = refine_scores
        .first()
        .ok_or_else(|| Error::Config("cannot average zero refinement stages".into()))?;

    let mut sum = first.clone();
    for score in &refine_scores[1..] {
        sum = (sum + score)?;
    }
    Ok((sum / refine_scores.len() as f64)?)
}
