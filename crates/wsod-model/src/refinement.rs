//! Online refinement chain.
//!
//! K classifier stages re-score the regions in sequence. No box-level
//! ground truth exists, so each stage is trained against pseudo-labels
//! mined from its supervision source: the MIL score matrix for stage 0,
//! the previous stage's own output for every later stage.
//!
//! Pseudo-label mining per image:
//! - For every class present in the image-level labels, the region with
//!   the highest supervision-source score is the canonical
//!   pseudo-ground-truth seed for that class and is always positive.
//! - Any other region scoring at least `lambda_gt` for a present class
//!   is also positive, weighted by its IoU with the canonical seed box
//!   of the class that produced its label.
//! - Regions whose best present-class score lands in
//!   `[lambda_ign, lambda_gt)` drop out of the loss entirely: evidence
//!   too ambiguous to reward or punish.
//! - Everything below `lambda_ign` is background.
//!
//! Score matrices are [n_regions, num_classes + 1] with the background
//! column last, so class columns line up with the MIL matrix.

use candle_core::Tensor;
use candle_nn::ops::softmax;
use candle_nn::{linear, Linear, VarBuilder};

use candle_core::Module;
use wsod_core::{Error, ImageLabels, LambdaPair, Result, RoiBox};

const SCORE_EPS: f32 = 1e-6;

/// The K refinement classifier stages.
///
/// K is fixed at construction; `forward` always returns exactly K score
/// matrices, each [n_regions, num_classes + 1] and softmax-normalized
/// per region.
pub struct RefinementAgents {
    heads: Vec<Linear>,
    num_classes: usize,
}

impl RefinementAgents {
    pub fn new(
        feature_dim: usize,
        num_classes: usize,
        stages: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if stages == 0 {
            return Err(Error::Config("refinement chain needs at least one stage".into()));
        }

        let mut heads = Vec::with_capacity(stages);
        for i in 0..stages {
            heads.push(linear(
                feature_dim,
                num_classes + 1,
                vb.pp(format!("stage_{}", i)),
            )?);
        }

        Ok(Self { heads, num_classes })
    }

    /// Score the regions with every stage.
    pub fn forward(&self, features: &Tensor) -> Result<Vec<Tensor>> {
        let mut scores = Vec::with_capacity(self.heads.len());
        for head in &self.heads {
            let logits = head.forward(features)?;
            scores.push(softmax(&logits, 1)?);
        }
        Ok(scores)
    }

    pub fn stages(&self) -> usize {
        self.heads.len()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// A canonical pseudo-ground-truth region for one present class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedRegion {
    pub region: usize,
    pub class: usize,
    pub score: f32,
}

/// Per-region training targets mined from a supervision source.
///
/// `target_class == num_classes` means background; a zero weight means
/// the region is excluded from the loss.
#[derive(Debug, Clone)]
pub struct PseudoTargets {
    pub target_class: Vec<usize>,
    pub weight: Vec<f32>,
    pub seeds: Vec<SeedRegion>,
}

impl PseudoTargets {
    pub fn num_regions(&self) -> usize {
        self.target_class.len()
    }
}

/// Derive the pseudo-label assignment for every region.
///
/// `source` is the supervision-source score matrix: [n, num_classes]
/// from the MIL head or [n, num_classes + 1] from a refinement stage;
/// class columns coincide. The source is read as plain values, so no
/// gradient flows back into it.
pub fn assign_pseudo_labels(
    boxes: &[RoiBox],
    source: &Tensor,
    labels: &ImageLabels,
    lambda: LambdaPair,
    num_classes: usize,
) -> Result<PseudoTargets> {
    let (rows, cols) = source.dims2()?;
    if rows != boxes.len() {
        return Err(Error::RegionCountMismatch {
            expected: boxes.len(),
            actual: rows,
        });
    }
    if cols < num_classes {
        return Err(Error::ScoreDimMismatch {
            cols,
            min_cols: num_classes,
        });
    }
    labels.validate(num_classes)?;

    let n = boxes.len();
    let background = num_classes;
    let mut target_class = vec![background; n];
    let mut weight = vec![1.0f32; n];

    let positives = labels.positive_classes();
    if positives.is_empty() || n == 0 {
        // Image holds only background evidence; every region trains as
        // a full-weight negative.
        return Ok(PseudoTargets {
            target_class,
            weight,
            seeds: Vec::new(),
        });
    }

    let scores: Vec<Vec<f32>> = source.to_vec2()?;

    // One canonical seed per present class: the argmax region.
    let mut seeds = Vec::with_capacity(positives.len());
    for &c in &positives {
        let mut best_region = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (r, row) in scores.iter().enumerate() {
            if row[c] > best_score {
                best_score = row[c];
                best_region = r;
            }
        }
        seeds.push(SeedRegion {
            region: best_region,
            class: c,
            score: best_score,
        });
    }

    for (r, row) in scores.iter().enumerate() {
        // Canonical seeds are positive regardless of their score value.
        if let Some(seed) = seeds.iter().filter(|s| s.region == r).max_by(|a, b| {
            a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            target_class[r] = seed.class;
            weight[r] = 1.0;
            continue;
        }

        let (best_class, best_score) = positives
            .iter()
            .map(|&c| (c, row[c]))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();

        if best_score >= lambda.gt {
            // Confident positive: label it with its best class, weight
            // by overlap with that class's canonical seed box.
            let seed = seeds
                .iter()
                .find(|s| s.class == best_class)
                .expect("every present class has a seed");
            target_class[r] = best_class;
            weight[r] = boxes[r].iou(&boxes[seed.region]);
        } else if best_score >= lambda.ign {
            // Ambiguous evidence: excluded from the loss.
            weight[r] = 0.0;
        }
        // Below lambda_ign: stays background with full weight.
    }

    Ok(PseudoTargets {
        target_class,
        weight,
        seeds,
    })
}

/// Weighted cross-entropy refinement loss for one stage.
///
/// `stage_scores` are the stage's own softmaxed scores
/// [n, num_classes + 1]; `source` is the supervision-source matrix the
/// pseudo-labels are mined from.
pub fn refinement_loss(
    boxes: &[RoiBox],
    source: &Tensor,
    labels: &ImageLabels,
    stage_scores: &Tensor,
    lambda: LambdaPair,
    num_classes: usize,
) -> Result<Tensor> {
    let (rows, cols) = stage_scores.dims2()?;
    if rows != boxes.len() {
        return Err(Error::RegionCountMismatch {
            expected: boxes.len(),
            actual: rows,
        });
    }
    if cols != num_classes + 1 {
        return Err(Error::ScoreDimMismatch {
            cols,
            min_cols: num_classes + 1,
        });
    }

    let targets = assign_pseudo_labels(boxes, source, labels, lambda, num_classes)?;

    let n = boxes.len();
    if n == 0 {
        return Ok(Tensor::zeros((), stage_scores.dtype(), stage_scores.device())?);
    }

    // One-hot targets and per-region weights as constant tensors; the
    // gradient only flows through the stage's own scores.
    let mut one_hot = vec![0.0f32; n * (num_classes + 1)];
    for (r, &t) in targets.target_class.iter().enumerate() {
        one_hot[r * (num_classes + 1) + t] = 1.0;
    }
    let one_hot = Tensor::from_vec(one_hot, (n, num_classes + 1), stage_scores.device())?;
    let weights = Tensor::from_vec(targets.weight.clone(), n, stage_scores.device())?;

    let log_p = stage_scores.clamp(SCORE_EPS, 1.0)?.log()?;
    let picked = (log_p * one_hot)?.sum(1)?;
    let loss = (picked * weights)?.sum_all()?.neg()?;
    Ok((loss / n as f64)?)
}
