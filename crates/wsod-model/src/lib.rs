//! # WSOD-Model
//!
//! Weakly-supervised object detection trained from image-level labels
//! only. Region proposals are scored by a multiple-instance learning
//! (MIL) head; a chain of refinement stages then re-scores the regions,
//! each stage supervised by pseudo-ground-truth mined from the previous
//! stage's output, and a distillation head learns to match the average
//! of all refinement stages.
//!
//! ## Training signal
//!
//! No bounding-box annotation exists. Each refinement stage turns the
//! previous stage's scores into per-region pseudo-labels, with an
//! iteration-dependent pair of confidence thresholds (lambda_gt,
//! lambda_ign) deciding which regions count as positive evidence, which
//! are too ambiguous to penalize, and which are background.

pub mod backbone;
pub mod distillation;
pub mod engine;
pub mod mil;
pub mod model;
pub mod refinement;
pub mod roi;
pub mod schedule;

pub use backbone::*;
pub use distillation::*;
pub use engine::*;
pub use mil::*;
pub use model::*;
pub use refinement::*;
pub use roi::*;
pub use schedule::*;
