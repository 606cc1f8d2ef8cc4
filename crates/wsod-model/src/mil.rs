//! Multiple-instance learning head.
//!
//! Two-stream scoring in the WSDDN style: a classification stream
//! softmaxed over classes and a detection stream softmaxed over
//! regions, multiplied elementwise. Summing the product over regions
//! gives a per-class image score in [0, 1], trained against the
//! image-level labels with binary cross-entropy.

use candle_core::{Result, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{linear, Linear, VarBuilder};

use candle_core::Module;
use wsod_core::ImageLabels;

const SCORE_EPS: f32 = 1e-6;

/// MIL scoring head.
///
/// Scores are per-region, per-class probabilities with no background
/// column; the background concept only exists in the refinement stages.
pub struct MilHead {
    cls_stream: Linear,
    det_stream: Linear,
    num_classes: usize,
}

impl MilHead {
    pub fn new(feature_dim: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let cls_stream = linear(feature_dim, num_classes, vb.pp("cls"))?;
        let det_stream = linear(feature_dim, num_classes, vb.pp("det"))?;

        Ok(Self {
            cls_stream,
            det_stream,
            num_classes,
        })
    }

    /// Score each region per class.
    ///
    /// # Arguments
    /// * `features` - Region feature matrix [n_regions, feature_dim]
    ///
    /// # Returns
    /// Score matrix [n_regions, num_classes]
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let cls = softmax(&self.cls_stream.forward(features)?, 1)?;
        let det = softmax(&self.det_stream.forward(features)?, 0)?;
        cls * det
    }

    /// Image-level aggregate: sum of region scores per class.
    pub fn image_score(mil_score: &Tensor) -> Result<Tensor> {
        mil_score.sum(0)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Image-level multi-label classification loss.
///
/// Binary cross-entropy over classes on the clamped image score.
pub fn mil_loss(image_score: &Tensor, labels: &ImageLabels) -> Result<Tensor> {
    let device = image_score.device();
    let y = Tensor::from_vec(labels.values().to_vec(), labels.num_classes(), device)?;

    let p = image_score.clamp(SCORE_EPS, 1.0 - SCORE_EPS)?;
    let ones = Tensor::ones_like(&p)?;

    let pos = (&y * p.log()?)?;
    let neg = ((&ones - &y)? * (&ones - &p)?.log()?)?;

    (pos + neg)?.mean_all()?.neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_mil_score_shape_and_range() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let head = MilHead::new(32, 5, vb)?;
        let features = Tensor::randn(0f32, 1.0, (6, 32), &device)?;
        let scores = head.forward(&features)?;

        assert_eq!(scores.dims(), &[6, 5]);

        // Image score is a per-class probability: sum over regions of
        // softmax(classes) * softmax(regions) stays in [0, 1].
        let image: Vec<f32> = MilHead::image_score(&scores)?.to_vec1()?;
        for &s in &image {
            assert!((0.0..=1.0 + 1e-5).contains(&s));
        }
        Ok(())
    }

    #[test]
    fn test_mil_loss_finite() -> Result<()> {
        let device = Device::Cpu;
        let score = Tensor::new(&[0.2f32, 0.9, 0.0, 1.0], &device)?;
        let labels = ImageLabels::from_positive_classes(4, &[1]);

        let loss: f32 = mil_loss(&score, &labels)?.to_scalar()?;
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
        Ok(())
    }

    #[test]
    fn test_mil_loss_all_negative_labels() -> Result<()> {
        let device = Device::Cpu;
        let score = Tensor::new(&[0.2f32, 0.9, 0.4], &device)?;
        let labels = ImageLabels::empty(3);

        let loss: f32 = mil_loss(&score, &labels)?.to_scalar()?;
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
        Ok(())
    }
}
