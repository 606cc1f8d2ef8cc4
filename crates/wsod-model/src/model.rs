//! Detection model orchestrator.
//!
//! Wires backbone, RoI pooling, MIL head, refinement chain and
//! distillation head into one forward pass. Training and inference are
//! separate entry points rather than a mutable train/eval flag, so each
//! path is independently testable. The only piece of externally driven
//! state is the inner-iteration counter, set by the caller between
//! steps and never incremented here.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use wsod_core::{DetectorConfig, Error, ImageLabels, LambdaPair, Result, RoiBox};

use crate::backbone::{BackboneConfig, ConvBackbone};
use crate::distillation::DistillationHead;
use crate::mil::{mil_loss, MilHead};
use crate::refinement::{refinement_loss, RefinementAgents};
use crate::roi::{RoiPoolConfig, RoiPoolLayer};
use crate::schedule::LambdaSchedule;

/// The complete weakly-supervised detection model.
pub struct DetectionModel {
    backbone: ConvBackbone,
    roi_pool: RoiPoolLayer,
    mil: MilHead,
    refinement_agents: RefinementAgents,
    distillation: DistillationHead,
    schedule: LambdaSchedule,
    config: DetectorConfig,
    inner_iter: u64,
}

/// Raw per-region scores shared by the training and inference paths.
pub struct RegionScores {
    /// Backbone feature map [1, channels, H', W'].
    pub blob_conv: Tensor,
    /// MIL score matrix [n_regions, num_classes].
    pub mil_score: Tensor,
    /// K refinement score matrices, each [n_regions, num_classes + 1].
    pub refine_score: Vec<Tensor>,
    /// Student score matrix [n_regions, num_classes + 1].
    pub distillation_score: Tensor,
}

/// Losses and observability values from one training forward.
pub struct TrainingOutput {
    /// "loss_im_cls", "refine_loss0" .. "refine_loss{K-1}",
    /// "distillation_loss" -> scalar loss tensor.
    pub losses: BTreeMap<String, Tensor>,
    /// The threshold pair this forward used.
    pub lambda: LambdaPair,
}

/// Raw outputs from one inference forward. No losses, no pseudo-labels.
pub struct InferenceOutput {
    pub blob_conv: Tensor,
    pub rois: Vec<RoiBox>,
    pub cls_score: Tensor,
    pub refine_score: Vec<Tensor>,
    pub distillation_score: Tensor,
}

impl DetectionModel {
    pub fn new(
        config: DetectorConfig,
        backbone_config: BackboneConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;

        let backbone = ConvBackbone::new(backbone_config.clone(), vb.pp("backbone"))?;

        let roi_pool = RoiPoolLayer::new(
            RoiPoolConfig {
                in_channels: backbone_config.out_channels(),
                resolution: config.roi_resolution,
                spatial_scale: backbone_config.spatial_scale(),
                hidden_dim: config.hidden_dim,
            },
            vb.pp("roi_pool"),
        )?;

        let mil = MilHead::new(config.hidden_dim, config.num_classes, vb.pp("mil"))?;
        let refinement_agents = RefinementAgents::new(
            config.hidden_dim,
            config.num_classes,
            config.refine_stages,
            vb.pp("refine"),
        )?;
        let distillation =
            DistillationHead::new(config.hidden_dim, config.num_classes, vb.pp("distill"))?;

        let schedule = LambdaSchedule::new(&config.lambda)?;

        Ok(Self {
            backbone,
            roi_pool,
            mil,
            refinement_agents,
            distillation,
            schedule,
            config,
            inner_iter: 0,
        })
    }

    /// Set the training-iteration counter. The caller owns the counter;
    /// the same value drives both the lambda schedule and the reported
    /// lambda pair.
    pub fn set_inner_iter(&mut self, inner_iter: u64) {
        self.inner_iter = inner_iter;
    }

    pub fn inner_iter(&self) -> u64 {
        self.inner_iter
    }

    /// Backbone -> RoI pooling -> all four heads.
    ///
    /// Every score matrix is checked against the region count before it
    /// is handed out; a mismatch is a contract violation, not something
    /// to broadcast around.
    pub fn score_regions(&self, image: &Tensor, boxes: &[RoiBox]) -> Result<RegionScores> {
        let blob_conv = self.backbone.forward(image)?;
        let box_feat = self.roi_pool.forward(&blob_conv, boxes)?;

        let mil_score = self.mil.forward(&box_feat)?;
        let refine_score = self.refinement_agents.forward(&box_feat)?;
        let distillation_score = self.distillation.forward(&box_feat)?;

        ensure_rows(&mil_score, boxes.len())?;
        for score in &refine_score {
            ensure_rows(score, boxes.len())?;
        }
        ensure_rows(&distillation_score, boxes.len())?;

        Ok(RegionScores {
            blob_conv,
            mil_score,
            refine_score,
            distillation_score,
        })
    }

    /// Training forward: all named losses plus the lambda pair used.
    pub fn forward_train(
        &self,
        image: &Tensor,
        boxes: &[RoiBox],
        labels: &ImageLabels,
    ) -> Result<TrainingOutput> {
        labels.validate(self.config.num_classes)?;

        let scores = self.score_regions(image, boxes)?;
        let num_classes = self.config.num_classes;

        let lambda = self.schedule.at(self.inner_iter);
        tracing::debug!(
            iter = self.inner_iter,
            lambda_gt = lambda.gt,
            lambda_ign = lambda.ign,
            regions = boxes.len(),
            "training forward"
        );

        let mut losses = BTreeMap::new();

        let im_cls_score = MilHead::image_score(&scores.mil_score)?;
        losses.insert("loss_im_cls".to_string(), mil_loss(&im_cls_score, labels)?);

        // Refinement chain: stage 0 is supervised by the MIL score,
        // stage i by stage i-1's output.
        for (i, stage_score) in scores.refine_score.iter().enumerate() {
            let source = if i == 0 {
                &scores.mil_score
            } else {
                &scores.refine_score[i - 1]
            };
            let loss =
                refinement_loss(boxes, source, labels, stage_score, lambda, num_classes)?;
            losses.insert(format!("refine_loss{}", i), loss);
        }

        let distillation_loss = self.distillation.loss(
            boxes,
            &scores.refine_score,
            labels,
            &scores.distillation_score,
            lambda,
        )?;
        losses.insert("distillation_loss".to_string(), distillation_loss);

        Ok(TrainingOutput { losses, lambda })
    }

    /// Inference forward: raw scores only. No loss computation, no
    /// pseudo-labeling, no schedule evaluation.
    pub fn forward_inference(&self, image: &Tensor, boxes: &[RoiBox]) -> Result<InferenceOutput> {
        let scores = self.score_regions(image, boxes)?;
        let cls_score = MilHead::image_score(&scores.mil_score)?;

        Ok(InferenceOutput {
            blob_conv: scores.blob_conv,
            rois: boxes.to_vec(),
            cls_score,
            refine_score: scores.refine_score,
            distillation_score: scores.distillation_score,
        })
    }

    pub fn schedule(&self) -> &LambdaSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

fn ensure_rows(score: &Tensor, n_regions: usize) -> Result<()> {
    let (rows, _) = score.dims2()?;
    if rows != n_regions {
        return Err(Error::RegionCountMismatch {
            expected: n_regions,
            actual: rows,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::assign_pseudo_labels;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use wsod_core::LambdaScheduleConfig;

    fn tiny_config() -> (DetectorConfig, BackboneConfig) {
        let config = DetectorConfig {
            num_classes: 20,
            refine_stages: 3,
            roi_resolution: 2,
            hidden_dim: 32,
            lambda: LambdaScheduleConfig::LogWarmup {
                start: LambdaPair::new(0.5, 0.1),
                end: LambdaPair::new(0.7, 0.3),
                warmup_iters: 1000,
            },
        };
        let backbone = BackboneConfig {
            in_channels: 3,
            base_channels: 4,
            stage_convs: [1, 1, 1, 1],
        };
        (config, backbone)
    }

    fn tiny_model() -> Result<DetectionModel> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let (config, backbone) = tiny_config();
        DetectionModel::new(config, backbone, vb)
    }

    fn test_inputs(device: &Device) -> Result<(Tensor, Vec<RoiBox>)> {
        let image = Tensor::randn(0f32, 1.0, (1, 3, 64, 64), device)?;
        let boxes = vec![
            RoiBox::new(0.0, 0.0, 20.0, 20.0),
            RoiBox::new(10.0, 10.0, 40.0, 40.0),
            RoiBox::new(30.0, 5.0, 60.0, 35.0),
            RoiBox::new(5.0, 40.0, 25.0, 60.0),
        ];
        Ok((image, boxes))
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let (mut config, backbone) = tiny_config();
        config.refine_stages = 0;
        assert!(DetectionModel::new(config, backbone, vb).is_err());
    }

    #[test]
    fn test_training_loss_keys() -> Result<()> {
        let device = Device::Cpu;
        let mut model = tiny_model()?;
        model.set_inner_iter(0);

        let (image, boxes) = test_inputs(&device)?;
        let labels = ImageLabels::from_positive_classes(20, &[7]);

        let out = model.forward_train(&image, &boxes, &labels)?;
        let keys: Vec<&str> = out.losses.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "distillation_loss",
                "loss_im_cls",
                "refine_loss0",
                "refine_loss1",
                "refine_loss2",
            ]
        );

        for (name, loss) in &out.losses {
            let v: f32 = loss.to_scalar()?;
            assert!(v.is_finite(), "{} not finite", name);
            assert!(v >= 0.0, "{} negative", name);
        }

        assert!(out.lambda.gt >= out.lambda.ign);
        Ok(())
    }

    #[test]
    fn test_stage0_pseudo_labels_from_mil_score() -> Result<()> {
        // K=3, C=20, N=4, one positive class: stage 0's supervision
        // source is the MIL score; its argmax row is the single
        // positive pseudo-ground-truth region, every other region is
        // ignored or background under the iteration-0 lambda pair.
        let device = Device::Cpu;
        let model = tiny_model()?;
        let (image, boxes) = test_inputs(&device)?;
        let class = 7usize;
        let labels = ImageLabels::from_positive_classes(20, &[class]);

        let scores = model.score_regions(&image, &boxes)?;
        let lambda = model.schedule().at(0);
        let targets = assign_pseudo_labels(&boxes, &scores.mil_score, &labels, lambda, 20)?;

        assert_eq!(targets.seeds.len(), 1);
        assert_eq!(targets.seeds[0].class, class);

        // Argmax row of the MIL score's class column.
        let mil: Vec<Vec<f32>> = scores.mil_score.to_vec2()?;
        let argmax = (0..4)
            .max_by(|&a, &b| mil[a][class].partial_cmp(&mil[b][class]).unwrap())
            .unwrap();
        assert_eq!(targets.seeds[0].region, argmax);

        let mut positives = 0;
        for r in 0..4 {
            let is_positive = targets.target_class[r] != 20 && targets.weight[r] > 0.0;
            if is_positive {
                positives += 1;
                assert_eq!(r, argmax);
            } else {
                // Ignored (weight 0) or background.
                assert!(targets.weight[r] == 0.0 || targets.target_class[r] == 20);
            }
        }
        assert_eq!(positives, 1);
        Ok(())
    }

    #[test]
    fn test_zero_label_training_is_finite() -> Result<()> {
        let device = Device::Cpu;
        let model = tiny_model()?;
        let (image, boxes) = test_inputs(&device)?;
        let labels = ImageLabels::empty(20);

        let out = model.forward_train(&image, &boxes, &labels)?;
        for (name, loss) in &out.losses {
            let v: f32 = loss.to_scalar()?;
            assert!(v.is_finite() && v >= 0.0, "{} = {}", name, v);
        }
        Ok(())
    }

    #[test]
    fn test_inference_matches_training_inputs() -> Result<()> {
        let device = Device::Cpu;
        let mut model = tiny_model()?;
        model.set_inner_iter(42);

        let (image, boxes) = test_inputs(&device)?;
        let labels = ImageLabels::from_positive_classes(20, &[3]);

        // Training succeeds, then the identical inputs through the
        // inference path must not fail and expose the raw outputs.
        model.forward_train(&image, &boxes, &labels)?;
        let out = model.forward_inference(&image, &boxes)?;

        assert_eq!(out.rois.len(), 4);
        assert_eq!(out.cls_score.dims(), &[20]);
        assert_eq!(out.refine_score.len(), 3);
        for score in &out.refine_score {
            assert_eq!(score.dims(), &[4, 21]);
        }
        assert_eq!(out.distillation_score.dims(), &[4, 21]);
        assert_eq!(out.blob_conv.dims()[0], 1);
        Ok(())
    }

    #[test]
    fn test_region_row_invariant() -> Result<()> {
        let device = Device::Cpu;
        let model = tiny_model()?;
        let (image, boxes) = test_inputs(&device)?;

        let scores = model.score_regions(&image, &boxes)?;
        assert_eq!(scores.mil_score.dims()[0], boxes.len());
        for s in &scores.refine_score {
            assert_eq!(s.dims()[0], boxes.len());
        }
        assert_eq!(scores.distillation_score.dims()[0], boxes.len());
        Ok(())
    }

    #[test]
    fn test_label_dim_mismatch_rejected() -> Result<()> {
        let device = Device::Cpu;
        let model = tiny_model()?;
        let (image, boxes) = test_inputs(&device)?;
        let labels = ImageLabels::from_positive_classes(7, &[1]);

        assert!(model.forward_train(&image, &boxes, &labels).is_err());
        Ok(())
    }
}
