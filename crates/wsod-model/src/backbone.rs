//! Convolutional backbone for image feature extraction.
//!
//! A VGG-style stack of conv+ReLU stages, each followed by 2x max
//! pooling. The backbone is a collaborator with a narrow contract: it
//! maps an image to a spatial feature map at a known spatial scale,
//! and nothing downstream depends on its internal architecture.

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};

/// Backbone configuration.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    /// Input image channels.
    pub in_channels: usize,
    /// Channel width of the first stage; later stages double it.
    pub base_channels: usize,
    /// Convolutions per stage. Each stage ends with a 2x max pool.
    pub stage_convs: [usize; 4],
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            base_channels: 64,
            stage_convs: [2, 2, 3, 3],
        }
    }
}

impl BackboneConfig {
    /// Channel count of the output feature map.
    pub fn out_channels(&self) -> usize {
        self.base_channels * 8
    }

    /// Ratio between feature-map and input coordinates (one halving
    /// per stage).
    pub fn spatial_scale(&self) -> f32 {
        1.0 / (1 << self.stage_convs.len()) as f32
    }
}

/// VGG-style feature extractor.
pub struct ConvBackbone {
    stages: Vec<Vec<Conv2d>>,
    config: BackboneConfig,
}

impl ConvBackbone {
    pub fn new(config: BackboneConfig, vb: VarBuilder) -> Result<Self> {
        let widths = [
            config.base_channels,
            config.base_channels * 2,
            config.base_channels * 4,
            config.base_channels * 8,
        ];

        let mut stages = Vec::with_capacity(config.stage_convs.len());
        let mut in_c = config.in_channels;

        for (i, (&n_convs, &out_c)) in config.stage_convs.iter().zip(widths.iter()).enumerate() {
            let stage = Self::make_stage(in_c, out_c, n_convs, vb.pp(format!("stage{}", i)))?;
            stages.push(stage);
            in_c = out_c;
        }

        Ok(Self { stages, config })
    }

    fn make_stage(
        in_channels: usize,
        out_channels: usize,
        n_convs: usize,
        vb: VarBuilder,
    ) -> Result<Vec<Conv2d>> {
        let conv_config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut convs = Vec::with_capacity(n_convs);
        convs.push(conv2d(
            in_channels,
            out_channels,
            3,
            conv_config,
            vb.pp("conv_0"),
        )?);
        for i in 1..n_convs {
            convs.push(conv2d(
                out_channels,
                out_channels,
                3,
                conv_config,
                vb.pp(format!("conv_{}", i)),
            )?);
        }

        Ok(convs)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `image` - Input tensor [1, in_channels, H, W]
    ///
    /// # Returns
    /// Feature map [1, out_channels, H * scale, W * scale]
    pub fn forward(&self, image: &Tensor) -> Result<Tensor> {
        let mut x = image.clone();
        for stage in &self.stages {
            for conv in stage {
                x = conv.forward(&x)?;
                x = x.relu()?;
            }
            x = x.max_pool2d(2)?;
        }
        Ok(x)
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }
}
