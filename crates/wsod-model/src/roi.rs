//! Region feature pooling.
//!
//! Maps (feature map, region proposals) to one fixed-length feature
//! vector per region: RoI max pooling to a fixed resolution followed by
//! two fully-connected layers. Deterministic given identical inputs,
//! and the output row order matches the proposal order so the region
//! index stays stable across the whole forward pass.

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use wsod_core::RoiBox;

/// Configuration for the RoI pooling layer.
#[derive(Debug, Clone)]
pub struct RoiPoolConfig {
    /// Feature-map channel count (backbone output).
    pub in_channels: usize,
    /// Pooling output resolution (bins per side).
    pub resolution: usize,
    /// Feature-map coordinates per image coordinate.
    pub spatial_scale: f32,
    /// Region feature dimension after the FC layers.
    pub hidden_dim: usize,
}

impl Default for RoiPoolConfig {
    fn default() -> Self {
        Self {
            in_channels: 512,
            resolution: 7,
            spatial_scale: 1.0 / 16.0,
            hidden_dim: 4096,
        }
    }
}

/// RoI pooling plus the two FC layers producing region features.
pub struct RoiPoolLayer {
    fc1: Linear,
    fc2: Linear,
    config: RoiPoolConfig,
}

impl RoiPoolLayer {
    pub fn new(config: RoiPoolConfig, vb: VarBuilder) -> Result<Self> {
        let pooled_dim = config.in_channels * config.resolution * config.resolution;
        let fc1 = linear(pooled_dim, config.hidden_dim, vb.pp("fc1"))?;
        let fc2 = linear(config.hidden_dim, config.hidden_dim, vb.pp("fc2"))?;

        Ok(Self { fc1, fc2, config })
    }

    /// Pool region features from the backbone feature map.
    ///
    /// # Arguments
    /// * `features` - Feature map [1, channels, H, W]
    /// * `boxes` - Region proposals in image coordinates
    ///
    /// # Returns
    /// Region feature matrix [n_regions, hidden_dim]
    pub fn forward(&self, features: &Tensor, boxes: &[RoiBox]) -> Result<Tensor> {
        let pooled = self.pool(features, boxes)?;
        let x = self.fc1.forward(&pooled)?.relu()?;
        self.fc2.forward(&x)?.relu()
    }

    /// Max-pool each region to `resolution x resolution` bins.
    fn pool(&self, features: &Tensor, boxes: &[RoiBox]) -> Result<Tensor> {
        let (_, channels, height, width) = features.dims4()?;
        let res = self.config.resolution;
        let scale = self.config.spatial_scale;

        if boxes.is_empty() {
            return Tensor::zeros(
                (0, channels * res * res),
                features.dtype(),
                features.device(),
            );
        }

        let map: Vec<Vec<Vec<f32>>> = features.i(0)?.to_vec3()?;
        let mut rows = Vec::with_capacity(boxes.len());

        for roi in boxes {
            // Box corners in feature-map coordinates, clamped in-bounds.
            let fx1 = (roi.x1 * scale).floor().max(0.0) as usize;
            let fy1 = (roi.y1 * scale).floor().max(0.0) as usize;
            let fx2 = ((roi.x2 * scale).ceil() as usize).clamp(fx1 + 1, width.max(fx1 + 1));
            let fy2 = ((roi.y2 * scale).ceil() as usize).clamp(fy1 + 1, height.max(fy1 + 1));

            let roi_w = fx2 - fx1;
            let roi_h = fy2 - fy1;
            let bin_w = roi_w as f32 / res as f32;
            let bin_h = roi_h as f32 / res as f32;

            let mut row = Vec::with_capacity(channels * res * res);
            for channel in map.iter().take(channels) {
                for by in 0..res {
                    for bx in 0..res {
                        let y0 = fy1 + (by as f32 * bin_h).floor() as usize;
                        let y1 = (fy1 + ((by + 1) as f32 * bin_h).ceil() as usize).min(height);
                        let x0 = fx1 + (bx as f32 * bin_w).floor() as usize;
                        let x1 = (fx1 + ((bx + 1) as f32 * bin_w).ceil() as usize).min(width);

                        let mut max_val = f32::NEG_INFINITY;
                        for y in y0..y1.max(y0 + 1).min(height) {
                            for x in x0..x1.max(x0 + 1).min(width) {
                                max_val = max_val.max(channel[y][x]);
                            }
                        }
                        row.push(if max_val.is_finite() { max_val } else { 0.0 });
                    }
                }
            }
            rows.push(row);
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Tensor::from_vec(
            flat,
            (boxes.len(), channels * res * res),
            features.device(),
        )
    }

    pub fn config(&self) -> &RoiPoolConfig {
        &self.config
    }
}
