//! Detector configuration.
//!
//! One explicit configuration struct, built once and handed to every
//! component at construction time. There is no ambient global config.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::LambdaPair;

/// Complete detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of object classes (background excluded).
    pub num_classes: usize,

    /// Number of refinement stages K in the chain.
    pub refine_stages: usize,

    /// RoI pooling output resolution (bins per side).
    pub roi_resolution: usize,

    /// Region feature dimension after the pooling FC layers.
    pub hidden_dim: usize,

    /// Adaptive lambda schedule parameters.
    pub lambda: LambdaScheduleConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            // Pascal VOC class count, the original training setup.
            num_classes: 20,
            refine_stages: 3,
            roi_resolution: 7,
            hidden_dim: 4096,
            lambda: LambdaScheduleConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Validate once at construction; invalid configuration fails fast
    /// instead of producing silently degenerate behavior.
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be >= 1".into()));
        }
        if self.refine_stages == 0 {
            return Err(Error::Config("refine_stages must be >= 1".into()));
        }
        if self.roi_resolution == 0 {
            return Err(Error::Config("roi_resolution must be >= 1".into()));
        }
        if self.hidden_dim == 0 {
            return Err(Error::Config("hidden_dim must be >= 1".into()));
        }
        self.lambda.validate()
    }

    /// Load configuration from file, with `WSOD_*` environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WSOD"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from environment variables only.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("WSOD"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Lambda schedule curve parameters.
///
/// Either a literal breakpoint table (piecewise-linear interpolation,
/// held constant past the last breakpoint) or the logarithmic warm-up
/// curve used by the original training recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum LambdaScheduleConfig {
    Table { breakpoints: Vec<LambdaBreakpoint> },
    LogWarmup {
        start: LambdaPair,
        end: LambdaPair,
        warmup_iters: u64,
    },
}

/// One row of the schedule table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LambdaBreakpoint {
    pub iter: u64,
    pub gt: f32,
    pub ign: f32,
}

impl LambdaBreakpoint {
    pub fn pair(&self) -> LambdaPair {
        LambdaPair::new(self.gt, self.ign)
    }
}

impl Default for LambdaScheduleConfig {
    fn default() -> Self {
        Self::LogWarmup {
            start: LambdaPair::new(0.5, 0.1),
            end: LambdaPair::new(0.7, 0.3),
            warmup_iters: 20_000,
        }
    }
}

impl LambdaScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Table { breakpoints } => {
                if breakpoints.is_empty() {
                    return Err(Error::Schedule("empty breakpoint table".into()));
                }
                for pair in breakpoints.windows(2) {
                    if pair[1].iter <= pair[0].iter {
                        return Err(Error::Schedule(format!(
                            "breakpoint iterations not strictly increasing at iter {}",
                            pair[1].iter
                        )));
                    }
                }
                for bp in breakpoints {
                    bp.pair().validate()?;
                }
                Ok(())
            }
            Self::LogWarmup {
                start,
                end,
                warmup_iters,
            } => {
                if *warmup_iters == 0 {
                    return Err(Error::Schedule("warmup_iters must be >= 1".into()));
                }
                start.validate()?;
                end.validate()
            }
        }
    }
}
