//! Adaptive lambda schedule.
//!
//! A pure function of the training-iteration counter producing the
//! (lambda_gt, lambda_ign) threshold pair. Early training accepts
//! looser region evidence; the thresholds tighten over a warm-up span
//! and then hold. The schedule keeps no internal state: the same
//! counter always reproduces the same pair.

use wsod_core::{LambdaBreakpoint, LambdaPair, LambdaScheduleConfig, Result};

/// Iteration-indexed threshold schedule.
///
/// Construction validates every breakpoint/endpoint (values in [0, 1],
/// `gt >= ign`); interpolation between valid points preserves both
/// invariants, so `at` never needs to re-check.
#[derive(Debug, Clone)]
pub struct LambdaSchedule {
    curve: Curve,
}

#[derive(Debug, Clone)]
enum Curve {
    Table(Vec<LambdaBreakpoint>),
    LogWarmup {
        start: LambdaPair,
        end: LambdaPair,
        warmup_iters: u64,
    },
}

impl LambdaSchedule {
    pub fn new(config: &LambdaScheduleConfig) -> Result<Self> {
        config.validate()?;

        let curve = match config {
            LambdaScheduleConfig::Table { breakpoints } => Curve::Table(breakpoints.clone()),
            LambdaScheduleConfig::LogWarmup {
                start,
                end,
                warmup_iters,
            } => Curve::LogWarmup {
                start: *start,
                end: *end,
                warmup_iters: *warmup_iters,
            },
        };

        Ok(Self { curve })
    }

    /// Threshold pair for the given training iteration.
    pub fn at(&self, iteration: u64) -> LambdaPair {
        match &self.curve {
            Curve::Table(breakpoints) => Self::interpolate_table(breakpoints, iteration),
            Curve::LogWarmup {
                start,
                end,
                warmup_iters,
            } => {
                let t = iteration.min(*warmup_iters) as f64;
                // ln(1+t) / ln(1+warmup): 0 at iteration 0, 1 at the
                // end of the warm-up, monotone in between.
                let frac = ((1.0 + t).ln() / (1.0 + *warmup_iters as f64).ln()) as f32;
                LambdaPair::new(
                    start.gt + (end.gt - start.gt) * frac,
                    start.ign + (end.ign - start.ign) * frac,
                )
            }
        }
    }

    fn interpolate_table(breakpoints: &[LambdaBreakpoint], iteration: u64) -> LambdaPair {
        let first = &breakpoints[0];
        if iteration <= first.iter {
            return first.pair();
        }

        for pair in breakpoints.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if iteration <= hi.iter {
                let span = (hi.iter - lo.iter) as f32;
                let frac = (iteration - lo.iter) as f32 / span;
                return LambdaPair::new(
                    lo.gt + (hi.gt - lo.gt) * frac,
                    lo.ign + (hi.ign - lo.ign) * frac,
                );
            }
        }

        // Held constant past the last breakpoint.
        breakpoints[breakpoints.len() - 1].pair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_config() -> LambdaScheduleConfig {
        LambdaScheduleConfig::LogWarmup {
            start: LambdaPair::new(0.5, 0.1),
            end: LambdaPair::new(0.7, 0.3),
            warmup_iters: 1000,
        }
    }

    #[test]
    fn test_invariants_over_iterations() {
        let schedule = LambdaSchedule::new(&log_config()).unwrap();
        for iter in [0u64, 1, 7, 100, 999, 1000, 10_000, u64::MAX] {
            let pair = schedule.at(iter);
            assert!(pair.gt >= pair.ign, "gt < ign at iter {}", iter);
            assert!((0.0..=1.0).contains(&pair.gt));
            assert!((0.0..=1.0).contains(&pair.ign));
        }
    }

    #[test]
    fn test_deterministic() {
        let schedule = LambdaSchedule::new(&log_config()).unwrap();
        let a = schedule.at(137);
        let b = schedule.at(137);
        assert_eq!(a, b);
    }

    #[test]
    fn test_log_warmup_endpoints_and_monotonicity() {
        let schedule = LambdaSchedule::new(&log_config()).unwrap();

        let start = schedule.at(0);
        assert!((start.gt - 0.5).abs() < 1e-6);
        assert!((start.ign - 0.1).abs() < 1e-6);

        let end = schedule.at(1000);
        assert!((end.gt - 0.7).abs() < 1e-5);
        assert!((end.ign - 0.3).abs() < 1e-5);

        // Held constant after warm-up.
        let late = schedule.at(5000);
        assert!((late.gt - end.gt).abs() < 1e-6);

        let mut prev = schedule.at(0).gt;
        for iter in (0..=1000).step_by(50) {
            let cur = schedule.at(iter).gt;
            assert!(cur >= prev - 1e-6);
            prev = cur;
        }
    }

    #[test]
    fn test_table_interpolation_literal_values() {
        let config = LambdaScheduleConfig::Table {
            breakpoints: vec![
                LambdaBreakpoint { iter: 0, gt: 0.4, ign: 0.2 },
                LambdaBreakpoint { iter: 100, gt: 0.8, ign: 0.4 },
            ],
        };
        let schedule = LambdaSchedule::new(&config).unwrap();

        let mid = schedule.at(50);
        assert!((mid.gt - 0.6).abs() < 1e-6);
        assert!((mid.ign - 0.3).abs() < 1e-6);

        // Before the first / after the last breakpoint.
        assert_eq!(schedule.at(0), LambdaPair::new(0.4, 0.2));
        assert_eq!(schedule.at(10_000), LambdaPair::new(0.8, 0.4));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LambdaScheduleConfig::LogWarmup {
            start: LambdaPair::new(0.1, 0.5),
            end: LambdaPair::new(0.7, 0.3),
            warmup_iters: 100,
        };
        assert!(LambdaSchedule::new(&config).is_err());
    }
}
