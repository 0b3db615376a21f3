//! Core velocity-fit computation library implemented in Rust.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fit;
pub mod series;

pub use fit::{fit_line, fit_line_weighted, LineFit};
pub use series::{differentiate, parse_series, split_rows, trim_tail};

/// Trailing samples dropped before differentiation and fitting. The tail of a
/// recording is routinely truncated mid-motion and would bias the fit.
pub const TAIL_TRIM: usize = 5;

/// Minimum sample count for the full pipeline: the trimmed series must still
/// hold at least two points for differentiation.
pub const MIN_SAMPLES: usize = TAIL_TRIM + 2;

#[derive(Error, Debug)]
pub enum VeloError {
    #[error("row {row}: expected `<timestamp> -> <position>`, got {line:?}")]
    MalformedRow { row: usize, line: String },
    #[error("row {row}: invalid timestamp {value:?} (want H:MM:SS.mmm)")]
    Timestamp { row: usize, value: String },
    #[error("row {row}: invalid position {value:?} (want integer with `cm` suffix)")]
    Position { row: usize, value: String },
    #[error("insufficient data: need at least {min} samples, got {actual}")]
    InsufficientData { min: usize, actual: usize },
    #[error("time and position series differ in length: {times} vs {positions}")]
    LengthMismatch { times: usize, positions: usize },
    #[error("zero time span around sample {index}; cannot differentiate")]
    ZeroTimeSpan { index: usize },
    #[error("degenerate fit: need at least two distinct time values")]
    DegenerateFit,
}

/// One tabular input row, still in raw string form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawSample {
    pub timestamp: String,
    pub position: String,
}

impl RawSample {
    pub fn new(timestamp: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            position: position.into(),
        }
    }
}

/// Everything the pipeline produces for one recording: the trimmed time axis,
/// the velocity estimate at each retained sample, and the affine fit over the
/// two. Callers plot or report from this; nothing here is global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunAnalysis {
    pub times_ms: Vec<i64>,
    pub velocity: Vec<f64>,
    pub fit: LineFit,
}

impl RunAnalysis {
    /// Fitted slope of the velocity series, i.e. the acceleration estimate in
    /// cm/ms^2. Near zero for a constant-velocity recording.
    pub fn slope(&self) -> f64 {
        self.fit.slope
    }

    /// Mean of the velocity samples in cm/ms, the reported speed estimate.
    pub fn mean_velocity(&self) -> f64 {
        if self.velocity.is_empty() {
            return 0.0;
        }
        self.velocity.iter().sum::<f64>() / self.velocity.len() as f64
    }
}

/// Run the full pipeline for one recording: parse rows into numeric series,
/// trim the unreliable tail, differentiate position into velocity, and fit a
/// line through the velocity samples.
pub fn analyze(rows: &[RawSample]) -> Result<RunAnalysis, VeloError> {
    let (times, positions) = parse_series(rows)?;
    if times.len() < MIN_SAMPLES {
        return Err(VeloError::InsufficientData {
            min: MIN_SAMPLES,
            actual: times.len(),
        });
    }

    let (times, positions) = trim_tail(&times, &positions)?;
    let velocity = differentiate(&times, &positions)?;

    let xs: Vec<f64> = times.iter().map(|&t| t as f64).collect();
    let fit = fit_line(&xs, &velocity)?;

    Ok(RunAnalysis {
        times_ms: times,
        velocity,
        fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_velocity_rows(n: usize) -> Vec<RawSample> {
        // One sample every 100 ms, moving 3 cm per step.
        (0..n)
            .map(|i| {
                let ms = i * 100;
                let ts = format!("0:00:{:02}.{:03}", ms / 1000, ms % 1000);
                RawSample::new(ts, format!("{}cm", 10 + 3 * i))
            })
            .collect()
    }

    #[test]
    fn test_analyze_constant_velocity() {
        let rows = constant_velocity_rows(20);
        let analysis = analyze(&rows).unwrap();

        assert_eq!(analysis.times_ms.len(), 20 - TAIL_TRIM);
        assert_eq!(analysis.velocity.len(), analysis.times_ms.len());

        // 3 cm per 100 ms everywhere, so velocity is flat at 0.03 cm/ms and
        // the fitted slope (acceleration) vanishes.
        for v in &analysis.velocity {
            assert!((v - 0.03).abs() < 1e-9);
        }
        assert!(analysis.slope().abs() < 1e-12);
        assert!((analysis.mean_velocity() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_rejects_short_series() {
        let rows = constant_velocity_rows(4);
        match analyze(&rows) {
            Err(VeloError::InsufficientData { min, actual }) => {
                assert_eq!(min, MIN_SAMPLES);
                assert_eq!(actual, 4);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_analyze_fitted_curve_matches_series_length() {
        let rows = constant_velocity_rows(12);
        let analysis = analyze(&rows).unwrap();
        assert_eq!(analysis.fit.fitted.len(), analysis.times_ms.len());
    }
}
