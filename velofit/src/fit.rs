//! Weighted least-squares fitting of an affine model `y = m*x + b`.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::VeloError;

/// Relative tolerance below which the weighted spread of x is treated as zero
/// and the system as underdetermined.
const DEGENERACY_EPS: f64 = 1e-12;

/// Parameters of the best-fit line plus the reconstructed curve, one fitted
/// value per input x.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub fitted: Vec<f64>,
}

impl LineFit {
    /// Evaluate the fitted model at an arbitrary x.
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Ordinary least squares, expressed through the weighted solver with uniform
/// weight 1.0 per sample.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<LineFit, VeloError> {
    let weights = vec![1.0; x.len()];
    fit_line_weighted(x, y, &weights)
}

/// Fit `y = m*x + b` minimizing the weighted sum of squared residuals
/// `sum_i w_i * (y_i - (m*x_i + b))^2`.
///
/// Solved in centered form: subtracting the weighted means first keeps the
/// normal equations well conditioned for time axes far from zero. The system
/// is degenerate when fewer than two distinct x values carry weight, in which
/// case no finite slope is returned.
pub fn fit_line_weighted(x: &[f64], y: &[f64], weights: &[f64]) -> Result<LineFit, VeloError> {
    if x.len() != y.len() || x.len() != weights.len() {
        return Err(VeloError::LengthMismatch {
            times: x.len(),
            positions: y.len().min(weights.len()),
        });
    }
    if x.len() < 2 {
        return Err(VeloError::DegenerateFit);
    }

    let x = Array1::from_iter(x.iter().copied());
    let y = Array1::from_iter(y.iter().copied());
    let w = Array1::from_iter(weights.iter().copied());

    let w_total = w.sum();
    if !(w_total > 0.0) {
        return Err(VeloError::DegenerateFit);
    }

    let x_mean = w.dot(&x) / w_total;
    let y_mean = w.dot(&y) / w_total;

    let dx = &x - x_mean;
    let dy = &y - y_mean;

    let sxx = (&dx * &dx).dot(&w);
    let sxy = (&dx * &dy).dot(&w);

    // Zero weighted variance in x means every sample sits on one vertical
    // line; the slope is undefined, not infinite.
    let x_scale = x.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    if !sxx.is_finite() || sxx <= DEGENERACY_EPS * x_scale * x_scale * w_total {
        return Err(VeloError::DegenerateFit);
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(VeloError::DegenerateFit);
    }

    let fitted = x.iter().map(|&v| slope * v + intercept).collect();
    Ok(LineFit {
        slope,
        intercept,
        fitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    #[test]
    fn test_perfect_line_recovery() {
        let x = vec![0.0, 1000.0, 2000.0, 3000.0];
        let y: Vec<f64> = x.iter().map(|&v| 2.5 * v + 10.0).collect();
        let fit = fit_line(&x, &y).unwrap();
        assert!((fit.slope - 2.5).abs() < TOL);
        assert!((fit.intercept - 10.0).abs() < TOL);
        for (f, expected) in fit.fitted.iter().zip(y.iter()) {
            assert!((f - expected).abs() < TOL);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = vec![0.0, 10.0, 25.0, 31.0, 48.0];
        let y = vec![1.2, 0.9, 1.4, 1.1, 1.3];
        let a = fit_line(&x, &y).unwrap();
        let b = fit_line(&x, &y).unwrap();
        assert_eq!(a.slope.to_bits(), b.slope.to_bits());
        assert_eq!(a.intercept.to_bits(), b.intercept.to_bits());
    }

    #[test]
    fn test_degenerate_zero_variance() {
        let x = vec![5.0, 5.0, 5.0];
        let y = vec![1.0, 2.0, 3.0];
        match fit_line(&x, &y) {
            Err(VeloError::DegenerateFit) => {}
            other => panic!("expected DegenerateFit, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_single_point() {
        match fit_line(&[1.0], &[2.0]) {
            Err(VeloError::DegenerateFit) => {}
            other => panic!("expected DegenerateFit, got {:?}", other),
        }
    }

    #[test]
    fn test_noisy_line_minimizes_residuals() {
        // Residuals of the least-squares line must be orthogonal to x and sum
        // to zero under uniform weights.
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.1, 1.9, 4.2, 5.8, 8.1];
        let fit = fit_line(&x, &y).unwrap();
        let residuals: Vec<f64> = y
            .iter()
            .zip(fit.fitted.iter())
            .map(|(yi, fi)| yi - fi)
            .collect();
        let r_sum: f64 = residuals.iter().sum();
        let rx_sum: f64 = residuals.iter().zip(x.iter()).map(|(r, xi)| r * xi).sum();
        assert!(r_sum.abs() < 1e-9);
        assert!(rx_sum.abs() < 1e-9);
    }

    #[test]
    fn test_weighted_fit_tracks_heavy_points() {
        // All weight on two points pins the line exactly through them.
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![0.0, 100.0, 4.0];
        let w = vec![1.0, 0.0, 1.0];
        let fit = fit_line_weighted(&x, &y, &w).unwrap();
        assert!((fit.slope - 2.0).abs() < TOL);
        assert!(fit.intercept.abs() < TOL);
    }

    #[test]
    fn test_weighted_fit_zero_total_weight() {
        let x = vec![0.0, 1.0];
        let y = vec![0.0, 1.0];
        let w = vec![0.0, 0.0];
        match fit_line_weighted(&x, &y, &w) {
            Err(VeloError::DegenerateFit) => {}
            other => panic!("expected DegenerateFit, got {:?}", other),
        }
    }
}
