//! Exact inference for the Brownian model by scalar Kalman filtering.

use crate::model::BrownianConfig;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Filtered moments and the log marginal likelihood log p(y).
#[derive(Debug, Clone)]
pub struct KalmanOutput {
    pub log_evidence: f64,
    /// E[x[t] | y[0..=t]]
    pub filtered_mean: Vec<f64>,
    /// Var[x[t] | y[0..=t]]
    pub filtered_var: Vec<f64>,
}

/// Run the forward filter over the measurements.
///
/// Each observed step adds log N(y[t]; m⁻, P⁻ + r²) of the one-step
/// predictive distribution, so the sum is the exact log p(y).
pub fn kalman_filter(config: &BrownianConfig, observations: &[Option<f32>]) -> KalmanOutput {
    let q0 = config.driving_noise.powi(2);
    let q = config.dt * q0;
    let r = config.measure_noise.powi(2);

    let mut mean = 0.0f64;
    let mut var = q0;
    let mut log_evidence = 0.0f64;
    let mut filtered_mean = Vec::with_capacity(observations.len());
    let mut filtered_var = Vec::with_capacity(observations.len());

    for (t, y) in observations.iter().enumerate() {
        if t > 0 {
            var += q;
        }
        if let Some(y) = y {
            let y = *y as f64;
            let s = var + r;
            let resid = y - mean;
            log_evidence += -0.5 * (LN_2PI + s.ln() + resid * resid / s);
            let gain = var / s;
            mean += gain * resid;
            var *= 1.0 - gain;
        }
        filtered_mean.push(mean);
        filtered_var.push(var);
    }

    KalmanOutput {
        log_evidence,
        filtered_mean,
        filtered_var,
    }
}

/// Exact log p(y) of the measurements under the model.
pub fn log_evidence(config: &BrownianConfig, observations: &[Option<f32>]) -> f64 {
    kalman_filter(config, observations).log_evidence
}
