use candle_core::{Result, Tensor};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Elementwise log N(x; loc, σ²) with a known, fixed σ.
///
/// log N = -0.5 * [(x - loc)² / σ² + ln(2πσ²)]
///
/// # Arguments
/// * `x` - Values, any shape broadcastable with `loc`
/// * `loc` - Means
/// * `sigma` - Standard deviation σ > 0
pub fn fixed_normal_log_density(x: &Tensor, loc: &Tensor, sigma: f64) -> Result<Tensor> {
    let inv_2var = 0.5 / (sigma * sigma);
    let log_2pi_var = LN_2PI + 2.0 * sigma.ln();
    let diff_sq = x.broadcast_sub(loc)?.sqr()?;
    (diff_sq * (-inv_2var))? + (-0.5 * log_2pi_var)
}

/// log N(ε; 0, I) summed over the last dimension.
///
/// # Arguments
/// * `eps` - Standard normal draws, shape (S, d)
///
/// # Returns
/// Shape (S,)
pub fn standard_normal_log_prob(eps: &Tensor) -> Result<Tensor> {
    let d = eps.dim(1)? as f64;
    (eps.sqr()?.sum(1)? * (-0.5))? - 0.5 * d * LN_2PI
}

/// Log density of x = loc + exp(ln_std) ⊙ ε under the diagonal Gaussian
/// that generated it, summed over the last dimension.
///
/// Uses the noise directly: log q = log N(ε; 0, I) - Σ ln σ.
///
/// # Arguments
/// * `eps` - Standard normal draws, shape (S, d)
/// * `ln_std` - Log standard deviations, shape (d,)
pub fn reparam_log_prob(eps: &Tensor, ln_std: &Tensor) -> Result<Tensor> {
    standard_normal_log_prob(eps)?.broadcast_sub(&ln_std.sum_all()?)
}
