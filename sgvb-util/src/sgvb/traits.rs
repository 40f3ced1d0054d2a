use candle_core::{Result, Tensor};

use super::noise::NoiseSource;

/// Unnormalized target density, typically the joint log p(x, y) of a
/// model conditioned on fixed observations.
pub trait LogDensity {
    /// Evaluate log p(x, y) for a batch of latent vectors.
    ///
    /// # Arguments
    /// * `x` - Latent samples, shape (S, d)
    ///
    /// # Returns
    /// Log density, shape (S,)
    fn log_prob(&self, x: &Tensor) -> Result<Tensor>;
}

/// Reparameterized sample from a variational distribution.
pub struct VariationalSample {
    /// Latent samples, shape (S, d), differentiable w.r.t. the variational parameters
    pub x: Tensor,
    /// Log density of the sample under q, shape (S,)
    pub log_q: Tensor,
}

/// Variational distribution q(x) over a d-dimensional latent vector.
pub trait VariationalDistribution {
    /// Dimension d of the latent vector.
    fn dim(&self) -> usize;

    /// Draw `num_samples` reparameterized samples together with log q.
    ///
    /// # Arguments
    /// * `num_samples` - Number of Monte Carlo samples S
    /// * `noise` - Source of standard normal noise
    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample>;
}
