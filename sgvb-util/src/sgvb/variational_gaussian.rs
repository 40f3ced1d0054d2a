use candle_core::{Result, Tensor};
use candle_nn::VarMap;

use super::gaussian::reparam_log_prob;
use super::noise::NoiseSource;
use super::params::learnable_from_tensor;
use super::traits::{VariationalDistribution, VariationalSample};

/// Mean-field Gaussian variational distribution q(x) = N(μ, diag(σ²))
///
/// Parameters are stored as mean μ and log standard deviation ln(σ).
pub struct GaussianVar {
    /// Variational mean μ: shape (d,)
    mean: Tensor,
    /// Log standard deviation ln(σ): shape (d,)
    ln_std: Tensor,
}

impl GaussianVar {
    /// Create a mean-field Gaussian with explicit initial values.
    ///
    /// # Arguments
    /// * `varmap` - Variable map receiving `{prefix}.mean` and `{prefix}.ln_std`
    /// * `prefix` - Parameter name prefix
    /// * `init_mean` - Initial μ, shape (d,)
    /// * `init_std` - Initial σ, shape (d,), strictly positive
    pub fn new(varmap: &VarMap, prefix: &str, init_mean: &Tensor, init_std: &Tensor) -> Result<Self> {
        let mean = learnable_from_tensor(varmap, &format!("{}.mean", prefix), init_mean)?;
        let ln_std = learnable_from_tensor(varmap, &format!("{}.ln_std", prefix), &init_std.log()?)?;
        Ok(Self { mean, ln_std })
    }

    /// Get the variational mean μ.
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Get the variational standard deviation σ = exp(ln_std).
    pub fn std(&self) -> Result<Tensor> {
        self.ln_std.exp()
    }
}

impl VariationalDistribution for GaussianVar {
    fn dim(&self) -> usize {
        self.mean.elem_count()
    }

    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample> {
        let eps = noise.randn(num_samples, self.dim())?;
        // x = μ + σ ⊙ ε
        let x = eps.broadcast_mul(&self.std()?)?.broadcast_add(&self.mean)?;
        let log_q = reparam_log_prob(&eps, &self.ln_std)?;
        Ok(VariationalSample { x, log_q })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_sample_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let d = 6;

        let mean = Tensor::zeros(d, candle_core::DType::F32, &device)?;
        let std = Tensor::ones(d, candle_core::DType::F32, &device)?;
        let q = GaussianVar::new(&varmap, "q", &mean, &std)?;

        let mut noise = NoiseSource::new(0, &device);
        let sample = q.sample(11, &mut noise)?;

        assert_eq!(sample.x.dims(), &[11, d]);
        assert_eq!(sample.log_q.dims(), &[11]);
        assert_eq!(varmap.all_vars().len(), 2);

        Ok(())
    }
}
