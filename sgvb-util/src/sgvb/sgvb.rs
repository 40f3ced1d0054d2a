use candle_core::{Result, Tensor};

use super::noise::NoiseSource;
use super::traits::{LogDensity, VariationalDistribution};

/// Monte Carlo summary of the ELBO after training.
#[derive(Debug, Clone)]
pub struct ElboEstimate {
    /// Mean of log p(x, y) - log q(x) over the draws
    pub elbo: f64,
    /// Standard error of `elbo`
    pub std_err: f64,
    /// Mean of the drawn latent vectors, shape (d,)
    pub mean_path: Vec<f32>,
}

/// Per-sample ELBO terms log p(x_s, y) - log q(x_s), shape (S,).
fn elbo_terms<Q, P>(q: &Q, p: &P, num_samples: usize, noise: &mut NoiseSource) -> Result<(Tensor, Tensor)>
where
    Q: VariationalDistribution,
    P: LogDensity,
{
    let sample = q.sample(num_samples, noise)?;
    let log_p = p.log_prob(&sample.x)?;
    let elbo = (log_p - &sample.log_q)?;
    Ok((elbo, sample.x))
}

/// Negative ELBO with reparameterization gradients.
///
/// ELBO = E_q[log p(x, y) - log q(x)], estimated with `num_samples` draws.
/// Gradients flow through the reparameterized samples into every
/// variational parameter.
///
/// # Returns
/// Scalar loss; minimize it to maximize the ELBO
pub fn elbo_loss<Q, P>(q: &Q, p: &P, num_samples: usize, noise: &mut NoiseSource) -> Result<Tensor>
where
    Q: VariationalDistribution,
    P: LogDensity,
{
    let (elbo, _) = elbo_terms(q, p, num_samples, noise)?;
    elbo.mean(0)?.neg()
}

/// Estimate the ELBO (the lower bound on log p(y)) without gradients.
///
/// # Arguments
/// * `q` - Fitted variational distribution
/// * `p` - Target log density
/// * `num_samples` - Number of Monte Carlo draws, e.g. 1000
pub fn estimate_elbo<Q, P>(
    q: &Q,
    p: &P,
    num_samples: usize,
    noise: &mut NoiseSource,
) -> Result<ElboEstimate>
where
    Q: VariationalDistribution,
    P: LogDensity,
{
    let (elbo, x) = elbo_terms(q, p, num_samples, noise)?;
    let terms: Vec<f32> = elbo.detach().to_vec1()?;
    let mean_path: Vec<f32> = x.detach().mean(0)?.to_vec1()?;

    let n = terms.len() as f64;
    let mean = terms.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = if terms.len() > 1 {
        terms
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    } else {
        0.0
    };

    Ok(ElboEstimate {
        elbo: mean,
        std_err: (var / n).sqrt(),
        mean_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sgvb::gaussian::fixed_normal_log_density;
    use crate::sgvb::GaussianVar;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    /// p(x) = N(x; 0, I) without observations, so log p(y) = 0
    struct StandardNormalTarget;

    impl LogDensity for StandardNormalTarget {
        fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
            let zero = Tensor::zeros(x.dim(1)?, x.dtype(), x.device())?;
            fixed_normal_log_density(x, &zero, 1.0)?.sum(1)
        }
    }

    #[test]
    fn test_exact_posterior_has_zero_gap() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mean = Tensor::zeros(4, DType::F32, &device)?;
        let std = Tensor::ones(4, DType::F32, &device)?;
        let q = GaussianVar::new(&varmap, "q", &mean, &std)?;
        let mut noise = NoiseSource::new(1, &device);

        let est = estimate_elbo(&q, &StandardNormalTarget, 500, &mut noise)?;
        assert!(est.elbo.abs() < 1e-4, "elbo {}", est.elbo);
        assert!(est.std_err < 1e-4);
        assert_eq!(est.mean_path.len(), 4);

        Ok(())
    }

    #[test]
    fn test_loss_is_scalar_and_bounded() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let mean = Tensor::new(&[2.0f32, -1.0, 0.5], &device)?;
        let std = Tensor::new(&[0.3f32, 3.0, 1.0], &device)?;
        let q = GaussianVar::new(&varmap, "q", &mean, &std)?;
        let mut noise = NoiseSource::new(2, &device);

        let loss = elbo_loss(&q, &StandardNormalTarget, 20, &mut noise)?;
        assert!(loss.dims().is_empty());

        // -ELBO = KL(q || p) >= 0 up to Monte Carlo error
        let est = estimate_elbo(&q, &StandardNormalTarget, 4000, &mut noise)?;
        assert!(est.elbo < 0.0, "elbo {}", est.elbo);

        Ok(())
    }
}
