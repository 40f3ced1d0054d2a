//! Stochastic Gradient Variational Bayes (SGVB) with reparameterization.
//!
//! A target is any [`LogDensity`] over a latent vector x (typically a model
//! joint log p(x, y) with y held fixed); a variational family is any
//! [`VariationalDistribution`] that produces differentiable samples and
//! their log density.
//!
//! # Key characteristics
//!
//! - Pathwise gradients: `∇ELBO ≈ mean_s ∇[log p(x_s) - log q(x_s)]`
//! - Reproducible Monte Carlo noise through [`NoiseSource`]
//! - Optimizers from `candle_nn` (SGD or Adam)
//!
//! # Example
//!
//! ```ignore
//! use sgvb_util::sgvb::{estimate_elbo, fit, GaussianVar, NoiseSource, TrainConfig};
//!
//! let varmap = VarMap::new();
//! let q = GaussianVar::new(&varmap, "q", &init_mean, &init_std)?;
//! let mut noise = NoiseSource::new(seed, &device);
//!
//! let loss_trace = fit(&q, &target, &varmap, &TrainConfig::default(), &mut noise)?;
//! let estimate = estimate_elbo(&q, &target, 1000, &mut noise)?;
//! ```

mod gaussian;
mod noise;
mod params;
mod sgvb;
mod train;
mod traits;
mod variational_gaussian;

pub use gaussian::{fixed_normal_log_density, reparam_log_prob, standard_normal_log_prob};
pub use noise::NoiseSource;
pub use params::learnable_from_tensor;
pub use sgvb::{elbo_loss, estimate_elbo, ElboEstimate};
pub use train::{fit, OptimizerKind, SgvbOptimizer, TrainConfig};
pub use traits::{LogDensity, VariationalDistribution, VariationalSample};
pub use variational_gaussian::GaussianVar;
