//! Variational families over the latent Brownian path x ∈ R^T.
//!
//! | label | family |
//! |-------|--------|
//! | `PE`  | autoregressive mixture, one step at a time |
//! | `MF`  | independent Gaussian per step |
//! | `MN`  | full-rank Gaussian with a Cholesky factor |
//! | `NN`  | Gaussian whose mean is a small network of a latent code |
//!
//! All scales are stored as logs and every family is reparameterized, so
//! `sample` returns paths that carry gradients into the parameters.

use std::fmt;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{ops, VarMap};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sgvb_util::sgvb::{
    learnable_from_tensor, standard_normal_log_prob, GaussianVar, NoiseSource,
    VariationalDistribution, VariationalSample,
};

use crate::model::BrownianModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariationalFamily {
    /// Autoregressive mixture of the previous state and a learned mean
    Pe,
    /// Mean field
    Mf,
    /// Multivariate normal
    Mn,
    /// Neural-network generated mean
    Nn,
}

impl VariationalFamily {
    pub const ALL: [VariationalFamily; 4] = [Self::Pe, Self::Mf, Self::Mn, Self::Nn];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pe => "PE",
            Self::Mf => "MF",
            Self::Mn => "MN",
            Self::Nn => "NN",
        }
    }
}

impl fmt::Display for VariationalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Layer sizes of the `NN` family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NeuralArch {
    pub hidden_size: usize,
    pub latent_size: usize,
}

impl Default for NeuralArch {
    fn default() -> Self {
        Self {
            hidden_size: 10,
            latent_size: 10,
        }
    }
}

fn constant(value: f32, len: usize, device: &Device) -> Result<Tensor> {
    Tensor::full(value, len, device)
}

///////////////////////////////////
// PE: autoregressive mixture    //
///////////////////////////////////

/// x[0] ~ N(m0, s0²)
/// x[t] ~ N(w[t] x[t-1] + (1 - w[t]) μ[t], s[t]²),  w[t] = sigmoid(λ[t])
pub struct AutoregressiveVar {
    loc0: Tensor,
    ln_scale0: Tensor,
    /// μ[1..T]
    mean: Tensor,
    /// λ[1..T]
    logit_weight: Tensor,
    /// ln s[1..T]
    ln_scale: Tensor,
    num_steps: usize,
}

impl AutoregressiveVar {
    /// Steps with a measurement start with λ = 0 (even mix), the others
    /// with λ = 1 (leaning on the previous state). Transition scales
    /// start at the prior step scale.
    pub fn new(varmap: &VarMap, model: &BrownianModel, device: &Device) -> Result<Self> {
        let t = model.num_steps();
        let observed = model.observed_steps();
        let step_scale = model.config.step_scale() as f32;

        let init_logit: Vec<f32> = observed[1..]
            .iter()
            .map(|&obs| if obs { 0.0 } else { 1.0 })
            .collect();

        Ok(Self {
            loc0: learnable_from_tensor(varmap, "pe.loc0", &constant(0.0, 1, device)?)?,
            ln_scale0: learnable_from_tensor(varmap, "pe.ln_scale0", &constant(0.0, 1, device)?)?,
            mean: learnable_from_tensor(varmap, "pe.mean", &constant(0.0, t - 1, device)?)?,
            logit_weight: learnable_from_tensor(
                varmap,
                "pe.logit_weight",
                &Tensor::from_vec(init_logit, t - 1, device)?,
            )?,
            ln_scale: learnable_from_tensor(
                varmap,
                "pe.ln_scale",
                &constant(step_scale.ln(), t - 1, device)?,
            )?,
            num_steps: t,
        })
    }

    /// Mixing weights sigmoid(λ[t]) for t = 1..T
    pub fn weights(&self) -> Result<Tensor> {
        ops::sigmoid(&self.logit_weight)
    }
}

impl VariationalDistribution for AutoregressiveVar {
    fn dim(&self) -> usize {
        self.num_steps
    }

    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample> {
        let t_max = self.num_steps;
        let eps = noise.randn(num_samples, t_max)?;

        let weight = self.weights()?;
        let drift = weight.affine(-1.0, 1.0)?.mul(&self.mean)?;
        let scale = self.ln_scale.exp()?;

        let x0 = eps
            .narrow(1, 0, 1)?
            .broadcast_mul(&self.ln_scale0.exp()?)?
            .broadcast_add(&self.loc0)?;

        let mut columns = Vec::with_capacity(t_max);
        columns.push(x0);

        for t in 1..t_max {
            let prev = &columns[t - 1];
            let x_t = prev
                .broadcast_mul(&weight.narrow(0, t - 1, 1)?)?
                .broadcast_add(&drift.narrow(0, t - 1, 1)?)?
                .add(&eps.narrow(1, t, 1)?.broadcast_mul(&scale.narrow(0, t - 1, 1)?)?)?;
            columns.push(x_t);
        }

        let x = Tensor::cat(&columns, 1)?;

        // triangular map ε -> x with diagonal s, so log q = log N(ε) - Σ ln s
        let log_det = (self.ln_scale0.sum_all()? + self.ln_scale.sum_all()?)?;
        let log_q = standard_normal_log_prob(&eps)?.broadcast_sub(&log_det)?;

        Ok(VariationalSample { x, log_q })
    }
}

///////////////////////////////////
// MF: mean field                //
///////////////////////////////////

/// x[0] ~ N(0, 1) and x[t] ~ N(0, 2²) at the start, all learnable.
pub fn mean_field(varmap: &VarMap, model: &BrownianModel, device: &Device) -> Result<GaussianVar> {
    let t = model.num_steps();
    let init_std: Vec<f32> = (0..t).map(|i| if i == 0 { 1.0 } else { 2.0 }).collect();
    GaussianVar::new(
        varmap,
        "mf",
        &constant(0.0, t, device)?,
        &Tensor::from_vec(init_std, t, device)?,
    )
}

///////////////////////////////////
// MN: full-rank Gaussian        //
///////////////////////////////////

/// x = μ + L ε with L lower triangular and diag(L) = exp(ln_diag).
pub struct FullRankGaussianVar {
    loc: Tensor,
    /// free entries; only the strictly lower triangle is used
    off_diag: Tensor,
    ln_diag: Tensor,
    strict_lower: Tensor,
    eye: Tensor,
    num_steps: usize,
}

impl FullRankGaussianVar {
    /// Starts at N(0, I).
    pub fn new(varmap: &VarMap, model: &BrownianModel, device: &Device) -> Result<Self> {
        let t = model.num_steps();

        let mut lower = vec![0f32; t * t];
        let mut eye = vec![0f32; t * t];
        for i in 0..t {
            for j in 0..i {
                lower[i * t + j] = 1.0;
            }
            eye[i * t + i] = 1.0;
        }

        Ok(Self {
            loc: learnable_from_tensor(varmap, "mn.loc", &constant(0.0, t, device)?)?,
            off_diag: learnable_from_tensor(
                varmap,
                "mn.off_diag",
                &Tensor::zeros((t, t), DType::F32, device)?,
            )?,
            ln_diag: learnable_from_tensor(varmap, "mn.ln_diag", &constant(0.0, t, device)?)?,
            strict_lower: Tensor::from_vec(lower, (t, t), device)?,
            eye: Tensor::from_vec(eye, (t, t), device)?,
            num_steps: t,
        })
    }

    /// Cholesky factor L, shape (T, T)
    pub fn scale_tril(&self) -> Result<Tensor> {
        let lower = self.off_diag.mul(&self.strict_lower)?;
        let diag = self.eye.broadcast_mul(&self.ln_diag.exp()?.unsqueeze(0)?)?;
        lower + diag
    }
}

impl VariationalDistribution for FullRankGaussianVar {
    fn dim(&self) -> usize {
        self.num_steps
    }

    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample> {
        let eps = noise.randn(num_samples, self.num_steps)?;
        let l = self.scale_tril()?;
        // row-wise x = μ + L ε
        let x = eps.matmul(&l.t()?)?.broadcast_add(&self.loc)?;
        let log_q = standard_normal_log_prob(&eps)?.broadcast_sub(&self.ln_diag.sum_all()?)?;
        Ok(VariationalSample { x, log_q })
    }
}

///////////////////////////////////
// NN: network-generated mean    //
///////////////////////////////////

/// z ~ N(m, diag(s²)) in R^latent
/// x ~ N(W2 sigmoid(W1 z), diag(σ²))
///
/// The pair (z, x) is sampled jointly; `log_q` subtracts the auxiliary
/// reverse density log N(z; 0, I), which keeps the ELBO a lower bound on
/// log p(y) although z does not appear in the model.
pub struct NeuralVar {
    z_loc: Tensor,
    z_ln_scale: Tensor,
    /// (hidden, latent)
    w1: Tensor,
    /// (T, hidden)
    w2: Tensor,
    ln_scale: Tensor,
    num_steps: usize,
    latent_size: usize,
}

impl NeuralVar {
    /// Weights start at N(0, 0.1²) from `noise`; z starts at N(0, I) and
    /// the output scales at 1.
    pub fn new(
        varmap: &VarMap,
        model: &BrownianModel,
        arch: &NeuralArch,
        noise: &mut NoiseSource,
    ) -> Result<Self> {
        let t = model.num_steps();
        let (h, l) = (arch.hidden_size, arch.latent_size);
        let device = noise.device().clone();

        let w1_init = noise.normal(0.0, 0.1, h, l)?;
        let w2_init = noise.normal(0.0, 0.1, t, h)?;

        Ok(Self {
            z_loc: learnable_from_tensor(varmap, "nn.z_loc", &constant(0.0, l, &device)?)?,
            z_ln_scale: learnable_from_tensor(varmap, "nn.z_ln_scale", &constant(0.0, l, &device)?)?,
            w1: learnable_from_tensor(varmap, "nn.w1", &w1_init)?,
            w2: learnable_from_tensor(varmap, "nn.w2", &w2_init)?,
            ln_scale: learnable_from_tensor(varmap, "nn.ln_scale", &constant(0.0, t, &device)?)?,
            num_steps: t,
            latent_size: l,
        })
    }

    /// Network output W2 sigmoid(W1 z) for a batch of codes z: (S, latent)
    pub fn forward(&self, z: &Tensor) -> Result<Tensor> {
        let h = ops::sigmoid(&z.matmul(&self.w1.t()?)?)?;
        h.matmul(&self.w2.t()?)
    }
}

impl VariationalDistribution for NeuralVar {
    fn dim(&self) -> usize {
        self.num_steps
    }

    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample> {
        let z_eps = noise.randn(num_samples, self.latent_size)?;
        let z = z_eps
            .broadcast_mul(&self.z_ln_scale.exp()?)?
            .broadcast_add(&self.z_loc)?;

        let x_eps = noise.randn(num_samples, self.num_steps)?;
        let x = self
            .forward(&z)?
            .add(&x_eps.broadcast_mul(&self.ln_scale.exp()?)?)?;

        let log_q_z = standard_normal_log_prob(&z_eps)?.broadcast_sub(&self.z_ln_scale.sum_all()?)?;
        let log_q_x = standard_normal_log_prob(&x_eps)?.broadcast_sub(&self.ln_scale.sum_all()?)?;
        let log_r_z = standard_normal_log_prob(&z)?;

        let log_q = ((log_q_z + log_q_x)? - log_r_z)?;
        Ok(VariationalSample { x, log_q })
    }
}

///////////////////////////////////
// dispatch                      //
///////////////////////////////////

pub enum BrownianPosterior {
    Pe(AutoregressiveVar),
    Mf(GaussianVar),
    Mn(FullRankGaussianVar),
    Nn(NeuralVar),
}

impl BrownianPosterior {
    /// Build a fresh family; all its parameters go into `varmap`.
    pub fn build(
        family: VariationalFamily,
        varmap: &VarMap,
        model: &BrownianModel,
        arch: &NeuralArch,
        noise: &mut NoiseSource,
    ) -> Result<Self> {
        let device = noise.device().clone();
        match family {
            VariationalFamily::Pe => Ok(Self::Pe(AutoregressiveVar::new(varmap, model, &device)?)),
            VariationalFamily::Mf => Ok(Self::Mf(mean_field(varmap, model, &device)?)),
            VariationalFamily::Mn => Ok(Self::Mn(FullRankGaussianVar::new(varmap, model, &device)?)),
            VariationalFamily::Nn => Ok(Self::Nn(NeuralVar::new(varmap, model, arch, noise)?)),
        }
    }

    pub fn family(&self) -> VariationalFamily {
        match self {
            Self::Pe(_) => VariationalFamily::Pe,
            Self::Mf(_) => VariationalFamily::Mf,
            Self::Mn(_) => VariationalFamily::Mn,
            Self::Nn(_) => VariationalFamily::Nn,
        }
    }
}

impl VariationalDistribution for BrownianPosterior {
    fn dim(&self) -> usize {
        match self {
            Self::Pe(q) => q.dim(),
            Self::Mf(q) => q.dim(),
            Self::Mn(q) => q.dim(),
            Self::Nn(q) => q.dim(),
        }
    }

    fn sample(&self, num_samples: usize, noise: &mut NoiseSource) -> Result<VariationalSample> {
        match self {
            Self::Pe(q) => q.sample(num_samples, noise),
            Self::Mf(q) => q.sample(num_samples, noise),
            Self::Mn(q) => q.sample(num_samples, noise),
            Self::Nn(q) => q.sample(num_samples, noise),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::log_evidence;
    use crate::model::{BrownianConfig, ObservationRule};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sgvb_util::sgvb::{estimate_elbo, fit, OptimizerKind, TrainConfig};

    fn small_model(rule: ObservationRule) -> BrownianModel {
        BrownianModel::new(
            BrownianConfig {
                num_steps: 12,
                ..Default::default()
            },
            rule,
        )
    }

    /// O(1) scales so that optimizer jitter does not dominate the ELBO gap
    fn unit_scale_model(rule: ObservationRule) -> BrownianModel {
        BrownianModel::new(
            BrownianConfig {
                num_steps: 12,
                dt: 1.0,
                driving_noise: 1.0,
                measure_noise: 0.5,
            },
            rule,
        )
    }

    #[test]
    fn test_sample_shapes_all_families() -> Result<()> {
        let model = small_model(ObservationRule::Bridge);
        let mut noise = NoiseSource::new(0, &Device::Cpu);

        for family in VariationalFamily::ALL {
            let varmap = VarMap::new();
            let q = BrownianPosterior::build(family, &varmap, &model, &NeuralArch::default(), &mut noise)?;
            let sample = q.sample(7, &mut noise)?;

            assert_eq!(q.family(), family);
            assert_eq!(sample.x.dims(), &[7, 12], "{}", family);
            assert_eq!(sample.log_q.dims(), &[7], "{}", family);
            assert!(!varmap.all_vars().is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_autoregressive_initial_weights() -> Result<()> {
        let model = small_model(ObservationRule::Past);
        let q = AutoregressiveVar::new(&VarMap::new(), &model, &Device::Cpu)?;
        let w: Vec<f32> = q.weights()?.to_vec1()?;

        assert_eq!(w.len(), 11);
        // no step in 1..12 is observed under Past
        let sigmoid_one = 1.0 / (1.0 + (-1.0f32).exp());
        assert!(w.iter().all(|&v| (v - sigmoid_one).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn test_scale_tril_is_lower_triangular() -> Result<()> {
        let model = small_model(ObservationRule::Full);
        let q = FullRankGaussianVar::new(&VarMap::new(), &model, &Device::Cpu)?;
        let l: Vec<Vec<f32>> = q.scale_tril()?.to_vec2()?;

        for (i, row) in l.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(v, expected);
            }
        }
        Ok(())
    }

    #[test]
    fn test_elbo_below_log_evidence() -> Result<()> {
        let model = unit_scale_model(ObservationRule::Full);
        let mut rng = StdRng::seed_from_u64(5);
        let sim = model.simulate(&mut rng);
        let target = model.condition(&sim, &Device::Cpu)?;
        let log_z = log_evidence(&model.config, &sim.observations);

        let mut noise = NoiseSource::new(6, &Device::Cpu);
        for family in VariationalFamily::ALL {
            let varmap = VarMap::new();
            let q = BrownianPosterior::build(family, &varmap, &model, &NeuralArch::default(), &mut noise)?;
            let est = estimate_elbo(&q, &target, 2000, &mut noise)?;
            assert!(
                est.elbo < log_z + 4.0 * est.std_err + 1e-3,
                "{}: elbo {} > log Z {}",
                family,
                est.elbo,
                log_z
            );
        }
        Ok(())
    }

    #[test]
    fn test_full_rank_reaches_log_evidence() -> Result<()> {
        let model = unit_scale_model(ObservationRule::Bridge);
        let mut rng = StdRng::seed_from_u64(8);
        let sim = model.simulate(&mut rng);
        let target = model.condition(&sim, &Device::Cpu)?;
        let log_z = log_evidence(&model.config, &sim.observations);

        let mut noise = NoiseSource::new(9, &Device::Cpu);
        let varmap = VarMap::new();
        let q = FullRankGaussianVar::new(&varmap, &model, &Device::Cpu)?;

        let before = estimate_elbo(&q, &target, 2000, &mut noise)?;

        let config = TrainConfig {
            num_iters: 3000,
            num_samples: 20,
            learning_rate: 0.01,
            optimizer: OptimizerKind::Adam,
            verbose: false,
        };
        fit(&q, &target, &varmap, &config, &mut noise)?;

        let after = estimate_elbo(&q, &target, 2000, &mut noise)?;
        assert!(after.elbo > before.elbo);
        assert!(
            (log_z - after.elbo) < 1.0,
            "gap {} (elbo {}, log Z {})",
            log_z - after.elbo,
            after.elbo,
            log_z
        );
        Ok(())
    }
}
