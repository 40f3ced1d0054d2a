use candle_core::{Error, Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap, SGD};
use clap::ValueEnum;
use log::debug;

use super::noise::NoiseSource;
use super::sgvb::elbo_loss;
use super::traits::{LogDensity, VariationalDistribution};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OptimizerKind {
    /// Plain stochastic gradient descent
    Sgd,
    /// Adam without weight decay
    Adam,
}

/// Optimizer over all variables of one variational fit.
pub enum SgvbOptimizer {
    Sgd(SGD),
    Adam(AdamW),
}

impl SgvbOptimizer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        match kind {
            OptimizerKind::Sgd => Ok(Self::Sgd(SGD::new(vars, learning_rate)?)),
            OptimizerKind::Adam => {
                let params = ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                Ok(Self::Adam(AdamW::new(vars, params)?))
            }
        }
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Sgd(opt) => opt.backward_step(loss),
            Self::Adam(opt) => opt.backward_step(loss),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub num_iters: usize,
    pub num_samples: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_iters: 400,
            num_samples: 20,
            learning_rate: 1e-2,
            optimizer: OptimizerKind::Adam,
            verbose: false,
        }
    }
}

/// Fit `q` to `p` by stochastic gradient ascent on the ELBO.
///
/// The optimizer is built over `varmap.all_vars()`, so `varmap` must hold
/// exactly the parameters of `q` and must be populated before calling.
///
/// # Returns
/// Loss curve: negative ELBO estimate at every iteration
pub fn fit<Q, P>(
    q: &Q,
    p: &P,
    varmap: &VarMap,
    config: &TrainConfig,
    noise: &mut NoiseSource,
) -> Result<Vec<f32>>
where
    Q: VariationalDistribution,
    P: LogDensity,
{
    let mut optimizer =
        SgvbOptimizer::new(config.optimizer, varmap.all_vars(), config.learning_rate)?;

    let mut loss_trace = Vec::with_capacity(config.num_iters);

    for iter in 0..config.num_iters {
        let loss = elbo_loss(q, p, config.num_samples, noise)?;
        let loss_val = loss.to_scalar::<f32>()?;

        if !loss_val.is_finite() {
            return Err(Error::Msg(format!(
                "non-finite loss {} at iteration {}",
                loss_val, iter
            )));
        }

        optimizer.backward_step(&loss)?;
        loss_trace.push(loss_val);

        if config.verbose && (iter % 100 == 0 || iter + 1 == config.num_iters) {
            debug!("iter {:4}: loss = {:10.4}", iter, loss_val);
        }
    }

    Ok(loss_trace)
}
