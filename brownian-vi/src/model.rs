use std::fmt;

use candle_core::{Device, Result, Tensor};
use clap::ValueEnum;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use sgvb_util::sgvb::{fixed_normal_log_density, LogDensity};

/// Discretized Brownian motion observed through Gaussian noise.
///
/// ```text
/// x[0] ~ N(0, driving_noise²)
/// x[t] ~ N(x[t-1], dt * driving_noise²)     t = 1..T-1
/// y[t] ~ N(x[t], measure_noise²)            t observed
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrownianConfig {
    pub num_steps: usize,
    pub dt: f64,
    pub driving_noise: f64,
    pub measure_noise: f64,
}

impl Default for BrownianConfig {
    fn default() -> Self {
        Self {
            num_steps: 40,
            dt: 0.01,
            driving_noise: 0.1,
            measure_noise: 0.15,
        }
    }
}

impl BrownianConfig {
    /// Standard deviation of one transition x[t-1] -> x[t]
    pub fn step_scale(&self) -> f64 {
        self.dt.sqrt() * self.driving_noise
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_steps >= 2, "need at least two time steps, got {}", self.num_steps);
        anyhow::ensure!(self.dt > 0.0, "dt must be positive, got {}", self.dt);
        anyhow::ensure!(
            self.driving_noise > 0.0 && self.measure_noise > 0.0,
            "noise scales must be positive"
        );
        Ok(())
    }
}

/// Which time steps contribute a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum ObservationRule {
    /// Only the end of the series: t > 30
    Past,
    /// Every step
    Full,
    /// Both ends with a gap in the middle: t < 10 or t > 30
    Bridge,
}

impl ObservationRule {
    pub const ALL: [ObservationRule; 3] = [Self::Past, Self::Full, Self::Bridge];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Past => "Past",
            Self::Full => "Full",
            Self::Bridge => "Bridge",
        }
    }

    /// Inclusion test of the rule itself, before the y[0] anchor.
    pub fn includes(&self, t: usize) -> bool {
        match self {
            Self::Past => t > 30,
            Self::Full => true,
            Self::Bridge => t < 10 || t > 30,
        }
    }

    /// y[0] is always measured; later steps follow the rule.
    pub fn observes(&self, t: usize) -> bool {
        t == 0 || self.includes(t)
    }
}

impl fmt::Display for ObservationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One joint draw of latent path and measurements.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub ground_truth: Vec<f32>,
    /// `Some(y[t])` on observed steps
    pub observations: Vec<Option<f32>>,
}

impl Simulation {
    pub fn num_observed(&self) -> usize {
        self.observations.iter().filter(|y| y.is_some()).count()
    }
}

#[derive(Debug, Clone)]
pub struct BrownianModel {
    pub config: BrownianConfig,
    pub rule: ObservationRule,
}

impl BrownianModel {
    pub fn new(config: BrownianConfig, rule: ObservationRule) -> Self {
        Self { config, rule }
    }

    pub fn num_steps(&self) -> usize {
        self.config.num_steps
    }

    pub fn observed_steps(&self) -> Vec<bool> {
        (0..self.config.num_steps)
            .map(|t| self.rule.observes(t))
            .collect()
    }

    /// Ancestral sampling of (x, y).
    pub fn simulate<R: Rng>(&self, rng: &mut R) -> Simulation {
        let cfg = &self.config;
        let step = cfg.step_scale();
        let mut ground_truth = Vec::with_capacity(cfg.num_steps);
        let mut observations = Vec::with_capacity(cfg.num_steps);

        let mut x = 0.0f64;
        for t in 0..cfg.num_steps {
            let z: f64 = rng.sample(StandardNormal);
            x = if t == 0 {
                cfg.driving_noise * z
            } else {
                x + step * z
            };
            ground_truth.push(x as f32);

            let y = if self.rule.observes(t) {
                let e: f64 = rng.sample(StandardNormal);
                Some((x + cfg.measure_noise * e) as f32)
            } else {
                None
            };
            observations.push(y);
        }

        Simulation {
            ground_truth,
            observations,
        }
    }

    /// Condition the model on the measurements of `sim`.
    pub fn condition(&self, sim: &Simulation, device: &Device) -> Result<ConditionedBrownian> {
        ConditionedBrownian::new(&self.config, &sim.observations, device)
    }
}

/// Joint log density log p(x, y) with the measurements y held fixed.
pub struct ConditionedBrownian {
    driving_noise: f64,
    step_scale: f64,
    measure_noise: f64,
    /// Measurements with zeros on unobserved steps, shape (T,)
    y: Tensor,
    /// 1 on observed steps, 0 elsewhere, shape (T,)
    mask: Tensor,
    num_steps: usize,
}

impl ConditionedBrownian {
    pub fn new(config: &BrownianConfig, observations: &[Option<f32>], device: &Device) -> Result<Self> {
        let num_steps = observations.len();
        let y: Vec<f32> = observations.iter().map(|y| y.unwrap_or(0.0)).collect();
        let mask: Vec<f32> = observations
            .iter()
            .map(|y| if y.is_some() { 1.0 } else { 0.0 })
            .collect();
        Ok(Self {
            driving_noise: config.driving_noise,
            step_scale: config.step_scale(),
            measure_noise: config.measure_noise,
            y: Tensor::from_vec(y, num_steps, device)?,
            mask: Tensor::from_vec(mask, num_steps, device)?,
            num_steps,
        })
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }
}

impl LogDensity for ConditionedBrownian {
    /// log p(x, y) = log p(x[0]) + Σ_t log p(x[t] | x[t-1]) + Σ_obs log p(y[t] | x[t])
    ///
    /// # Arguments
    /// * `x` - Latent paths, shape (S, T)
    ///
    /// # Returns
    /// Shape (S,)
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let t = self.num_steps;

        let x0 = x.narrow(1, 0, 1)?;
        let log_p = fixed_normal_log_density(&x0, &x0.zeros_like()?, self.driving_noise)?.sum(1)?;

        let log_p = if t > 1 {
            let prev = x.narrow(1, 0, t - 1)?;
            let next = x.narrow(1, 1, t - 1)?;
            let log_trans = fixed_normal_log_density(&next, &prev, self.step_scale)?.sum(1)?;
            (log_p + log_trans)?
        } else {
            log_p
        };

        let log_obs = fixed_normal_log_density(x, &self.y, self.measure_noise)?
            .broadcast_mul(&self.mask)?
            .sum(1)?;

        log_p + log_obs
    }
}
