use std::path::PathBuf;

use candle_core::Device;
use candle_nn::VarMap;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use sgvb_util::sgvb::{estimate_elbo, fit, ElboEstimate, NoiseSource, TrainConfig};

use crate::kalman::log_evidence;
use crate::model::{BrownianConfig, BrownianModel, ConditionedBrownian, ObservationRule, Simulation};
use crate::plot::plot_condition;
use crate::results::{plot_file_name, write_results, ConditionResults, LossCurveRecord};
use crate::variational::{BrownianPosterior, NeuralArch, VariationalFamily};

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub model: BrownianConfig,
    pub train: TrainConfig,
    pub arch: NeuralArch,
    pub repetitions: usize,
    /// Monte Carlo draws for the final ELBO estimate
    pub elbo_samples: usize,
    pub conditions: Vec<ObservationRule>,
    pub families: Vec<VariationalFamily>,
    pub out_dir: PathBuf,
    pub seed: Option<u64>,
    pub keep_loss_curves: bool,
    pub device: Device,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model: BrownianConfig::default(),
            train: TrainConfig::default(),
            arch: NeuralArch::default(),
            repetitions: 15,
            elbo_samples: 1000,
            conditions: ObservationRule::ALL.to_vec(),
            families: VariationalFamily::ALL.to_vec(),
            out_dir: PathBuf::from("."),
            seed: None,
            keep_loss_curves: false,
            device: Device::Cpu,
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.model.validate()?;
        anyhow::ensure!(self.repetitions > 0, "need at least one repetition");
        anyhow::ensure!(self.elbo_samples > 0, "need at least one ELBO sample");
        anyhow::ensure!(self.train.num_samples > 0, "need at least one training sample");
        anyhow::ensure!(!self.conditions.is_empty(), "no conditions selected");
        anyhow::ensure!(!self.families.is_empty(), "no variational families selected");
        anyhow::ensure!(
            self.arch.hidden_size > 0 && self.arch.latent_size > 0,
            "network sizes must be positive"
        );
        Ok(())
    }
}

/// Result of fitting one family to one data set.
pub struct FitOutcome {
    pub family: VariationalFamily,
    pub estimate: ElboEstimate,
    pub loss_trace: Vec<f32>,
}

fn rmse(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().max(1) as f64;
    let sse: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum();
    (sse / n).sqrt()
}

/// Fit a fresh instance of `family` to `target` and estimate its ELBO.
pub fn fit_family(
    family: VariationalFamily,
    model: &BrownianModel,
    target: &ConditionedBrownian,
    config: &ExperimentConfig,
    noise: &mut NoiseSource,
) -> candle_core::Result<FitOutcome> {
    let varmap = VarMap::new();
    let q = BrownianPosterior::build(family, &varmap, model, &config.arch, noise)?;

    let loss_trace = fit(&q, target, &varmap, &config.train, noise)?;
    let estimate = estimate_elbo(&q, target, config.elbo_samples, noise)?;

    Ok(FitOutcome {
        family,
        estimate,
        loss_trace,
    })
}

/// Repetitions × families for one observation rule.
pub fn run_condition(
    rule: ObservationRule,
    config: &ExperimentConfig,
    noise: &mut NoiseSource,
) -> anyhow::Result<ConditionResults> {
    let model = BrownianModel::new(config.model.clone(), rule);
    let mut results = ConditionResults::new(rule, &config.families);

    info!(
        "Condition {}: {} of {} steps observed",
        rule,
        model.observed_steps().iter().filter(|&&o| o).count(),
        model.num_steps()
    );

    let pb = ProgressBar::new(config.repetitions as u64);
    if config.train.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    for rep in 0..config.repetitions {
        info!("Repetition: {}", rep);

        let sim: Simulation = model.simulate(noise.rng());
        let target = model.condition(&sim, &config.device)?;
        let log_z = log_evidence(&model.config, &sim.observations);
        results.log_evidence.push(log_z);

        for &family in &config.families {
            let outcome = fit_family(family, &model, &target, config, noise)?;
            let path_err = rmse(&outcome.estimate.mean_path, &sim.ground_truth);

            info!(
                "{} {:.4} (± {:.4}, log Z {:.4}, path RMSE {:.4})",
                family, outcome.estimate.elbo, outcome.estimate.std_err, log_z, path_err
            );

            results.push_fit(family, outcome.estimate.elbo, path_err);
            if config.keep_loss_curves {
                results.loss_curves.push(LossCurveRecord {
                    repetition: rep,
                    family: outcome.family,
                    loss: outcome.loss_trace,
                });
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(results)
}

/// Run every condition, persisting results and a plot after each one.
pub fn run_experiment(config: &ExperimentConfig) -> anyhow::Result<Vec<ConditionResults>> {
    config.validate()?;
    std::fs::create_dir_all(&config.out_dir)?;

    let mut noise = match config.seed {
        Some(seed) => NoiseSource::new(seed, &config.device),
        None => NoiseSource::from_os_rng(&config.device),
    };

    let mut all_results = Vec::with_capacity(config.conditions.len());

    for &rule in &config.conditions {
        let results = run_condition(rule, config, &mut noise)?;

        write_results(&config.out_dir, &results)?;
        let plot_path = config.out_dir.join(plot_file_name(rule));
        plot_condition(&results, &plot_path)?;
        info!("Wrote {:?}", plot_path);

        all_results.push(results);
    }

    Ok(all_results)
}
