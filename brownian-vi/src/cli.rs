use std::path::PathBuf;

use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use log::info;
use sgvb_util::sgvb::{OptimizerKind, TrainConfig};

use crate::experiment::{run_experiment, ExperimentConfig};
use crate::model::{BrownianConfig, ObservationRule};
use crate::plot::plot_condition;
use crate::results::{plot_file_name, read_results};
use crate::variational::{NeuralArch, VariationalFamily};

#[derive(Parser)]
#[command(
    name = "brownian-vi",
    version,
    about = "ELBO comparison of variational families on Brownian motion models",
    long_about = "Simulate a discretized Brownian motion observed with Gaussian noise,\n\
		  fit four variational families (PE, MF, MN, NN) by stochastic\n\
		  gradient ELBO optimization, and record the ELBO of each fit\n\
		  under three observation rules (Past, Full, Bridge).\n"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the experiment and write results and plots per condition
    Run(RunArgs),
    /// Re-draw plots from saved results files
    Plot(PlotArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ObservationRule::ALL.to_vec())]
    pub conditions: Vec<ObservationRule>,

    #[arg(long, value_enum, value_delimiter = ',', default_values_t = VariationalFamily::ALL.to_vec())]
    pub families: Vec<VariationalFamily>,

    #[arg(short, long, default_value = "15")]
    pub repetitions: usize,

    #[arg(long, default_value = "400")]
    pub iters: usize,

    #[arg(long, default_value = "20", help = "Monte Carlo samples per gradient step")]
    pub samples: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long, value_enum, default_value = "adam")]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value = "1000", help = "Monte Carlo samples for the final ELBO")]
    pub elbo_samples: usize,

    #[arg(long, default_value = "40")]
    pub num_steps: usize,

    #[arg(long, default_value = "0.01")]
    pub dt: f64,

    #[arg(long, default_value = "0.1")]
    pub driving_noise: f64,

    #[arg(long, default_value = "0.15")]
    pub measure_noise: f64,

    #[arg(long, default_value = "10", help = "Hidden units of the NN family")]
    pub hidden_size: usize,

    #[arg(long, default_value = "10", help = "Latent code size of the NN family")]
    pub latent_size: usize,

    #[arg(long, help = "Random seed for data and Monte Carlo noise")]
    pub seed: Option<u64>,

    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,

    #[arg(long, help = "Also write per-iteration loss curves")]
    pub loss_curves: bool,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct PlotArgs {
    /// `{condition}_brownian_results.json` files
    #[arg(required = true)]
    pub results: Vec<PathBuf>,

    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,
}

fn select_device(gpu: bool) -> Device {
    if gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(target_os = "linux")]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

impl RunArgs {
    pub fn to_config(&self) -> ExperimentConfig {
        ExperimentConfig {
            model: BrownianConfig {
                num_steps: self.num_steps,
                dt: self.dt,
                driving_noise: self.driving_noise,
                measure_noise: self.measure_noise,
            },
            train: TrainConfig {
                num_iters: self.iters,
                num_samples: self.samples,
                learning_rate: self.lr,
                optimizer: self.optimizer,
                verbose: self.verbose,
            },
            arch: NeuralArch {
                hidden_size: self.hidden_size,
                latent_size: self.latent_size,
            },
            repetitions: self.repetitions,
            elbo_samples: self.elbo_samples,
            conditions: self.conditions.clone(),
            families: self.families.clone(),
            out_dir: self.out_dir.clone(),
            seed: self.seed,
            keep_loss_curves: self.loss_curves,
            device: select_device(self.gpu),
        }
    }
}

pub fn run(args: &RunArgs) -> anyhow::Result<()> {
    let config = args.to_config();
    info!("Using device: {:?}", config.device);
    info!(
        "{} repetitions, {} iterations, {} samples, lr {} ({:?})",
        config.repetitions,
        config.train.num_iters,
        config.train.num_samples,
        config.train.learning_rate,
        config.train.optimizer
    );

    let results = run_experiment(&config)?;

    for res in &results {
        for (family, elbo) in &res.elbo {
            let mean = elbo.iter().sum::<f64>() / elbo.len().max(1) as f64;
            info!("{} {}: mean ELBO {:.4}", res.condition, family, mean);
        }
    }
    Ok(())
}

pub fn plot(args: &PlotArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.out_dir)?;
    for path in &args.results {
        let res = read_results(path)?;
        let out = args.out_dir.join(plot_file_name(res.condition));
        plot_condition(&res, &out)?;
        info!("Plotted {:?} -> {:?}", path, out);
    }
    Ok(())
}
