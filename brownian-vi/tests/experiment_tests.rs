use brownian_vi::cli::{Cli, Commands};
use brownian_vi::experiment::{run_experiment, ExperimentConfig};
use brownian_vi::model::{BrownianConfig, ObservationRule};
use brownian_vi::results::read_results;
use brownian_vi::variational::VariationalFamily;
use clap::Parser;
use sgvb_util::sgvb::{OptimizerKind, TrainConfig};

#[test]
fn end_to_end_writes_results_and_plots() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let config = ExperimentConfig {
        model: BrownianConfig {
            num_steps: 10,
            ..Default::default()
        },
        train: TrainConfig {
            num_iters: 10,
            num_samples: 5,
            learning_rate: 1e-2,
            optimizer: OptimizerKind::Adam,
            verbose: true,
        },
        repetitions: 2,
        elbo_samples: 100,
        conditions: vec![ObservationRule::Past, ObservationRule::Bridge],
        out_dir: dir.path().to_path_buf(),
        seed: Some(2024),
        ..Default::default()
    };

    let results = run_experiment(&config)?;
    assert_eq!(results.len(), 2);

    for rule in [ObservationRule::Past, ObservationRule::Bridge] {
        let json = dir.path().join(format!("{}_brownian_results.json", rule.label()));
        let tsv = dir.path().join(format!("{}_brownian_results.tsv", rule.label()));
        let svg = dir.path().join(format!("brownian_{}.svg", rule.label()));
        assert!(json.exists() && tsv.exists() && svg.exists(), "{}", rule);

        let saved = read_results(&json)?;
        assert_eq!(saved.condition, rule);
        assert_eq!(saved.num_repetitions(), 2);
        for f in VariationalFamily::ALL {
            assert_eq!(saved.elbo[&f].len(), 2);
        }
        // loss curves were not requested
        assert!(saved.loss_curves.is_empty());
    }

    // Full was not selected
    assert!(!dir.path().join("Full_brownian_results.json").exists());
    Ok(())
}

#[test]
fn cli_defaults_cover_every_condition_and_family() {
    let cli = Cli::try_parse_from(["brownian-vi", "run"]).expect("parse");
    let Commands::Run(args) = cli.command else {
        panic!("expected run");
    };

    assert_eq!(args.conditions, ObservationRule::ALL.to_vec());
    assert_eq!(args.families, VariationalFamily::ALL.to_vec());
    assert_eq!(args.repetitions, 15);
    assert_eq!(args.iters, 400);
    assert_eq!(args.samples, 20);
    assert_eq!(args.elbo_samples, 1000);

    let config = args.to_config();
    assert_eq!(config.model.num_steps, 40);
    assert!(config.validate().is_ok());
}

#[test]
fn cli_parses_lists_and_optimizer() {
    let cli = Cli::try_parse_from([
        "brownian-vi",
        "run",
        "--conditions",
        "bridge,full",
        "--families",
        "mf,nn",
        "--optimizer",
        "sgd",
        "--lr",
        "0.0001",
    ])
    .expect("parse");
    let Commands::Run(args) = cli.command else {
        panic!("expected run");
    };

    assert_eq!(args.conditions, vec![ObservationRule::Bridge, ObservationRule::Full]);
    assert_eq!(args.families, vec![VariationalFamily::Mf, VariationalFamily::Nn]);
    assert_eq!(args.optimizer, OptimizerKind::Sgd);
}
