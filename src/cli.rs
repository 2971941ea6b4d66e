//! Command-line parsing and dispatch for the `cbpe` binary.

use crate::batch::{load_catalog, run_batch_processing};
use crate::catalog::CatalogKind;
use crate::config::AppConfig;
use crate::priors::PriorChoice;
use crate::results::merge_results;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cbpe", version, about = "Core-bounce gravitational-wave parameter estimation")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "debug", "core_bounce_pe=trace")
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run inference over a range of catalog signals.
    Run(RunArgs),
    /// Merge per-signal result files into one table.
    Merge(MergeArgs),
    /// Write the default configuration to a file.
    InitConfig {
        /// Destination; defaults to the user config directory
        path: Option<PathBuf>,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Debug, Parser, Clone, Default)]
pub struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Catalog family (abylkairov or richers)
    #[arg(long)]
    pub catalog: Option<CatalogKind>,

    /// Catalog file path
    #[arg(long)]
    pub catalog_path: Option<PathBuf>,

    /// First signal index
    #[arg(long)]
    pub first: Option<usize>,

    /// Last signal index (inclusive)
    #[arg(long)]
    pub last: Option<usize>,

    /// Prior family: Uniform, LogUniform, triangular or unif_betasq
    #[arg(long)]
    pub prior: Option<PriorChoice>,

    /// Source distance in kpc
    #[arg(long)]
    pub distance: Option<f64>,

    /// Seed for noise selection and sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Parser, Clone)]
pub struct MergeArgs {
    /// Results directory holding `*_signal_<index>.csv` files
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Configuration whose catalog supplies eos, T/|W| and peak frequency columns
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// Load the configuration file (or defaults) and apply the overrides.
    pub fn resolve(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_file(path).context("Failed to load configuration")?,
            None => AppConfig::default(),
        };

        if let Some(kind) = self.catalog {
            config.catalog.kind = kind;
        }
        if let Some(path) = &self.catalog_path {
            config.catalog.path = path.clone();
        }
        if let Some(first) = self.first {
            config.inference.first_index = first;
        }
        if self.last.is_some() {
            config.inference.last_index = self.last;
        }
        if let Some(prior) = self.prior {
            config.inference.prior = prior;
        }
        if let Some(distance) = self.distance {
            config.pipeline.distance_kpc = distance;
        }
        if self.seed.is_some() {
            config.noise.seed = self.seed;
            config.sampler.seed = self.seed;
        }
        Ok(config)
    }
}

/// Dispatch a parsed command.
pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = args.resolve()?;
            let report = run_batch_processing(&config)?;
            if report.succeeded() == 0 && report.attempted() > 0 {
                anyhow::bail!("All {} signals failed", report.attempted());
            }
            Ok(())
        }
        Command::Merge(args) => {
            let metadata = match &args.config {
                Some(path) => {
                    let config = AppConfig::load_from_file(path).context("Failed to load configuration")?;
                    Some(load_catalog(&config).context("Failed to load catalog")?.metadata())
                }
                None => None,
            };
            let merged = merge_results(&args.dir, metadata.as_ref())?;
            tracing::info!("Merged results written to {:?}", merged);
            Ok(())
        }
        Command::InitConfig { path } => {
            let path = path.unwrap_or_else(AppConfig::default_path);
            AppConfig::default().save_to_file(&path)?;
            tracing::info!("Default configuration written to {:?}", path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "cbpe", "run", "--catalog", "richers", "--first", "2", "--last", "4", "--prior", "unif_betasq",
            "--distance", "10", "--seed", "7",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.catalog.kind, CatalogKind::Richers);
        assert_eq!(config.inference.first_index, 2);
        assert_eq!(config.inference.last_index, Some(4));
        assert_eq!(config.inference.prior, PriorChoice::UniformBetaSquared);
        assert_eq!(config.pipeline.distance_kpc, 10.0);
        assert_eq!(config.noise.seed, Some(7));
        assert_eq!(config.sampler.seed, Some(7));
    }

    #[test]
    fn test_rejects_unknown_prior() {
        assert!(Cli::try_parse_from(["cbpe", "run", "--prior", "Gaussian"]).is_err());
    }

    #[test]
    fn test_init_config_writes_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cbpe.toml");
        let cli = Cli::try_parse_from(["cbpe", "init-config", path.to_str().unwrap()]).unwrap();
        execute(cli).unwrap();
        assert_eq!(AppConfig::load_from_file(&path).unwrap(), AppConfig::default());
    }
}
