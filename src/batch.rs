use crate::catalog::{load_abylkairov, load_richers, Catalog, CatalogKind};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::metrics::RunMetrics;
use crate::pipeline::InferencePipeline;
use crate::report::RunReport;
use anyhow::{Context, Result};
use std::fs;
use std::time::Instant;

/// Load the catalog the config names, resampled to the pipeline rate.
pub fn load_catalog(config: &AppConfig) -> Result<Catalog, PipelineError> {
    let opts = config.load_options();
    let catalog = match config.catalog.kind {
        CatalogKind::Abylkairov => load_abylkairov(&config.catalog.path, config.catalog.wave_type()?, &opts)?,
        CatalogKind::Richers => load_richers(&config.catalog.path, &config.catalog.richers_datasets(), &opts)?,
    };
    Ok(catalog)
}

/// Validate the config, load the catalog and run every configured signal.
pub fn run_batch_processing(config: &AppConfig) -> Result<RunReport> {
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting batch processing");
    tracing::info!("Catalog: {} ({:?})", config.catalog.kind, config.catalog.path);
    tracing::info!("Prior: {}", config.inference.prior);
    tracing::info!("Distance: {} kpc", config.pipeline.distance_kpc);

    let catalog = load_catalog(config).context("Failed to load catalog")?;
    let mut pipeline = InferencePipeline::from_config(config).context("Failed to build pipeline")?;
    run_inference(config, &catalog, &mut pipeline)
}

/// Process signals `first_index..=last_index` of `catalog` one at a time.
///
/// Per-signal failures are logged, recorded in the report and skipped;
/// any other failure aborts the run.
pub fn run_inference(config: &AppConfig, catalog: &Catalog, pipeline: &mut InferencePipeline) -> Result<RunReport> {
    let Some(catalog_last) = catalog.last_index() else {
        anyhow::bail!("Catalog is empty");
    };
    let first = config.inference.first_index;
    let last = config.inference.last_index.unwrap_or(catalog_last);

    let results_dir = config.results_dir();
    fs::create_dir_all(&results_dir).context("Failed to create results directory")?;
    tracing::info!("Output directory: {:?}", results_dir);
    tracing::info!(
        first,
        last,
        noise = pipeline.noise_source(),
        "Processing {} signals",
        last.saturating_sub(first) + 1
    );

    let mut report = RunReport::new(
        &catalog.kind().to_string(),
        config.inference.prior.as_str(),
        config.pipeline.distance_kpc,
        &results_dir,
    );
    let mut metrics = if config.metrics.enabled {
        Some(RunMetrics::new(&config.metrics)?)
    } else {
        None
    };

    for index in first..=last {
        let label = catalog.kind().signal_label(index, config.pipeline.distance_kpc);
        tracing::info!(signal = index, %label, "Processing signal");
        let started = Instant::now();

        let outcome = catalog
            .get(index)
            .map_err(PipelineError::from)
            .and_then(|entry| pipeline.process(entry, &label, &results_dir));
        let elapsed = started.elapsed();

        match outcome {
            Ok(run) => {
                tracing::info!(
                    signal = index,
                    beta = run.result.estimates[0].mean,
                    alpha = run.result.estimates[1].mean,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Signal completed"
                );
                if let Some(metrics) = metrics.as_mut() {
                    metrics.record_signal(elapsed, run.evaluations, true);
                }
                report.record_success(index, &label, elapsed.as_secs_f64(), run.result_file);
            }
            Err(e) if e.is_per_signal() => {
                tracing::error!(signal = index, error = %e, "Failed to process signal");
                if let Some(hint) = e.recovery_hint() {
                    tracing::warn!(signal = index, "{hint}");
                }
                if let Some(metrics) = metrics.as_mut() {
                    metrics.record_signal(elapsed, 0, false);
                }
                report.record_failure(index, &label, elapsed.as_secs_f64(), e.to_string());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Aborting run at signal {index}"));
            }
        }
    }

    report.log_summary();
    if let Some(metrics) = &metrics {
        metrics.summary().log();
    }
    if config.output.write_report {
        report
            .save_to_file(&results_dir.join("run_report.json"))
            .context("Failed to save run report")?;
    }

    tracing::info!("Batch processing complete");
    Ok(report)
}
