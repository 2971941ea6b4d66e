//! Structured record of a batch run.
//!
//! The report lists every attempted signal with its outcome so long
//! unattended runs can be audited and failed indices re-run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SignalOutcome {
    Succeeded { result_file: PathBuf },
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub index: usize,
    pub label: String,
    pub elapsed_secs: f64,
    #[serde(flatten)]
    pub outcome: SignalOutcome,
}

/// Serializable summary of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub catalog: String,
    pub prior: String,
    pub distance_kpc: f64,
    pub results_dir: PathBuf,
    pub signals: Vec<SignalRecord>,
}

impl RunReport {
    pub fn new(catalog: &str, prior: &str, distance_kpc: f64, results_dir: &Path) -> Self {
        Self {
            catalog: catalog.to_string(),
            prior: prior.to_string(),
            distance_kpc,
            results_dir: results_dir.to_path_buf(),
            signals: Vec::new(),
        }
    }

    pub fn record_success(&mut self, index: usize, label: &str, elapsed_secs: f64, result_file: PathBuf) {
        self.signals.push(SignalRecord {
            index,
            label: label.to_string(),
            elapsed_secs,
            outcome: SignalOutcome::Succeeded { result_file },
        });
    }

    pub fn record_failure(&mut self, index: usize, label: &str, elapsed_secs: f64, cause: String) {
        self.signals.push(SignalRecord {
            index,
            label: label.to_string(),
            elapsed_secs,
            outcome: SignalOutcome::Failed { cause },
        });
    }

    pub fn attempted(&self) -> usize {
        self.signals.len()
    }

    pub fn succeeded(&self) -> usize {
        self.signals
            .iter()
            .filter(|s| matches!(s.outcome, SignalOutcome::Succeeded { .. }))
            .count()
    }

    /// Failed signal indices with their causes.
    pub fn failures(&self) -> Vec<(usize, &str)> {
        self.signals
            .iter()
            .filter_map(|s| match &s.outcome {
                SignalOutcome::Failed { cause } => Some((s.index, cause.as_str())),
                SignalOutcome::Succeeded { .. } => None,
            })
            .collect()
    }

    /// Log the attempted/succeeded/failed totals and every failure cause.
    pub fn log_summary(&self) {
        let failures = self.failures();
        tracing::info!(
            attempted = self.attempted(),
            succeeded = self.succeeded(),
            failed = failures.len(),
            "Run finished"
        );
        for (index, cause) in failures {
            tracing::warn!(signal = index, %cause, "Signal failed");
        }
    }

    /// Save the report to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Run report saved");
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_report_roundtrip() {
        let mut report = RunReport::new("abylkairov", "Uniform", 1.0, Path::new("PE_AB_O3_1_filtered"));
        report.record_success(0, "1_signal_0", 12.5, PathBuf::from("PE_AB_O3_1_filtered/1_signal_0.csv"));
        report.record_failure(1, "1_signal_1", 0.25, "Noise error: no coverage".to_string());

        let file = NamedTempFile::new().unwrap();
        report.save_to_file(file.path()).unwrap();
        let restored = RunReport::load_from_file(file.path()).unwrap();
        assert_eq!(restored, report);

        let json = std::fs::read_to_string(file.path()).unwrap();
        assert!(json.contains("\"status\": \"failed\""));
    }

    #[test]
    fn test_counts() {
        let mut report = RunReport::default();
        report.record_success(3, "a", 1.0, PathBuf::from("a.csv"));
        report.record_failure(4, "b", 1.0, "boom".to_string());
        report.record_failure(7, "c", 1.0, "bang".to_string());
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failures(), vec![(4, "boom"), (7, "bang")]);
    }
}
