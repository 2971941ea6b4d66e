//! Per-signal posterior summaries and their merged table.

use crate::catalog::EntryMetadata;
use crate::error::{ResultsError, SamplerError};
use crate::model::PARAMETER_NAMES;
use crate::sampler::Posterior;
use crate::utils::signal_index_from_stem;
use csv::StringRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Posterior mean and sample standard deviation of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    pub std: f64,
}

/// Summary of one signal's posterior, in parameter order (β, α, τ, s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosteriorResult {
    pub estimates: [Estimate; 4],
}

/// `,beta_est,beta_un,...` with an unnamed leading index column.
fn header() -> Vec<String> {
    std::iter::once(String::new())
        .chain(
            PARAMETER_NAMES
                .iter()
                .flat_map(|n| [format!("{n}_est"), format!("{n}_un")]),
        )
        .collect()
}

impl PosteriorResult {
    pub fn from_posterior(posterior: &Posterior) -> Result<Self, SamplerError> {
        let mut estimates = [Estimate { mean: 0.0, std: 0.0 }; 4];
        for (slot, name) in estimates.iter_mut().zip(PARAMETER_NAMES) {
            *slot = Estimate {
                mean: posterior.mean(name)?,
                std: posterior.std(name)?,
            };
        }
        Ok(Self { estimates })
    }

    pub fn get(&self, name: &str) -> Option<Estimate> {
        PARAMETER_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.estimates[i])
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.estimates.iter().flat_map(|e| [e.mean, e.std])
    }

    /// Write the single-row summary CSV.
    pub fn write_csv(&self, path: &Path) -> Result<(), ResultsError> {
        let failed = |reason: String| ResultsError::WriteFailed {
            path: Box::new(path.to_path_buf()),
            reason,
        };
        let mut writer = csv::Writer::from_path(path).map_err(|e| failed(e.to_string()))?;
        writer.write_record(header()).map_err(|e| failed(e.to_string()))?;
        let row: Vec<String> = std::iter::once("0".to_string())
            .chain(self.values().map(|v| v.to_string()))
            .collect();
        writer.write_record(&row).map_err(|e| failed(e.to_string()))?;
        writer.flush().map_err(|e| failed(e.to_string()))
    }

    /// Read a summary CSV back, locating columns by name.
    pub fn read_csv(path: &Path) -> Result<Self, ResultsError> {
        let failed = |reason: String| ResultsError::ReadFailed {
            path: Box::new(path.to_path_buf()),
            reason,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| failed(e.to_string()))?;
        let headers = reader.headers().map_err(|e| failed(e.to_string()))?.clone();
        let record = match reader.records().next() {
            Some(record) => record.map_err(|e| failed(e.to_string()))?,
            None => {
                return Err(ResultsError::NoDataRow {
                    path: Box::new(path.to_path_buf()),
                })
            }
        };

        let field = |name: &str| -> Result<f64, ResultsError> {
            let idx = headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| failed(format!("missing column '{name}'")))?;
            parse_field(&record, idx).map_err(failed)
        };

        let mut estimates = [Estimate { mean: 0.0, std: 0.0 }; 4];
        for (slot, name) in estimates.iter_mut().zip(PARAMETER_NAMES) {
            *slot = Estimate {
                mean: field(&format!("{name}_est"))?,
                std: field(&format!("{name}_un"))?,
            };
        }
        Ok(Self { estimates })
    }
}

fn parse_field(record: &StringRecord, idx: usize) -> Result<f64, String> {
    let raw = record.get(idx).ok_or_else(|| format!("row has no column {idx}"))?;
    raw.parse::<f64>().map_err(|_| format!("'{raw}' is not a number"))
}

/// Per-signal result files in `dir`, ordered by signal index.
pub fn signal_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>, ResultsError> {
    let pattern = dir.join("*.csv");
    let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| ResultsError::ReadFailed {
        path: Box::new(dir.to_path_buf()),
        reason: e.to_string(),
    })?;

    let mut files: Vec<(usize, PathBuf)> = paths
        .filter_map(|entry| entry.ok())
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            let index = signal_index_from_stem(stem)?;
            Some((index, path))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Concatenate every per-signal CSV in `dir` into `{dir}/{dir_name}_merged.csv`.
///
/// With `metadata`, the catalog's EOS, T/|W| and peak frequency are appended
/// for each signal index.
pub fn merge_results(dir: &Path, metadata: Option<&BTreeMap<usize, EntryMetadata>>) -> Result<PathBuf, ResultsError> {
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("results")
        .to_string();
    let out_path = dir.join(format!("{dir_name}_merged.csv"));
    let failed = |reason: String| ResultsError::WriteFailed {
        path: Box::new(out_path.clone()),
        reason,
    };

    let files = signal_files(dir)?;
    let mut writer = csv::Writer::from_path(&out_path).map_err(|e| failed(e.to_string()))?;

    let mut columns = header();
    columns[0] = "file".to_string();
    if metadata.is_some() {
        columns.extend(["eos", "t_over_w", "f_peak"].map(String::from));
    }
    writer.write_record(&columns).map_err(|e| failed(e.to_string()))?;

    for (index, path) in &files {
        let result = PosteriorResult::read_csv(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut row: Vec<String> = std::iter::once(stem)
            .chain(result.values().map(|v| v.to_string()))
            .collect();
        if let Some(metadata) = metadata {
            let meta = metadata.get(index).cloned().unwrap_or_default();
            row.push(meta.eos.unwrap_or_default());
            row.push(meta.t_over_w.map(|v| v.to_string()).unwrap_or_default());
            row.push(meta.f_peak.map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&row).map_err(|e| failed(e.to_string()))?;
    }
    writer.flush().map_err(|e| failed(e.to_string()))?;

    tracing::info!(path = %out_path.display(), files = files.len(), "Merged results");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> PosteriorResult {
        PosteriorResult {
            estimates: [
                Estimate {
                    mean: 0.05012345678901234,
                    std: 0.0031,
                },
                Estimate { mean: 101.5, std: 12.25 },
                Estimate {
                    mean: -2.999e-4,
                    std: 1.2e-6,
                },
                Estimate {
                    mean: 2.0001e-4,
                    std: 3.3e-7,
                },
            ],
        }
    }

    #[test]
    fn test_csv_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_signal_0.csv");
        let result = sample();
        result.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(",beta_est,beta_un,alpha_est,alpha_un,tau_est,tau_un,s_est,s_un")
        );
        assert!(lines.next().unwrap().starts_with("0,"));
        assert_eq!(PosteriorResult::read_csv(&path).unwrap(), result);
    }

    #[test]
    fn test_header_only_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_signal_0.csv");
        std::fs::write(&path, ",beta_est,beta_un,alpha_est,alpha_un,tau_est,tau_un,s_est,s_un\n").unwrap();
        assert!(matches!(
            PosteriorResult::read_csv(&path),
            Err(ResultsError::NoDataRow { .. })
        ));
    }

    #[test]
    fn test_merge_orders_by_signal_index() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("PE_AB_O3_1_filtered");
        std::fs::create_dir_all(&dir).unwrap();
        for i in [10, 2, 1] {
            sample().write_csv(&dir.join(format!("1_signal_{i}.csv"))).unwrap();
        }
        std::fs::write(dir.join("1_signal_2_posterior.csv"), "beta\n1\n").unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert(
            2,
            EntryMetadata {
                eos: Some("LS220".to_string()),
                t_over_w: Some(0.07),
                f_peak: Some(700.0),
            },
        );
        let merged = merge_results(&dir, Some(&metadata)).unwrap();
        assert_eq!(merged, dir.join("PE_AB_O3_1_filtered_merged.csv"));

        let text = std::fs::read_to_string(&merged).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("file,beta_est"));
        assert!(lines[0].ends_with("eos,t_over_w,f_peak"));
        assert!(lines[1].starts_with("1_signal_1,"));
        assert!(lines[2].starts_with("1_signal_2,"));
        assert!(lines[2].ends_with("LS220,0.07,700"));
        assert!(lines[3].starts_with("1_signal_10,"));

        // Re-merging ignores the previous merged table
        merge_results(&dir, None).unwrap();
        let text = std::fs::read_to_string(&merged).unwrap();
        assert_eq!(text.lines().count(), 4);
    }
}
