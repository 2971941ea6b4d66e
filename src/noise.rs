//! Detector noise sources and the signal + noise composer.
//!
//! The production source is the public strain archive; local files and
//! synthetic generators exist for offline runs and validation. No source
//! silently stands in for another: a fetch failure is reported upwards.

use crate::error::{NoiseError, Result};
use crate::timeseries::TimeSeries;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Source of detector strain segments.
pub trait NoiseArchive: Send {
    /// Strain for `[gps_start, gps_end)` at `sample_rate`, epoch `gps_start`.
    fn fetch(&self, detector: &str, gps_start: u64, gps_end: u64, sample_rate: u32) -> Result<TimeSeries, NoiseError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

fn expected_samples(gps_start: u64, gps_end: u64, sample_rate: u32) -> usize {
    (gps_end.saturating_sub(gps_start) * sample_rate as u64) as usize
}

/// Slice `[offset, offset + needed)` out of `data`, rejecting gaps.
fn contiguous_slice(data: &[f64], offset: usize, needed: usize) -> Result<Vec<f64>, NoiseError> {
    let available = data.len().saturating_sub(offset);
    if available < needed {
        return Err(NoiseError::ShortSegment {
            needed,
            actual: available,
        });
    }
    let slice = &data[offset..offset + needed];
    let finite = slice.iter().filter(|x| x.is_finite()).count();
    if finite < needed {
        return Err(NoiseError::ShortSegment {
            needed,
            actual: finite,
        });
    }
    Ok(slice.to_vec())
}

/// One entry of the archive's strain file listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrainFile {
    pub url: String,
    pub format: String,
    #[serde(rename = "GPSstart")]
    pub gps_start: u64,
    pub duration: u64,
    pub sampling_rate: u32,
}

impl StrainFile {
    pub fn gps_end(&self) -> u64 {
        self.gps_start + self.duration
    }

    /// Last path component of the download URL.
    fn file_name(&self) -> Result<&str, NoiseError> {
        self.url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| NoiseError::RequestFailed {
                reason: format!("cannot derive a file name from '{}'", self.url),
            })
    }
}

#[derive(Debug, Deserialize)]
struct StrainListing {
    strain: Vec<StrainFile>,
}

/// Decode the body returned by the strain file listing endpoint.
pub fn parse_listing(body: &str) -> Result<Vec<StrainFile>, NoiseError> {
    serde_json::from_str::<StrainListing>(body)
        .map(|listing| listing.strain)
        .map_err(|e| NoiseError::RequestFailed {
            reason: format!("failed to parse listing: {e}"),
        })
}

/// Samples one archive file contributes to a requested segment.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePiece {
    pub file: StrainFile,
    /// First sample to read, counted from the start of the file
    pub offset: usize,
    pub len: usize,
}

/// Pick the HDF5 files at `sample_rate` that tile `[gps_start, gps_end)`.
///
/// Pieces come back in GPS order and together cover the span exactly; a
/// hole anywhere in the span is `NoCoverage`.
pub fn plan_segment(
    files: &[StrainFile],
    detector: &str,
    gps_start: u64,
    gps_end: u64,
    sample_rate: u32,
) -> Result<Vec<FilePiece>, NoiseError> {
    let no_coverage = || NoiseError::NoCoverage {
        detector: detector.to_string(),
        start: gps_start,
        end: gps_end,
    };

    let mut candidates: Vec<&StrainFile> = files
        .iter()
        .filter(|f| {
            f.format == "hdf5"
                && f.sampling_rate == sample_rate
                && f.gps_start < gps_end
                && f.gps_end() > gps_start
        })
        .collect();
    candidates.sort_by_key(|f| f.gps_start);

    let rate = sample_rate as u64;
    let mut cursor = gps_start;
    let mut pieces = Vec::new();
    for file in candidates {
        if cursor >= gps_end {
            break;
        }
        if file.gps_end() <= cursor {
            continue;
        }
        if file.gps_start > cursor {
            return Err(no_coverage());
        }
        let end = file.gps_end().min(gps_end);
        pieces.push(FilePiece {
            file: file.clone(),
            offset: ((cursor - file.gps_start) * rate) as usize,
            len: ((end - cursor) * rate) as usize,
        });
        cursor = end;
    }

    if pieces.is_empty() || cursor < gps_end {
        return Err(no_coverage());
    }
    Ok(pieces)
}

/// Concatenate the pieces in order, rejecting short or gapped reads.
fn stitch<F>(pieces: &[FilePiece], mut read: F) -> Result<Vec<f64>, NoiseError>
where
    F: FnMut(&FilePiece) -> Result<Vec<f64>, NoiseError>,
{
    let total = pieces.iter().map(|p| p.len).sum();
    let mut samples = Vec::with_capacity(total);
    for piece in pieces {
        let data = read(piece)?;
        samples.extend(contiguous_slice(&data, 0, piece.len)?);
    }
    Ok(samples)
}

/// Public gravitational-wave open science archive.
///
/// Strain files are located through the JSON listing endpoint, downloaded
/// once into `cache_dir`, and only the requested samples are read back.
pub struct GwoscArchive {
    client: Client,
    base_url: String,
    run: String,
    cache_dir: PathBuf,
}

impl GwoscArchive {
    pub fn new(base_url: impl Into<String>, run: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            run: run.into(),
            cache_dir: cache_dir.into(),
        }
    }

    fn listing(&self, detector: &str, gps_start: u64, gps_end: u64) -> Result<Vec<StrainFile>, NoiseError> {
        let url = format!(
            "{}/archive/links/{}/{}/{}/{}/json/",
            self.base_url.trim_end_matches('/'),
            self.run,
            detector,
            gps_start,
            gps_end
        );
        tracing::debug!(%url, "Querying strain file listing");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| NoiseError::RequestFailed {
                reason: format!("listing request failed: {e}"),
            })?;
        if !resp.status().is_success() {
            return Err(NoiseError::RequestFailed {
                reason: format!("listing request failed with status {}", resp.status()),
            });
        }
        let body = resp.text().map_err(|e| NoiseError::RequestFailed {
            reason: format!("failed to read listing: {e}"),
        })?;
        parse_listing(&body)
    }

    /// Where `file` lives once downloaded.
    pub fn cache_path(&self, file: &StrainFile) -> Result<PathBuf, NoiseError> {
        Ok(self.cache_dir.join(file.file_name()?))
    }

    /// Download `file` into the cache unless it is already there.
    fn cached_file(&self, file: &StrainFile) -> Result<PathBuf, NoiseError> {
        let path = self.cache_path(file)?;
        if path.exists() {
            tracing::debug!(path = %path.display(), "Strain file cache hit");
            return Ok(path);
        }

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| NoiseError::ReadFailed {
            path: Box::new(self.cache_dir.clone()),
            reason: e.to_string(),
        })?;
        tracing::info!(url = %file.url, "Downloading strain file");
        let bytes = self
            .client
            .get(&file.url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| NoiseError::RequestFailed {
                reason: format!("download of '{}' failed: {e}", file.url),
            })?;
        // Staged beside the target and renamed, so the cache never holds a
        // truncated file.
        let write_failed = |reason: String| NoiseError::ReadFailed {
            path: Box::new(path.clone()),
            reason,
        };
        let mut staged = NamedTempFile::new_in(&self.cache_dir).map_err(|e| write_failed(e.to_string()))?;
        staged.write_all(&bytes).map_err(|e| write_failed(e.to_string()))?;
        staged.persist(&path).map_err(|e| write_failed(e.error.to_string()))?;
        Ok(path)
    }
}

/// Read `len` samples of `strain/Strain` starting at `offset`.
#[cfg(feature = "hdf5-support")]
fn read_strain_file(path: &Path, offset: usize, len: usize) -> Result<Vec<f64>, NoiseError> {
    let read_failed = |reason: String| NoiseError::ReadFailed {
        path: Box::new(path.to_path_buf()),
        reason,
    };
    let file = hdf5::File::open(path).map_err(|e| read_failed(e.to_string()))?;
    let dataset = file
        .dataset("strain/Strain")
        .map_err(|e| read_failed(format!("missing strain/Strain: {e}")))?;
    let available = dataset.size().saturating_sub(offset);
    if available < len {
        return Err(NoiseError::ShortSegment {
            needed: len,
            actual: available,
        });
    }
    dataset
        .read_slice_1d::<f64, _>(ndarray::s![offset..offset + len])
        .map(|samples| samples.to_vec())
        .map_err(|e| read_failed(e.to_string()))
}

#[cfg(not(feature = "hdf5-support"))]
fn read_strain_file(path: &Path, _offset: usize, _len: usize) -> Result<Vec<f64>, NoiseError> {
    Err(NoiseError::Unsupported {
        reason: format!(
            "decoding '{}' requires building with the hdf5-support feature",
            path.display()
        ),
    })
}

impl NoiseArchive for GwoscArchive {
    fn fetch(&self, detector: &str, gps_start: u64, gps_end: u64, sample_rate: u32) -> Result<TimeSeries, NoiseError> {
        let files = self.listing(detector, gps_start, gps_end)?;
        let pieces = plan_segment(&files, detector, gps_start, gps_end, sample_rate)?;
        if pieces.len() > 1 {
            tracing::debug!(files = pieces.len(), "Segment spans several strain files");
        }
        let samples = stitch(&pieces, |piece| {
            let path = self.cached_file(&piece.file)?;
            read_strain_file(&path, piece.offset, piece.len)
        })?;
        Ok(TimeSeries::new(samples, 1.0 / sample_rate as f64, gps_start as f64))
    }

    fn name(&self) -> &'static str {
        "gwosc"
    }
}

/// Pre-fetched strain stored as plain text, one sample per line.
///
/// Lines starting with `#` are comments.
pub struct LocalArchive {
    samples: Vec<f64>,
    gps_start: u64,
    sample_rate: u32,
}

impl LocalArchive {
    pub fn open(path: &Path, gps_start: u64, sample_rate: u32) -> Result<Self, NoiseError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NoiseError::ReadFailed {
            path: Box::new(path.to_path_buf()),
            reason: e.to_string(),
        })?;
        let mut samples = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.parse::<f64>().map_err(|_| NoiseError::ReadFailed {
                path: Box::new(path.to_path_buf()),
                reason: format!("line {} is not a number: '{line}'", lineno + 1),
            })?;
            samples.push(value);
        }
        tracing::info!(path = %path.display(), samples = samples.len(), "Loaded local noise file");
        Ok(Self {
            samples,
            gps_start,
            sample_rate,
        })
    }
}

impl NoiseArchive for LocalArchive {
    fn fetch(&self, detector: &str, gps_start: u64, gps_end: u64, sample_rate: u32) -> Result<TimeSeries, NoiseError> {
        if sample_rate != self.sample_rate {
            return Err(NoiseError::RateMismatch {
                archive: self.sample_rate,
                requested: sample_rate,
            });
        }
        if gps_start < self.gps_start {
            return Err(NoiseError::NoCoverage {
                detector: detector.to_string(),
                start: gps_start,
                end: gps_end,
            });
        }
        let offset = ((gps_start - self.gps_start) * sample_rate as u64) as usize;
        let samples = contiguous_slice(&self.samples, offset, expected_samples(gps_start, gps_end, sample_rate))?;
        Ok(TimeSeries::new(samples, 1.0 / sample_rate as f64, gps_start as f64))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Seeded white Gaussian noise with a flat one-sided PSD.
///
/// The realisation depends only on the seed and the requested GPS start.
pub struct SyntheticArchive {
    psd_level: f64,
    seed: u64,
}

impl SyntheticArchive {
    pub fn new(psd_level: f64, seed: u64) -> Self {
        Self { psd_level, seed }
    }
}

impl NoiseArchive for SyntheticArchive {
    fn fetch(&self, _detector: &str, gps_start: u64, gps_end: u64, sample_rate: u32) -> Result<TimeSeries, NoiseError> {
        let sigma = (self.psd_level * sample_rate as f64 / 2.0).sqrt();
        let normal = Normal::new(0.0, sigma).map_err(|e| NoiseError::Unsupported {
            reason: format!("invalid synthetic PSD level {}: {e}", self.psd_level),
        })?;
        let mut rng = StdRng::seed_from_u64(self.seed ^ gps_start);
        let samples = (0..expected_samples(gps_start, gps_end, sample_rate))
            .map(|_| normal.sample(&mut rng))
            .collect();
        Ok(TimeSeries::new(samples, 1.0 / sample_rate as f64, gps_start as f64))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// Noise-free background for injection-only validation.
pub struct ZeroArchive;

impl NoiseArchive for ZeroArchive {
    fn fetch(&self, _detector: &str, gps_start: u64, gps_end: u64, sample_rate: u32) -> Result<TimeSeries, NoiseError> {
        let samples = vec![0.0; expected_samples(gps_start, gps_end, sample_rate)];
        Ok(TimeSeries::new(samples, 1.0 / sample_rate as f64, gps_start as f64))
    }

    fn name(&self) -> &'static str {
        "zero"
    }
}

/// Where to draw noise segments from.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSelection {
    pub detector: String,
    /// First GPS second of the allowed range
    pub gps_base: u64,
    /// Largest random offset (s) added to `gps_base`
    pub gps_offset_max: u64,
}

/// Builds observations by adding archive noise to a prepared signal.
pub struct NoiseComposer {
    archive: Box<dyn NoiseArchive>,
    selection: NoiseSelection,
    sample_rate: u32,
    rng: StdRng,
}

impl NoiseComposer {
    /// A composer whose GPS offsets are reproducible when `seed` is set.
    pub fn new(archive: Box<dyn NoiseArchive>, selection: NoiseSelection, sample_rate: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            archive,
            selection,
            sample_rate,
            rng,
        }
    }

    pub fn archive_name(&self) -> &'static str {
        self.archive.name()
    }

    /// Sum `prepared` with a noise segment of the same length drawn at a
    /// random GPS time. The observation keeps the prepared signal's epoch.
    pub fn compose(&mut self, prepared: &TimeSeries) -> Result<TimeSeries> {
        let gps = self.selection.gps_base + self.rng.gen_range(0..=self.selection.gps_offset_max);
        let duration = prepared.duration().ceil() as u64;
        tracing::debug!(gps, duration, archive = self.archive.name(), "Fetching noise segment");

        let noise = self
            .archive
            .fetch(&self.selection.detector, gps, gps + duration, self.sample_rate)?;
        if noise.len() < prepared.len() {
            return Err(NoiseError::ShortSegment {
                needed: prepared.len(),
                actual: noise.len(),
            }
            .into());
        }
        let noise = TimeSeries::new(
            noise.samples()[..prepared.len()].to_vec(),
            noise.delta_t(),
            prepared.start_time(),
        );
        prepared.add(&noise)
    }
}
