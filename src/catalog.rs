//! Waveform catalog loading.
//!
//! Both catalogs are turned into an ordered, immutable [`Catalog`] of
//! [`CatalogEntry`] records: strain in metres at the configured distance,
//! resampled onto the pipeline sample rate and optionally low-passed.

use crate::error::CatalogError;
use crate::filter::{butter_lowpass, sosfiltfilt};
use crate::timeseries::TimeSeries;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// Metres per kiloparsec.
pub const KPC_TO_M: f64 = 3.08567758128e19;

/// Source catalog of simulated core-collapse waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Abylkairov,
    Richers,
}

impl CatalogKind {
    /// Number of signals the catalog is expected to hold.
    pub fn population(self) -> usize {
        match self {
            CatalogKind::Abylkairov => 452,
            CatalogKind::Richers => 126,
        }
    }

    /// Short code used in result directory names.
    pub fn code(self) -> &'static str {
        match self {
            CatalogKind::Abylkairov => "AB",
            CatalogKind::Richers => "RIC",
        }
    }

    /// Deterministic per-signal label used for result files.
    pub fn signal_label(self, index: usize, distance_kpc: f64) -> String {
        match self {
            CatalogKind::Abylkairov => format!("{distance_kpc}_signal_{index}"),
            CatalogKind::Richers => format!("RIC_nsls_signal_{index}"),
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogKind::Abylkairov => write!(f, "abylkairov"),
            CatalogKind::Richers => write!(f, "richers"),
        }
    }
}

impl FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abylkairov" | "ab" => Ok(CatalogKind::Abylkairov),
            "richers" | "ric" => Ok(CatalogKind::Richers),
            other => Err(format!("unknown catalog '{other}' (expected abylkairov or richers)")),
        }
    }
}

/// Abylkairov waveform family: pure GR or GR with effective potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveType {
    Gr,
    Grep,
}

impl TryFrom<u8> for WaveType {
    type Error = CatalogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WaveType::Gr),
            1 => Ok(WaveType::Grep),
            wave_type => Err(CatalogError::UnknownWaveType { wave_type }),
        }
    }
}

impl WaveType {
    fn flag(self) -> i64 {
        match self {
            WaveType::Gr => 0,
            WaveType::Grep => 1,
        }
    }
}

/// Physical metadata attached to a catalog waveform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub eos: Option<String>,
    pub t_over_w: Option<f64>,
    pub f_peak: Option<f64>,
}

/// One resampled catalog waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub index: usize,
    pub name: String,
    pub time: Vec<f64>,
    pub strain: Vec<f64>,
    pub sample_rate: u32,
    pub metadata: EntryMetadata,
}

impl CatalogEntry {
    /// Strain as a time series starting at the first time sample.
    pub fn to_timeseries(&self) -> TimeSeries {
        let epoch = self.time.first().copied().unwrap_or(0.0);
        TimeSeries::new(self.strain.clone(), 1.0 / self.sample_rate as f64, epoch)
    }
}

/// Ordered collection of catalog entries, indexed by signal id.
#[derive(Debug, Clone)]
pub struct Catalog {
    kind: CatalogKind,
    sample_rate: u32,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from entries; they are kept sorted by index.
    pub fn from_entries(kind: CatalogKind, sample_rate: u32, mut entries: Vec<CatalogEntry>) -> Self {
        entries.sort_by_key(|e| e.index);
        Self {
            kind,
            sample_rate,
            entries,
        }
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Highest signal index present.
    pub fn last_index(&self) -> Option<usize> {
        self.entries.last().map(|e| e.index)
    }

    /// Physical metadata keyed by signal index.
    pub fn metadata(&self) -> BTreeMap<usize, EntryMetadata> {
        self.entries
            .iter()
            .map(|e| (e.index, e.metadata.clone()))
            .collect()
    }

    pub fn get(&self, index: usize) -> Result<&CatalogEntry, CatalogError> {
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .map(|pos| &self.entries[pos])
            .map_err(|_| CatalogError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }
}

/// Low-pass applied to catalog waveforms after resampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowpassSpec {
    pub order: usize,
    pub cutoff_hz: f64,
}

/// Options shared by both catalog loaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    pub sample_rate: u32,
    pub distance_kpc: f64,
    pub lowpass: Option<LowpassSpec>,
}

impl LoadOptions {
    fn distance_m(&self) -> f64 {
        self.distance_kpc * KPC_TO_M
    }
}

/// Linearly interpolate `(t, h)` onto a uniform grid at `sample_rate`
/// starting at `t[0]` and ending no later than the last native sample.
///
/// Native times must be strictly increasing.
pub fn resample_linear(t: &[f64], h: &[f64], sample_rate: u32) -> Result<(Vec<f64>, Vec<f64>), CatalogError> {
    if let Some(pos) = t.windows(2).position(|w| w[1].partial_cmp(&w[0]) != Some(Ordering::Greater)) {
        return Err(CatalogError::InvalidFormat {
            reason: format!(
                "time column not strictly increasing at sample {} ({} then {})",
                pos + 1,
                t[pos],
                t[pos + 1]
            ),
        });
    }
    if t.len() < 2 || t.len() != h.len() {
        return Ok((t.to_vec(), h.to_vec()));
    }
    let dt = 1.0 / sample_rate as f64;
    let t0 = t[0];
    let span = t[t.len() - 1] - t0;
    let n = (span * sample_rate as f64 + 1e-9).floor() as usize + 1;

    let mut times = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(n);
    let mut seg = 0;
    for k in 0..n {
        let tk = t0 + k as f64 * dt;
        while seg + 2 < t.len() && t[seg + 1] < tk {
            seg += 1;
        }
        let (ta, tb) = (t[seg], t[seg + 1]);
        let frac = if tb > ta { ((tk - ta) / (tb - ta)).clamp(0.0, 1.0) } else { 0.0 };
        times.push(tk);
        values.push(h[seg] + (h[seg + 1] - h[seg]) * frac);
    }
    Ok((times, values))
}

/// Resample, optionally low-pass, and stamp a raw waveform.
fn build_entry(
    index: usize,
    name: String,
    t: &[f64],
    h_m: &[f64],
    opts: &LoadOptions,
    metadata: EntryMetadata,
) -> Result<CatalogEntry, CatalogError> {
    if t.is_empty() {
        return Err(CatalogError::EmptySignal { index });
    }
    let (time, mut strain) = resample_linear(t, h_m, opts.sample_rate)?;
    if let Some(lp) = opts.lowpass {
        let sos = butter_lowpass(lp.order, lp.cutoff_hz, opts.sample_rate as f64).map_err(|e| {
            CatalogError::ReadFailed {
                reason: e.to_string(),
            }
        })?;
        strain = sosfiltfilt(&sos, &strain);
    }
    Ok(CatalogEntry {
        index,
        name,
        time,
        strain,
        sample_rate: opts.sample_rate,
        metadata,
    })
}

/// EOS label for the integer code used in the Abylkairov table.
pub fn abylkairov_eos_name(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("SFHo"),
        1 => Some("LS220"),
        2 => Some("HSDD2"),
        3 => Some("GShenFSU2.1"),
        _ => None,
    }
}

#[derive(Default)]
struct RawWaveform {
    time: Vec<f64>,
    amplitude: Vec<f64>,
    metadata: EntryMetadata,
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn required_column(headers: &csv::StringRecord, name: &str) -> Result<usize, CatalogError> {
    column(headers, name).ok_or_else(|| CatalogError::MissingColumn {
        column: name.to_string(),
    })
}

fn parse_field(record: &csv::StringRecord, idx: usize, line: usize, name: &str) -> Result<f64, CatalogError> {
    let raw = record.get(idx).unwrap_or("");
    raw.parse::<f64>().map_err(|_| CatalogError::MalformedRow {
        line,
        reason: format!("column '{name}' has non-numeric value '{raw}'"),
    })
}

/// Load the Abylkairov CSV catalog for one waveform family.
///
/// Rows are grouped by `sample_id`; `t(ms)` becomes seconds and `amplitude`
/// (cm at 1 cm distance normalisation) becomes strain at the configured
/// distance. The row at bounce (`t = 0`) supplies the entry metadata.
pub fn load_abylkairov(path: &Path, wave_type: WaveType, opts: &LoadOptions) -> Result<Catalog, CatalogError> {
    let file = File::open(path).map_err(|source| CatalogError::OpenFailed {
        path: Box::new(path.to_path_buf()),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| CatalogError::ReadFailed {
            reason: format!("failed to read CSV headers: {e}"),
        })?
        .clone();

    let id_col = required_column(&headers, "sample_id")?;
    let type_col = required_column(&headers, "GR_or_GREP")?;
    let time_col = required_column(&headers, "t(ms)")?;
    let amp_col = required_column(&headers, "amplitude")?;
    let eos_col = column(&headers, "EOS");
    let tw_col = column(&headers, "T/|W|");
    let fpeak_col = column(&headers, "f_peak");

    let scale = 1.0 / (100.0 * opts.distance_m());
    let mut waveforms: BTreeMap<usize, RawWaveform> = BTreeMap::new();

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| CatalogError::MalformedRow {
            line,
            reason: format!("CSV parse error: {e}"),
        })?;

        if parse_field(&record, type_col, line, "GR_or_GREP")? as i64 != wave_type.flag() {
            continue;
        }
        let id = parse_field(&record, id_col, line, "sample_id")?;
        if id < 0.0 || id.fract() != 0.0 {
            return Err(CatalogError::MalformedRow {
                line,
                reason: format!("sample_id {id} is not a non-negative integer"),
            });
        }
        let t_ms = parse_field(&record, time_col, line, "t(ms)")?;
        let amp = parse_field(&record, amp_col, line, "amplitude")?;

        let wave = waveforms.entry(id as usize).or_default();
        wave.time.push(t_ms / 1000.0);
        wave.amplitude.push(amp * scale);

        if t_ms == 0.0 {
            let optional = |col: Option<usize>| {
                col.and_then(|c| record.get(c))
                    .and_then(|v| v.parse::<f64>().ok())
            };
            wave.metadata = EntryMetadata {
                eos: optional(eos_col)
                    .and_then(|code| abylkairov_eos_name(code as i64))
                    .map(str::to_string),
                t_over_w: optional(tw_col),
                f_peak: optional(fpeak_col),
            };
        }
    }

    let expected = CatalogKind::Abylkairov.population();
    if waveforms.len() != expected {
        tracing::warn!(
            found = waveforms.len(),
            expected,
            "Abylkairov catalog population differs from the reference catalog"
        );
    }

    let entries = waveforms
        .into_iter()
        .map(|(index, raw)| {
            build_entry(
                index,
                format!("abylkairov_{index}"),
                &raw.time,
                &raw.amplitude,
                opts,
                raw.metadata,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        path = %path.display(),
        signals = entries.len(),
        filtered = opts.lowpass.is_some(),
        "Loaded Abylkairov catalog"
    );
    Ok(Catalog::from_entries(CatalogKind::Abylkairov, opts.sample_rate, entries))
}

/// Equations of state simulated in the Richers catalog.
pub const RICHERS_EOS: [&str; 6] = ["SFHo", "SFHx", "LS220", "BHBLP", "HSDD2", "GShenFSU2.1"];

/// Waveform group names in signal-index order: `A{profile}w{omega}.00_{EOS}`.
pub fn richers_signal_names() -> Vec<String> {
    // Differential-rotation profile with its angular-velocity index range.
    const PROFILES: [(u32, u32, u32); 5] = [(10000, 1, 3), (1268, 1, 5), (300, 3, 11), (467, 3, 6), (634, 2, 6)];

    let mut names = Vec::with_capacity(CatalogKind::Richers.population());
    for (profile, omega_init, omega_end) in PROFILES {
        for j in omega_init..omega_end {
            for eos in RICHERS_EOS {
                names.push(format!("A{profile}w{}.00_{eos}", j + 1));
            }
        }
    }
    names
}

/// Dataset names inside each Richers waveform group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichersDatasets {
    /// Strain times distance in centimetres
    pub strain: String,
    /// Time relative to bounce in seconds
    pub time: String,
}

impl Default for RichersDatasets {
    fn default() -> Self {
        Self {
            strain: "strain*dist(cm)".to_string(),
            time: "t-tb(s)".to_string(),
        }
    }
}

/// Load the Richers HDF5 database.
///
/// `path` may be the `GWdatabase.h5` file itself or the directory holding it.
/// Datasets are resolved by name within each `waveforms/<name>` group.
#[cfg(feature = "hdf5-support")]
pub fn load_richers(path: &Path, datasets: &RichersDatasets, opts: &LoadOptions) -> Result<Catalog, CatalogError> {
    let file_path = if path.is_dir() {
        path.join("GWdatabase.h5")
    } else {
        path.to_path_buf()
    };
    let file = hdf5::File::open(&file_path).map_err(|e| CatalogError::ReadFailed {
        reason: format!("cannot open '{}': {e}", file_path.display()),
    })?;
    let waveforms = file.group("waveforms").map_err(|e| CatalogError::ReadFailed {
        reason: format!("missing 'waveforms' group: {e}"),
    })?;

    let scale = 1.0 / (100.0 * opts.distance_m());
    let mut entries = Vec::with_capacity(CatalogKind::Richers.population());
    for (index, name) in richers_signal_names().into_iter().enumerate() {
        let group = waveforms.group(&name).map_err(|e| CatalogError::ReadFailed {
            reason: format!("missing waveform group '{name}': {e}"),
        })?;
        let read = |dataset: &str| -> Result<Vec<f64>, CatalogError> {
            group
                .dataset(dataset)
                .map_err(|_| CatalogError::MissingDataset {
                    group: name.clone(),
                    dataset: dataset.to_string(),
                })?
                .read_raw::<f64>()
                .map_err(|e| CatalogError::ReadFailed {
                    reason: format!("'{name}/{dataset}': {e}"),
                })
        };
        let time = read(&datasets.time)?;
        let strain: Vec<f64> = read(&datasets.strain)?.into_iter().map(|h| h * scale).collect();
        let metadata = EntryMetadata {
            eos: name.rsplit('_').next().map(str::to_string),
            ..EntryMetadata::default()
        };
        entries.push(build_entry(index, name, &time, &strain, opts, metadata)?);
    }

    tracing::info!(
        path = %file_path.display(),
        signals = entries.len(),
        filtered = opts.lowpass.is_some(),
        "Loaded Richers catalog"
    );
    Ok(Catalog::from_entries(CatalogKind::Richers, opts.sample_rate, entries))
}

/// Load the Richers HDF5 database (unavailable without `hdf5-support`).
#[cfg(not(feature = "hdf5-support"))]
pub fn load_richers(path: &Path, _datasets: &RichersDatasets, _opts: &LoadOptions) -> Result<Catalog, CatalogError> {
    Err(CatalogError::Unsupported {
        reason: format!(
            "reading '{}' requires building with the hdf5-support feature",
            path.display()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn opts(lowpass: Option<LowpassSpec>) -> LoadOptions {
        LoadOptions {
            sample_rate: 1000,
            distance_kpc: 1.0,
            lowpass,
        }
    }

    fn write_csv(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const SMALL_CATALOG: &str = "\
sample_id,GR_or_GREP,t(ms),amplitude,EOS,T/|W|,f_peak
0,0,-1,0,1,0.05,700
0,0,0,100,1,0.05,700
0,0,1,0,1,0.05,700
0,0,2,0,1,0.05,700
1,0,-2,0,3,0.10,750
1,0,0,50,3,0.10,750
1,0,2,0,3,0.10,750
0,1,0,999,0,0.01,600
0,1,1,999,0,0.01,600
";

    #[test]
    fn test_richers_names() {
        let names = richers_signal_names();
        assert_eq!(names.len(), 126);
        assert_eq!(names[0], "A10000w2.00_SFHo");
        assert_eq!(names[5], "A10000w2.00_GShenFSU2.1");
        assert_eq!(names[12], "A1268w2.00_SFHo");
        assert_eq!(names[125], "A634w6.00_GShenFSU2.1");
    }

    #[test]
    fn test_resample_linear_preserves_span() {
        let t = [0.0, 0.001, 0.003];
        let h = [0.0, 1.0, 3.0];
        let (tr, hr) = resample_linear(&t, &h, 2000).unwrap();
        assert_eq!(tr.len(), 7);
        assert!((tr[6] - 0.003).abs() < 1e-12);
        assert!((hr[1] - 0.5).abs() < 1e-12);
        assert!((hr[4] - 2.0).abs() < 1e-12);
        assert!((hr[6] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_resample_linear_rejects_unordered_times() {
        let h = [0.0, 1.0, 2.0];
        let err = resample_linear(&[0.0, 0.002, 0.001], &h, 2000).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFormat { .. }));
        assert!(err.to_string().contains("sample 2"));

        let repeated = resample_linear(&[0.0, 0.001, 0.001], &h, 2000);
        assert!(matches!(repeated, Err(CatalogError::InvalidFormat { .. })));
    }

    #[test]
    fn test_load_abylkairov_rejects_unordered_rows() {
        let file = write_csv(
            "sample_id,GR_or_GREP,t(ms),amplitude,EOS,T/|W|,f_peak\n\
0,0,0,1,1,0.05,700\n\
0,0,2,0,1,0.05,700\n\
0,0,1,0,1,0.05,700\n",
        );
        let err = load_abylkairov(file.path(), WaveType::Gr, &opts(None)).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFormat { .. }));
    }

    #[test]
    fn test_load_abylkairov_groups_and_scales() {
        let file = write_csv(SMALL_CATALOG);
        let catalog = load_abylkairov(file.path(), WaveType::Gr, &opts(None)).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.kind(), CatalogKind::Abylkairov);
        let first = catalog.get(0).unwrap();
        assert_eq!(first.time.len(), 4);
        assert_eq!(first.time[0], -0.001);
        let expected_peak = 100.0 / (100.0 * KPC_TO_M);
        assert!((first.strain[1] - expected_peak).abs() < 1e-12 * expected_peak);
        assert_eq!(first.metadata.eos.as_deref(), Some("LS220"));
        assert_eq!(first.metadata.t_over_w, Some(0.05));

        let second = catalog.get(1).unwrap();
        assert_eq!(second.time.len(), 5);
        assert_eq!(second.metadata.eos.as_deref(), Some("GShenFSU2.1"));
        assert!(catalog.get(2).is_err());
    }

    #[test]
    fn test_load_abylkairov_grep_family() {
        let file = write_csv(SMALL_CATALOG);
        let catalog = load_abylkairov(file.path(), WaveType::Grep, &opts(None)).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().metadata.eos.as_deref(), Some("SFHo"));
    }

    #[test]
    fn test_load_abylkairov_lowpass_smooths() {
        let file = write_csv(SMALL_CATALOG);
        let raw = load_abylkairov(file.path(), WaveType::Gr, &opts(None)).unwrap();
        let filtered = load_abylkairov(
            file.path(),
            WaveType::Gr,
            &opts(Some(LowpassSpec {
                order: 2,
                cutoff_hz: 100.0,
            })),
        )
        .unwrap();
        let raw_peak = raw.get(0).unwrap().strain[1];
        let filtered_peak = filtered.get(0).unwrap().strain[1];
        assert!(filtered_peak < raw_peak);
        assert_eq!(filtered.get(0).unwrap().strain.len(), raw.get(0).unwrap().strain.len());
    }

    #[test]
    fn test_load_abylkairov_errors() {
        let missing = write_csv("sample_id,t(ms),amplitude\n0,0,1\n");
        assert!(matches!(
            load_abylkairov(missing.path(), WaveType::Gr, &opts(None)),
            Err(CatalogError::MissingColumn { .. })
        ));

        let malformed = write_csv("sample_id,GR_or_GREP,t(ms),amplitude\n0,0,zero,1\n");
        assert!(matches!(
            load_abylkairov(malformed.path(), WaveType::Gr, &opts(None)),
            Err(CatalogError::MalformedRow { line: 2, .. })
        ));

        assert!(matches!(WaveType::try_from(2), Err(CatalogError::UnknownWaveType { wave_type: 2 })));
    }

    #[test]
    fn test_signal_labels() {
        assert_eq!(CatalogKind::Abylkairov.signal_label(3, 1.0), "1_signal_3");
        assert_eq!(CatalogKind::Richers.signal_label(107, 10.0), "RIC_nsls_signal_107");
        assert_eq!("Richers".parse::<CatalogKind>().unwrap(), CatalogKind::Richers);
    }

    #[cfg(not(feature = "hdf5-support"))]
    #[test]
    fn test_richers_requires_feature() {
        let err = load_richers(Path::new("GWdatabase.h5"), &RichersDatasets::default(), &opts(None));
        assert!(matches!(err, Err(CatalogError::Unsupported { .. })));
    }
}
