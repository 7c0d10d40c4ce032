use chrono::NaiveDateTime;
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use thiserror::Error;

/// Default size in bytes of the text header block at the start of an EDR file.
pub const HEADER_BLOCK_SIZE: u64 = 2048;

/// Default resampling interval (seconds) for loaded data.
pub const DEFAULT_TARGET_DT: f64 = 0.001;

/// Degrees per volt for the bar position channel (0-5 V spans 0-360 degrees).
pub const BARPOS_DEGREES_PER_VOLT: f64 = 360.0 / 5.0;

/// Table columns swapped after the time column is added.
///
/// The recording rig writes the frequency and left-minus-right channels
/// under each other's names, so the columns at these positions are exchanged.
pub const DEFAULT_COLUMN_SWAP: (usize, usize) = (3, 4);

/// `strftime` format of the `CTIME` header field, e.g. `04-15-2015 02:31:07 PM`.
pub const START_TIME_FORMAT: &str = "%m-%d-%Y %I:%M:%S %p";

/// Name given to the leading time column.
pub const TIME_COLUMN: &str = "time";

/// A single value from the EDR text header.
///
/// Values carry no schema: each one is typed by trying an integer parse,
/// then a floating-point parse, and finally keeping the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// Value parsed as a signed integer
    Integer(i64),
    /// Value parsed as a floating-point number
    Float(f64),
    /// Value kept verbatim
    Text(String),
}

impl HeaderValue {
    /// Types a raw header value: integer, else float, else text.
    ///
    /// # Examples
    ///
    /// ```
    /// use edr_importer::HeaderValue;
    ///
    /// assert_eq!(HeaderValue::parse("8"), HeaderValue::Integer(8));
    /// assert_eq!(HeaderValue::parse("0.5"), HeaderValue::Float(0.5));
    /// assert_eq!(HeaderValue::parse("Freq"), HeaderValue::Text("Freq".into()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            HeaderValue::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            HeaderValue::Float(f)
        } else {
            HeaderValue::Text(raw.to_string())
        }
    }

    /// Returns the value as an integer, if it was parsed as one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HeaderValue::Integer(i) => Some(*i as f64),
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Text(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderValue::Integer(i) => write!(f, "{}", i),
            HeaderValue::Float(x) => write!(f, "{}", x),
            HeaderValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Header of an EDR file.
///
/// Holds every `KEY=VALUE` pair found in the header block. The typed
/// accessors turn absent keys into [`EdrError::MissingHeaderField`] and
/// values of the wrong type into [`EdrError::MalformedHeader`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdrHeader {
    entries: BTreeMap<String, HeaderValue>,
}

impl EdrHeader {
    /// Creates an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any earlier value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: HeaderValue) {
        self.entries.insert(key.into(), value);
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.get(key)
    }

    /// Number of header entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the header block held no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.entries.iter()
    }

    fn require(&self, key: &str) -> Result<&HeaderValue, EdrError> {
        self.entries
            .get(key)
            .ok_or_else(|| EdrError::MissingHeaderField(key.to_string()))
    }

    /// Required integer field.
    pub fn get_int(&self, key: &str) -> Result<i64, EdrError> {
        let value = self.require(key)?;
        value.as_int().ok_or_else(|| EdrError::MalformedHeader {
            line: None,
            reason: format!("{} must be an integer, found '{}'", key, value),
        })
    }

    /// Required numeric field. Accepts integers and floats.
    pub fn get_float(&self, key: &str) -> Result<f64, EdrError> {
        let value = self.require(key)?;
        value.as_float().ok_or_else(|| EdrError::MalformedHeader {
            line: None,
            reason: format!("{} must be numeric, found '{}'", key, value),
        })
    }

    /// Required field rendered as text, whatever its parsed type.
    pub fn get_text(&self, key: &str) -> Result<String, EdrError> {
        Ok(self.require(key)?.to_string())
    }

    /// Number of data channels (`NC`).
    pub fn num_channels(&self) -> Result<usize, EdrError> {
        let nc = self.get_int("NC")?;
        if nc <= 0 {
            return Err(EdrError::CorruptData(format!(
                "NC must be positive, found {}",
                nc
            )));
        }
        Ok(nc as usize)
    }

    /// Total number of samples across all channels (`NP`).
    pub fn num_points(&self) -> Result<usize, EdrError> {
        let np = self.get_int("NP")?;
        usize::try_from(np)
            .map_err(|_| EdrError::CorruptData(format!("NP must not be negative, found {}", np)))
    }

    /// Native sampling interval in seconds (`DT`).
    pub fn sample_interval(&self) -> Result<f64, EdrError> {
        let dt = self.get_float("DT")?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(EdrError::MalformedHeader {
                line: None,
                reason: format!("DT must be a positive number, found {}", dt),
            });
        }
        Ok(dt)
    }

    /// Channel names `YN0..YN(NC-1)` in channel order.
    pub fn channel_names(&self) -> Result<Vec<String>, EdrError> {
        (0..self.num_channels()?)
            .map(|i| self.get_text(&format!("YN{}", i)))
            .collect()
    }

    /// Calibration factors `YCF0..YCF(NC-1)` in channel order.
    pub fn channel_calibration_factors(&self) -> Result<Vec<f64>, EdrError> {
        (0..self.num_channels()?)
            .map(|i| self.get_float(&format!("YCF{}", i)))
            .collect()
    }
}

/// Options controlling how an EDR file is loaded.
///
/// # Examples
///
/// ```
/// use edr_importer::LoadOptions;
///
/// let options = LoadOptions::default()
///     .with_target_dt(0.05)
///     .with_lmr_zscore(false);
/// assert_eq!(options.header_block_size, 2048);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Size in bytes of the text header block
    pub header_block_size: u64,
    /// Requested sample interval (s). Only takes effect when larger than `DT`.
    pub target_dt: f64,
    /// Replace `LmR` with `zscore(Lamp) - zscore(Ramp)`
    pub apply_lmr_zscore: bool,
    /// Convert `Barpos` from volts to degrees in (-180, 180]
    pub barpos_in_degrees: bool,
    /// Table column pair to exchange after the time column is added, if any
    pub column_swap: Option<(usize, usize)>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            header_block_size: HEADER_BLOCK_SIZE,
            target_dt: DEFAULT_TARGET_DT,
            apply_lmr_zscore: true,
            barpos_in_degrees: true,
            column_swap: Some(DEFAULT_COLUMN_SWAP),
        }
    }
}

impl LoadOptions {
    pub fn with_header_block_size(mut self, size: u64) -> Self {
        self.header_block_size = size;
        self
    }

    pub fn with_target_dt(mut self, dt: f64) -> Self {
        self.target_dt = dt;
        self
    }

    pub fn with_lmr_zscore(mut self, enabled: bool) -> Self {
        self.apply_lmr_zscore = enabled;
        self
    }

    pub fn with_barpos_in_degrees(mut self, enabled: bool) -> Self {
        self.barpos_in_degrees = enabled;
        self
    }

    pub fn with_column_swap(mut self, swap: Option<(usize, usize)>) -> Self {
        self.column_swap = swap;
        self
    }

    /// Calibrated channels at the native rate, with no column swap and no
    /// channel post-processing.
    pub fn raw() -> Self {
        Self {
            target_dt: 0.0,
            apply_lmr_zscore: false,
            barpos_in_degrees: false,
            column_swap: None,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EdrError> {
        if self.header_block_size == 0 {
            return Err(EdrError::InvalidInput(
                "header_block_size must be greater than zero".to_string(),
            ));
        }
        if !self.target_dt.is_finite() || self.target_dt < 0.0 {
            return Err(EdrError::InvalidInput(format!(
                "target_dt must be a finite, non-negative number of seconds, got {}",
                self.target_dt
            )));
        }
        Ok(())
    }
}

/// Complete representation of a loaded EDR file.
///
/// This is the top-level struct returned by [`crate::load`]. Column 0 of
/// `data` is elapsed time in seconds; the remaining columns are calibrated
/// channel values named by `column_names`.
///
/// # Examples
///
/// ```no_run
/// use edr_importer::load;
///
/// let edr = load("path/to/recording.EDR").unwrap();
/// println!("Started at {}", edr.start_time);
/// if let Some(lmr) = edr.column("LmR") {
///     println!("First LmR sample: {}", lmr[0]);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EdrFile {
    /// Calibrated samples, shape [num_samples, 1 + num_channels]
    pub data: Array2<f64>,
    /// Wall-clock time of the first sample (`CTIME`)
    pub start_time: NaiveDateTime,
    /// One name per column of `data`, starting with `"time"`
    pub column_names: Vec<String>,
    /// Every key/value pair from the header block
    pub header: EdrHeader,
    // DT, or the requested interval when the table was downsampled
    pub(crate) row_interval: f64,
}

impl EdrFile {
    /// Number of rows (time samples) in the table.
    pub fn num_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of data channels, not counting the time column.
    pub fn num_channels(&self) -> usize {
        self.data.ncols().saturating_sub(1)
    }

    /// Index of the column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// View of the column with the given name.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|i| self.data.column(i))
    }

    /// Elapsed time column in seconds.
    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.data.column(0)
    }

    /// Interval between consecutive rows of the returned table (s).
    ///
    /// Equal to the header's `DT` unless the table was downsampled, in which
    /// case it is the requested `target_dt`.
    pub fn sample_interval(&self) -> f64 {
        self.row_interval
    }

    /// Duration of the recording in seconds.
    ///
    /// If no samples are present, returns 0.0.
    pub fn duration(&self) -> f64 {
        let t = self.time();
        if t.is_empty() {
            0.0
        } else {
            t[t.len() - 1] + self.sample_interval()
        }
    }
}

/// Error types for the EDR importer.
#[derive(Error, Debug)]
pub enum EdrError {
    /// Bad file name or load parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// File could not be opened or read
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// A header line or value could not be interpreted
    #[error("Malformed header{}: {reason}", line_suffix(.line))]
    MalformedHeader { line: Option<usize>, reason: String },
    /// A required header key is absent
    #[error("Missing header field: {0}")]
    MissingHeaderField(String),
    /// Sample block inconsistent with the header
    #[error("Corrupt data: {0}")]
    CorruptData(String),
    /// A named channel needed for post-processing is absent
    #[error("Missing column: {0}")]
    MissingColumn(String),
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(l) => format!(" (line {})", l),
        None => String::new(),
    }
}
