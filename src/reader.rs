use byteorder::{LittleEndian, ReadBytesExt};
use chrono::NaiveDateTime;
use log::{debug, info};
use ndarray::{s, Array1, Array2, Axis};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use crate::signal::zscore;
use crate::types::*;

const READ_BUFFER_CAPACITY: usize = 65536;

// Header keys every load needs besides the per-channel YN*/YCF* keys
const REQUIRED_KEYS: [&str; 6] = ["NC", "NP", "AD", "ADCMAX", "DT", "CTIME"];

// Channel names used by the optional post-processing steps
const LAMP_COLUMN: &str = "Lamp";
const RAMP_COLUMN: &str = "Ramp";
const LMR_COLUMN: &str = "LmR";
const BARPOS_COLUMN: &str = "Barpos";

/// Loads an EDR file and returns the calibrated, relabelled table.
///
/// Stages run in order: header parse, binary decode, calibration, time
/// column, fixed column swap, optional `LmR`/`Barpos` processing,
/// downsampling and start time parse. Any failure aborts the load.
///
/// # Arguments
///
/// * `file_path` - Path to a `.edr` file (extension is case-insensitive)
/// * `options` - Header block size, target interval and post-processing flags
///
/// # Performance
///
/// The header is read through a 64KB buffered reader and the sample block is
/// decoded in a single bulk read.
pub fn load_file<P: AsRef<Path>>(
    file_path: P,
    options: &LoadOptions,
) -> Result<EdrFile, EdrError> {
    let tic = Instant::now();
    let path = file_path.as_ref();

    check_extension(path)?;
    options.validate()?;

    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);

    let header = read_header(&mut reader, options.header_block_size)?;
    check_required_fields(&header)?;
    log_header_summary(&header);

    let mut column_names = header.channel_names()?;
    let native_dt = header.sample_interval()?;

    let raw = read_samples(&mut reader, &header, file_size, options.header_block_size)?;
    let calibrated = calibrate(&raw, &header)?;

    let mut data = prepend_time(&calibrated, native_dt);
    column_names.insert(0, TIME_COLUMN.to_string());

    if let Some((a, b)) = options.column_swap {
        swap_columns(&mut data, &mut column_names, a, b)?;
    }

    if options.apply_lmr_zscore {
        apply_lmr_zscore(&mut data, &column_names)?;
    }

    if options.barpos_in_degrees {
        convert_barpos_to_degrees(&mut data, &column_names)?;
    }

    let data = downsample(data, native_dt, options.target_dt);
    let row_interval = native_dt.max(options.target_dt);
    let start_time = parse_start_time(&header)?;

    info!(
        "Loaded {}: {} samples x {} channels starting {} ({:.3} s elapsed)",
        path.display(),
        data.nrows(),
        data.ncols() - 1,
        start_time,
        tic.elapsed().as_secs_f64()
    );

    Ok(EdrFile {
        data,
        start_time,
        column_names,
        header,
        row_interval,
    })
}

/// Reads only the header block of an EDR file.
pub fn load_header_only<P: AsRef<Path>>(
    file_path: P,
    header_block_size: u64,
) -> Result<EdrHeader, EdrError> {
    let path = file_path.as_ref();
    check_extension(path)?;
    if header_block_size == 0 {
        return Err(EdrError::InvalidInput(
            "header_block_size must be greater than zero".to_string(),
        ));
    }

    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);
    read_header(&mut reader, header_block_size)
}

/// Rejects paths without a (case-insensitive) `.edr` extension
fn check_extension(path: &Path) -> Result<(), EdrError> {
    let is_edr = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("edr"))
        .unwrap_or(false);

    if !is_edr {
        return Err(EdrError::InvalidInput(format!(
            "file name must end with '.edr': {}",
            path.display()
        )));
    }
    Ok(())
}

/// Parses `KEY=VALUE` lines from the start of the stream.
///
/// A line is only parsed if it ends at or before `header_block_size`; the
/// first line running past that offset belongs to the sample block and ends
/// the header.
pub(crate) fn read_header<R: BufRead>(
    reader: &mut R,
    header_block_size: u64,
) -> Result<EdrHeader, EdrError> {
    let mut header = EdrHeader::new();
    let mut position: u64 = 0;
    let mut line_number = 0;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)? as u64;

        if n == 0 {
            if position >= header_block_size {
                break;
            }
            return Err(EdrError::MalformedHeader {
                line: None,
                reason: format!(
                    "file ends at byte {}, inside the {}-byte header block",
                    position, header_block_size
                ),
            });
        }

        position += n;
        if position > header_block_size {
            break;
        }
        line_number += 1;

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end();
        let (key, value) = line.split_once('=').ok_or_else(|| EdrError::MalformedHeader {
            line: Some(line_number),
            reason: format!("expected KEY=VALUE, found '{}'", line),
        })?;

        header.insert(key, HeaderValue::parse(value));
    }

    debug!("Parsed {} header entries from {} lines", header.len(), line_number);
    Ok(header)
}

/// Checks that every key the loader depends on is present
fn check_required_fields(header: &EdrHeader) -> Result<(), EdrError> {
    for key in REQUIRED_KEYS {
        if header.get(key).is_none() {
            return Err(EdrError::MissingHeaderField(key.to_string()));
        }
    }

    for channel in 0..header.num_channels()? {
        for prefix in ["YN", "YCF"] {
            let key = format!("{}{}", prefix, channel);
            if header.get(&key).is_none() {
                return Err(EdrError::MissingHeaderField(key));
            }
        }
    }
    Ok(())
}

fn log_header_summary(header: &EdrHeader) {
    let channels = header.get("NC").map(|v| v.to_string()).unwrap_or_default();
    let points = header.get("NP").map(|v| v.to_string()).unwrap_or_default();
    let dt = header.get("DT").map(|v| v.to_string()).unwrap_or_default();
    let ctime = header.get("CTIME").map(|v| v.to_string()).unwrap_or_default();

    debug!(
        "EDR header: {} channels, {} points, DT={} s, recorded {}",
        channels, points, dt, ctime
    );
}

/// Decodes the interleaved i16 sample block into a [rows, NC] matrix.
///
/// The block starts exactly at `header_block_size` and must contain exactly
/// `NP` little-endian samples.
fn read_samples<R: Read + Seek>(
    reader: &mut R,
    header: &EdrHeader,
    file_size: u64,
    header_block_size: u64,
) -> Result<Array2<i16>, EdrError> {
    let num_channels = header.num_channels()?;
    let num_points = header.num_points()?;

    if num_points % num_channels != 0 {
        return Err(EdrError::CorruptData(format!(
            "NP={} is not divisible by NC={}",
            num_points, num_channels
        )));
    }
    let num_rows = num_points / num_channels;

    let data_bytes = file_size.saturating_sub(header_block_size);
    if data_bytes % 2 != 0 {
        return Err(EdrError::CorruptData(format!(
            "sample block has an odd length of {} bytes",
            data_bytes
        )));
    }
    let num_samples = data_bytes / 2;
    if num_samples != num_points as u64 {
        return Err(EdrError::CorruptData(format!(
            "sample block holds {} samples but NP={} ({} rows x {} channels)",
            num_samples, num_points, num_rows, num_channels
        )));
    }

    reader.seek(SeekFrom::Start(header_block_size))?;
    let mut samples = vec![0i16; num_points];
    reader.read_i16_into::<LittleEndian>(&mut samples)?;

    debug!("Decoded {} samples ({} rows)", num_points, num_rows);

    Array2::from_shape_vec((num_rows, num_channels), samples).map_err(|e| {
        EdrError::CorruptData(format!(
            "cannot shape {} samples into {} x {}: {}",
            num_points, num_rows, num_channels, e
        ))
    })
}

/// Scales raw ADC codes to calibrated units.
///
/// Column `c` is multiplied by `AD / ((ADCMAX + 1) * YCF{c})`.
fn calibrate(raw: &Array2<i16>, header: &EdrHeader) -> Result<Array2<f64>, EdrError> {
    let ad = header.get_float("AD")?;
    let adc_range = header.get_float("ADCMAX")? + 1.0;
    let factors = header.channel_calibration_factors()?;

    if factors.len() != raw.ncols() {
        return Err(EdrError::CorruptData(format!(
            "{} calibration factors for {} channels",
            factors.len(),
            raw.ncols()
        )));
    }

    let mut data = raw.mapv(f64::from);
    for (mut column, ycf) in data.axis_iter_mut(Axis(1)).zip(factors) {
        column *= ad / (adc_range * ycf);
    }
    Ok(data)
}

/// Adds a leading column of elapsed time `i * dt`
fn prepend_time(data: &Array2<f64>, dt: f64) -> Array2<f64> {
    let (rows, cols) = data.dim();
    let time = Array1::from_shape_fn(rows, |i| i as f64 * dt);

    let mut out = Array2::<f64>::zeros((rows, cols + 1));
    out.column_mut(0).assign(&time);
    out.slice_mut(s![.., 1..]).assign(data);
    out
}

/// Exchanges two table columns and their names.
///
/// Fails rather than skipping when the table is too narrow for the swap.
pub(crate) fn swap_columns(
    data: &mut Array2<f64>,
    column_names: &mut [String],
    a: usize,
    b: usize,
) -> Result<(), EdrError> {
    let width = data.ncols().min(column_names.len());
    if a >= width || b >= width {
        return Err(EdrError::CorruptData(format!(
            "cannot swap columns {} and {}: table has {} columns",
            a, b, width
        )));
    }

    for mut row in data.rows_mut() {
        row.swap(a, b);
    }
    column_names.swap(a, b);
    debug!("Swapped columns {} <-> {}", column_names[b], column_names[a]);
    Ok(())
}

fn find_column(column_names: &[String], name: &str) -> Result<usize, EdrError> {
    column_names
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| EdrError::MissingColumn(name.to_string()))
}

/// Replaces `LmR` with `zscore(Lamp) - zscore(Ramp)`
fn apply_lmr_zscore(data: &mut Array2<f64>, column_names: &[String]) -> Result<(), EdrError> {
    let lamp = find_column(column_names, LAMP_COLUMN)?;
    let ramp = find_column(column_names, RAMP_COLUMN)?;
    let lmr = find_column(column_names, LMR_COLUMN)?;

    let difference = zscore(data.column(lamp)) - zscore(data.column(ramp));
    data.column_mut(lmr).assign(&difference);
    Ok(())
}

/// Converts `Barpos` volts to degrees wrapped into (-180, 180]
fn convert_barpos_to_degrees(
    data: &mut Array2<f64>,
    column_names: &[String],
) -> Result<(), EdrError> {
    let barpos = find_column(column_names, BARPOS_COLUMN)?;
    data.column_mut(barpos).mapv_inplace(volts_to_degrees);
    Ok(())
}

pub(crate) fn volts_to_degrees(volts: f64) -> f64 {
    let degrees = volts * BARPOS_DEGREES_PER_VOLT;
    if degrees > 180.0 {
        degrees - 360.0
    } else {
        degrees
    }
}

/// Keeps the rows nearest to multiples of `target_dt`.
///
/// This is plain decimation with no anti-alias filtering: content above
/// the new Nyquist rate folds into the result. No upsampling is done when
/// `target_dt <= native_dt`.
fn downsample(data: Array2<f64>, native_dt: f64, target_dt: f64) -> Array2<f64> {
    if target_dt <= native_dt {
        return data;
    }

    let indices = resample_indices(data.nrows(), target_dt / native_dt);
    debug!(
        "Downsampling {} rows to {} (stride {:.3})",
        data.nrows(),
        indices.len(),
        target_dt / native_dt
    );
    data.select(Axis(0), &indices)
}

/// Row indices `round(k * stride)` for every `k * stride < num_rows`.
///
/// Halves round to even; an index landing on `num_rows` is dropped.
pub(crate) fn resample_indices(num_rows: usize, stride: f64) -> Vec<usize> {
    let mut indices = Vec::with_capacity((num_rows as f64 / stride).ceil() as usize);
    let mut k = 0usize;

    loop {
        let position = k as f64 * stride;
        if position >= num_rows as f64 {
            break;
        }
        let index = position.round_ties_even() as usize;
        if index < num_rows {
            indices.push(index);
        }
        k += 1;
    }
    indices
}

/// Parses `CTIME` into the wall-clock time of the first sample
fn parse_start_time(header: &EdrHeader) -> Result<NaiveDateTime, EdrError> {
    let ctime = header.get_text("CTIME")?;
    NaiveDateTime::parse_from_str(&ctime, START_TIME_FORMAT).map_err(|e| {
        EdrError::MalformedHeader {
            line: None,
            reason: format!(
                "CTIME '{}' does not match '{}': {}",
                ctime, START_TIME_FORMAT, e
            ),
        }
    })
}
