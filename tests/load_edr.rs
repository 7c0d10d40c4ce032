use approx::assert_abs_diff_eq;
use edr_importer::{load, load_header, load_with_options, EdrError, HeaderValue, LoadOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CHANNELS: [&str; 5] = ["Freq", "Lamp", "Ramp", "LmR", "Barpos"];
const GAIN: f64 = 5.0 / 4096.0;

/// Builds a synthetic EDR recording on disk.
struct EdrFixture {
    names: Vec<String>,
    ycf: Vec<f64>,
    dt: f64,
    block: usize,
    np_override: Option<i64>,
    extra_lines: Vec<String>,
    skip_keys: Vec<String>,
    rows: Vec<Vec<i16>>,
}

impl EdrFixture {
    fn new(rows: Vec<Vec<i16>>) -> Self {
        Self {
            names: CHANNELS.iter().map(|s| s.to_string()).collect(),
            ycf: vec![1.0; CHANNELS.len()],
            dt: 0.01,
            block: 2048,
            np_override: None,
            extra_lines: Vec::new(),
            skip_keys: Vec::new(),
            rows,
        }
    }

    fn header_lines(&self) -> Vec<String> {
        let nc = self.names.len();
        let np = self
            .np_override
            .unwrap_or((self.rows.len() * nc) as i64);

        let mut lines = vec![
            format!("NC={}", nc),
            format!("NP={}", np),
            "AD=5".to_string(),
            "ADCMAX=4095".to_string(),
            format!("DT={}", self.dt),
            "CTIME=04-15-2015 02:31:07 PM".to_string(),
            "ID=insect2 just visual".to_string(),
        ];
        for (i, name) in self.names.iter().enumerate() {
            lines.push(format!("YN{}={}", i, name));
            lines.push(format!("YCF{}={}", i, self.ycf[i]));
            lines.push(format!("YU{}=V", i));
        }
        lines.retain(|l| {
            let key = l.split('=').next().unwrap_or_default();
            !self.skip_keys.iter().any(|k| k == key)
        });
        lines.extend(self.extra_lines.iter().cloned());
        lines
    }

    fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in self.header_lines() {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        assert!(bytes.len() <= self.block, "fixture header exceeds block");
        bytes.resize(self.block, b' ');

        for row in &self.rows {
            for sample in row {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        bytes
    }

    fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.bytes()).unwrap();
        path
    }
}

fn two_row_fixture() -> EdrFixture {
    EdrFixture::new(vec![
        vec![819, 100, 200, 0, 2048],
        vec![1638, 300, 100, 0, 3072],
    ])
}

fn ramp_fixture(num_rows: usize) -> EdrFixture {
    let rows = (0..num_rows)
        .map(|r| vec![r as i16, 10 + (r % 3) as i16, 20 - (r % 5) as i16, 0, 100])
        .collect();
    EdrFixture::new(rows)
}

#[test]
fn end_to_end_default_load() {
    let dir = TempDir::new().unwrap();
    let path = two_row_fixture().write(dir.path(), "150415_insect2.EDR");

    let edr = load(&path).unwrap();

    assert_eq!(edr.data.dim(), (2, 6));
    assert_eq!(
        edr.column_names,
        vec!["time", "Freq", "Lamp", "LmR", "Ramp", "Barpos"]
    );
    assert_eq!(edr.column_names.len(), edr.data.ncols());
    assert_eq!(edr.start_time.to_string(), "2015-04-15 14:31:07");

    assert_eq!(edr.time().to_vec(), vec![0.0, 0.01]);
    assert_abs_diff_eq!(edr.data[[0, 1]], 819.0 * GAIN, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.data[[1, 1]], 1638.0 * GAIN, epsilon = 1e-12);

    // Lamp [100, 300] and Ramp [200, 100] z-score to [-1, 1] and [1, -1]
    let lmr = edr.column("LmR").unwrap();
    assert_abs_diff_eq!(lmr[0], -2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(lmr[1], 2.0, epsilon = 1e-12);
    let ramp = edr.column("Ramp").unwrap();
    assert_abs_diff_eq!(ramp[0], 200.0 * GAIN, epsilon = 1e-12);

    let barpos = edr.column("Barpos").unwrap();
    assert_abs_diff_eq!(barpos[0], 180.0, epsilon = 1e-9);
    assert_abs_diff_eq!(barpos[1], -90.0, epsilon = 1e-9);

    assert_eq!(edr.num_samples(), 2);
    assert_eq!(edr.num_channels(), 5);
    assert_abs_diff_eq!(edr.duration(), 0.02, epsilon = 1e-12);
}

#[test]
fn raw_options_return_calibrated_channels_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = two_row_fixture().write(dir.path(), "raw.edr");

    let edr = load_with_options(&path, &LoadOptions::raw()).unwrap();

    assert_eq!(
        edr.column_names,
        vec!["time", "Freq", "Lamp", "Ramp", "LmR", "Barpos"]
    );
    assert_abs_diff_eq!(edr.data[[1, 2]], 300.0 * GAIN, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.data[[0, 4]], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.data[[1, 5]], 3.75, epsilon = 1e-12);
}

#[test]
fn header_keeps_every_entry_with_typed_values() {
    let dir = TempDir::new().unwrap();
    let fixture = two_row_fixture();
    let path = fixture.write(dir.path(), "header.EDR");

    let edr = load(&path).unwrap();
    assert_eq!(edr.header.len(), fixture.header_lines().len());
    assert_eq!(edr.header.get("NC"), Some(&HeaderValue::Integer(5)));
    assert_eq!(edr.header.get("DT"), Some(&HeaderValue::Float(0.01)));
    assert_eq!(
        edr.header.get("ID"),
        Some(&HeaderValue::Text("insect2 just visual".into()))
    );

    let header_only = load_header(&path, 2048).unwrap();
    assert_eq!(header_only, edr.header);
}

#[test]
fn calibration_is_linear_in_raw_counts_and_gain() {
    let dir = TempDir::new().unwrap();
    let base = ramp_fixture(20);
    let mut scaled = ramp_fixture(20);
    for row in scaled.rows.iter_mut() {
        row[0] *= 3;
    }
    scaled.ycf[0] = 3.0;

    let options = LoadOptions::raw();
    let a = load_with_options(base.write(dir.path(), "a.edr"), &options).unwrap();
    let b = load_with_options(scaled.write(dir.path(), "b.edr"), &options).unwrap();

    for (x, y) in a.data.iter().zip(b.data.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
    }
}

#[test]
fn downsampling_to_native_interval_is_noop() {
    let dir = TempDir::new().unwrap();
    let path = ramp_fixture(50).write(dir.path(), "native.edr");

    let options = LoadOptions::raw().with_target_dt(0.01);
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.num_samples(), 50);
}

#[test]
fn downsampling_by_two_halves_rows() {
    let dir = TempDir::new().unwrap();
    let path = ramp_fixture(100).write(dir.path(), "half.edr");

    let options = LoadOptions::raw().with_target_dt(0.02);
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.num_samples(), 50);

    let t = edr.time();
    assert_eq!(t[0], 0.0);
    for pair in t.to_vec().windows(2) {
        assert_abs_diff_eq!(pair[1] - pair[0], 0.02, epsilon = 1e-9);
    }
    // Freq raw count equals the row index, so kept rows are the even ones
    assert_abs_diff_eq!(edr.data[[3, 1]], 6.0 * GAIN, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.sample_interval(), 0.02, epsilon = 1e-9);
}

#[test]
fn time_column_is_non_decreasing_from_zero() {
    let dir = TempDir::new().unwrap();
    let path = ramp_fixture(37).write(dir.path(), "time.edr");

    let edr = load_with_options(&path, &LoadOptions::default().with_target_dt(0.035)).unwrap();
    let t = edr.time().to_vec();
    assert_eq!(t[0], 0.0);
    assert!(t.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn custom_header_block_size() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.block = 1024;
    let path = fixture.write(dir.path(), "small_block.edr");

    let options = LoadOptions::default().with_header_block_size(1024);
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.num_samples(), 2);

    // the default block size reads past the samples
    assert!(load(&path).is_err());
}

#[test]
fn wrong_extension_is_rejected_before_io() {
    let result = load("/nonexistent/recording.csv");
    assert!(matches!(result, Err(EdrError::InvalidInput(_))));
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = load(dir.path().join("absent.edr"));
    assert!(matches!(result, Err(EdrError::Io(_))));
}

#[test]
fn header_line_without_separator_is_malformed() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.extra_lines.push("this line has no separator".to_string());
    let path = fixture.write(dir.path(), "malformed.edr");

    match load(&path) {
        Err(EdrError::MalformedHeader { line: Some(_), reason }) => {
            assert!(reason.contains("this line has no separator"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn missing_required_fields_are_named() {
    let dir = TempDir::new().unwrap();

    for key in ["CTIME", "ADCMAX", "YCF2", "YN4"] {
        let mut fixture = two_row_fixture();
        fixture.skip_keys.push(key.to_string());
        let path = fixture.write(dir.path(), "missing.edr");

        match load(&path) {
            Err(EdrError::MissingHeaderField(name)) => assert_eq!(name, key),
            other => panic!("{}: unexpected result: {:?}", key, other),
        }
    }
}

#[test]
fn sample_count_not_divisible_by_channels_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.np_override = Some(11);
    let path = fixture.write(dir.path(), "np.edr");

    match load(&path) {
        Err(EdrError::CorruptData(msg)) => assert!(msg.contains("NP=11")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn sample_count_mismatch_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.np_override = Some(15);
    let path = fixture.write(dir.path(), "short.edr");

    assert!(matches!(load(&path), Err(EdrError::CorruptData(_))));
}

#[test]
fn narrow_recording_cannot_be_swapped() {
    let dir = TempDir::new().unwrap();
    let mut fixture = EdrFixture::new(vec![vec![1, 2, 3], vec![4, 5, 6]]);
    fixture.names = vec!["Freq".into(), "Lamp".into(), "Ramp".into()];
    fixture.ycf = vec![1.0; 3];
    let path = fixture.write(dir.path(), "narrow.edr");

    assert!(matches!(load(&path), Err(EdrError::CorruptData(_))));

    let options = LoadOptions::raw();
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.column_names, vec!["time", "Freq", "Lamp", "Ramp"]);
}

#[test]
fn out_of_range_column_swap_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = two_row_fixture().write(dir.path(), "swap.edr");

    for swap in [(usize::MAX, 0), (0, usize::MAX), (3, 6)] {
        let options = LoadOptions::raw().with_column_swap(Some(swap));
        match load_with_options(&path, &options) {
            Err(EdrError::CorruptData(msg)) => assert!(msg.contains("6 columns")),
            other => panic!("{:?}: unexpected result: {:?}", swap, other),
        }
    }

    let options = LoadOptions::raw().with_column_swap(Some((1, 5)));
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.column_names[1], "Barpos");
    assert_eq!(edr.column_names[5], "Freq");
}

#[test]
fn sample_interval_reflects_applied_resampling() {
    let dir = TempDir::new().unwrap();

    let single = EdrFixture::new(vec![vec![1, 2, 3, 4, 5]]);
    let path = single.write(dir.path(), "single.edr");
    let edr = load_with_options(&path, &LoadOptions::raw()).unwrap();
    assert_eq!(edr.num_samples(), 1);
    assert_abs_diff_eq!(edr.sample_interval(), 0.01, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.duration(), 0.01, epsilon = 1e-12);

    let path = ramp_fixture(37).write(dir.path(), "stride.edr");
    let options = LoadOptions::raw().with_target_dt(0.035);
    let edr = load_with_options(&path, &options).unwrap();
    assert_eq!(edr.num_samples(), 11);
    assert_abs_diff_eq!(edr.sample_interval(), 0.035, epsilon = 1e-12);
    assert_abs_diff_eq!(edr.duration(), 0.385, epsilon = 1e-9);
}

#[test]
fn post_processing_needs_named_columns() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.names[4] = "Stim".into();
    let path = fixture.write(dir.path(), "nobar.edr");

    match load(&path) {
        Err(EdrError::MissingColumn(name)) => assert_eq!(name, "Barpos"),
        other => panic!("unexpected result: {:?}", other),
    }

    let options = LoadOptions::default().with_barpos_in_degrees(false);
    assert!(load_with_options(&path, &options).is_ok());
}

#[test]
fn unparsable_start_time_is_malformed() {
    let dir = TempDir::new().unwrap();
    let mut fixture = two_row_fixture();
    fixture.skip_keys.push("CTIME".into());
    fixture.extra_lines.push("CTIME=yesterday".into());
    let path = fixture.write(dir.path(), "ctime.edr");

    match load(&path) {
        Err(EdrError::MalformedHeader { reason, .. }) => assert!(reason.contains("yesterday")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn invalid_options_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = two_row_fixture().write(dir.path(), "opts.edr");

    let options = LoadOptions::default().with_target_dt(-1.0);
    assert!(matches!(
        load_with_options(&path, &options),
        Err(EdrError::InvalidInput(_))
    ));
}
