mod reader;
pub mod signal;
pub mod types;

use std::path::Path;

// Re-export types
pub use types::*;

/// Loads an EDR file with the default options and returns a struct representation
///
/// Defaults: 2048-byte header block, 1 ms target interval, `LmR` replaced by
/// the z-scored `Lamp - Ramp` difference, `Barpos` in degrees, and columns
/// 3 and 4 swapped.
///
/// # Examples
///
/// ```no_run
/// use edr_importer::load;
///
/// let result = load("path/to/your/file.EDR");
/// match result {
///     Ok(edr) => println!("Columns: {}", edr.column_names.join(", ")),
///     Err(e) => println!("Error loading file: {}", e),
/// }
/// ```
pub fn load<P: AsRef<Path>>(file_path: P) -> Result<EdrFile, EdrError> {
    reader::load_file(file_path, &LoadOptions::default())
}

/// Loads an EDR file with explicit options
///
/// # Examples
///
/// ```no_run
/// use edr_importer::{load_with_options, LoadOptions};
///
/// let options = LoadOptions::default().with_target_dt(0.05);
/// let edr = load_with_options("path/to/your/file.EDR", &options).unwrap();
/// println!("{} rows at {} s", edr.num_samples(), edr.sample_interval());
/// ```
pub fn load_with_options<P: AsRef<Path>>(
    file_path: P,
    options: &LoadOptions,
) -> Result<EdrFile, EdrError> {
    reader::load_file(file_path, options)
}

/// Reads only the text header of an EDR file, without decoding samples
pub fn load_header<P: AsRef<Path>>(
    file_path: P,
    header_block_size: u64,
) -> Result<EdrHeader, EdrError> {
    reader::load_header_only(file_path, header_block_size)
}
