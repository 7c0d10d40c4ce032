use edr_importer::{load_with_options, LoadOptions};
use ndarray::s;
use std::env;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <path_to_edr_file> [target_dt]", args[0]);
        std::process::exit(1);
    }

    let target_dt = match args.get(2) {
        Some(dt) => dt.parse::<f64>()?,
        None => 0.001,
    };

    // Load EDR file
    let options = LoadOptions::default().with_target_dt(target_dt);
    let edr = load_with_options(&args[1], &options)?;

    // Print basic file information
    println!("data.shape: ({}, {})", edr.data.nrows(), edr.data.ncols());
    println!("file_start: {}", edr.start_time.format("%c"));
    println!("col_names: [{}]", edr.column_names.join(", "));
    println!("header size: {}", edr.header.len());
    println!("DT: {:.6}", edr.header.sample_interval()?);
    println!("Duration: {:.2} seconds", edr.duration());

    // Show the first few rows
    let num_rows = std::cmp::min(5, edr.num_samples());
    if num_rows > 0 {
        println!("\nFirst {} rows:", num_rows);
        for row in edr.data.slice(s![..num_rows, ..]).rows() {
            let values: Vec<String> = row.iter().map(|v| format!("{:10.4}", v)).collect();
            println!("  {}", values.join(" "));
        }
    }

    Ok(())
}
