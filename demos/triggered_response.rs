// Average flight response around bar movement onsets.
use edr_importer::signal::{cdiff, segment_by_threshold, triggered_average, triggered_windows};
use edr_importer::{load_with_options, LoadOptions};
use ndarray::Array2;
use std::env;
use std::error::Error;

const DT: f64 = 0.05;
const T_PRE: f64 = 1.0;
const T_POST: f64 = 3.0;
const SPEED_THRESHOLD: f64 = 5.0;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = match env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("Usage: triggered_response <path_to_edr_file>");
            std::process::exit(1);
        }
    };

    let edr = load_with_options(&path, &LoadOptions::default().with_target_dt(DT))?;
    let column = |name: &str| {
        edr.column(name)
            .ok_or_else(|| format!("recording has no '{}' column", name))
    };

    let freq = column("Freq")?;
    let lmr = column("LmR")?.mapv(f64::abs);
    let barpos = column("Barpos")?;

    let dt = edr.sample_interval();
    let barvel = cdiff(barpos) / dt;
    let barspeed = barvel.mapv(f64::abs);

    let onsets: Vec<usize> = segment_by_threshold(barspeed.view(), SPEED_THRESHOLD)
        .iter()
        .map(|segment| segment.onset)
        .collect();
    println!("{} bar movement onsets", onsets.len());

    let pre = (T_PRE / dt).round() as usize;
    let post = (T_POST / dt).round() as usize;

    let (right, left): (Vec<usize>, Vec<usize>) = onsets
        .iter()
        .copied()
        .filter(|&t| t >= pre && t + post <= barvel.len())
        .partition(|&t| barvel.slice(ndarray::s![t - pre..t + post]).mean().unwrap_or(0.0) > 0.0);

    for (label, triggers) in [("right", &right), ("left", &left), ("all", &onsets)] {
        let freq_windows = relative_to_onset(triggered_windows(freq, triggers, pre, post), pre);
        let lmr_windows = relative_to_onset(triggered_windows(lmr.view(), triggers, pre, post), pre);

        match (triggered_average(&freq_windows), triggered_average(&lmr_windows)) {
            (Some(freq_avg), Some(lmr_avg)) => {
                println!("\n{} motion ({} events)", label, freq_windows.nrows());
                println!("{:>8} {:>10} {:>10}", "t (s)", "dFreq", "d|LmR|");
                for i in (0..pre + post).step_by(10) {
                    let t = i as f64 * dt - T_PRE;
                    println!("{:>8.2} {:>10.3} {:>10.3}", t, freq_avg[i], lmr_avg[i]);
                }
            }
            _ => println!("\n{} motion: no complete windows", label),
        }
    }

    Ok(())
}

/// Shifts each window so its value at the trigger sample is zero
fn relative_to_onset(mut windows: Array2<f64>, onset: usize) -> Array2<f64> {
    for mut row in windows.rows_mut() {
        let at_onset = row[onset];
        row -= at_onset;
    }
    windows
}
