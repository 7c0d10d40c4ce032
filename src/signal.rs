//! Signal helpers for event-triggered analysis of loaded EDR columns.
//!
//! These work on plain 1D views so they can be applied to any column of
//! [`crate::EdrFile::data`].

use ndarray::{s, Array1, Array2, ArrayView1, Axis};

/// Population z-score: `(x - mean) / std` with the standard deviation
/// taken over N, not N - 1.
///
/// An empty input gives an empty output. A constant input has zero
/// deviation and yields NaN.
pub fn zscore(x: ArrayView1<f64>) -> Array1<f64> {
    let mean = match x.mean() {
        Some(m) => m,
        None => return Array1::zeros(0),
    };
    let std = x.std(0.0);
    x.mapv(|v| (v - mean) / std)
}

/// Centered finite difference with the same length as the input.
///
/// Interior points use `(x[i+1] - x[i-1]) / 2`; the two endpoints use
/// one-sided differences.
pub fn cdiff(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    let mut out = Array1::zeros(n);
    if n < 2 {
        return out;
    }

    out[0] = x[1] - x[0];
    out[n - 1] = x[n - 1] - x[n - 2];
    for i in 1..n - 1 {
        out[i] = (x[i + 1] - x[i - 1]) / 2.0;
    }
    out
}

/// One excursion of a signal above a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Largest value inside the excursion
    pub peak: f64,
    /// First index above threshold
    pub onset: usize,
    /// First index back at or below threshold (signal length if it never returns)
    pub offset: usize,
    /// `offset - onset`, in samples
    pub duration: usize,
}

/// Finds every run of samples strictly above `threshold`.
///
/// # Examples
///
/// ```
/// use edr_importer::signal::segment_by_threshold;
/// use ndarray::array;
///
/// let speed = array![0.0, 6.0, 8.0, 1.0, 7.0];
/// let segments = segment_by_threshold(speed.view(), 5.0);
/// assert_eq!(segments.len(), 2);
/// assert_eq!((segments[0].onset, segments[0].offset), (1, 3));
/// assert_eq!(segments[1].offset, 5);
/// ```
pub fn segment_by_threshold(x: ArrayView1<f64>, threshold: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<(usize, f64)> = None;

    for (i, &v) in x.iter().enumerate() {
        match (current, v > threshold) {
            (None, true) => current = Some((i, v)),
            (Some((onset, peak)), true) => current = Some((onset, peak.max(v))),
            (Some((onset, peak)), false) => {
                segments.push(Segment {
                    peak,
                    onset,
                    offset: i,
                    duration: i - onset,
                });
                current = None;
            }
            (None, false) => {}
        }
    }

    if let Some((onset, peak)) = current {
        segments.push(Segment {
            peak,
            onset,
            offset: x.len(),
            duration: x.len() - onset,
        });
    }
    segments
}

/// Cuts `x[t - pre .. t + post]` around each trigger index.
///
/// Triggers whose window would leave the signal are skipped, so the result
/// has one row per usable trigger and `pre + post` columns.
pub fn triggered_windows(
    x: ArrayView1<f64>,
    triggers: &[usize],
    pre: usize,
    post: usize,
) -> Array2<f64> {
    let usable: Vec<usize> = triggers
        .iter()
        .copied()
        .filter(|&t| t >= pre && t + post <= x.len())
        .collect();

    let mut windows = Array2::zeros((usable.len(), pre + post));
    for (mut row, t) in windows.rows_mut().into_iter().zip(usable) {
        row.assign(&x.slice(s![t - pre..t + post]));
    }
    windows
}

/// Mean across triggered windows, or `None` when there are none.
pub fn triggered_average(windows: &Array2<f64>) -> Option<Array1<f64>> {
    windows.mean_axis(Axis(0))
}
