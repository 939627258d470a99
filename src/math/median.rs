//! Rank (median) pre-filter for spike removal on raw traces.

/// Apply a median filter of odd `window` size in place.
///
/// Returns `false` and leaves the trace untouched when the window is
/// even, smaller than 3 or larger than the trace. Boundary cells are
/// filtered against the window clipped to the trace.
pub fn median_filter(v: &mut [f32], window: usize) -> bool {
    let n = v.len();
    if window % 2 == 0 || window < 3 || window > n {
        return false;
    }

    let half = window / 2;
    let source = v.to_vec();
    let mut sorted: Vec<f32> = Vec::with_capacity(window);

    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        sorted.clear();
        sorted.extend_from_slice(&source[lo..hi]);
        sorted.sort_by(|a, b| a.total_cmp(b));
        v[i] = sorted[sorted.len() / 2];
    }
    true
}
