//! Pure statistics and technical-indicator helpers over `f64` series.
//!
//! Every function guards its denominators: an empty window, zero variance or
//! zero mean deviation yields a neutral `0.0` (or `None` where the caller must
//! know the value is unmeasured) instead of NaN or infinity.

use statrs::statistics::Statistics;

/// Period-over-period simple returns. Pairs with a non-positive base are skipped.
pub fn returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter_map(|w| if w[0] > 0.0 { Some((w[1] - w[0]) / w[0]) } else { None })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

/// Sample standard deviation; 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sd = values.std_dev();
    if sd.is_finite() {
        sd
    } else {
        0.0
    }
}

/// Percentage change from the first to the last value.
pub fn pct_change(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => (last - first) / first * 100.0,
        _ => 0.0,
    }
}

/// Ordinary least-squares fit of `values` against their index.
///
/// Returns `(slope, r_squared)`; both are 0 when the fit is undefined.
pub fn linear_regression(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;
    let r_squared = if syy > 0.0 { (sxy * sxy) / (sxx * syy) } else { 0.0 };
    (slope, r_squared.clamp(0.0, 1.0))
}

/// Rolling simple moving average; output has `len - period + 1` points.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    values.windows(period).map(mean).collect()
}

/// Mean absolute deviation from the window mean.
pub fn mean_abs_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).abs()).sum::<f64>() / values.len() as f64
}

/// Channel index over typical prices.
///
/// `(TP - SMA(TP, period)) / (0.015 × meanDeviation(TP, period))`, one value per
/// full window. A zero mean deviation yields 0.
pub fn channel_index(typical_prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || typical_prices.len() < period {
        return Vec::new();
    }
    typical_prices
        .windows(period)
        .map(|window| {
            let avg = mean(window);
            let md = mean_abs_deviation(window);
            let last = window[window.len() - 1];
            if md <= f64::EPSILON * avg.abs().max(1.0) {
                0.0
            } else {
                (last - avg) / (0.015 * md)
            }
        })
        .collect()
}

/// Pearson correlation of two equally long series. `None` when undefined.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    let r = cov / (va.sqrt() * vb.sqrt());
    r.is_finite().then_some(r.clamp(-1.0, 1.0))
}

/// Beta of `asset` returns against `market` returns. `None` when market variance is 0.
pub fn beta(asset: &[f64], market: &[f64]) -> Option<f64> {
    let n = asset.len().min(market.len());
    if n < 2 {
        return None;
    }
    let (a, m) = (&asset[asset.len() - n..], &market[market.len() - n..]);
    let (ma, mm) = (mean(a), mean(m));
    let cov: f64 = a.iter().zip(m).map(|(x, y)| (x - ma) * (y - mm)).sum();
    let var: f64 = m.iter().map(|y| (y - mm).powi(2)).sum();
    if var <= 0.0 {
        return None;
    }
    let b = cov / var;
    b.is_finite().then_some(b)
}
