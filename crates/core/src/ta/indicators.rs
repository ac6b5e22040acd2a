use crate::ta::DailyBar;

const EPSILON: f64 = 1e-9;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Simple moving average of the last `window` values. None when fewer than
/// `window` values exist.
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Recursive exponential moving average with a fixed alpha, seeded on the
/// first value (Wilder-style smoothing when alpha = 1/n).
fn ewm_alpha(values: &[f64], alpha: f64) -> Option<f64> {
    let mut iter = values.iter();
    let mut avg = *iter.next()?;
    for v in iter {
        avg += alpha * (v - avg);
    }
    Some(avg)
}

/// Span-parameterized EMA series (alpha = 2 / (span + 1)), as used by MACD.
fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut avg = match values.first() {
        Some(v) => *v,
        None => return out,
    };
    out.push(avg);
    for v in &values[1..] {
        avg += alpha * (v - avg);
        out.push(avg);
    }
    out
}

/// RSI over `period` via Wilder smoothing of gains and losses. The epsilon
/// keeps the RS division defined when average loss is zero.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let alpha = 1.0 / period as f64;
    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let delta = pair[1] - pair[0];
        gains.push(delta.max(0.0));
        losses.push((-delta).max(0.0));
    }
    let avg_gain = ewm_alpha(&gains, alpha)?;
    let avg_loss = ewm_alpha(&losses, alpha)?;
    let rs = avg_gain / (avg_loss + EPSILON);
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(12, 26) with a 9-period signal line. Returns (macd, signal).
pub fn macd(closes: &[f64]) -> Option<(f64, f64)> {
    if closes.len() < 2 {
        return None;
    }
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    let line: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    let signal = *ema_series(&line, 9).last()?;
    Some((*line.last()?, signal))
}

/// On-balance volume: signed cumulative volume.
pub fn obv(closes: &[f64], volumes: &[f64]) -> Option<f64> {
    if closes.len() < 2 || closes.len() != volumes.len() {
        return None;
    }
    let mut total = 0.0;
    for i in 1..closes.len() {
        let sign = (closes[i] - closes[i - 1]).signum();
        total += sign * volumes[i];
    }
    Some(total)
}

/// Average directional index over `period`, smoothed with alpha = 1/period.
pub fn adx(bars: &[DailyBar], period: usize) -> Option<f64> {
    if bars.len() < 3 {
        return None;
    }
    let alpha = 1.0 / period as f64;
    let n = bars.len() - 1;
    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    let mut tr = Vec::with_capacity(n);
    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        let range = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
        tr.push(range);
    }

    // Smoothed DI series, then DX, then one more smoothing pass for ADX.
    let mut dx = Vec::with_capacity(n);
    let mut sp = plus_dm[0];
    let mut sm = minus_dm[0];
    let mut st = tr[0];
    for i in 0..n {
        if i > 0 {
            sp += alpha * (plus_dm[i] - sp);
            sm += alpha * (minus_dm[i] - sm);
            st += alpha * (tr[i] - st);
        }
        let plus_di = 100.0 * sp / (st + EPSILON);
        let minus_di = 100.0 * sm / (st + EPSILON);
        dx.push(100.0 * (plus_di - minus_di).abs() / (plus_di + minus_di + EPSILON));
    }
    ewm_alpha(&dx, alpha)
}

/// Annualized volatility: sample standard deviation of daily returns
/// scaled by sqrt(252).
pub fn annualized_volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|p| p[0].abs() > EPSILON)
        .map(|p| p[1] / p[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    Some(var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(i: usize, close: f64) -> DailyBar {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(i as i64);
        DailyBar {
            date,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn sma_requires_a_full_window() {
        let closes = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&closes, 2), Some(3.5));
        assert_eq!(sma(&closes, 4), Some(2.5));
        assert_eq!(sma(&closes, 5), None);
    }

    #[test]
    fn rsi_is_high_for_monotonic_gains_and_low_for_losses() {
        let up: Vec<f64> = (1..60).map(|i| 100.0 + i as f64).collect();
        let rsi_up = wilder_rsi(&up, 14).unwrap();
        assert!(rsi_up > 95.0, "got {rsi_up}");

        let down: Vec<f64> = (1..60).map(|i| 200.0 - i as f64).collect();
        let rsi_down = wilder_rsi(&down, 14).unwrap();
        assert!(rsi_down < 5.0, "got {rsi_down}");
    }

    #[test]
    fn rsi_survives_zero_average_loss() {
        let flat_then_up = [100.0, 100.0, 101.0, 102.0, 103.0];
        let rsi = wilder_rsi(&flat_then_up, 14).unwrap();
        assert!(rsi.is_finite());
        assert!(rsi > 50.0);
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let mixed: Vec<f64> = (0..100)
            .map(|i| 100.0 + ((i * 7919) % 13) as f64 - 6.0)
            .collect();
        let rsi = wilder_rsi(&mixed, 14).unwrap();
        assert!((0.0..=100.0).contains(&rsi), "got {rsi}");
    }

    #[test]
    fn macd_is_positive_in_an_uptrend() {
        let up: Vec<f64> = (1..120).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let (line, signal) = macd(&up).unwrap();
        assert!(line > 0.0);
        assert!(signal > 0.0);
    }

    #[test]
    fn obv_tracks_direction() {
        let closes = [100.0, 101.0, 100.5, 102.0];
        let volumes = [0.0, 10.0, 4.0, 6.0];
        assert_eq!(obv(&closes, &volumes), Some(12.0));
    }

    #[test]
    fn adx_is_strong_for_a_persistent_trend() {
        let bars: Vec<DailyBar> = (0..80).map(|i| bar(i, 100.0 + i as f64)).collect();
        let adx = adx(&bars, 14).unwrap();
        assert!(adx > 25.0, "got {adx}");
        assert!(adx <= 100.0);
    }

    #[test]
    fn volatility_is_zero_for_a_flat_series_and_positive_otherwise() {
        let flat = [100.0; 30];
        assert!(annualized_volatility(&flat).unwrap() < 1e-12);

        let noisy: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 105.0 })
            .collect();
        assert!(annualized_volatility(&noisy).unwrap() > 0.1);
    }
}
