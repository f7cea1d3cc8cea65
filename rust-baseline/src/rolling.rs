//! Trailing rolling mean over a timestamp-sorted series.
//!
//! Windows are either a count of rows or a span of time. Options mirror the
//! usual dataframe rolling API: `min_periods`, `center` and `closed`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ForecastError, Result};
use crate::interval::Interval;

/// Size of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Window {
    /// The last `n` observations.
    Rows(usize),
    /// Every observation within a span of time; the count varies.
    Span(Interval),
}

impl Default for Window {
    fn default() -> Self {
        Window::Rows(7)
    }
}

impl From<usize> for Window {
    fn from(value: usize) -> Self {
        Window::Rows(value)
    }
}

impl From<Interval> for Window {
    fn from(value: Interval) -> Self {
        Window::Span(value)
    }
}

impl FromStr for Window {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(rows) = s.parse::<usize>() {
            return Ok(Window::Rows(rows));
        }
        Ok(Window::Span(s.parse()?))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Rows(n) => write!(f, "{n} rows"),
            Window::Span(span) => write!(f, "{span}"),
        }
    }
}

/// Which window edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Closed {
    #[default]
    Right,
    Left,
    Both,
    Neither,
}

impl Closed {
    fn left_closed(self) -> bool {
        matches!(self, Closed::Left | Closed::Both)
    }

    fn right_closed(self) -> bool {
        matches!(self, Closed::Right | Closed::Both)
    }
}

impl FromStr for Closed {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "right" => Ok(Closed::Right),
            "left" => Ok(Closed::Left),
            "both" => Ok(Closed::Both),
            "neither" => Ok(Closed::Neither),
            _ => Err(ForecastError::InvalidConfiguration(format!(
                "closed must be one of right, left, both, neither; got `{s}`"
            ))),
        }
    }
}

/// Extra configuration forwarded to the rolling aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollingOptions {
    /// Minimum number of non-null observations for a defined mean. Defaults
    /// to the window size for row windows and to 1 for span windows.
    pub min_periods: Option<usize>,
    /// Label each window at its center instead of its right edge. Row windows
    /// only.
    pub center: bool,
    pub closed: Option<Closed>,
}

impl RollingOptions {
    pub fn with_min_periods(mut self, min_periods: usize) -> Self {
        self.min_periods = Some(min_periods);
        self
    }

    pub fn centered(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn with_closed(mut self, closed: Closed) -> Self {
        self.closed = Some(closed);
        self
    }

    fn resolved_min_periods(&self, window: Window) -> usize {
        self.min_periods.unwrap_or(match window {
            Window::Rows(n) => n,
            Window::Span(_) => 1,
        })
    }
}

pub fn validate(window: Window, options: &RollingOptions) -> Result<()> {
    match window {
        Window::Rows(0) => Err(ForecastError::InvalidConfiguration(
            "window must be a positive number of rows".to_string(),
        )),
        Window::Rows(n) => match options.min_periods {
            Some(min) if min > n => Err(ForecastError::InvalidConfiguration(format!(
                "min_periods {min} must be <= window {n}"
            ))),
            _ => Ok(()),
        },
        Window::Span(span) if !span.is_positive() => Err(ForecastError::InvalidConfiguration(
            format!("window span must be positive, got {span}"),
        )),
        Window::Span(_) if options.center => Err(ForecastError::InvalidConfiguration(
            "center is only supported for row-count windows".to_string(),
        )),
        Window::Span(_) => Ok(()),
    }
}

/// `[start, end)` row bounds of every window.
fn row_bounds(len: usize, n: usize, options: &RollingOptions) -> Vec<(usize, usize)> {
    let closed = options.closed.unwrap_or_default();
    let offset = if options.center { (n - 1) / 2 } else { 0 };
    (0..len)
        .map(|i| {
            let mut end = (i + 1 + offset) as isize;
            let mut start = end - n as isize;
            if closed.left_closed() {
                start -= 1;
            }
            if !closed.right_closed() {
                end -= 1;
            }
            let clamp = |x: isize| x.clamp(0, len as isize) as usize;
            let (start, end) = (clamp(start), clamp(end));
            (start, end.max(start))
        })
        .collect()
}

fn span_bounds(
    timestamps: &[i64],
    span: Interval,
    options: &RollingOptions,
) -> Vec<(usize, usize)> {
    let closed = options.closed.unwrap_or_default();
    (0..timestamps.len())
        .map(|i| {
            let lower = timestamps[i].saturating_sub(span.nanos());
            let start = if closed.left_closed() {
                timestamps.partition_point(|&t| t < lower)
            } else {
                timestamps.partition_point(|&t| t <= lower)
            };
            let end = if closed.right_closed() { i + 1 } else { i };
            (start.min(end), end)
        })
        .collect()
}

/// Rolling mean of `values` (aligned with ascending `timestamps`).
///
/// Nulls are skipped and do not count toward `min_periods`; a window with
/// fewer observations yields `None`.
pub fn rolling_mean(
    timestamps: &[i64],
    values: &[Option<f64>],
    window: Window,
    options: &RollingOptions,
) -> Result<Vec<Option<f64>>> {
    validate(window, options)?;
    if timestamps.len() != values.len() {
        return Err(ForecastError::InvalidConfiguration(format!(
            "{} timestamps but {} values",
            timestamps.len(),
            values.len()
        )));
    }

    let mut sums = Vec::with_capacity(values.len() + 1);
    let mut counts = Vec::with_capacity(values.len() + 1);
    sums.push(0.0);
    counts.push(0usize);
    for v in values {
        let (s, c) = (sums[sums.len() - 1], counts[counts.len() - 1]);
        match v {
            Some(x) => {
                sums.push(s + x);
                counts.push(c + 1);
            }
            None => {
                sums.push(s);
                counts.push(c);
            }
        }
    }

    let bounds = match window {
        Window::Rows(n) => row_bounds(values.len(), n, options),
        Window::Span(span) => span_bounds(timestamps, span, options),
    };
    let min_periods = options.resolved_min_periods(window).max(1);
    Ok(bounds
        .into_iter()
        .map(|(start, end)| {
            let count = counts[end] - counts[start];
            (count >= min_periods).then(|| (sums[end] - sums[start]) / count as f64)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> (Vec<i64>, Vec<Option<f64>>) {
        let ts = (0..values.len() as i64).map(|i| Interval::days(i).nanos()).collect();
        (ts, values.iter().copied().map(Some).collect())
    }

    #[test]
    fn test_rows_window_default_min_periods() {
        let (ts, values) = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = rolling_mean(&ts, &values, Window::Rows(3), &RollingOptions::default())
            .expect("rolling");
        assert_eq!(out, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_rows_window_min_periods_and_nulls() {
        let ts: Vec<i64> = (0..4).collect();
        let values = vec![Some(2.0), None, Some(4.0), Some(6.0)];
        let options = RollingOptions::default().with_min_periods(1);
        let out = rolling_mean(&ts, &values, Window::Rows(2), &options).expect("rolling");
        assert_eq!(out, vec![Some(2.0), Some(2.0), Some(4.0), Some(5.0)]);

        let strict = rolling_mean(&ts, &values, Window::Rows(2), &RollingOptions::default())
            .expect("rolling");
        assert_eq!(strict, vec![None, None, None, Some(5.0)]);
    }

    #[test]
    fn test_rows_window_centered() {
        let (ts, values) = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let options = RollingOptions::default().centered(true);
        let out = rolling_mean(&ts, &values, Window::Rows(3), &options).expect("rolling");
        assert_eq!(out, vec![None, Some(2.0), Some(3.0), Some(4.0), None]);
    }

    #[test]
    fn test_rows_window_closed_left_excludes_current() {
        let (ts, values) = series(&[1.0, 2.0, 3.0, 4.0]);
        let options = RollingOptions::default()
            .with_closed(Closed::Left)
            .with_min_periods(1);
        let out = rolling_mean(&ts, &values, Window::Rows(2), &options).expect("rolling");
        assert_eq!(out, vec![None, Some(1.0), Some(1.5), Some(2.5)]);
    }

    #[test]
    fn test_span_window() {
        // day 0, 1, 2, 5
        let ts = vec![0, 1, 2, 5]
            .into_iter()
            .map(|d| Interval::days(d).nanos())
            .collect::<Vec<_>>();
        let values = vec![Some(1.0), Some(3.0), Some(5.0), Some(7.0)];
        let span = Window::Span(Interval::days(2));
        let out = rolling_mean(&ts, &values, span, &RollingOptions::default()).expect("rolling");
        // (t - 2d, t]
        assert_eq!(out, vec![Some(1.0), Some(2.0), Some(4.0), Some(7.0)]);

        let both = RollingOptions::default().with_closed(Closed::Both);
        let out = rolling_mean(&ts, &values, span, &both).expect("rolling");
        assert_eq!(out, vec![Some(1.0), Some(2.0), Some(3.0), Some(7.0)]);
    }

    #[test]
    fn test_invalid_windows() {
        let opts = RollingOptions::default();
        assert!(validate(Window::Rows(0), &opts).is_err());
        assert!(validate(Window::Rows(3), &opts.with_min_periods(4)).is_err());
        assert!(validate(Window::Span(Interval::days(0)), &opts).is_err());
        assert!(validate(Window::Span(Interval::days(1)), &opts.centered(true)).is_err());
        assert!(validate(Window::Rows(3), &opts.centered(true)).is_ok());
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!("7".parse::<Window>().expect("rows"), Window::Rows(7));
        assert_eq!("7d".parse::<Window>().expect("span"), Window::Span(Interval::days(7)));
        assert!("seven".parse::<Window>().is_err());
        assert_eq!(serde_json::from_str::<Window>("3").expect("json rows"), Window::Rows(3));
        assert_eq!(
            serde_json::from_str::<Window>("\"2h\"").expect("json span"),
            Window::Span(Interval::hours(2))
        );
    }

    #[test]
    fn test_options_from_json() {
        let options: RollingOptions =
            serde_json::from_str(r#"{"min_periods": 1, "closed": "both"}"#).expect("options");
        assert_eq!(options.min_periods, Some(1));
        assert_eq!(options.closed, Some(Closed::Both));
        assert!(!options.center);
        assert!(serde_json::from_str::<RollingOptions>(r#"{"win_type": "boxcar"}"#).is_err());
    }
}
