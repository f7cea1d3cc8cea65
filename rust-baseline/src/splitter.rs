//! Walk-forward splits for time series model evaluation.
//!
//! [`split`] sorts a frame by timestamp and returns a lazy sequence of
//! `(train, test)` pairs. The test window has a fixed length and walks
//! forward by its own length each step. The training window either grows
//! from the first timestamp (no maximum training period) or slides behind
//! the test window with a capped length. Both halves of a pair are zero-copy
//! slices of one sorted copy of the input.

use std::iter::FusedIterator;

use arrow::record_batch::RecordBatch;
use derive_builder::Builder;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::frame::{TIMESTAMP_COLUMN, slice_range, sort_by_timestamp, to_datetime};
use crate::interval::Interval;

#[derive(Debug, Clone, PartialEq, Eq, Builder, Deserialize)]
#[builder(default)]
#[serde(default, deny_unknown_fields)]
pub struct WalkForwardConfig {
    /// Shortest training window. When unset it equals `test_window`.
    #[builder(setter(into, strip_option))]
    pub minimum_training_period: Option<Interval>,
    /// Longest training window. When set the training window slides instead
    /// of expanding.
    #[builder(setter(into, strip_option))]
    pub maximum_training_period: Option<Interval>,
    /// Length of each test window, also the step between splits. Required.
    #[builder(setter(into, strip_option))]
    pub test_window: Option<Interval>,
    #[builder(setter(into))]
    pub timestamp_column: String,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        WalkForwardConfig {
            minimum_training_period: Some(Interval::days(7)),
            maximum_training_period: None,
            test_window: Some(Interval::days(1)),
            timestamp_column: TIMESTAMP_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Plan {
    minimum_training_period: Interval,
    maximum_training_period: Option<Interval>,
    test_window: Interval,
}

impl WalkForwardConfig {
    pub fn builder() -> WalkForwardConfigBuilder {
        WalkForwardConfigBuilder::default()
    }

    /// Checks the configuration without touching any data.
    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    fn plan(&self) -> Result<Plan> {
        let invalid = |msg: String| Err(ForecastError::InvalidConfiguration(msg));
        let Some(test_window) = self.test_window else {
            return invalid("size of test window must be specified".to_string());
        };
        if !test_window.is_positive() {
            return invalid(format!("test window must be positive, got {test_window}"));
        }
        match (self.maximum_training_period, self.minimum_training_period) {
            (Some(max), Some(min)) if max < min => {
                return invalid(format!(
                    "maximum training period {max} must be at least the minimum training period {min}"
                ));
            }
            _ => {}
        }
        for (name, period) in [
            ("minimum", self.minimum_training_period),
            ("maximum", self.maximum_training_period),
        ] {
            if let Some(period) = period.filter(Interval::is_negative) {
                return invalid(format!(
                    "{name} training period must not be negative, got {period}"
                ));
            }
        }
        if self.timestamp_column.is_empty() {
            return invalid("timestamp column must be named".to_string());
        }
        Ok(Plan {
            minimum_training_period: self.minimum_training_period.unwrap_or(test_window),
            maximum_training_period: self.maximum_training_period,
            test_window,
        })
    }
}

/// One walk-forward step. Bounds are nanoseconds since the epoch; the train
/// half covers `[train_start, train_end)` and the test half
/// `[train_end, test_end)`.
#[derive(Debug, Clone)]
pub struct Split {
    /// Position among the emitted splits, starting at 0.
    pub fold: usize,
    pub train: RecordBatch,
    pub test: RecordBatch,
    pub train_start: i64,
    pub train_end: i64,
    pub test_end: i64,
}

impl Split {
    pub fn into_parts(self) -> (RecordBatch, RecordBatch) {
        (self.train, self.test)
    }
}

/// Lazy, forward-only sequence of [`Split`]s produced by [`split`].
#[derive(Debug)]
pub struct WalkForwardSplits {
    sorted: RecordBatch,
    timestamps: Vec<i64>,
    plan: Plan,
    max_date: i64,
    train_start: i64,
    train_end: i64,
    test_end: i64,
    emitted: usize,
}

/// Splits `batch` for walk-forward evaluation.
///
/// The configuration is validated before anything else, so a bad
/// configuration fails here rather than part way through iteration.
pub fn split(batch: &RecordBatch, config: &WalkForwardConfig) -> Result<WalkForwardSplits> {
    let plan = config.plan()?;
    let (sorted, timestamps) = sort_by_timestamp(batch, &config.timestamp_column)?;

    let (train_start, max_date) = match (timestamps.first(), timestamps.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => (0, i64::MIN),
    };
    let train_end = train_start.saturating_add(plan.minimum_training_period.nanos());
    let test_end = train_end.saturating_add(plan.test_window.nanos());

    Ok(WalkForwardSplits {
        sorted,
        timestamps,
        plan,
        max_date,
        train_start,
        train_end,
        test_end,
        emitted: 0,
    })
}

impl WalkForwardSplits {
    /// The timestamp-sorted copy every split is sliced from.
    pub fn frame(&self) -> &RecordBatch {
        &self.sorted
    }

    fn advance(&mut self) {
        let step = self.plan.test_window.nanos();
        self.train_end = self.train_end.saturating_add(step);
        self.test_end = self.test_end.saturating_add(step);
        if let Some(max) = self.plan.maximum_training_period {
            self.train_start = self.train_end.saturating_sub(max.nanos());
        }
    }
}

impl Iterator for WalkForwardSplits {
    type Item = Split;

    fn next(&mut self) -> Option<Split> {
        // the last window reaching max_date is never emitted
        while self.test_end < self.max_date {
            let (train_start, train_end, test_end) =
                (self.train_start, self.train_end, self.test_end);
            let train = slice_range(&self.sorted, &self.timestamps, train_start, train_end);
            let test = slice_range(&self.sorted, &self.timestamps, train_end, test_end);
            self.advance();

            if train.num_rows() == 0 || test.num_rows() == 0 {
                warn!(
                    train_start = %to_datetime(train_start),
                    train_end = %to_datetime(train_end),
                    test_end = %to_datetime(test_end),
                    train_rows = train.num_rows(),
                    test_rows = test.num_rows(),
                    "skipping walk-forward window with an empty train or test set"
                );
                continue;
            }

            let fold = self.emitted;
            self.emitted += 1;
            debug!(
                fold,
                train_rows = train.num_rows(),
                test_rows = test.num_rows(),
                train_end = %to_datetime(train_end),
                "walk-forward split"
            );
            return Some(Split {
                fold,
                train,
                test,
                train_start,
                train_end,
                test_end,
            });
        }
        None
    }
}

impl FusedIterator for WalkForwardSplits {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float64Array, TimestampNanosecondArray};
    use arrow_schema::{DataType, Field, Schema, TimeUnit};

    use super::*;
    use crate::frame::{float_values, timestamp_nanos};

    const DAY: i64 = Interval::days(1).nanos();

    /// Daily series, y = day number, given in reverse order.
    fn daily_batch(num_days: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ds", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
            Field::new("y", DataType::Float64, false),
        ]));
        let days: Vec<i64> = (0..num_days).rev().collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(TimestampNanosecondArray::from(
                    days.iter().map(|d| d * DAY).collect::<Vec<_>>(),
                )),
                Arc::new(Float64Array::from(
                    days.iter().map(|&d| d as f64).collect::<Vec<_>>(),
                )),
            ],
        )
        .expect("Failed to create daily RecordBatch")
    }

    fn config(min: Option<i64>, max: Option<i64>, test: i64) -> WalkForwardConfig {
        WalkForwardConfig {
            minimum_training_period: min.map(Interval::days),
            maximum_training_period: max.map(Interval::days),
            test_window: Some(Interval::days(test)),
            ..Default::default()
        }
    }

    fn ds(batch: &RecordBatch) -> Vec<i64> {
        timestamp_nanos(batch, "ds").expect("ds")
    }

    #[test]
    fn test_expanding_window() {
        let splits: Vec<Split> = split(&daily_batch(20), &config(Some(7), None, 3))
            .expect("split")
            .collect();
        // test_end starts at day 10 and must stay below day 19
        assert_eq!(splits.len(), 3);
        for (i, s) in splits.iter().enumerate() {
            assert_eq!(s.fold, i);
            assert_eq!(s.train_start, 0);
            assert_eq!(ds(&s.train)[0], 0);
            let train_days = ds(&s.train);
            let test_days = ds(&s.test);
            assert!(train_days.last() < test_days.first());
            assert_eq!(test_days.len(), 3);
            assert_eq!(test_days[0], (7 + 3 * i as i64) * DAY);
        }
        assert_eq!(splits[2].train.num_rows(), 13);
        assert_eq!(
            float_values(&splits[0].test, "y").expect("y"),
            vec![Some(7.0), Some(8.0), Some(9.0)]
        );
    }

    #[test]
    fn test_sliding_window() {
        let splits: Vec<Split> = split(&daily_batch(40), &config(Some(5), Some(10), 2))
            .expect("split")
            .collect();
        assert!(!splits.is_empty());
        // first window keeps the original start; later ones are capped at 10 days
        assert_eq!(splits[0].train_end - splits[0].train_start, 5 * DAY);
        for s in &splits[1..] {
            assert!(s.train_end - s.train_start <= 10 * DAY);
        }
        for s in splits.iter().filter(|s| s.train_end >= 10 * DAY) {
            assert_eq!(s.train_end - s.train_start, 10 * DAY);
            assert!(s.train.num_rows() <= 10);
        }
        for pair in splits.windows(2) {
            assert_eq!(pair[1].test_end - pair[0].test_end, 2 * DAY);
            assert!(ds(&pair[0].test).last() < ds(&pair[1].test).first());
        }
    }

    #[test]
    fn test_minimum_defaults_to_test_window() {
        let splits: Vec<Split> = split(&daily_batch(10), &config(None, None, 2))
            .expect("split")
            .collect();
        assert_eq!(splits[0].train_end, 2 * DAY);
        assert_eq!(ds(&splits[0].train), vec![0, DAY]);
        assert_eq!(ds(&splits[0].test), vec![2 * DAY, 3 * DAY]);
        // test_end 4, 6, 8 are all below day 9
        assert_eq!(splits.len(), 3);
    }

    #[test]
    fn test_split_count_bound() {
        let span_days = 29; // days 0..=29
        for (min, w) in [(7, 1), (7, 3), (1, 5), (10, 4)] {
            let count = split(&daily_batch(span_days + 1), &config(Some(min), None, w))
                .expect("split")
                .count() as i64;
            assert!(count <= (span_days - min) / w, "min={min} w={w} count={count}");
        }
    }

    #[test]
    fn test_gaps_are_skipped_not_fatal() {
        // days 0..5 and 20..25 with nothing in between
        let schema = Arc::new(Schema::new(vec![Field::new(
            "ds",
            DataType::Timestamp(TimeUnit::Nanosecond, None),
            false,
        )]));
        let days: Vec<i64> = (0..5).chain(20..25).map(|d| d * DAY).collect();
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(TimestampNanosecondArray::from(days))])
                .expect("batch");
        let splits: Vec<Split> = split(&batch, &config(Some(3), Some(3), 2))
            .expect("split")
            .collect();
        assert!(!splits.is_empty());
        for (i, s) in splits.iter().enumerate() {
            assert_eq!(s.fold, i);
            assert!(s.train.num_rows() > 0 && s.test.num_rows() > 0);
        }
        // the windows inside the gap produced nothing
        assert!(splits.iter().all(|s| s.train_end <= 5 * DAY || s.train_start >= 17 * DAY));
    }

    #[test]
    fn test_config_rejected_before_any_split() {
        let batch = daily_batch(30);
        let inverted = config(Some(10), Some(5), 1);
        assert!(matches!(
            split(&batch, &inverted),
            Err(ForecastError::InvalidConfiguration(_))
        ));

        let no_test_window = WalkForwardConfig {
            test_window: None,
            ..Default::default()
        };
        assert!(matches!(
            split(&batch, &no_test_window),
            Err(ForecastError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            split(&batch, &config(Some(1), None, 0)),
            Err(ForecastError::InvalidConfiguration(_))
        ));
        assert!(no_test_window.validate().is_err());
        assert!(WalkForwardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_and_short_inputs() {
        let empty = daily_batch(0);
        assert_eq!(split(&empty, &WalkForwardConfig::default()).expect("split").count(), 0);
        // 8 days cannot fit 7 days of training plus a full test day before the end
        let short = daily_batch(8);
        assert_eq!(split(&short, &WalkForwardConfig::default()).expect("split").count(), 0);
    }

    #[test]
    fn test_custom_timestamp_column_and_missing_column() {
        let batch = daily_batch(12);
        let renamed = crate::frame::rename_column(&batch, "ds", "when").expect("rename");
        let cfg = WalkForwardConfig {
            timestamp_column: "when".to_string(),
            ..config(Some(3), None, 2)
        };
        assert!(split(&renamed, &cfg).expect("split").count() > 0);
        assert!(matches!(
            split(&batch, &cfg),
            Err(ForecastError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_builder_and_json_config() {
        let built = WalkForwardConfig::builder()
            .minimum_training_period(Interval::days(30))
            .maximum_training_period(Interval::days(90))
            .test_window(Interval::days(7))
            .build()
            .expect("build");
        assert_eq!(built.timestamp_column, "ds");
        assert_eq!(built.maximum_training_period, Some(Interval::days(90)));

        let parsed: WalkForwardConfig = serde_json::from_str(
            r#"{"minimum_training_period": "30d", "maximum_training_period": "90d", "test_window": "7d"}"#,
        )
        .expect("json");
        assert_eq!(parsed, built);

        let unset_min: WalkForwardConfig =
            serde_json::from_str(r#"{"minimum_training_period": null}"#).expect("json");
        assert_eq!(unset_min.minimum_training_period, None);
        assert_eq!(unset_min.test_window, Some(Interval::days(1)));
        assert!(serde_json::from_str::<WalkForwardConfig>(r#"{"test_windw": "1d"}"#).is_err());
    }

    #[test]
    fn test_splits_are_views_of_sorted_copy() {
        let batch = daily_batch(15);
        let mut splits = split(&batch, &config(Some(5), None, 2)).expect("split");
        assert_eq!(ds(splits.frame())[0], 0);
        let first = splits.next().expect("first split");
        let (train, test) = first.into_parts();
        assert_eq!(train.num_rows(), 5);
        assert_eq!(test.num_rows(), 2);
        // the source batch is untouched
        assert_eq!(ds(&batch)[0], 14 * DAY);
    }
}
