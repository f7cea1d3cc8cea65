use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use super::ForecastModel;
use crate::error::{ForecastError, Result};
use crate::frame::{
    MatchRule, ReferenceFrame, TARGET_COLUMN, TIMESTAMP_COLUMN, fill_nulls, float_values,
    timestamp_nanos, with_prediction,
};
use crate::interval::Interval;

/// Predicts each timestamp with the closest value observed roughly `lag`
/// earlier.
///
/// With a lag of 365 days, 2019-01-01 is predicted from 2018-01-01. Training
/// observations are shifted forward by `lag` and joined at or before the
/// query timestamp; queries with no shifted observation at or before them
/// get the mean of all training values.
#[derive(Debug, Clone)]
pub struct LaggedValuePersistence {
    lag: Interval,
    fitted: Option<LaggedValueState>,
}

#[derive(Debug, Clone)]
struct LaggedValueState {
    lagged: ReferenceFrame,
    mean: Option<f64>,
}

impl Default for LaggedValuePersistence {
    fn default() -> Self {
        LaggedValuePersistence::new(Interval::days(7))
    }
}

impl LaggedValuePersistence {
    pub fn new(lag: Interval) -> Self {
        LaggedValuePersistence { lag, fitted: None }
    }

    pub fn lag(&self) -> Interval {
        self.lag
    }

    /// The fitted `(ds + lag, yhat)` series, sorted by the shifted `ds`.
    pub fn lagged_series(&self) -> Option<&RecordBatch> {
        self.fitted.as_ref().map(|state| state.lagged.batch())
    }
}

impl ForecastModel for LaggedValuePersistence {
    fn fit(&mut self, train: &RecordBatch) -> Result<()> {
        let timestamps = timestamp_nanos(train, TIMESTAMP_COLUMN)?;
        if timestamps.is_empty() {
            return Err(ForecastError::EmptyTrainingData);
        }
        let values = float_values(train, TARGET_COLUMN)?;

        let shifted = timestamps
            .into_iter()
            .map(|ts| {
                ts.checked_add(self.lag.nanos()).ok_or_else(|| {
                    ForecastError::Arrow(ArrowError::ArithmeticOverflow(format!(
                        "shifting {ts} by {} overflows",
                        self.lag
                    )))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let lagged = ReferenceFrame::new(shifted, values)?;
        let mean = lagged.mean();
        debug!(model = self.name(), rows = lagged.len(), lag = %self.lag, ?mean, "fit");
        self.fitted = Some(LaggedValueState { lagged, mean });
        Ok(())
    }

    fn predict(&self, query: &RecordBatch) -> Result<RecordBatch> {
        let state = self.fitted.as_ref().ok_or(ForecastError::NotFitted)?;
        let timestamps = timestamp_nanos(query, TIMESTAMP_COLUMN)?;
        // the join orders queries by timestamp itself; output keeps input order
        let joined = state.lagged.lookup(&timestamps, MatchRule::AtOrBefore)?;
        with_prediction(query, fill_nulls(&joined, state.mean))
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn name(&self) -> &str {
        "LaggedValuePersistence"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Date32Array, Float64Array};
    use arrow_schema::{DataType, Field, Schema};
    use chrono::NaiveDate;

    use super::*;
    use crate::frame::to_datetime;
    use crate::models::test_util::*;

    fn date_batch(dates: &[NaiveDate], values: Option<&[f64]>) -> RecordBatch {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
        let days: Vec<i32> = dates
            .iter()
            .map(|d| (*d - epoch).num_days() as i32)
            .collect();
        let mut fields = vec![Field::new("ds", DataType::Date32, false)];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Date32Array::from(days))];
        if let Some(values) = values {
            fields.push(Field::new("y", DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(values.to_vec())));
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .expect("Failed to create date RecordBatch")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_one_year_lag() {
        let train = date_batch(&[ymd(2019, 1, 1)], Some(&[5.0]));
        let mut model = LaggedValuePersistence::new("365d".parse().expect("lag"));
        model.fit(&train).expect("fit");

        let lagged = model.lagged_series().expect("fitted");
        let shifted = timestamp_nanos(lagged, "ds").expect("ds");
        assert_eq!(to_datetime(shifted[0]).date_naive(), ymd(2020, 1, 1));

        let query = date_batch(&[ymd(2020, 1, 1)], None);
        let out = model.predict(&query).expect("predict");
        assert_eq!(yhat(&out), vec![Some(5.0)]);
    }

    #[test]
    fn test_lagged_lookup_and_fallback() {
        let train = training_batch(&[0, 1, 2, 3], &[1.0, 2.0, 3.0, 6.0]);
        let mut model = LaggedValuePersistence::new(Interval::days(2));
        model.fit(&train).expect("fit");
        assert_eq!(model.lag(), Interval::days(2));

        // shifted to days 2..5; day 1 precedes them all
        let query = query_batch(&[5, 1, 2, 3, 9]);
        let out = model.predict(&query).expect("predict");
        assert_rows_preserved(&query, &out);
        assert_eq!(
            yhat(&out),
            vec![Some(6.0), Some(3.0), Some(1.0), Some(2.0), Some(6.0)]
        );
    }

    #[test]
    fn test_default_lag_is_seven_days() {
        let model = LaggedValuePersistence::default();
        assert_eq!(model.lag(), Interval::days(7));
        assert!(!model.is_fitted());
        assert!(matches!(
            model.predict(&query_batch(&[0])),
            Err(ForecastError::NotFitted)
        ));
    }

    #[test]
    fn test_empty_training_rejected() {
        let mut model = LaggedValuePersistence::default();
        assert!(matches!(
            model.fit(&training_batch(&[], &[])),
            Err(ForecastError::EmptyTrainingData)
        ));
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_missing_target_column() {
        let mut model = LaggedValuePersistence::default();
        let no_y = date_batch(&[ymd(2020, 1, 1)], None);
        assert!(matches!(
            model.fit(&no_y),
            Err(ForecastError::MissingColumn(c)) if c == "y"
        ));
    }
}
