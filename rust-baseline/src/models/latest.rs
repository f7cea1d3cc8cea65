use arrow::record_batch::RecordBatch;
use tracing::debug;

use super::ForecastModel;
use crate::error::{ForecastError, Result};
use crate::frame::{
    MatchRule, ReferenceFrame, TARGET_COLUMN, TIMESTAMP_COLUMN, fill_nulls, float_values,
    timestamp_nanos, with_prediction,
};

/// Predicts each timestamp with the latest training value observed strictly
/// before it.
///
/// Useful when the forecast horizon is short and the history is dense.
/// Queries that precede all training data get the value at the latest
/// training timestamp.
#[derive(Debug, Clone, Default)]
pub struct LatestValuePersistence {
    fitted: Option<LatestValueState>,
}

#[derive(Debug, Clone)]
struct LatestValueState {
    history: ReferenceFrame,
    latest_value: Option<f64>,
}

impl LatestValuePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The training value at the maximum training timestamp, once fitted.
    pub fn latest_value(&self) -> Option<f64> {
        self.fitted.as_ref().and_then(|state| state.latest_value)
    }
}

impl ForecastModel for LatestValuePersistence {
    fn fit(&mut self, train: &RecordBatch) -> Result<()> {
        let timestamps = timestamp_nanos(train, TIMESTAMP_COLUMN)?;
        let values = float_values(train, TARGET_COLUMN)?;

        // first row holding the maximum timestamp
        let mut latest: Option<(i64, usize)> = None;
        for (row, &ts) in timestamps.iter().enumerate() {
            if latest.is_none_or(|(max, _)| ts > max) {
                latest = Some((ts, row));
            }
        }
        let Some((_, latest_row)) = latest else {
            return Err(ForecastError::EmptyTrainingData);
        };
        let latest_value = values[latest_row];

        let history = ReferenceFrame::new(timestamps, values)?;
        debug!(model = self.name(), rows = history.len(), ?latest_value, "fit");
        self.fitted = Some(LatestValueState {
            history,
            latest_value,
        });
        Ok(())
    }

    fn predict(&self, query: &RecordBatch) -> Result<RecordBatch> {
        let state = self.fitted.as_ref().ok_or(ForecastError::NotFitted)?;
        let timestamps = timestamp_nanos(query, TIMESTAMP_COLUMN)?;
        // an observation at exactly the query timestamp is not used
        let joined = state
            .history
            .lookup(&timestamps, MatchRule::StrictlyBefore)?;
        with_prediction(query, fill_nulls(&joined, state.latest_value))
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn name(&self) -> &str {
        "LatestValuePersistence"
    }
}
