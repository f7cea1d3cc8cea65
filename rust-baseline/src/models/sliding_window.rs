use arrow::record_batch::RecordBatch;
use tracing::debug;

use super::ForecastModel;
use crate::error::{ForecastError, Result};
use crate::frame::{
    MatchRule, ReferenceFrame, TARGET_COLUMN, TIMESTAMP_COLUMN, fill_nulls, float_values,
    stable_order, timestamp_nanos, with_prediction,
};
use crate::rolling::{self, RollingOptions, Window};

/// Predicts each timestamp with the mean of a window of history ending at or
/// before it.
///
/// A smoothed [`LatestValuePersistence`](super::LatestValuePersistence). The
/// window is either a number of observations or a span of time, in which
/// case the number of observations inside it varies. Queries with no
/// defined rolling mean at or before them get the mean of all rolling means.
#[derive(Debug, Clone)]
pub struct SlidingWindowPersistence {
    window: Window,
    options: RollingOptions,
    fitted: Option<SlidingWindowState>,
}

#[derive(Debug, Clone)]
struct SlidingWindowState {
    rolling: ReferenceFrame,
    level: Option<f64>,
}

impl Default for SlidingWindowPersistence {
    fn default() -> Self {
        SlidingWindowPersistence {
            window: Window::default(),
            options: RollingOptions::default(),
            fitted: None,
        }
    }
}

impl SlidingWindowPersistence {
    pub fn new(window: impl Into<Window>, options: RollingOptions) -> Result<Self> {
        let window = window.into();
        rolling::validate(window, &options)?;
        Ok(SlidingWindowPersistence {
            window,
            options,
            fitted: None,
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// The fitted `(ds, yhat)` rolling-mean series, sorted by `ds`.
    pub fn rolling_means(&self) -> Option<&RecordBatch> {
        self.fitted.as_ref().map(|state| state.rolling.batch())
    }
}

impl ForecastModel for SlidingWindowPersistence {
    fn fit(&mut self, train: &RecordBatch) -> Result<()> {
        let timestamps = timestamp_nanos(train, TIMESTAMP_COLUMN)?;
        if timestamps.is_empty() {
            return Err(ForecastError::EmptyTrainingData);
        }
        let values = float_values(train, TARGET_COLUMN)?;

        let order = stable_order(&timestamps)?;
        let (timestamps, values): (Vec<i64>, Vec<Option<f64>>) = order
            .values()
            .iter()
            .map(|&i| (timestamps[i as usize], values[i as usize]))
            .unzip();
        let means = rolling::rolling_mean(&timestamps, &values, self.window, &self.options)?;

        let rolling = ReferenceFrame::new(timestamps, means)?;
        let level = rolling.mean();
        debug!(model = self.name(), rows = rolling.len(), window = %self.window, ?level, "fit");
        self.fitted = Some(SlidingWindowState { rolling, level });
        Ok(())
    }

    fn predict(&self, query: &RecordBatch) -> Result<RecordBatch> {
        let state = self.fitted.as_ref().ok_or(ForecastError::NotFitted)?;
        let timestamps = timestamp_nanos(query, TIMESTAMP_COLUMN)?;
        // a query exactly on a training timestamp takes that timestamp's mean
        let joined = state.rolling.lookup(&timestamps, MatchRule::AtOrBefore)?;
        with_prediction(query, fill_nulls(&joined, state.level))
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn name(&self) -> &str {
        "SlidingWindowPersistence"
    }
}
