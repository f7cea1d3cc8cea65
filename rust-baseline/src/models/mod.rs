//! Persistence models: forecasting baselines that memorise history.
//!
//! Every model follows a `fit`/`predict` contract on time-stamped frames.
//! `fit` takes columns `ds` and `y`; `predict` takes `ds` and returns the
//! query frame, same rows in the same order, with a `yhat` column added.
//!
//! The three models share the backward as-of join but differ in how
//! exact timestamp matches and unmatched rows are handled:
//!
//! | model                      | match      | fallback                    |
//! |----------------------------|------------|-----------------------------|
//! | [`LatestValuePersistence`] | `ds < q`   | value at latest training ds |
//! | [`SlidingWindowPersistence`] | `ds <= q` | mean of the rolling means  |
//! | [`LaggedValuePersistence`] | `ds <= q`  | mean of the shifted values  |

use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::interval::Interval;
use crate::rolling::{RollingOptions, Window};

pub mod lagged;
pub mod latest;
pub mod sliding_window;

pub use lagged::LaggedValuePersistence;
pub use latest::LatestValuePersistence;
pub use sliding_window::SlidingWindowPersistence;

pub trait ForecastModel {
    /// Memorises `train`, replacing any earlier fit. A failed fit leaves the
    /// previous state in place.
    fn fit(&mut self, train: &RecordBatch) -> Result<()>;

    /// Returns `query` with a `yhat` column. Fails with
    /// [`ForecastError::NotFitted`](crate::error::ForecastError::NotFitted)
    /// before the first successful `fit`.
    fn predict(&self, query: &RecordBatch) -> Result<RecordBatch>;

    fn is_fitted(&self) -> bool;

    fn name(&self) -> &str;
}

pub type BoxedModel = Box<dyn ForecastModel>;

/// A model choice together with its constructor parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ModelKind {
    #[default]
    LatestValue,
    SlidingWindow {
        window: Window,
        options: RollingOptions,
    },
    LaggedValue {
        lag: Interval,
    },
}

impl ModelKind {
    /// A fresh, unfitted model.
    pub fn build(&self) -> Result<BoxedModel> {
        Ok(match self {
            ModelKind::LatestValue => Box::new(LatestValuePersistence::new()),
            ModelKind::SlidingWindow { window, options } => {
                Box::new(SlidingWindowPersistence::new(*window, *options)?)
            }
            ModelKind::LaggedValue { lag } => Box::new(LaggedValuePersistence::new(*lag)),
        })
    }
}
