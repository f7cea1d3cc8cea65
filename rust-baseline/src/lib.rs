//! Persistence baselines for time series forecasting.
//!
//! Three naive models that repeat recent history ([`LatestValuePersistence`],
//! [`SlidingWindowPersistence`], [`LaggedValuePersistence`]), a walk-forward
//! [`split`] for evaluating them, and the `baseline_backtest` table function
//! that wires both into a host query engine.

use std::sync::Arc;

use anyhow::Context;
use rust_baseline_api::{FunctionRegistry, Signature, TableFunction, arg::ArgType};

use crate::funcs::*;

pub mod error;
pub mod frame;
pub mod funcs;
pub mod interval;
pub mod models;
pub mod rolling;
pub mod splitter;

pub use error::{ForecastError, Result};
pub use interval::Interval;
pub use models::{
    BoxedModel, ForecastModel, LaggedValuePersistence, LatestValuePersistence, ModelKind,
    SlidingWindowPersistence,
};
pub use rolling::{Closed, RollingOptions, Window};
pub use splitter::{Split, WalkForwardConfig, WalkForwardSplits, split};

pub fn get_function_registries() -> anyhow::Result<Vec<FunctionRegistry>> {
    Ok(vec![
        FunctionRegistry::builder()
            .name("baseline_backtest")
            .init(Arc::new(|ctx| {
                BaselineBacktest::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(Signature::empty())
            .signature(vec![ArgType::Column])
            .build()
            .context("create `baseline_backtest` registry failed")?,
    ])
}
