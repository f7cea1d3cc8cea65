use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use arrow::array::{ArrayRef, AsArray, Int64Array, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::Float64Type;
use arrow_schema::{DataType, Field, Schema};
use tracing::info;

use crate::TableFunction;
use crate::frame::{PREDICTION_COLUMN, TARGET_COLUMN, TIMESTAMP_COLUMN, with_prediction};
use crate::interval::Interval;
use crate::models::ModelKind;
use crate::rolling::{Closed, RollingOptions, Window};
use crate::splitter::{WalkForwardConfig, split};
use rust_baseline_api::arg::{Arg, Args};

pub const FOLD_COLUMN: &str = "fold";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelName {
    #[default]
    LatestValue,
    SlidingWindow,
    LaggedValue,
}

impl FromStr for ModelName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "latest" | "latest_value" => Ok(ModelName::LatestValue),
            "sliding_window" | "window" => Ok(ModelName::SlidingWindow),
            "lagged" | "lagged_value" => Ok(ModelName::LaggedValue),
            _ => Err(anyhow!("Unknown model: {}", s)),
        }
    }
}

/// Walk-forward backtest of a persistence model.
///
/// Buffers the input, then for every walk-forward split fits a fresh model on
/// the train rows and emits the test rows with `yhat` and `fold` appended.
#[derive(Debug)]
pub struct BaselineBacktest {
    model: ModelKind,
    split_config: WalkForwardConfig,
    timestamp_column: String,
    target_column: String,
    data_buffer: Vec<RecordBatch>,
}

fn interval_arg(name: &str, arg: &Arg) -> Result<Option<Interval>> {
    let Some(text) = arg.as_text() else {
        return Err(anyhow!("Invalid type for {}. Expected interval.", name));
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    let interval = text
        .parse()
        .with_context(|| format!("Invalid {name}: {text}"))?;
    Ok(Some(interval))
}

fn string_arg(name: &str, arg: Arg) -> Result<String> {
    let Arg::String(s) = arg else {
        return Err(anyhow!("Invalid type for {}. Expected string.", name));
    };
    Ok(s)
}

impl BaselineBacktest {
    pub fn new(params: Option<Args>, named_arguments: Vec<(String, Arg)>) -> Result<Self> {
        if params.is_some_and(|params| params.iter().any(Arg::is_scalar)) {
            return Err(anyhow!("Too many positional parameters."));
        }

        let mut model_name = ModelName::default();
        let mut window: Option<Window> = None;
        let mut options = RollingOptions::default();
        let mut rolling_option_set = false;
        let mut lag: Option<Interval> = None;
        let mut split_config = WalkForwardConfig::default();
        let mut timestamp_column = TIMESTAMP_COLUMN.to_string();
        let mut target_column = TARGET_COLUMN.to_string();

        for (name, arg) in named_arguments {
            match name.as_str() {
                "model" => {
                    model_name = string_arg(&name, arg)?.parse()?;
                }
                "window" => {
                    window = Some(match arg {
                        Arg::Int(i) if i > 0 => Window::Rows(i as usize),
                        Arg::Int(_) => return Err(anyhow!("window must be a positive integer")),
                        other => match other.as_text() {
                            Some(text) => text
                                .parse()
                                .with_context(|| format!("Invalid window: {text}"))?,
                            None => {
                                return Err(anyhow!("window must be an integer or an interval"));
                            }
                        },
                    });
                }
                "min_periods" => {
                    let Arg::Int(i @ 0..) = arg else {
                        return Err(anyhow!("min_periods must be a non-negative integer"));
                    };
                    options.min_periods = Some(i as usize);
                    rolling_option_set = true;
                }
                "center" => {
                    let Arg::Bool(b) = arg else {
                        return Err(anyhow!("Invalid type for {}. Expected bool.", name));
                    };
                    options.center = b;
                    rolling_option_set = true;
                }
                "closed" => {
                    let closed: Closed = string_arg(&name, arg)?.parse()?;
                    options.closed = Some(closed);
                    rolling_option_set = true;
                }
                "lag" => {
                    lag = Some(
                        interval_arg(&name, &arg)?
                            .ok_or_else(|| anyhow!("lag must not be empty"))?,
                    );
                }
                "minimum_training_period" => {
                    split_config.minimum_training_period = interval_arg(&name, &arg)?;
                }
                "maximum_training_period" => {
                    split_config.maximum_training_period = interval_arg(&name, &arg)?;
                }
                "test_window" => {
                    split_config.test_window = interval_arg(&name, &arg)?;
                }
                "timestamp_column" => {
                    timestamp_column = string_arg(&name, arg)?;
                }
                "target_column" => {
                    target_column = string_arg(&name, arg)?;
                }
                _ => return Err(anyhow!("Unknown parameter: {}", name)),
            }
        }

        let model = match model_name {
            ModelName::LatestValue => {
                if window.is_some() || rolling_option_set || lag.is_some() {
                    return Err(anyhow!("model `latest` takes no window, rolling or lag options"));
                }
                ModelKind::LatestValue
            }
            ModelName::SlidingWindow => {
                if lag.is_some() {
                    return Err(anyhow!("lag only applies to model `lagged`"));
                }
                ModelKind::SlidingWindow {
                    window: window.unwrap_or_default(),
                    options,
                }
            }
            ModelName::LaggedValue => {
                if window.is_some() || rolling_option_set {
                    return Err(anyhow!("window options only apply to model `sliding_window`"));
                }
                ModelKind::LaggedValue {
                    lag: lag.unwrap_or(Interval::days(7)),
                }
            }
        };
        if timestamp_column == target_column {
            return Err(anyhow!(
                "timestamp_column and target_column must differ, both are `{}`",
                timestamp_column
            ));
        }
        split_config.timestamp_column = timestamp_column.clone();

        // fail fast on bad configuration, before any data arrives
        model.build().context("Invalid model configuration")?;
        split_config
            .validate()
            .context("Invalid walk-forward configuration")?;

        Ok(BaselineBacktest {
            model,
            split_config,
            timestamp_column,
            target_column,
            data_buffer: Vec::new(),
        })
    }

    fn input_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
        batch
            .column_by_name(name)
            .with_context(|| format!("Field not found: {}", name))
    }

    /// `(ds, y)` frame of a train split, built from the caller's columns
    /// whatever else the input carries.
    fn training_frame(&self, train: &RecordBatch) -> Result<RecordBatch> {
        let ts = Self::input_column(train, &self.timestamp_column)?;
        let y = Self::input_column(train, &self.target_column)?;
        RecordBatch::try_from_iter([
            (TIMESTAMP_COLUMN, Arc::clone(ts)),
            (TARGET_COLUMN, Arc::clone(y)),
        ])
        .context("Failed to create training RecordBatch")
    }

    /// Fits a fresh model on `train` and predicts `test`. The output is
    /// `test` unchanged with `yhat` and `fold` attached.
    fn predict_split(
        &self,
        fold: usize,
        train: &RecordBatch,
        test: &RecordBatch,
    ) -> Result<RecordBatch> {
        let mut model = self.model.build()?;
        model
            .fit(&self.training_frame(train)?)
            .with_context(|| format!("Failed to fit {} on fold {fold}", model.name()))?;

        let ts = Self::input_column(test, &self.timestamp_column)?;
        let query = RecordBatch::try_from_iter([(TIMESTAMP_COLUMN, Arc::clone(ts))])
            .context("Failed to create query RecordBatch")?;
        let predicted = model
            .predict(&query)
            .with_context(|| format!("Failed to predict fold {fold}"))?;
        // predictions keep the query's row order
        let yhat = Self::input_column(&predicted, PREDICTION_COLUMN)?
            .as_primitive::<Float64Type>()
            .clone();
        let predicted = with_prediction(test, yhat)?;

        let schema = predicted.schema();
        let mut fields = schema.fields().to_vec();
        fields.push(Arc::new(Field::new(FOLD_COLUMN, DataType::Int64, false)));
        let mut columns = predicted.columns().to_vec();
        let folds: ArrayRef = Arc::new(Int64Array::from(vec![fold as i64; predicted.num_rows()]));
        columns.push(folds);
        let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
        RecordBatch::try_new(Arc::new(schema), columns)
            .context("Failed to create output RecordBatch")
    }
}

impl TableFunction for BaselineBacktest {
    fn process(&mut self, input: RecordBatch) -> Result<Option<RecordBatch>> {
        // every split needs the whole series
        self.data_buffer.push(input);
        Ok(None)
    }

    fn finalize(&mut self) -> Result<Option<RecordBatch>> {
        if self.data_buffer.is_empty() {
            return Ok(None);
        }
        let schema = self.data_buffer[0].schema();
        let all = concat_batches(&schema, &self.data_buffer)
            .context("Failed to concatenate input batches")?;
        self.data_buffer.clear();
        if all.num_rows() == 0 {
            return Ok(None);
        }
        if schema.field_with_name(FOLD_COLUMN).is_ok() {
            return Err(anyhow!("Input already has a `{}` column", FOLD_COLUMN));
        }

        let mut outputs = Vec::new();
        for s in split(&all, &self.split_config)? {
            outputs.push(self.predict_split(s.fold, &s.train, &s.test)?);
        }

        info!(
            model = ?self.model,
            rows = all.num_rows(),
            folds = outputs.len(),
            "baseline backtest finished"
        );
        let Some(first) = outputs.first() else {
            return Ok(None);
        };
        let output = concat_batches(&first.schema(), &outputs)
            .context("Failed to concatenate fold outputs")?;
        Ok(Some(output))
    }
}
