//! Time series frame primitives on top of Arrow record batches.
//!
//! A frame is any [`RecordBatch`] with a timestamp column (`ds` by default)
//! and, for training, a numeric target column (`y`). Timestamps of every
//! supported Arrow type are brought onto one axis of `i64` nanoseconds since
//! the Unix epoch before they are compared.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Int64Array, RecordBatch, TimestampNanosecondArray,
    UInt32Array,
};
use arrow::compute::{SortColumn, cast, lexsort_to_indices, sort_to_indices, take_record_batch};
use arrow::datatypes::{
    Date32Type, Date64Type, Float64Type, Int64Type, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::error::ArrowError;
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Utc};

use crate::error::{ForecastError, Result};

pub const TIMESTAMP_COLUMN: &str = "ds";
pub const TARGET_COLUMN: &str = "y";
pub const PREDICTION_COLUMN: &str = "yhat";

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_DAY: i64 = 86_400 * NANOS_PER_SECOND;

/// Which reference rows a query timestamp may match in a backward as-of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Reference timestamp `<` query timestamp.
    StrictlyBefore,
    /// Reference timestamp `<=` query timestamp.
    AtOrBefore,
}

impl MatchRule {
    fn admits(self, reference: i64, query: i64) -> bool {
        match self {
            MatchRule::StrictlyBefore => reference < query,
            MatchRule::AtOrBefore => reference <= query,
        }
    }
}

pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ForecastError::MissingColumn(name.to_string()))
}

fn scale(values: impl Iterator<Item = i64>, factor: i64, name: &str) -> Result<Vec<i64>> {
    values
        .map(|v| {
            v.checked_mul(factor).ok_or_else(|| {
                ForecastError::Arrow(ArrowError::ArithmeticOverflow(format!(
                    "timestamp {v} in column `{name}` overflows nanoseconds"
                )))
            })
        })
        .collect()
}

/// Reads a timestamp column as nanoseconds since the epoch.
///
/// Accepts `Timestamp` of any unit and time zone, `Date32`, `Date64` and raw
/// `Int64` nanoseconds. Nulls are rejected.
pub fn timestamp_nanos(batch: &RecordBatch, name: &str) -> Result<Vec<i64>> {
    let array = column(batch, name)?;
    if array.null_count() > 0 {
        return Err(ForecastError::NullTimestamp(name.to_string()));
    }
    let nanos = match array.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => scale(
            array.as_primitive::<TimestampSecondType>().values().iter().copied(),
            NANOS_PER_SECOND,
            name,
        )?,
        DataType::Timestamp(TimeUnit::Millisecond, _) => scale(
            array.as_primitive::<TimestampMillisecondType>().values().iter().copied(),
            NANOS_PER_MILLI,
            name,
        )?,
        DataType::Timestamp(TimeUnit::Microsecond, _) => scale(
            array.as_primitive::<TimestampMicrosecondType>().values().iter().copied(),
            NANOS_PER_MICRO,
            name,
        )?,
        DataType::Timestamp(TimeUnit::Nanosecond, _) => array
            .as_primitive::<TimestampNanosecondType>()
            .values()
            .to_vec(),
        DataType::Date32 => scale(
            array.as_primitive::<Date32Type>().values().iter().map(|&d| i64::from(d)),
            NANOS_PER_DAY,
            name,
        )?,
        DataType::Date64 => scale(
            array.as_primitive::<Date64Type>().values().iter().copied(),
            NANOS_PER_MILLI,
            name,
        )?,
        DataType::Int64 => array.as_primitive::<Int64Type>().values().to_vec(),
        other => {
            return Err(ForecastError::UnsupportedTimestampType {
                column: name.to_string(),
                data_type: other.clone(),
            });
        }
    };
    Ok(nanos)
}

/// Reads a numeric column as `f64`. Nulls and NaNs both come back as `None`.
pub fn float_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let array = column(batch, name)?;
    let array = match array.data_type() {
        DataType::Float64 => Arc::clone(array),
        dt if dt.is_numeric() || dt == &DataType::Null => cast(array, &DataType::Float64)?,
        _ => return Err(ForecastError::NonNumericColumn(name.to_string())),
    };
    Ok(array
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Arrow take indices are `u32`; longer inputs cannot be reordered.
fn check_take_len(len: usize) -> Result<()> {
    match u32::try_from(len.saturating_sub(1)) {
        Ok(_) => Ok(()),
        Err(_) => Err(ForecastError::Arrow(ArrowError::InvalidArgumentError(format!(
            "cannot order {len} rows with u32 take indices"
        )))),
    }
}

/// Stable ascending order of `timestamps`; ties keep their input order.
pub fn stable_order(timestamps: &[i64]) -> Result<UInt32Array> {
    check_take_len(timestamps.len())?;
    let positions: ArrayRef = Arc::new(UInt32Array::from_iter_values(
        (0..timestamps.len()).map(|i| i as u32),
    ));
    let keys: ArrayRef = Arc::new(Int64Array::from(timestamps.to_vec()));
    let indices = lexsort_to_indices(
        &[
            SortColumn {
                values: keys,
                options: None,
            },
            SortColumn {
                values: positions,
                options: None,
            },
        ],
        None,
    )?;
    Ok(indices)
}

/// Sorts `batch` by its timestamp column and returns it with the sorted
/// nanosecond timestamps.
pub fn sort_by_timestamp(batch: &RecordBatch, name: &str) -> Result<(RecordBatch, Vec<i64>)> {
    let timestamps = timestamp_nanos(batch, name)?;
    let order = stable_order(&timestamps)?;
    let sorted = take_record_batch(batch, &order)?;
    let timestamps = order
        .values()
        .iter()
        .map(|&i| timestamps[i as usize])
        .collect();
    Ok((sorted, timestamps))
}

/// Rows of a timestamp-sorted batch with `start <= ts < end`, as a zero-copy
/// slice.
pub fn slice_range(sorted: &RecordBatch, timestamps: &[i64], start: i64, end: i64) -> RecordBatch {
    let lo = timestamps.partition_point(|&t| t < start);
    let hi = timestamps.partition_point(|&t| t < end).max(lo);
    sorted.slice(lo, hi - lo)
}

/// Backward as-of join: for each query timestamp, the position in
/// `reference` (sorted ascending) of the latest row admitted by `rule`.
///
/// Several queries may resolve to the same reference row; each query
/// resolves to at most one. Among equal reference timestamps the last one
/// wins.
pub fn asof_backward(
    query: &[i64],
    reference: &[i64],
    rule: MatchRule,
) -> Result<Vec<Option<usize>>> {
    debug_assert!(reference.windows(2).all(|w| w[0] <= w[1]));
    let mut matches = vec![None; query.len()];
    // the sweep needs ascending queries; results are scattered back by position
    let keys = Int64Array::from(query.to_vec());
    let order = sort_to_indices(&keys, None, None)?;
    let mut next = 0;
    for &pos in order.values().iter() {
        let q = query[pos as usize];
        while next < reference.len() && rule.admits(reference[next], q) {
            next += 1;
        }
        matches[pos as usize] = next.checked_sub(1);
    }
    Ok(matches)
}

/// Replaces nulls in `values` with `fallback`.
pub fn fill_nulls(values: &Float64Array, fallback: Option<f64>) -> Float64Array {
    values.iter().map(|v| v.or(fallback)).collect()
}

/// Mean of the non-null values, `None` when there are none.
pub fn mean(values: &Float64Array) -> Option<f64> {
    let count = values.len() - values.null_count();
    if count == 0 {
        return None;
    }
    arrow::compute::sum(values).map(|total| total / count as f64)
}

/// Returns `batch` with `yhat` appended, or replaced in place when the batch
/// already carries one. All other columns and the row order are untouched.
pub fn with_prediction(batch: &RecordBatch, yhat: Float64Array) -> Result<RecordBatch> {
    let schema = batch.schema();
    let field = Arc::new(Field::new(PREDICTION_COLUMN, DataType::Float64, true));
    let values: ArrayRef = Arc::new(yhat);
    let mut fields = schema.fields().to_vec();
    let mut columns = batch.columns().to_vec();
    match schema.index_of(PREDICTION_COLUMN) {
        Ok(idx) => {
            fields[idx] = field;
            columns[idx] = values;
        }
        Err(_) => {
            fields.push(field);
            columns.push(values);
        }
    }
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Renames column `from` to `to`, keeping data, type and metadata.
pub fn rename_column(batch: &RecordBatch, from: &str, to: &str) -> Result<RecordBatch> {
    if from == to {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let idx = schema
        .index_of(from)
        .map_err(|_| ForecastError::MissingColumn(from.to_string()))?;
    if schema.index_of(to).is_ok() {
        return Err(ForecastError::InvalidConfiguration(format!(
            "cannot rename `{from}` to `{to}`: column `{to}` already exists"
        )));
    }
    let mut fields = schema.fields().to_vec();
    fields[idx] = Arc::new(fields[idx].as_ref().clone().with_name(to));
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(schema, batch.columns().to_vec())?)
}

/// The memorised `(ds, yhat)` side of a persistence model, sorted by `ds`.
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    batch: RecordBatch,
    timestamps: Vec<i64>,
}

impl ReferenceFrame {
    pub fn new(timestamps: Vec<i64>, values: Vec<Option<f64>>) -> Result<Self> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIMESTAMP_COLUMN, DataType::Timestamp(TimeUnit::Nanosecond, None), false),
            Field::new(PREDICTION_COLUMN, DataType::Float64, true),
        ]));
        let unsorted = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(TimestampNanosecondArray::from(timestamps)),
                Arc::new(Float64Array::from(values)),
            ],
        )?;
        let (batch, timestamps) = sort_by_timestamp(&unsorted, TIMESTAMP_COLUMN)?;
        Ok(ReferenceFrame { batch, timestamps })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn values(&self) -> &Float64Array {
        self.batch.column(1).as_primitive::<Float64Type>()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        mean(self.values())
    }

    /// Joined `yhat` for each query timestamp, null where nothing matched.
    pub fn lookup(&self, query: &[i64], rule: MatchRule) -> Result<Float64Array> {
        let values = self.values();
        let matches = asof_backward(query, &self.timestamps, rule)?;
        Ok(matches
            .into_iter()
            .map(|m| m.and_then(|i| values.is_valid(i).then(|| values.value(i))))
            .collect())
    }
}

pub fn to_datetime(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}
