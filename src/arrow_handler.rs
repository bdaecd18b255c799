//! Arrow ingestion: one record batch set per named table, converted into
//! the role-typed column layout (and back, for persistence).
//!
//! Type mapping:
//! - all integer widths, floats and bool become f64 (NaN where null) or
//!   strings (literal "NULL" where null), depending on the declared role;
//! - utf8 / large_utf8 / binary / large_binary / fixed-size-binary become
//!   strings, or parsed floats for float roles;
//! - dictionary(int32, utf8) is resolved through its values;
//! - the null type becomes NaN / "NULL";
//! - timestamp(s/ms/µs/ns), time32, time64, date32, date64 and duration
//!   become float seconds since the Unix epoch.
//!
//! Anything else raises [`Error::UnsupportedArrowType`].

use crate::containers::{Column, DataFrame, Encoding};
use crate::error::{Error, Result};
use crate::schema::Schema;
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array,
    DurationMicrosecondArray, DurationMillisecondArray, DurationNanosecondArray,
    DurationSecondArray, FixedSizeBinaryArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeBinaryArray, LargeStringArray, RecordBatch,
    StringArray, Time32MillisecondArray, Time32SecondArray, Time64MicrosecondArray,
    Time64NanosecondArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::datatypes::{DataType, Field, Int32Type, TimeUnit};
use std::sync::Arc;

/// Converts between Arrow record batches and role-typed DataFrames. Owns
/// the process-wide string encodings: append-only while ingesting fit data,
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct ArrowHandler {
    categories: Encoding,
    join_keys_encoding: Encoding,
}

impl ArrowHandler {
    pub fn new() -> Self {
        ArrowHandler::default()
    }

    pub fn categories(&self) -> &Encoding {
        &self.categories
    }

    pub fn join_keys_encoding(&self) -> &Encoding {
        &self.join_keys_encoding
    }

    /// Converts record batches into a DataFrame laid out per `schema`.
    /// Missing non-target columns are an error; missing targets are
    /// tolerated (transform-time data has none); extra columns are ignored.
    pub fn to_dataframe(&mut self, schema: &Schema, batches: &[RecordBatch]) -> Result<DataFrame> {
        let mut df = DataFrame::new(&schema.name);

        for name in &schema.join_keys {
            let strings = self.required_strings(batches, name)?;
            let encoded: Vec<i64> = strings
                .iter()
                .map(|s| self.join_keys_encoding.insert(s))
                .collect();
            df.push_join_key(Column::with_unit(name, schema.unit(name), encoded))?;
        }
        for name in &schema.categoricals {
            let strings = self.required_strings(batches, name)?;
            let encoded: Vec<i64> = strings.iter().map(|s| self.categories.insert(s)).collect();
            df.push_categorical(Column::with_unit(name, schema.unit(name), encoded))?;
        }
        for name in &schema.discretes {
            let floats = required_floats(batches, name)?;
            df.push_discrete(Column::with_unit(name, schema.unit(name), floats))?;
        }
        for name in &schema.numericals {
            let floats = required_floats(batches, name)?;
            df.push_numerical(Column::with_unit(name, schema.unit(name), floats))?;
        }
        for name in &schema.time_stamps {
            let floats = required_floats(batches, name)?;
            df.push_time_stamp(Column::with_unit(name, schema.unit(name), floats))?;
        }
        for name in &schema.text {
            let strings = self.required_strings(batches, name)?;
            df.push_text(Column::with_unit(name, schema.unit(name), strings))?;
        }
        for name in &schema.targets {
            if find_column(batches, name).is_some() {
                let floats = required_floats(batches, name)?;
                df.push_target(Column::with_unit(name, schema.unit(name), floats))?;
            }
        }

        Ok(df)
    }

    /// Converts a DataFrame back into one record batch. Categoricals and
    /// join keys are decoded to strings; time stamps are written as
    /// nanosecond timestamps.
    pub fn to_record_batch(&self, df: &DataFrame) -> Result<RecordBatch> {
        let mut fields: Vec<Field> = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for col in df.join_keys() {
            fields.push(Field::new(col.name(), DataType::Utf8, false));
            arrays.push(decode_strings(col, &self.join_keys_encoding));
        }
        for col in df.categoricals() {
            fields.push(Field::new(col.name(), DataType::Utf8, false));
            arrays.push(decode_strings(col, &self.categories));
        }
        for col in df.discretes().iter().chain(df.numericals()).chain(df.targets()) {
            fields.push(Field::new(col.name(), DataType::Float64, true));
            arrays.push(float_array(col));
        }
        for col in df.time_stamps() {
            fields.push(Field::new(
                col.name(),
                DataType::Timestamp(TimeUnit::Nanosecond, None),
                true,
            ));
            let values: TimestampNanosecondArray = col
                .iter()
                .map(|&v| {
                    if v.is_nan() {
                        None
                    } else {
                        Some((v * 1e9) as i64)
                    }
                })
                .collect();
            arrays.push(Arc::new(values));
        }
        for col in df.text() {
            fields.push(Field::new(col.name(), DataType::Utf8, false));
            let values: StringArray = col.iter().map(|s| Some(s.as_str())).collect();
            arrays.push(Arc::new(values));
        }

        let schema = Arc::new(arrow::datatypes::Schema::new(fields));
        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    fn required_strings(&self, batches: &[RecordBatch], name: &str) -> Result<Vec<String>> {
        let (field, arrays) = find_column(batches, name).ok_or_else(|| Error::MissingColumn {
            name: name.to_string(),
        })?;
        let mut out = Vec::new();
        for array in arrays {
            out.extend(to_strings(&field, &array)?);
        }
        Ok(out)
    }
}

fn required_floats(batches: &[RecordBatch], name: &str) -> Result<Vec<f64>> {
    let (field, arrays) = find_column(batches, name).ok_or_else(|| Error::MissingColumn {
        name: name.to_string(),
    })?;
    let mut out = Vec::new();
    for array in arrays {
        out.extend(to_floats(&field, &array)?);
    }
    Ok(out)
}

fn find_column(batches: &[RecordBatch], name: &str) -> Option<(Field, Vec<ArrayRef>)> {
    let first = batches.first()?;
    let (ix, field) = first.schema().column_with_name(name).map(|(ix, f)| (ix, f.clone()))?;
    let arrays = batches.iter().map(|b| b.column(ix).clone()).collect();
    Some((field, arrays))
}

fn decode_strings(col: &Column<i64>, encoding: &Encoding) -> ArrayRef {
    let values: StringArray = col.iter().map(|&ix| Some(encoding.value(ix))).collect();
    Arc::new(values)
}

fn float_array(col: &Column<f64>) -> ArrayRef {
    let values: Float64Array = col
        .iter()
        .map(|&v| if v.is_nan() { None } else { Some(v) })
        .collect();
    Arc::new(values)
}

fn unsupported(field: &Field) -> Error {
    Error::UnsupportedArrowType {
        field: field.name().clone(),
        type_name: format!("{:?}", field.data_type()),
    }
}

macro_rules! numeric_to_floats {
    ($array:expr, $ty:ty) => {{
        let typed = $array.as_any().downcast_ref::<$ty>().expect("checked type");
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    f64::NAN
                } else {
                    typed.value(i) as f64
                }
            })
            .collect()
    }};
}

macro_rules! scaled_to_floats {
    ($array:expr, $ty:ty, $scale:expr) => {{
        let typed = $array.as_any().downcast_ref::<$ty>().expect("checked type");
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    f64::NAN
                } else {
                    typed.value(i) as f64 * $scale
                }
            })
            .collect()
    }};
}

/// One Arrow column as float seconds / plain floats, NaN where null.
fn to_floats(field: &Field, array: &ArrayRef) -> Result<Vec<f64>> {
    let result: Vec<f64> = match field.data_type() {
        DataType::Int8 => numeric_to_floats!(array, Int8Array),
        DataType::Int16 => numeric_to_floats!(array, Int16Array),
        DataType::Int32 => numeric_to_floats!(array, Int32Array),
        DataType::Int64 => numeric_to_floats!(array, Int64Array),
        DataType::UInt8 => numeric_to_floats!(array, UInt8Array),
        DataType::UInt16 => numeric_to_floats!(array, UInt16Array),
        DataType::UInt32 => numeric_to_floats!(array, UInt32Array),
        DataType::UInt64 => numeric_to_floats!(array, UInt64Array),
        DataType::Float32 => numeric_to_floats!(array, Float32Array),
        DataType::Float64 => numeric_to_floats!(array, Float64Array),
        DataType::Boolean => {
            let typed = array.as_any().downcast_ref::<BooleanArray>().expect("checked type");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        f64::NAN
                    } else if typed.value(i) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect()
        }
        DataType::Null => vec![f64::NAN; array.len()],
        DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Binary
        | DataType::LargeBinary
        | DataType::FixedSizeBinary(_)
        | DataType::Dictionary(_, _) => to_strings(field, array)?
            .iter()
            .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
            .collect(),
        DataType::Timestamp(TimeUnit::Second, _) => {
            numeric_to_floats!(array, TimestampSecondArray)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            scaled_to_floats!(array, TimestampMillisecondArray, 1e-3)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            scaled_to_floats!(array, TimestampMicrosecondArray, 1e-6)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            scaled_to_floats!(array, TimestampNanosecondArray, 1e-9)
        }
        DataType::Time32(TimeUnit::Second) => numeric_to_floats!(array, Time32SecondArray),
        DataType::Time32(TimeUnit::Millisecond) => {
            scaled_to_floats!(array, Time32MillisecondArray, 1e-3)
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            scaled_to_floats!(array, Time64MicrosecondArray, 1e-6)
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            scaled_to_floats!(array, Time64NanosecondArray, 1e-9)
        }
        DataType::Date32 => scaled_to_floats!(array, Date32Array, 86_400.0),
        DataType::Date64 => scaled_to_floats!(array, Date64Array, 1e-3),
        DataType::Duration(TimeUnit::Second) => numeric_to_floats!(array, DurationSecondArray),
        DataType::Duration(TimeUnit::Millisecond) => {
            scaled_to_floats!(array, DurationMillisecondArray, 1e-3)
        }
        DataType::Duration(TimeUnit::Microsecond) => {
            scaled_to_floats!(array, DurationMicrosecondArray, 1e-6)
        }
        DataType::Duration(TimeUnit::Nanosecond) => {
            scaled_to_floats!(array, DurationNanosecondArray, 1e-9)
        }
        _ => return Err(unsupported(field)),
    };
    Ok(result)
}

macro_rules! numeric_to_strings {
    ($array:expr, $ty:ty) => {{
        let typed = $array.as_any().downcast_ref::<$ty>().expect("checked type");
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    "NULL".to_string()
                } else {
                    typed.value(i).to_string()
                }
            })
            .collect()
    }};
}

/// One Arrow column as strings, literal "NULL" where null.
fn to_strings(field: &Field, array: &ArrayRef) -> Result<Vec<String>> {
    let result: Vec<String> = match field.data_type() {
        DataType::Utf8 => numeric_to_strings!(array, StringArray),
        DataType::LargeUtf8 => numeric_to_strings!(array, LargeStringArray),
        DataType::Binary => {
            let typed = array.as_any().downcast_ref::<BinaryArray>().expect("checked type");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        "NULL".to_string()
                    } else {
                        String::from_utf8_lossy(typed.value(i)).into_owned()
                    }
                })
                .collect()
        }
        DataType::LargeBinary => {
            let typed = array
                .as_any()
                .downcast_ref::<LargeBinaryArray>()
                .expect("checked type");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        "NULL".to_string()
                    } else {
                        String::from_utf8_lossy(typed.value(i)).into_owned()
                    }
                })
                .collect()
        }
        DataType::FixedSizeBinary(_) => {
            let typed = array
                .as_any()
                .downcast_ref::<FixedSizeBinaryArray>()
                .expect("checked type");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        "NULL".to_string()
                    } else {
                        String::from_utf8_lossy(typed.value(i)).into_owned()
                    }
                })
                .collect()
        }
        DataType::Dictionary(key, value)
            if **key == DataType::Int32 && **value == DataType::Utf8 =>
        {
            let typed = array
                .as_any()
                .downcast_ref::<arrow::array::DictionaryArray<Int32Type>>()
                .expect("checked type");
            let values = typed
                .values()
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("utf8 dictionary values");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        "NULL".to_string()
                    } else {
                        values.value(typed.keys().value(i) as usize).to_string()
                    }
                })
                .collect()
        }
        DataType::Null => vec!["NULL".to_string(); array.len()],
        DataType::Int8 => numeric_to_strings!(array, Int8Array),
        DataType::Int16 => numeric_to_strings!(array, Int16Array),
        DataType::Int32 => numeric_to_strings!(array, Int32Array),
        DataType::Int64 => numeric_to_strings!(array, Int64Array),
        DataType::UInt8 => numeric_to_strings!(array, UInt8Array),
        DataType::UInt16 => numeric_to_strings!(array, UInt16Array),
        DataType::UInt32 => numeric_to_strings!(array, UInt32Array),
        DataType::UInt64 => numeric_to_strings!(array, UInt64Array),
        DataType::Float32 => numeric_to_strings!(array, Float32Array),
        DataType::Float64 => numeric_to_strings!(array, Float64Array),
        DataType::Boolean => {
            let typed = array.as_any().downcast_ref::<BooleanArray>().expect("checked type");
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        "NULL".to_string()
                    } else {
                        typed.value(i).to_string()
                    }
                })
                .collect()
        }
        _ => return Err(unsupported(field)),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(fields: Vec<Field>, arrays: Vec<ArrayRef>) -> RecordBatch {
        let schema = Arc::new(arrow::datatypes::Schema::new(fields));
        RecordBatch::try_new(schema, arrays).expect("batch")
    }

    #[test]
    fn test_ingest_roles() {
        let fields = vec![
            Field::new("customer", DataType::Utf8, false),
            Field::new("amount", DataType::Int32, true),
            Field::new("when", DataType::Timestamp(TimeUnit::Millisecond, None), true),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["a", "b", "a"])),
            Arc::new(Int32Array::from(vec![Some(10), None, Some(30)])),
            Arc::new(TimestampMillisecondArray::from(vec![
                Some(1_000),
                Some(2_000),
                None,
            ])),
        ];

        let mut schema = Schema::new("orders");
        schema.join_keys.push("customer".to_string());
        schema.numericals.push("amount".to_string());
        schema.time_stamps.push("when".to_string());

        let mut handler = ArrowHandler::new();
        let df = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .expect("convert");

        assert_eq!(df.nrows(), 3);
        // Same string, same id.
        assert_eq!(df.join_keys()[0].get(0), df.join_keys()[0].get(2));
        assert_ne!(df.join_keys()[0].get(0), df.join_keys()[0].get(1));
        assert_eq!(df.numericals()[0].get(0), 10.0);
        assert!(df.numericals()[0].get(1).is_nan());
        // Milliseconds scaled to seconds.
        assert_eq!(df.time_stamp(0), 1.0);
        assert!(df.time_stamp(2).is_nan());
    }

    #[test]
    fn test_bool_and_date_mapping() {
        let fields = vec![
            Field::new("flag", DataType::Boolean, true),
            Field::new("day", DataType::Date32, false),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(BooleanArray::from(vec![Some(true), Some(false), None])),
            Arc::new(Date32Array::from(vec![1, 2, 3])),
        ];

        let mut schema = Schema::new("t");
        schema.numericals.push("flag".to_string());
        schema.time_stamps.push("day".to_string());

        let mut handler = ArrowHandler::new();
        let df = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .expect("convert");
        assert_eq!(df.numericals()[0].get(0), 1.0);
        assert_eq!(df.numericals()[0].get(1), 0.0);
        assert!(df.numericals()[0].get(2).is_nan());
        assert_eq!(df.time_stamp(0), 86_400.0);
    }

    #[test]
    fn test_null_column_and_dictionary() {
        let dict: arrow::array::DictionaryArray<Int32Type> =
            vec![Some("x"), None, Some("y")].into_iter().collect();
        let fields = vec![
            Field::new("nothing", DataType::Null, true),
            Field::new("plan", dict.data_type().clone(), true),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(arrow::array::NullArray::new(3)),
            Arc::new(dict),
        ];

        let mut schema = Schema::new("t");
        schema.numericals.push("nothing".to_string());
        schema.categoricals.push("plan".to_string());

        let mut handler = ArrowHandler::new();
        let df = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .expect("convert");
        assert!(df.numericals()[0].get(0).is_nan());
        assert_eq!(handler.categories().get("x"), df.categoricals()[0].get(0));
        assert_eq!(handler.categories().get("NULL"), df.categoricals()[0].get(1));
    }

    #[test]
    fn test_unsupported_type() {
        let fields = vec![Field::new(
            "xs",
            DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
            true,
        )];
        let list = arrow::array::ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1)]),
        ]);
        let arrays: Vec<ArrayRef> = vec![Arc::new(list)];

        let mut schema = Schema::new("t");
        schema.numericals.push("xs".to_string());

        let mut handler = ArrowHandler::new();
        let err = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .unwrap_err();
        match err {
            Error::UnsupportedArrowType { field, type_name } => {
                assert_eq!(field, "xs");
                assert!(type_name.contains("List"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let fields = vec![Field::new("present", DataType::Float64, true)];
        let arrays: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(vec![1.0]))];

        let mut schema = Schema::new("t");
        schema.numericals.push("absent".to_string());

        let mut handler = ArrowHandler::new();
        let err = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn test_round_trip_through_record_batch() {
        let mut handler = ArrowHandler::new();

        let mut schema = Schema::new("t");
        schema.join_keys.push("jk".to_string());
        schema.numericals.push("x".to_string());

        let fields = vec![
            Field::new("jk", DataType::Utf8, false),
            Field::new("x", DataType::Float64, true),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["k1", "k2"])),
            Arc::new(Float64Array::from(vec![Some(0.5), None])),
        ];
        let df = handler
            .to_dataframe(&schema, &[batch(fields, arrays)])
            .expect("convert");

        let round = handler.to_record_batch(&df).expect("to batch");
        let df2 = handler.to_dataframe(&schema, &[round]).expect("back");
        assert_eq!(df2.join_keys()[0].data(), df.join_keys()[0].data());
        assert_eq!(df2.numericals()[0].get(0), 0.5);
        assert!(df2.numericals()[0].get(1).is_nan());
    }
}
