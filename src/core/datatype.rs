/// Datatype Module
///
/// Logical types and the conversions the portability layer applies to field
/// values: empty/rtrim fixing, per-type result coercion, literal quoting and
/// the type codes used for native parameter binding.
use crate::core::options::Portability;
use crate::core::value::{Row, RowMap, Value};
use crate::core::{DbError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Declared domain type of a column or parameter, independent of how the
/// engine transmits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Text,
    Clob,
    Blob,
    Integer,
    Boolean,
    Decimal,
    Float,
    Date,
    Time,
    Timestamp,
}

impl LogicalType {
    /// Infers the logical type of an untyped value.
    pub fn infer(value: &Value) -> LogicalType {
        match value {
            Value::Null | Value::Text(_) => LogicalType::Text,
            Value::Boolean(_) => LogicalType::Boolean,
            Value::Integer(_) => LogicalType::Integer,
            Value::Float(_) => LogicalType::Float,
            Value::Decimal(_) => LogicalType::Decimal,
            Value::Blob(_) => LogicalType::Blob,
            Value::Date(_) => LogicalType::Date,
            Value::Time(_) => LogicalType::Time,
            Value::Timestamp(_) => LogicalType::Timestamp,
        }
    }

    /// Large-object types are streamed rather than sent inline.
    pub fn is_lob(self) -> bool {
        matches!(self, LogicalType::Clob | LogicalType::Blob)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogicalType::Text => "text",
            LogicalType::Clob => "clob",
            LogicalType::Blob => "blob",
            LogicalType::Integer => "integer",
            LogicalType::Boolean => "boolean",
            LogicalType::Decimal => "decimal",
            LogicalType::Float => "float",
            LogicalType::Date => "date",
            LogicalType::Time => "time",
            LogicalType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogicalType::Text),
            "clob" => Ok(LogicalType::Clob),
            "blob" => Ok(LogicalType::Blob),
            "integer" => Ok(LogicalType::Integer),
            "boolean" => Ok(LogicalType::Boolean),
            "decimal" => Ok(LogicalType::Decimal),
            "float" => Ok(LogicalType::Float),
            "date" => Ok(LogicalType::Date),
            "time" => Ok(LogicalType::Time),
            "timestamp" => Ok(LogicalType::Timestamp),
            other => Err(DbError::Conversion(format!("unknown logical type: {}", other))),
        }
    }
}

/// Parameter type code for native binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Integer,
    Double,
    String,
    Blob,
}

impl TypeCode {
    /// Maps a declared logical type to its binding code. Undeclared
    /// parameters bind as strings.
    pub fn for_type(ty: Option<LogicalType>) -> TypeCode {
        match ty {
            Some(LogicalType::Integer) | Some(LogicalType::Boolean) => TypeCode::Integer,
            Some(LogicalType::Float) => TypeCode::Double,
            Some(LogicalType::Blob) | Some(LogicalType::Clob) => TypeCode::Blob,
            _ => TypeCode::String,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TypeCode::Integer => 'i',
            TypeCode::Double => 'd',
            TypeCode::String => 's',
            TypeCode::Blob => 'b',
        }
    }
}

/// Applies empty-to-null and rtrim to every field of a row.
///
/// `mode` may combine `EMPTY_TO_NULL` and `RTRIM`; other bits are ignored.
/// Only text fields are touched.
pub fn fix_result_values(row: &mut Row, mode: Portability) {
    let empty_to_null = mode.contains(Portability::EMPTY_TO_NULL);
    let rtrim = mode.contains(Portability::RTRIM);
    for value in row.values_mut() {
        if let Value::Text(text) = value {
            if rtrim {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
            if empty_to_null && text.is_empty() {
                *value = Value::Null;
            }
        }
    }
}

/// Positional or name-keyed set of declared types.
#[derive(Debug, Clone, Copy)]
pub enum TypeSet<'a> {
    Positional(&'a [LogicalType]),
    Named(&'a HashMap<String, LogicalType>),
}

impl TypeSet<'_> {
    pub fn is_empty(&self) -> bool {
        match self {
            TypeSet::Positional(types) => types.is_empty(),
            TypeSet::Named(types) => types.is_empty(),
        }
    }
}

/// Coerces every field of `row` that has a declared type.
///
/// Positional types apply to positional rows by index; named types apply to
/// name-keyed rows and records by key. Fields without a declared type pass
/// through unchanged.
pub fn convert_result_row(types: TypeSet<'_>, row: Row, rtrim: bool) -> Result<Row> {
    match (types, row) {
        (TypeSet::Positional(types), Row::Ordered(values)) => {
            let converted = values
                .into_iter()
                .enumerate()
                .map(|(i, value)| match types.get(i) {
                    Some(ty) => convert_value(value, *ty, rtrim),
                    None => Ok(value),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::Ordered(converted))
        }
        (TypeSet::Named(types), Row::Assoc(map)) => {
            let converted = map
                .into_iter()
                .map(|(name, value)| {
                    let value = match types.get(&name) {
                        Some(ty) => convert_value(value, *ty, rtrim)?,
                        None => value,
                    };
                    Ok((name, value))
                })
                .collect::<Result<RowMap>>()?;
            Ok(Row::Assoc(converted))
        }
        (_, row) => Ok(row),
    }
}

/// Coerces one field value to a logical type.
///
/// NULL stays NULL. `rtrim` only affects text results.
pub fn convert_value(value: Value, ty: LogicalType, rtrim: bool) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let converted = match ty {
        LogicalType::Text => {
            let mut text = into_text(value);
            if rtrim {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
            Value::Text(text)
        }
        LogicalType::Clob => match value {
            Value::Blob(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            other => Value::Text(into_text(other)),
        },
        LogicalType::Blob => Value::Blob(match value {
            Value::Blob(bytes) => bytes,
            other => other.to_string().into_bytes(),
        }),
        LogicalType::Integer => Value::Integer(integer_of(&value)),
        LogicalType::Boolean => Value::Boolean(boolean_of(&value)),
        LogicalType::Float => Value::Float(float_of(&value)),
        LogicalType::Decimal => Value::Decimal(decimal_of(&value)),
        LogicalType::Date => Value::Date(date_of(value)?),
        LogicalType::Time => Value::Time(time_of(value)?),
        LogicalType::Timestamp => Value::Timestamp(timestamp_of(value)?),
    };
    Ok(converted)
}

fn into_text(value: Value) -> String {
    match value {
        Value::Text(text) => text,
        other => other.to_string(),
    }
}

/// Integer reading of a value: leading signed digits of text, truncation of
/// floats, 0/1 for booleans. Non-numeric text reads as 0.
pub fn integer_of(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => *i,
        Value::Float(f) => *f as i64,
        Value::Boolean(b) => i64::from(*b),
        Value::Null => 0,
        other => leading_integer(&other.to_string()),
    }
}

fn leading_integer(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return 0;
    }
    match digits[..end].parse::<i64>() {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) if negative => i64::MIN,
        Err(_) => i64::MAX,
    }
}

/// Float reading of a value: the longest numeric prefix of text, 0.0 if none.
pub fn float_of(value: &Value) -> f64 {
    match value {
        Value::Float(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        other => leading_float(&other.to_string()),
    }
}

fn leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        if mantissa_digits > 0 {
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-') | Some(b'+')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    text[..end].parse::<f64>().unwrap_or(0.0)
}

/// Boolean reading of a value. `0`, empty text and the usual negative words
/// are false.
pub fn boolean_of(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Null => false,
        other => {
            let text = other.to_string();
            !matches!(
                text.trim().to_lowercase().as_str(),
                "" | "0" | "false" | "f" | "n" | "no" | "off"
            )
        }
    }
}

fn decimal_of(value: &Value) -> String {
    match value {
        Value::Decimal(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => i64::from(*b).to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn date_of(value: Value) -> Result<NaiveDate> {
    match value {
        Value::Date(d) => Ok(d),
        Value::Timestamp(ts) => Ok(ts.date()),
        other => {
            let text = other.to_string();
            let trimmed = text.trim();
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .or_else(|_| parse_timestamp(trimmed).map(|ts| ts.date()))
                .map_err(|_| DbError::Conversion(format!("invalid date value: {}", text)))
        }
    }
}

fn time_of(value: Value) -> Result<NaiveTime> {
    match value {
        Value::Time(t) => Ok(t),
        Value::Timestamp(ts) => Ok(ts.time()),
        other => {
            let text = other.to_string();
            let trimmed = text.trim();
            NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                .map_err(|_| DbError::Conversion(format!("invalid time value: {}", text)))
        }
    }
}

fn timestamp_of(value: Value) -> Result<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Ok(ts),
        Value::Date(d) => Ok(d.and_time(NaiveTime::default())),
        other => {
            let text = other.to_string();
            parse_timestamp(text.trim())
                .map_err(|_| DbError::Conversion(format!("invalid timestamp value: {}", text)))
        }
    }
}

fn parse_timestamp(text: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::default())))
}

/// Renders a value as a SQL literal of the given logical type.
///
/// Undeclared types are inferred from the value. With `with_quotes` unset,
/// text-like literals come back bare, which is the form native binding wants.
pub fn quote_literal(value: &Value, ty: Option<LogicalType>, with_quotes: bool) -> Result<String> {
    if value.is_null() {
        return Ok("NULL".to_string());
    }
    let ty = ty.unwrap_or_else(|| LogicalType::infer(value));
    let literal = match ty {
        LogicalType::Integer => integer_of(value).to_string(),
        LogicalType::Boolean => if boolean_of(value) { "1" } else { "0" }.to_string(),
        LogicalType::Float => {
            let f = float_of(value);
            if !f.is_finite() {
                return Err(DbError::Conversion(format!("cannot quote non-finite float: {}", f)));
            }
            f.to_string()
        }
        LogicalType::Decimal => {
            let text = decimal_of(value);
            match text.parse::<f64>() {
                Ok(parsed) if !parsed.is_finite() => {
                    return Err(DbError::Conversion(format!("cannot quote non-finite decimal: {}", text)));
                }
                Ok(_) => text,
                Err(_) => leading_float(&text).to_string(),
            }
        }
        LogicalType::Blob => {
            let bytes = value.to_bytes();
            if with_quotes {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                format!("X'{}'", hex)
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        }
        LogicalType::Text
        | LogicalType::Clob
        | LogicalType::Date
        | LogicalType::Time
        | LogicalType::Timestamp => {
            let text = value.to_string();
            if with_quotes {
                format!("'{}'", text.replace('\'', "''"))
            } else {
                text
            }
        }
    };
    Ok(literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_result_values_modes() {
        let mut row = Row::Ordered(vec![
            Value::Text("".into()),
            Value::Text("abc  ".into()),
            Value::Text("   ".into()),
            Value::Integer(5),
        ]);
        fix_result_values(&mut row, Portability::EMPTY_TO_NULL);
        assert_eq!(
            row,
            Row::Ordered(vec![
                Value::Null,
                Value::Text("abc  ".into()),
                Value::Text("   ".into()),
                Value::Integer(5),
            ])
        );

        // rtrim runs first, so whitespace-only fields become NULL as well
        fix_result_values(&mut row, Portability::EMPTY_TO_NULL | Portability::RTRIM);
        assert_eq!(
            row,
            Row::Ordered(vec![
                Value::Null,
                Value::Text("abc".into()),
                Value::Null,
                Value::Integer(5),
            ])
        );
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(convert_value("42".into(), LogicalType::Integer, false).unwrap(), Value::Integer(42));
        assert_eq!(convert_value(" -7abc".into(), LogicalType::Integer, false).unwrap(), Value::Integer(-7));
        assert_eq!(convert_value("abc".into(), LogicalType::Integer, false).unwrap(), Value::Integer(0));
        assert_eq!(convert_value("3.9".into(), LogicalType::Integer, false).unwrap(), Value::Integer(3));
        assert_eq!(convert_value(Value::Float(-2.7), LogicalType::Integer, false).unwrap(), Value::Integer(-2));
        assert_eq!(
            convert_value("99999999999999999999".into(), LogicalType::Integer, false).unwrap(),
            Value::Integer(i64::MAX)
        );
        assert_eq!(convert_value(Value::Null, LogicalType::Integer, false).unwrap(), Value::Null);
    }

    #[test]
    fn test_float_and_boolean_coercion() {
        assert_eq!(convert_value("1.5e2x".into(), LogicalType::Float, false).unwrap(), Value::Float(150.0));
        assert_eq!(convert_value(".5".into(), LogicalType::Float, false).unwrap(), Value::Float(0.5));
        assert_eq!(convert_value("-".into(), LogicalType::Float, false).unwrap(), Value::Float(0.0));
        assert_eq!(convert_value("0".into(), LogicalType::Boolean, false).unwrap(), Value::Boolean(false));
        assert_eq!(convert_value("no".into(), LogicalType::Boolean, false).unwrap(), Value::Boolean(false));
        assert_eq!(convert_value("yes".into(), LogicalType::Boolean, false).unwrap(), Value::Boolean(true));
        assert_eq!(convert_value(Value::Integer(2), LogicalType::Boolean, false).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_text_rtrim_only_when_requested() {
        assert_eq!(convert_value("ab  ".into(), LogicalType::Text, true).unwrap(), Value::Text("ab".into()));
        assert_eq!(convert_value("ab  ".into(), LogicalType::Text, false).unwrap(), Value::Text("ab  ".into()));
        // numeric fields are never trimmed as text
        assert_eq!(convert_value("12  ".into(), LogicalType::Integer, true).unwrap(), Value::Integer(12));
        assert_eq!(convert_value(Value::Integer(12), LogicalType::Text, true).unwrap(), Value::Text("12".into()));
    }

    #[test]
    fn test_date_time_coercion() {
        let date = convert_value("2024-02-29".into(), LogicalType::Date, false).unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let ts = convert_value("2024-02-29T10:11:12.5".into(), LogicalType::Timestamp, false).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(10, 11, 12, 500)
            .unwrap();
        assert_eq!(ts, Value::Timestamp(expected));

        let time = convert_value("08:30".into(), LogicalType::Time, false).unwrap();
        assert_eq!(time, Value::Time(NaiveTime::from_hms_opt(8, 30, 0).unwrap()));

        let err = convert_value("not a date".into(), LogicalType::Date, false).unwrap_err();
        assert!(matches!(err, DbError::Conversion(_)));
    }

    #[test]
    fn test_convert_result_row_by_shape() {
        let types = [LogicalType::Integer, LogicalType::Text];
        let row = Row::Ordered(vec!["5".into(), "x  ".into(), "untyped  ".into()]);
        let converted = convert_result_row(TypeSet::Positional(&types), row, true).unwrap();
        assert_eq!(
            converted,
            Row::Ordered(vec![Value::Integer(5), Value::Text("x".into()), Value::Text("untyped  ".into())])
        );

        let mut named = HashMap::new();
        named.insert("id".to_string(), LogicalType::Integer);
        let mut map = RowMap::new();
        map.insert("id".into(), "12".into());
        map.insert("name".into(), "bob".into());
        let converted = convert_result_row(TypeSet::Named(&named), Row::Assoc(map), false).unwrap();
        assert_eq!(converted.get_named("id"), Some(&Value::Integer(12)));
        assert_eq!(converted.get_named("name"), Some(&Value::Text("bob".into())));
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal(&Value::Null, Some(LogicalType::Integer), true).unwrap(), "NULL");
        assert_eq!(quote_literal(&"O'Brien".into(), None, true).unwrap(), "'O''Brien'");
        assert_eq!(quote_literal(&"O'Brien".into(), None, false).unwrap(), "O'Brien");
        assert_eq!(quote_literal(&"12abc".into(), Some(LogicalType::Integer), true).unwrap(), "12");
        assert_eq!(quote_literal(&Value::Boolean(true), None, true).unwrap(), "1");
        assert_eq!(quote_literal(&Value::Blob(vec![0x00, 0xff]), None, true).unwrap(), "X'00FF'");
        assert_eq!(quote_literal(&"1.25".into(), Some(LogicalType::Decimal), true).unwrap(), "1.25");
        assert!(quote_literal(&Value::Float(f64::NAN), None, true).is_err());
        for text in ["NaN", "inf", "-Infinity"] {
            let err = quote_literal(&text.into(), Some(LogicalType::Decimal), false).unwrap_err();
            assert!(matches!(err, DbError::Conversion(_)), "{}", text);
        }
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(TypeCode::for_type(Some(LogicalType::Integer)).as_char(), 'i');
        assert_eq!(TypeCode::for_type(Some(LogicalType::Boolean)).as_char(), 'i');
        assert_eq!(TypeCode::for_type(Some(LogicalType::Float)).as_char(), 'd');
        assert_eq!(TypeCode::for_type(Some(LogicalType::Clob)).as_char(), 'b');
        assert_eq!(TypeCode::for_type(Some(LogicalType::Date)).as_char(), 's');
        assert_eq!(TypeCode::for_type(None).as_char(), 's');
    }

    #[test]
    fn test_logical_type_from_str() {
        assert_eq!("Integer".parse::<LogicalType>().unwrap(), LogicalType::Integer);
        assert!("varchar".parse::<LogicalType>().is_err());
    }
}
