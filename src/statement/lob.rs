//! Large-object parameters: detection, URL sources, and chunked reads.
use crate::core::datatype::LogicalType;
use crate::core::value::Value;
use crate::core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+://)(.*)$").unwrap());

/// A bound parameter: an inline value or a stream read at execute time.
pub enum Param {
    Value(Value),
    Stream(Box<dyn Read + Send>),
}

impl Param {
    /// The inline value, `None` for streams.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Param::Value(value) => Some(value),
            Param::Stream(_) => None,
        }
    }
}

static NULL: Value = Value::Null;

/// The inline value of a parameter; streams read as NULL.
pub(crate) fn inline_value(param: &Param) -> &Value {
    param.as_value().unwrap_or(&NULL)
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Param::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Whether a parameter is sent as a large object.
///
/// Streams always are. Values are when their declared type is `clob` or
/// `blob`, or when undeclared binary data. NULL never is.
pub(crate) fn is_lob(param: &Param, ty: Option<LogicalType>) -> bool {
    match (param, ty) {
        (Param::Stream(_), _) => true,
        (Param::Value(Value::Null), _) => false,
        (Param::Value(_), Some(ty)) => ty.is_lob(),
        (Param::Value(value), None) => matches!(value, Value::Blob(_)),
    }
}

/// Opens the data source of a large-object parameter.
///
/// With `allow_url` set, text of the form `scheme://rest` names a source;
/// only `file://` is readable, as a path on the local file system.
pub(crate) fn open<'a>(param: &'a mut Param, allow_url: bool) -> Result<Box<dyn Read + 'a>> {
    let value = match param {
        Param::Stream(reader) => return Ok(Box::new(reader)),
        Param::Value(value) => &*value,
    };
    if let (Value::Text(text), true) = (value, allow_url) {
        return match URL_PATTERN.captures(text) {
            Some(caps) if &caps[1] == "file://" => Ok(Box::new(File::open(&caps[2])?)),
            Some(caps) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported large object source: {}", &caps[1]),
            )
            .into()),
            None => Ok(Box::new(io::Cursor::new(text.as_bytes()))),
        };
    }
    Ok(Box::new(io::Cursor::new(value.to_bytes())))
}

/// Reads `reader` in `buffer_len` pieces, handing each to `sink`.
pub(crate) fn send_chunks<F>(reader: &mut dyn Read, buffer_len: usize, mut sink: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut buffer = vec![0u8; buffer_len.max(1)];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        sink(&buffer[..read])?;
    }
}

/// Reads `reader` to the end in `buffer_len` pieces.
pub(crate) fn drain(reader: &mut dyn Read, buffer_len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    send_chunks(reader, buffer_len, |chunk| {
        data.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(data)
}

/// Value of drained large-object data: text for `clob`, bytes otherwise.
pub(crate) fn drained_value(data: Vec<u8>, ty: Option<LogicalType>) -> Value {
    match ty {
        Some(LogicalType::Clob) => Value::Text(String::from_utf8_lossy(&data).into_owned()),
        _ => Value::Blob(data),
    }
}
