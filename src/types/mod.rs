//! Value model and the OID-keyed type registry.
//!
//! Decoding is keyed by type OID: the registry maps an OID to its preferred
//! inbound transfer format and a decode function. Encoding is keyed by the
//! [`Value`] variant itself; every variant knows its wire OID, format, and
//! byte representation.
//!
//! A process-wide default registry is built once and cloned per connection,
//! so per-connection registration never affects other connections.

pub mod array;
pub mod numeric;
pub mod oid;
pub mod temporal;

pub use numeric::Numeric;
pub use temporal::{Date, Interval, Time, Timestamp};

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::PgError;

/// Wire transfer format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, TypeError> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            other => Err(TypeError::InvalidData(format!("unknown format code {}", other))),
        }
    }
}

/// Error raised by value codecs.
#[derive(Debug, Clone)]
pub enum TypeError {
    /// Malformed bytes for the declared type.
    InvalidData(String),
    /// Binary data arrived for an OID with no registered decoder.
    BinaryFormatUnsupported(u32),
    /// A value cannot be encoded as a parameter.
    Unencodable(String),
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            TypeError::BinaryFormatUnsupported(oid) => {
                write!(f, "no binary decoder registered for type OID {}", oid)
            }
            TypeError::Unencodable(msg) => write!(f, "cannot encode value: {}", msg),
        }
    }
}

impl std::error::Error for TypeError {}

impl From<TypeError> for PgError {
    fn from(e: TypeError) -> Self {
        PgError::Protocol(e.to_string())
    }
}

/// Server parameters that codecs depend on. Updated from `ParameterStatus`
/// messages; the switch between integer and float datetimes is honored at
/// decode/encode time.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub integer_datetimes: bool,
    pub client_encoding: String,
    pub date_style: String,
    pub time_zone: String,
    pub server_version: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            integer_datetimes: true,
            client_encoding: "UTF8".to_string(),
            date_style: "ISO, MDY".to_string(),
            time_zone: String::new(),
            server_version: String::new(),
        }
    }
}

impl SessionParams {
    fn require_iso_dates(&self) -> Result<(), TypeError> {
        if self.date_style.starts_with("ISO") || self.date_style.is_empty() {
            Ok(())
        } else {
            Err(TypeError::InvalidData(format!(
                "text date/time decoding requires DateStyle ISO, server uses {:?}",
                self.date_style
            )))
        }
    }
}

/// An in-memory value: the typed counterpart of one wire field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
    Numeric(Numeric),
    Date(Date),
    Time(Time),
    Timestamp(Timestamp),
    TimestampTz(Timestamp),
    Interval(Interval),
    Array(Vec<Value>),
    /// Opaque text for a type the registry does not know.
    Unknown(String),
}

impl Value {
    /// Narrowing integer constructor: the smallest sufficient integer type.
    pub fn int(v: i64) -> Value {
        if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
            Value::Int2(v as i16)
        } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            Value::Int4(v as i32)
        } else {
            Value::Int8(v)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(*v as f64),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Unknown(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The OID this value will be declared as in `Parse`. Null declares the
    /// pseudo-type `unknown` so the statement-cache key stays stable.
    pub fn infer_oid(&self) -> Result<u32, TypeError> {
        Ok(match self {
            Value::Null => oid::UNKNOWN,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytes(_) => oid::BYTEA,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Interval(_) => oid::INTERVAL,
            Value::Array(values) => array::infer_oid(values)?,
            Value::Unknown(_) => oid::UNKNOWN,
        })
    }

    /// Encode as a bind parameter: `(oid, format, bytes)`, `None` bytes for
    /// SQL NULL.
    pub fn encode(&self, session: &SessionParams) -> Result<(u32, Format, Option<Vec<u8>>), TypeError> {
        Ok(match self {
            Value::Null => (oid::UNKNOWN, Format::Binary, None),
            Value::Bool(v) => (oid::BOOL, Format::Binary, Some(vec![*v as u8])),
            Value::Int2(v) => (oid::INT2, Format::Binary, Some(v.to_be_bytes().to_vec())),
            Value::Int4(v) => (oid::INT4, Format::Binary, Some(v.to_be_bytes().to_vec())),
            Value::Int8(v) => (oid::INT8, Format::Binary, Some(v.to_be_bytes().to_vec())),
            Value::Float4(v) => (oid::FLOAT4, Format::Binary, Some(v.to_be_bytes().to_vec())),
            Value::Float8(v) => (oid::FLOAT8, Format::Binary, Some(v.to_be_bytes().to_vec())),
            Value::Text(s) => (oid::TEXT, Format::Text, Some(s.as_bytes().to_vec())),
            Value::Bytes(b) => (oid::BYTEA, Format::Binary, Some(b.clone())),
            Value::Numeric(n) => (
                oid::NUMERIC,
                Format::Binary,
                Some(numeric::encode_binary(n.as_str()).map_err(TypeError::InvalidData)?),
            ),
            Value::Date(d) => (oid::DATE, Format::Text, Some(d.to_string().into_bytes())),
            Value::Time(t) => (oid::TIME, Format::Text, Some(t.to_string().into_bytes())),
            Value::Timestamp(ts) => (
                oid::TIMESTAMP,
                Format::Binary,
                Some(encode_timestamp_usec(ts.usec, session)),
            ),
            Value::TimestampTz(ts) => (
                oid::TIMESTAMPTZ,
                Format::Binary,
                Some(encode_timestamp_usec(ts.usec, session)),
            ),
            Value::Interval(iv) => (oid::INTERVAL, Format::Binary, Some(encode_interval(iv, session))),
            Value::Array(values) => {
                let (array_oid, bytes) = array::encode_binary(values, session)?;
                (array_oid, Format::Binary, Some(bytes))
            }
            Value::Unknown(s) => (oid::UNKNOWN, Format::Text, Some(s.as_bytes().to_vec())),
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
impl From<Numeric> for Value {
    fn from(v: Numeric) -> Self {
        Value::Numeric(v)
    }
}
impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Date(v)
    }
}
impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Time(v)
    }
}
impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Decode function: `(registry, session, oid, bytes, format) -> value`.
/// The registry is threaded through so array decoders can recurse.
pub type DecodeFn = fn(&TypeRegistry, &SessionParams, u32, &[u8], Format) -> Result<Value, TypeError>;

/// One registry entry: the preferred inbound format plus the decoder.
#[derive(Clone, Copy)]
pub struct TypeSpec {
    pub format: Format,
    pub decode: DecodeFn,
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec").field("format", &self.format).finish()
    }
}

const DENSE_LIMIT: u32 = 4096;

/// OID-indexed codec table. Builtin OIDs live in a dense array; user
/// registrations above the dense range go to a fallback map.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    dense: Vec<Option<TypeSpec>>,
    sparse: HashMap<u32, TypeSpec>,
}

impl TypeRegistry {
    fn empty() -> Self {
        Self { dense: vec![None; DENSE_LIMIT as usize], sparse: HashMap::new() }
    }

    /// The frozen process-wide default. Cloned per connection; never mutated.
    pub fn shared() -> &'static TypeRegistry {
        static SHARED: OnceLock<TypeRegistry> = OnceLock::new();
        SHARED.get_or_init(TypeRegistry::builtin)
    }

    /// Register or replace the codec for an OID.
    pub fn register(&mut self, type_oid: u32, spec: TypeSpec) {
        if type_oid < DENSE_LIMIT {
            self.dense[type_oid as usize] = Some(spec);
        } else {
            self.sparse.insert(type_oid, spec);
        }
    }

    pub fn lookup(&self, type_oid: u32) -> Option<&TypeSpec> {
        if type_oid < DENSE_LIMIT {
            self.dense[type_oid as usize].as_ref()
        } else {
            self.sparse.get(&type_oid)
        }
    }

    /// Preferred inbound format; unregistered types default to text.
    pub fn preferred_format(&self, type_oid: u32) -> Format {
        self.lookup(type_oid).map(|s| s.format).unwrap_or(Format::Text)
    }

    /// Decode one field. `None` bytes is SQL NULL.
    pub fn decode(
        &self,
        session: &SessionParams,
        type_oid: u32,
        format: Format,
        bytes: Option<&[u8]>,
    ) -> Result<Value, TypeError> {
        let bytes = match bytes {
            None => return Ok(Value::Null),
            Some(b) => b,
        };
        match self.lookup(type_oid) {
            Some(spec) => (spec.decode)(self, session, type_oid, bytes, format),
            None => match format {
                Format::Text => Ok(Value::Unknown(utf8(bytes)?.to_string())),
                Format::Binary => {
                    tracing::warn!(type_oid, "binary data for unregistered type OID, passing bytes through");
                    Ok(Value::Bytes(bytes.to_vec()))
                }
            },
        }
    }

    /// The builtin codec table.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        let binary = |decode: DecodeFn| TypeSpec { format: Format::Binary, decode };
        let text = |decode: DecodeFn| TypeSpec { format: Format::Text, decode };

        reg.register(oid::BOOL, binary(decode_bool));
        reg.register(oid::BYTEA, text(decode_bytea));
        reg.register(oid::NAME, text(decode_text_value));
        reg.register(oid::INT8, binary(decode_int8));
        reg.register(oid::INT2, binary(decode_int2));
        reg.register(oid::INT4, binary(decode_int4));
        reg.register(oid::TEXT, text(decode_text_value));
        reg.register(oid::OID, text(decode_oid_value));
        reg.register(oid::JSON, text(decode_text_value));
        reg.register(oid::FLOAT4, binary(decode_float4));
        reg.register(oid::FLOAT8, binary(decode_float8));
        reg.register(oid::UNKNOWN, text(decode_unknown));
        reg.register(oid::MACADDR, text(decode_text_value));
        reg.register(oid::BPCHAR, text(decode_text_value));
        reg.register(oid::VARCHAR, text(decode_text_value));
        reg.register(oid::DATE, text(decode_date));
        reg.register(oid::TIME, text(decode_time));
        reg.register(oid::TIMESTAMP, binary(decode_timestamp));
        reg.register(oid::TIMESTAMPTZ, binary(decode_timestamptz));
        reg.register(oid::INTERVAL, binary(decode_interval));
        reg.register(oid::NUMERIC, binary(decode_numeric));
        reg.register(oid::CSTRING, text(decode_text_value));
        reg.register(oid::UUID, binary(decode_uuid));
        reg.register(oid::JSONB, text(decode_jsonb));

        for array_oid in [
            oid::BOOL_ARRAY,
            oid::BYTEA_ARRAY,
            oid::NAME_ARRAY,
            oid::INT2_ARRAY,
            oid::INT4_ARRAY,
            oid::TEXT_ARRAY,
            oid::BPCHAR_ARRAY,
            oid::VARCHAR_ARRAY,
            oid::INT8_ARRAY,
            oid::FLOAT4_ARRAY,
            oid::FLOAT8_ARRAY,
            oid::DATE_ARRAY,
            oid::TIME_ARRAY,
            oid::TIMESTAMP_ARRAY,
            oid::TIMESTAMPTZ_ARRAY,
            oid::INTERVAL_ARRAY,
            oid::NUMERIC_ARRAY,
            oid::CSTRING_ARRAY,
            oid::UUID_ARRAY,
            oid::JSONB_ARRAY,
        ] {
            reg.register(array_oid, binary(array::decode));
        }

        reg
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, TypeError> {
    std::str::from_utf8(bytes).map_err(|e| TypeError::InvalidData(format!("invalid UTF-8: {}", e)))
}

fn encode_timestamp_usec(usec: i64, session: &SessionParams) -> Vec<u8> {
    if session.integer_datetimes {
        usec.to_be_bytes().to_vec()
    } else {
        ((usec as f64) / 1_000_000.0).to_be_bytes().to_vec()
    }
}

fn encode_interval(iv: &Interval, session: &SessionParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    if session.integer_datetimes {
        out.extend_from_slice(&iv.usec.to_be_bytes());
    } else {
        out.extend_from_slice(&((iv.usec as f64) / 1_000_000.0).to_be_bytes());
    }
    out.extend_from_slice(&iv.days.to_be_bytes());
    out.extend_from_slice(&iv.months.to_be_bytes());
    out
}

fn want_len(bytes: &[u8], len: usize, what: &str) -> Result<(), TypeError> {
    if bytes.len() != len {
        return Err(TypeError::InvalidData(format!(
            "expected {} bytes for {}, got {}",
            len,
            what,
            bytes.len()
        )));
    }
    Ok(())
}

// ==================== scalar decoders ====================

fn decode_bool(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 1, "bool")?;
            Ok(Value::Bool(bytes[0] != 0))
        }
        Format::Text => match bytes.first() {
            Some(b't') | Some(b'T') | Some(b'1') => Ok(Value::Bool(true)),
            Some(b'f') | Some(b'F') | Some(b'0') => Ok(Value::Bool(false)),
            _ => Err(TypeError::InvalidData("invalid boolean literal".to_string())),
        },
    }
}

fn decode_bytea(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => Ok(Value::Bytes(bytes.to_vec())),
        Format::Text => {
            // Hex output format: \x followed by two hex digits per byte.
            if let Some(hex) = bytes.strip_prefix(b"\\x") {
                if hex.len() % 2 != 0 {
                    return Err(TypeError::InvalidData("odd-length bytea hex".to_string()));
                }
                let mut out = Vec::with_capacity(hex.len() / 2);
                for pair in hex.chunks(2) {
                    let s = utf8(pair)?;
                    let b = u8::from_str_radix(s, 16)
                        .map_err(|_| TypeError::InvalidData("invalid bytea hex digit".to_string()))?;
                    out.push(b);
                }
                Ok(Value::Bytes(out))
            } else {
                Ok(Value::Bytes(bytes.to_vec()))
            }
        }
    }
}

fn decode_int2(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 2, "int2")?;
            Ok(Value::Int2(i16::from_be_bytes([bytes[0], bytes[1]])))
        }
        Format::Text => utf8(bytes)?
            .parse()
            .map(Value::Int2)
            .map_err(|e| TypeError::InvalidData(format!("invalid int2: {}", e))),
    }
}

fn decode_int4(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 4, "int4")?;
            Ok(Value::Int4(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
        }
        Format::Text => utf8(bytes)?
            .parse()
            .map(Value::Int4)
            .map_err(|e| TypeError::InvalidData(format!("invalid int4: {}", e))),
    }
}

fn decode_int8(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 8, "int8")?;
            Ok(Value::Int8(i64::from_be_bytes(bytes.try_into().unwrap())))
        }
        Format::Text => utf8(bytes)?
            .parse()
            .map(Value::Int8)
            .map_err(|e| TypeError::InvalidData(format!("invalid int8: {}", e))),
    }
}

fn decode_float4(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 4, "float4")?;
            Ok(Value::Float4(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
        }
        Format::Text => parse_float_text(utf8(bytes)?).map(|v| Value::Float4(v as f32)),
    }
}

fn decode_float8(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 8, "float8")?;
            Ok(Value::Float8(f64::from_be_bytes(bytes.try_into().unwrap())))
        }
        Format::Text => parse_float_text(utf8(bytes)?).map(Value::Float8),
    }
}

fn parse_float_text(s: &str) -> Result<f64, TypeError> {
    match s {
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other
            .parse()
            .map_err(|e| TypeError::InvalidData(format!("invalid float: {}", e))),
    }
}

fn decode_text_value(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    _format: Format,
) -> Result<Value, TypeError> {
    // Text-class types carry the same bytes in both formats.
    Ok(Value::Text(utf8(bytes)?.to_string()))
}

fn decode_unknown(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    _format: Format,
) -> Result<Value, TypeError> {
    Ok(Value::Unknown(utf8(bytes)?.to_string()))
}

fn decode_oid_value(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 4, "oid")?;
            Ok(Value::Int8(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64))
        }
        Format::Text => utf8(bytes)?
            .parse::<i64>()
            .map(Value::Int8)
            .map_err(|e| TypeError::InvalidData(format!("invalid oid: {}", e))),
    }
}

fn decode_date(
    _reg: &TypeRegistry,
    session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 4, "date")?;
            Ok(Value::Date(Date::from_pg_days(i32::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))))
        }
        Format::Text => {
            session.require_iso_dates()?;
            Date::parse_text(utf8(bytes)?).map(Value::Date).map_err(TypeError::InvalidData)
        }
    }
}

fn decode_time(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 8, "time")?;
            Ok(Value::Time(Time { usec: i64::from_be_bytes(bytes.try_into().unwrap()) }))
        }
        Format::Text => Time::parse_text(utf8(bytes)?).map(Value::Time).map_err(TypeError::InvalidData),
    }
}

fn decode_timestamp_usec(session: &SessionParams, bytes: &[u8]) -> Result<i64, TypeError> {
    want_len(bytes, 8, "timestamp")?;
    if session.integer_datetimes {
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    } else {
        let secs = f64::from_be_bytes(bytes.try_into().unwrap());
        Ok((secs * 1_000_000.0).round() as i64)
    }
}

fn decode_timestamp(
    _reg: &TypeRegistry,
    session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => Ok(Value::Timestamp(Timestamp::from_pg_usec(decode_timestamp_usec(
            session, bytes,
        )?))),
        Format::Text => {
            session.require_iso_dates()?;
            Timestamp::parse_text(utf8(bytes)?)
                .map(Value::Timestamp)
                .map_err(TypeError::InvalidData)
        }
    }
}

fn decode_timestamptz(
    _reg: &TypeRegistry,
    session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => Ok(Value::TimestampTz(Timestamp::from_pg_usec(decode_timestamp_usec(
            session, bytes,
        )?))),
        Format::Text => {
            session.require_iso_dates()?;
            Timestamp::parse_text(utf8(bytes)?)
                .map(Value::TimestampTz)
                .map_err(TypeError::InvalidData)
        }
    }
}

fn decode_interval(
    _reg: &TypeRegistry,
    session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 16, "interval")?;
            let usec = if session.integer_datetimes {
                i64::from_be_bytes(bytes[..8].try_into().unwrap())
            } else {
                (f64::from_be_bytes(bytes[..8].try_into().unwrap()) * 1_000_000.0).round() as i64
            };
            let days = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
            let months = i32::from_be_bytes(bytes[12..16].try_into().unwrap());
            Ok(Value::Interval(Interval { months, days, usec }))
        }
        Format::Text => parse_interval_text(utf8(bytes)?).map(Value::Interval),
    }
}

/// Parse the ISO interval output: `[N year[s]] [N mon[s]] [N day[s]] [±HH:MM:SS[.f]]`.
fn parse_interval_text(s: &str) -> Result<Interval, TypeError> {
    let mut months: i32 = 0;
    let mut days: i32 = 0;
    let mut usec: i64 = 0;
    let mut tokens = s.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok.contains(':') {
            let negative = tok.starts_with('-');
            let body = tok.trim_start_matches(['-', '+']);
            let time = Time::parse_text(body).map_err(TypeError::InvalidData)?;
            usec = if negative { -time.usec } else { time.usec };
            continue;
        }
        let qty: i64 = tok
            .parse()
            .map_err(|_| TypeError::InvalidData(format!("invalid interval: {:?}", s)))?;
        let unit = tokens
            .next()
            .ok_or_else(|| TypeError::InvalidData(format!("invalid interval: {:?}", s)))?;
        match unit.trim_end_matches('s') {
            "year" => months += qty as i32 * 12,
            "mon" | "month" => months += qty as i32,
            "day" => days += qty as i32,
            other => {
                return Err(TypeError::InvalidData(format!("unknown interval unit {:?}", other)))
            }
        }
    }
    Ok(Interval { months, days, usec })
}

fn decode_numeric(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => numeric::decode_binary(bytes).map(Value::Numeric).map_err(TypeError::InvalidData),
        Format::Text => Ok(Value::Numeric(Numeric::new(utf8(bytes)?))),
    }
}

fn decode_uuid(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            want_len(bytes, 16, "uuid")?;
            let mut out = String::with_capacity(36);
            for (i, b) in bytes.iter().enumerate() {
                if matches!(i, 4 | 6 | 8 | 10) {
                    out.push('-');
                }
                out.push_str(&format!("{:02x}", b));
            }
            Ok(Value::Text(out))
        }
        Format::Text => Ok(Value::Text(utf8(bytes)?.to_string())),
    }
}

fn decode_jsonb(
    _reg: &TypeRegistry,
    _session: &SessionParams,
    _oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => {
            // Version byte then the JSON text.
            match bytes.split_first() {
                Some((&1, rest)) => Ok(Value::Text(utf8(rest)?.to_string())),
                Some((v, _)) => Err(TypeError::InvalidData(format!("unsupported jsonb version {}", v))),
                None => Ok(Value::Text(String::new())),
            }
        }
        Format::Text => Ok(Value::Text(utf8(bytes)?.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> TypeRegistry {
        TypeRegistry::builtin()
    }

    fn session() -> SessionParams {
        SessionParams::default()
    }

    fn round_trip(value: Value) {
        let (type_oid, format, bytes) = value.encode(&session()).unwrap();
        let decoded = reg()
            .decode(&session(), type_oid, format, bytes.as_deref())
            .unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Int2(i16::MIN));
        round_trip(Value::Int2(i16::MAX));
        round_trip(Value::Int4(i32::MIN));
        round_trip(Value::Int8(i64::MAX));
        round_trip(Value::Float8(1.5));
        round_trip(Value::Float8(f64::INFINITY));
        round_trip(Value::Float4(-2.25));
        round_trip(Value::Text("héllo".to_string()));
        round_trip(Value::Bytes(vec![0, 1, 2, 255]));
        round_trip(Value::Numeric(Numeric::new("123.456")));
        round_trip(Value::Date(Date::from_ymd(2024, 2, 29)));
        round_trip(Value::Time(Time::new(23, 59, 59, 999999)));
        round_trip(Value::Timestamp(Timestamp::from_pg_usec(151_496_634_000_000)));
        round_trip(Value::TimestampTz(Timestamp::from_pg_usec(-5_000_000)));
        round_trip(Value::Interval(Interval::new(14, 3, 3_600_000_000)));
    }

    #[test]
    fn test_null_round_trip() {
        let (type_oid, _, bytes) = Value::Null.encode(&session()).unwrap();
        assert_eq!(type_oid, oid::UNKNOWN);
        assert!(bytes.is_none());
        assert_eq!(reg().decode(&session(), oid::INT4, Format::Binary, None).unwrap(), Value::Null);
    }

    #[test]
    fn test_nan_round_trip() {
        let (type_oid, format, bytes) = Value::Float8(f64::NAN).encode(&session()).unwrap();
        let decoded = reg().decode(&session(), type_oid, format, bytes.as_deref()).unwrap();
        match decoded {
            Value::Float8(v) => assert!(v.is_nan()),
            other => panic!("unexpected value {:?}", other),
        }
        round_trip(Value::Numeric(Numeric::new("NaN")));
    }

    #[test]
    fn test_float_datetimes_round_trip() {
        let float_session = SessionParams { integer_datetimes: false, ..Default::default() };
        let ts = Value::Timestamp(Timestamp::from_pg_usec(151_496_634_000_000));
        let (type_oid, format, bytes) = ts.encode(&float_session).unwrap();
        // Eight bytes either way, but an IEEE double of seconds here.
        let secs = f64::from_be_bytes(bytes.as_deref().unwrap().try_into().unwrap());
        assert_eq!(secs, 151_496_634.0);
        let decoded = reg().decode(&float_session, type_oid, format, bytes.as_deref()).unwrap();
        assert_eq!(decoded, ts);
    }

    #[test]
    fn test_integer_narrowing_constructor() {
        assert_eq!(Value::int(7), Value::Int2(7));
        assert_eq!(Value::int(70_000), Value::Int4(70_000));
        assert_eq!(Value::int(5_000_000_000), Value::Int8(5_000_000_000));
    }

    #[test]
    fn test_text_decoding_of_numbers() {
        let v = reg().decode(&session(), oid::INT4, Format::Text, Some(b"42")).unwrap();
        assert_eq!(v, Value::Int4(42));
        let v = reg().decode(&session(), oid::FLOAT8, Format::Text, Some(b"-1.5")).unwrap();
        assert_eq!(v, Value::Float8(-1.5));
        let v = reg().decode(&session(), oid::BOOL, Format::Text, Some(b"t")).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn test_bytea_text_hex() {
        let v = reg().decode(&session(), oid::BYTEA, Format::Text, Some(b"\\xdeadbeef")).unwrap();
        assert_eq!(v, Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_uuid_binary_decodes_to_canonical_text() {
        let bytes: [u8; 16] = [
            0x55, 0x0e, 0x84, 0x00, 0xe2, 0x9b, 0x41, 0xd4, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44,
            0x00, 0x00,
        ];
        let v = reg().decode(&session(), oid::UUID, Format::Binary, Some(&bytes)).unwrap();
        assert_eq!(v, Value::Text("550e8400-e29b-41d4-a716-446655440000".to_string()));
    }

    #[test]
    fn test_jsonb_binary_strips_version_byte() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(br#"{"k":1}"#);
        let v = reg().decode(&session(), oid::JSONB, Format::Binary, Some(&bytes)).unwrap();
        assert_eq!(v, Value::Text(r#"{"k":1}"#.to_string()));
    }

    #[test]
    fn test_unknown_oid_text_passthrough() {
        let v = reg().decode(&session(), 99999, Format::Text, Some(b"whatever")).unwrap();
        assert_eq!(v, Value::Unknown("whatever".to_string()));
    }

    #[test]
    fn test_interval_text_parse() {
        let v = reg()
            .decode(&session(), oid::INTERVAL, Format::Text, Some(b"1 year 2 mons 3 days 04:05:06"))
            .unwrap();
        assert_eq!(
            v,
            Value::Interval(Interval::new(14, 3, 4 * 3_600_000_000 + 5 * 60_000_000 + 6 * 1_000_000))
        );
    }

    #[test]
    fn test_non_iso_datestyle_rejected_for_text_dates() {
        let german = SessionParams { date_style: "German, DMY".to_string(), ..Default::default() };
        let err = reg().decode(&german, oid::DATE, Format::Text, Some(b"19.10.2004")).unwrap_err();
        assert!(err.to_string().contains("DateStyle"));
    }

    #[test]
    fn test_registry_clone_isolation() {
        let shared = TypeRegistry::shared();
        assert!(shared.lookup(99999).is_none());
        let mut local = shared.clone();
        local.register(
            99999,
            TypeSpec { format: Format::Text, decode: decode_text_value },
        );
        assert!(local.lookup(99999).is_some());
        assert!(TypeRegistry::shared().lookup(99999).is_none());
    }

    #[test]
    fn test_preferred_formats_follow_the_table() {
        let reg = reg();
        assert_eq!(reg.preferred_format(oid::INT4), Format::Binary);
        assert_eq!(reg.preferred_format(oid::NUMERIC), Format::Binary);
        assert_eq!(reg.preferred_format(oid::TIMESTAMP), Format::Binary);
        assert_eq!(reg.preferred_format(oid::INT4_ARRAY), Format::Binary);
        assert_eq!(reg.preferred_format(oid::TEXT), Format::Text);
        assert_eq!(reg.preferred_format(oid::BYTEA), Format::Text);
        assert_eq!(reg.preferred_format(oid::DATE), Format::Text);
        assert_eq!(reg.preferred_format(99999), Format::Text);
    }
}
