// used for timestamps, dates and intervals
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
// used for decimal numbers
use bigdecimal::{BigDecimal, ToPrimitive};
// so regular expressions don't have to be recompiled
use lazy_static::lazy_static;
use regex::Regex;

// used when parsing a string to a decimal
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;
use std::collections::HashMap;
use std::rc::Rc;

use crate::OtherHasher;
use crate::error::{Result, SquallError};

/// A dynamically typed scalar as held inside a [`crate::variable::Variable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeDelta(TimeDelta),
    Json(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeDelta(_) => "timedelta",
            Value::Json(_) => "json",
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::DateTime(d) => write!(f, "{}", d),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::TimeDelta(t) => write!(f, "{}", t),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Text(v.to_owned()) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Value::Text(v) }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}
impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self { Value::Decimal(v) }
}
impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self { Value::DateTime(v) }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self { Value::Date(v) }
}
impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self { Value::Time(v) }
}
impl From<TimeDelta> for Value {
    fn from(v: TimeDelta) -> Self { Value::TimeDelta(v) }
}
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self { Value::Json(v) }
}

/// Conversion between the external form of a value and the internal form
/// kept by a variable. Both directions default to the identity.
pub trait VariableKind: fmt::Debug {
    fn name(&self) -> &'static str;
    fn parse_set(&self, value: Value, _from_db: bool) -> Result<Value> {
        Ok(value)
    }
    fn parse_get(&self, value: &Value, _to_db: bool) -> Result<Value> {
        Ok(value.clone())
    }
}

fn expected(kind: &str, value: &Value) -> SquallError {
    SquallError::Type(format!("Expected {}, found {}: {:?}", kind, value.type_name(), value))
}

// ------------- Kinds --------------
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyKind;
impl VariableKind for AnyKind {
    fn name(&self) -> &'static str { "any" }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BoolKind;
impl VariableKind for BoolKind {
    fn name(&self) -> &'static str { "bool" }
    fn parse_set(&self, value: Value, _from_db: bool) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            Value::Float(x) => Ok(Value::Bool(x != 0.0)),
            Value::Decimal(d) => Ok(Value::Bool(d != BigDecimal::from(0))),
            other => Err(expected("bool", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntKind;
impl VariableKind for IntKind {
    fn name(&self) -> &'static str { "int" }
    fn parse_set(&self, value: Value, _from_db: bool) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(x) => Ok(Value::Int(x.trunc() as i64)),
            Value::Decimal(d) => d
                .to_i64()
                .map(Value::Int)
                .ok_or_else(|| SquallError::Value(format!("Decimal {} does not fit an int", d))),
            other => Err(expected("int", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FloatKind;
impl VariableKind for FloatKind {
    fn name(&self) -> &'static str { "float" }
    fn parse_set(&self, value: Value, _from_db: bool) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Float(b as i64 as f64)),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Float(x) => Ok(Value::Float(x)),
            Value::Decimal(d) => d
                .to_f64()
                .map(Value::Float)
                .ok_or_else(|| SquallError::Value(format!("Decimal {} does not fit a float", d))),
            other => Err(expected("float", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DecimalKind;
impl VariableKind for DecimalKind {
    fn name(&self) -> &'static str { "decimal" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::Text(s) if from_db => BigDecimal::from_str(&s)
                .map(Value::Decimal)
                .map_err(|e| SquallError::Value(format!("Invalid decimal {:?}: {}", s, e))),
            Value::Int(i) => Ok(Value::Decimal(BigDecimal::from(i))),
            Value::Decimal(d) => Ok(Value::Decimal(d)),
            other => Err(expected("decimal", &other)),
        }
    }
    fn parse_get(&self, value: &Value, to_db: bool) -> Result<Value> {
        match value {
            Value::Decimal(d) if to_db => Ok(Value::Text(d.to_string())),
            other => Ok(other.clone()),
        }
    }
}

/// Unicode text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextKind;
impl VariableKind for TextKind {
    fn name(&self) -> &'static str { "text" }
    fn parse_set(&self, value: Value, _from_db: bool) -> Result<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s)),
            other => Err(expected("text", &other)),
        }
    }
}

/// Raw byte strings. Drivers may hand text back for these columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesKind;
impl VariableKind for BytesKind {
    fn name(&self) -> &'static str { "bytes" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::Bytes(b) => Ok(Value::Bytes(b)),
            Value::Text(s) if from_db => Ok(Value::Bytes(s.into_bytes())),
            other => Err(expected("bytes", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeKind;
impl VariableKind for DateTimeKind {
    fn name(&self) -> &'static str { "datetime" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::DateTime(d) => Ok(Value::DateTime(d)),
            Value::Text(s) if from_db => {
                let (date_str, time_str) = s
                    .split_once(' ')
                    .ok_or_else(|| SquallError::Value(format!("Unknown date/time format: {:?}", s)))?;
                Ok(Value::DateTime(parse_date(date_str)?.and_time(parse_time(time_str)?)))
            }
            Value::Int(secs) if !from_db => timestamp(secs as f64),
            Value::Float(secs) if !from_db => timestamp(secs),
            other => Err(expected("datetime", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateKind;
impl VariableKind for DateKind {
    fn name(&self) -> &'static str { "date" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::Date(d) => Ok(Value::Date(d)),
            Value::DateTime(d) if !from_db => Ok(Value::Date(d.date())),
            Value::Text(s) if from_db => {
                let date_str = s.split_once(' ').map_or(s.as_str(), |(d, _)| d);
                Ok(Value::Date(parse_date(date_str)?))
            }
            other => Err(expected("date", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeKind;
impl VariableKind for TimeKind {
    fn name(&self) -> &'static str { "time" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::Time(t) => Ok(Value::Time(t)),
            Value::DateTime(d) if !from_db => Ok(Value::Time(d.time())),
            Value::Text(s) if from_db => {
                let time_str = s.split_once(' ').map_or(s.as_str(), |(_, t)| t);
                Ok(Value::Time(parse_time(time_str)?))
            }
            other => Err(expected("time", &other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeDeltaKind;
impl VariableKind for TimeDeltaKind {
    fn name(&self) -> &'static str { "timedelta" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::TimeDelta(t) => Ok(Value::TimeDelta(t)),
            Value::Text(s) if from_db => Ok(Value::TimeDelta(parse_interval(&s)?)),
            other => Err(expected("timedelta", &other)),
        }
    }
}

/// Maps external member names onto the integers stored in the database.
#[derive(Debug, Clone)]
pub struct EnumKind {
    get_map: HashMap<i64, String, OtherHasher>,
    set_map: HashMap<String, i64, OtherHasher>,
}
impl EnumKind {
    pub fn new(members: &[(&str, i64)]) -> Self {
        Self {
            get_map: members.iter().map(|(name, v)| (*v, name.to_string())).collect(),
            set_map: members.iter().map(|(name, v)| (name.to_string(), *v)).collect(),
        }
    }
}
impl VariableKind for EnumKind {
    fn name(&self) -> &'static str { "enum" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        if from_db {
            return Ok(value);
        }
        value
            .as_text()
            .and_then(|name| self.set_map.get(name))
            .map(|v| Value::Int(*v))
            .ok_or_else(|| SquallError::Value(format!("Invalid enum value: {:?}", value)))
    }
    fn parse_get(&self, value: &Value, to_db: bool) -> Result<Value> {
        if to_db {
            return Ok(value.clone());
        }
        let name = match value {
            Value::Int(v) => self.get_map.get(v),
            _ => None,
        };
        name.map(|name| Value::Text(name.clone()))
            .ok_or_else(|| SquallError::Value(format!("Invalid enum value: {:?}", value)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonKind;
impl VariableKind for JsonKind {
    fn name(&self) -> &'static str { "json" }
    fn parse_set(&self, value: Value, from_db: bool) -> Result<Value> {
        match value {
            Value::Json(j) => Ok(Value::Json(j)),
            Value::Text(s) if from_db => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| SquallError::Value(format!("Invalid JSON {:?}: {}", s, e))),
            other => Err(expected("json", &other)),
        }
    }
    fn parse_get(&self, value: &Value, to_db: bool) -> Result<Value> {
        match value {
            Value::Json(j) if to_db => Ok(Value::Text(j.to_string())),
            other => Ok(other.clone()),
        }
    }
}

/// The kind a literal of this value would be bound as when used as a parameter.
pub fn kind_of(value: &Value) -> Rc<dyn VariableKind> {
    match value {
        Value::Bool(_) => Rc::new(BoolKind),
        Value::Int(_) => Rc::new(IntKind),
        Value::Float(_) => Rc::new(FloatKind),
        Value::Decimal(_) => Rc::new(DecimalKind),
        Value::Text(_) => Rc::new(TextKind),
        Value::Bytes(_) => Rc::new(BytesKind),
        Value::DateTime(_) => Rc::new(DateTimeKind),
        Value::Date(_) => Rc::new(DateKind),
        Value::Time(_) => Rc::new(TimeKind),
        Value::TimeDelta(_) => Rc::new(TimeDeltaKind),
        Value::Json(_) => Rc::new(JsonKind),
    }
}

// ------------- Parsing helpers --------------
fn timestamp(secs: f64) -> Result<Value> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|d| Value::DateTime(d.naive_utc()))
        .ok_or_else(|| SquallError::Value(format!("Timestamp out of range: {}", secs)))
}

fn number<T: FromStr>(s: &str, what: &str, whole: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| SquallError::Value(format!("Unknown {} format: {:?}", what, whole)))
}

pub fn parse_date(date_str: &str) -> Result<NaiveDate> {
    let mut parts = date_str.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(SquallError::Value(format!("Unknown date format: {:?}", date_str)));
    };
    NaiveDate::from_ymd_opt(
        number(y, "date", date_str)?,
        number(m, "date", date_str)?,
        number(d, "date", date_str)?,
    )
    .ok_or_else(|| SquallError::Value(format!("Invalid date: {:?}", date_str)))
}

fn time_parts(time_str: &str) -> Result<(i64, i64, i64, i64)> {
    let parts: Vec<&str> = time_str.split(':').collect();
    let (hour, minute, second) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(SquallError::Value(format!("Unknown time format: {:?}", time_str))),
    };
    let (second, microsecond) = match second.split_once('.') {
        Some((s, frac)) => {
            let frac: String = frac.chars().take(6).collect();
            let micro: i64 = number(&frac, "time", time_str)?;
            (s, micro * 10i64.pow((6 - frac.len()) as u32))
        }
        None => (second, 0),
    };
    Ok((
        number(hour, "time", time_str)?,
        number(minute, "time", time_str)?,
        number(second, "time", time_str)?,
        microsecond,
    ))
}

pub fn parse_time(time_str: &str) -> Result<NaiveTime> {
    let (h, m, s, micro) = time_parts(time_str)?;
    NaiveTime::from_hms_micro_opt(h as u32, m as u32, s as u32, micro as u32)
        .ok_or_else(|| SquallError::Value(format!("Invalid time: {:?}", time_str)))
}

lazy_static! {
    static ref INTERVAL_TOKEN: Regex = Regex::new(
        r"[-+]?\d\d?:\d\d?(?::\d\d?)?(?:\.\d+)?|[-+]?\d+(?:\.\d+)?|[^\s,\d+-][^\s,\d]*"
    ).unwrap();
}

fn interval_unit(unit: &str) -> Option<f64> {
    let micros = match unit {
        "d" | "day" | "days" => 86_400_000_000.0,
        "h" | "hour" | "hours" => 3_600_000_000.0,
        "m" | "min" | "minute" | "minutes" => 60_000_000.0,
        "s" | "sec" | "second" | "seconds" => 1_000_000.0,
        "ms" | "millisecond" | "milliseconds" => 1_000.0,
        "microsecond" | "microseconds" => 1.0,
        _ => return None,
    };
    Some(micros)
}

fn micros(amount: f64) -> TimeDelta {
    TimeDelta::microseconds(amount.round() as i64)
}

/// Parses intervals as rendered by databases, e.g. `"1 day 02:03:04"` or
/// `"3 hours, 10 minutes"`. A trailing bare number counts as seconds.
pub fn parse_interval(interval: &str) -> Result<TimeDelta> {
    let mut result = TimeDelta::zero();
    let mut value: Option<f64> = None;
    for token in INTERVAL_TOKEN.find_iter(interval).map(|m| m.as_str()) {
        if token.contains(':') {
            if let Some(days) = value.take() {
                result = result + micros(days * 86_400_000_000.0);
            }
            let (h, m, s, micro) = time_parts(token)?;
            result = result
                + TimeDelta::hours(h)
                + TimeDelta::minutes(m)
                + TimeDelta::seconds(s)
                + TimeDelta::microseconds(micro);
        } else if value.is_none() {
            value = Some(token.parse::<f64>().map_err(|_| {
                SquallError::Value(format!(
                    "Expected an interval value rather than {:?} in interval {:?}",
                    token, interval
                ))
            })?);
        } else {
            let unit = interval_unit(token).ok_or_else(|| {
                SquallError::Value(format!(
                    "Unsupported interval unit {:?} in interval {:?}",
                    token, interval
                ))
            })?;
            if let Some(amount) = value.take() {
                result = result + micros(amount * unit);
            }
        }
    }
    if let Some(seconds) = value {
        result = result + micros(seconds * 1_000_000.0);
    }
    Ok(result)
}
