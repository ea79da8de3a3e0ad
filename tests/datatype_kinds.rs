use std::rc::Rc;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde_json::json;

use squall::SquallError;
use squall::datatype::{
    parse_interval, BoolKind, BytesKind, DateKind, DateTimeKind, DecimalKind, EnumKind, FloatKind,
    IntKind, JsonKind, TextKind, TimeDeltaKind, TimeKind, Value, VariableKind,
};
use squall::variable::Variable;

fn from_db(kind: impl VariableKind + 'static, raw: Value) -> Variable {
    let variable = Variable::new(Rc::new(kind));
    variable.set(raw, true).expect("set from db");
    variable
}

#[test]
fn numbers_are_coerced() {
    assert_eq!(IntKind.parse_set(Value::Float(3.9), false).expect("int"), Value::Int(3));
    assert_eq!(IntKind.parse_set(Value::Bool(true), false).expect("int"), Value::Int(1));
    assert_eq!(FloatKind.parse_set(Value::Int(2), false).expect("float"), Value::Float(2.0));
    assert_eq!(BoolKind.parse_set(Value::Int(0), false).expect("bool"), Value::Bool(false));
    let err = IntKind.parse_set(Value::from("1"), false).unwrap_err();
    assert!(matches!(err, SquallError::Type(_)));
    assert!(err.to_string().starts_with("Type error: Expected int, found text"));
}

#[test]
fn decimals_travel_as_text() {
    let variable = from_db(DecimalKind, Value::from("12.50"));
    let expected = BigDecimal::from_str("12.50").expect("decimal");
    assert_eq!(variable.value().expect("get"), Some(Value::Decimal(expected)));
    assert_eq!(variable.get(None, true).expect("to db"), Some(Value::from("12.50")));
    assert!(DecimalKind.parse_set(Value::from("1.0"), false).is_err());
}

#[test]
fn text_and_bytes() {
    assert!(TextKind.parse_set(Value::Bytes(b"x".to_vec()), false).is_err());
    let variable = from_db(BytesKind, Value::from("abc"));
    assert_eq!(variable.value().expect("get"), Some(Value::Bytes(b"abc".to_vec())));
    assert!(BytesKind.parse_set(Value::from("abc"), false).is_err());
}

#[test]
fn datetimes_from_db_and_timestamps() {
    let variable = from_db(DateTimeKind, Value::from("2004-06-19 13:45:01.25"));
    let expected = NaiveDate::from_ymd_opt(2004, 6, 19)
        .and_then(|d| d.and_hms_micro_opt(13, 45, 1, 250_000))
        .expect("datetime");
    assert_eq!(variable.value().expect("get"), Some(Value::DateTime(expected)));

    let epoch = DateTimeKind.parse_set(Value::Int(86_400), false).expect("timestamp");
    let day_two = NaiveDate::from_ymd_opt(1970, 1, 2).and_then(|d| d.and_hms_opt(0, 0, 0)).expect("datetime");
    assert_eq!(epoch, Value::DateTime(day_two));
    assert!(DateTimeKind.parse_set(Value::from("yesterday"), true).is_err());
}

#[test]
fn dates_and_times() {
    let date = from_db(DateKind, Value::from("2021-02-03 10:00:00"));
    assert_eq!(date.value().expect("get"), NaiveDate::from_ymd_opt(2021, 2, 3).map(Value::Date));
    let time = from_db(TimeKind, Value::from("10:20"));
    assert_eq!(time.value().expect("get"), NaiveTime::from_hms_opt(10, 20, 0).map(Value::Time));
    let time = from_db(TimeKind, Value::from("2021-02-03 10:20:30.5"));
    assert_eq!(time.value().expect("get"), NaiveTime::from_hms_micro_opt(10, 20, 30, 500_000).map(Value::Time));
    assert!(DateKind.parse_set(Value::from("2021-13-01"), true).is_err());
}

#[test]
fn intervals() {
    let expected = TimeDelta::days(1) + TimeDelta::hours(2) + TimeDelta::minutes(3) + TimeDelta::seconds(4);
    assert_eq!(parse_interval("1 day 02:03:04").expect("interval"), expected);
    assert_eq!(
        parse_interval("3 hours, 10 minutes").expect("interval"),
        TimeDelta::hours(3) + TimeDelta::minutes(10)
    );
    assert_eq!(parse_interval("1.5 seconds").expect("interval"), TimeDelta::milliseconds(1500));
    assert_eq!(parse_interval("42").expect("interval"), TimeDelta::seconds(42));
    assert!(parse_interval("3 fortnights").is_err());
    let variable = from_db(TimeDeltaKind, Value::from("2 days"));
    assert_eq!(variable.value().expect("get"), Some(Value::TimeDelta(TimeDelta::days(2))));
}

#[test]
fn enums_map_names_to_stored_integers() {
    let kind = EnumKind::new(&[("red", 1), ("green", 2)]);
    let variable = Variable::new(Rc::new(kind));
    variable.set("green", false).expect("set");
    assert_eq!(variable.value().expect("get"), Some(Value::from("green")));
    assert_eq!(variable.get(None, true).expect("to db"), Some(Value::Int(2)));
    let err = variable.set("blue", false).unwrap_err();
    assert!(matches!(err, SquallError::Value(_)));
    variable.set(Value::Int(1), true).expect("from db");
    assert_eq!(variable.value().expect("get"), Some(Value::from("red")));
}

#[test]
fn json_round_trips_through_text() {
    let variable = from_db(JsonKind, Value::from(r#"{"a": [1, 2]}"#));
    assert_eq!(variable.value().expect("get"), Some(Value::Json(json!({"a": [1, 2]}))));
    assert_eq!(variable.get(None, true).expect("to db"), Some(Value::from(r#"{"a":[1,2]}"#)));
    assert!(JsonKind.parse_set(Value::from("{"), true).is_err());
}
