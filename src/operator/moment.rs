//! `$moment`: date arithmetic and formatting on a chained UTC date instance.
//!
//! ```json
//! {"$moment": ["2020-01-01", {"add": [1, "day"]}, {"toISOString": []}]}
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};

use super::{Api, ApiCall, ApiOperator, Arity, ParsedCommand};
use crate::error::{Fault, FaultResult};
use crate::eval::ExecutionContext;
use crate::types::{CastOptions, TypeKind};
use crate::value::{format_iso, Value};

const DEFAULT_FORMAT: &str = "YYYY-MM-DDTHH:mm:ss[Z]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Year,
    Quarter,
    Month,
    Week,
    IsoWeek,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl Unit {
    fn parse(unit: &str) -> Option<Unit> {
        let unit = match unit {
            "y" => return Some(Unit::Year),
            "Q" => return Some(Unit::Quarter),
            "M" => return Some(Unit::Month),
            "w" => return Some(Unit::Week),
            "W" => return Some(Unit::IsoWeek),
            "d" | "D" => return Some(Unit::Day),
            "h" => return Some(Unit::Hour),
            "m" => return Some(Unit::Minute),
            "s" => return Some(Unit::Second),
            "ms" => return Some(Unit::Millisecond),
            other => other.to_lowercase(),
        };
        Some(match unit.trim_end_matches('s') {
            "year" => Unit::Year,
            "quarter" => Unit::Quarter,
            "month" => Unit::Month,
            "week" => Unit::Week,
            "isoweek" => Unit::IsoWeek,
            "day" | "date" => Unit::Day,
            "hour" => Unit::Hour,
            "minute" => Unit::Minute,
            "second" => Unit::Second,
            "millisecond" => Unit::Millisecond,
            _ => return None,
        })
    }

    fn millis(&self) -> Option<i64> {
        match self {
            Unit::Week | Unit::IsoWeek => Some(7 * 86_400_000),
            Unit::Day => Some(86_400_000),
            Unit::Hour => Some(3_600_000),
            Unit::Minute => Some(60_000),
            Unit::Second => Some(1_000),
            Unit::Millisecond => Some(1),
            Unit::Year | Unit::Quarter | Unit::Month => None,
        }
    }

    fn months(&self) -> Option<i64> {
        match self {
            Unit::Year => Some(12),
            Unit::Quarter => Some(3),
            Unit::Month => Some(1),
            _ => None,
        }
    }
}

fn unit_arg(call: &ApiCall, value: &Value) -> FaultResult<Unit> {
    let name = value
        .as_str()
        .ok_or_else(|| call.invalid("unit must be a string"))?;
    Unit::parse(name).ok_or_else(|| call.invalid(format!("Invalid unit: {}", name)))
}

fn optional_unit(call: &ApiCall, value: &Value) -> FaultResult<Option<Unit>> {
    if value.is_nullish() {
        Ok(None)
    } else {
        unit_arg(call, value).map(Some)
    }
}

fn number_arg(call: &ApiCall, value: &Value, what: &str) -> FaultResult<f64> {
    TypeKind::Number
        .cast(value, &CastOptions::default())
        .ok()
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .ok_or_else(|| call.invalid(format!("{} must be a number", what)))
}

fn to_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Undefined => Some(Utc::now()),
        other => match TypeKind::Date.cast(other, &CastOptions::default()) {
            Ok(Value::Date(d)) => Some(d),
            _ => None,
        },
    }
}

fn instance_date(call: &ApiCall, instance: &Value) -> FaultResult<DateTime<Utc>> {
    instance
        .as_date()
        .copied()
        .ok_or_else(|| call.invalid(format!("expects a date instance, got {}", instance.type_name())))
}

fn date_arg(call: &ApiCall, value: &Value) -> FaultResult<DateTime<Utc>> {
    to_date(value).ok_or_else(|| call.invalid("Invalid date"))
}

fn add_months(date: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        date.checked_add_months(magnitude)
    } else {
        date.checked_sub_months(magnitude)
    }
}

/// Widest span chrono dates can move by, in milliseconds.
const MAX_SHIFT_MILLIS: f64 = 8.64e15;

fn millis_delta(millis: f64) -> Option<Duration> {
    if !millis.is_finite() || millis.abs() > MAX_SHIFT_MILLIS {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

fn shift(date: DateTime<Utc>, amount: f64, unit: Unit) -> Option<DateTime<Utc>> {
    match (unit.months(), unit.millis()) {
        (Some(months), _) => {
            let whole = amount.round();
            if whole.abs() > u32::MAX as f64 {
                return None;
            }
            add_months(date, (whole as i64).checked_mul(months)?)
        }
        (_, Some(ms)) if matches!(unit, Unit::Day | Unit::Week | Unit::IsoWeek) => {
            date.checked_add_signed(millis_delta(amount.round() * ms as f64)?)
        }
        (_, Some(ms)) => date.checked_add_signed(millis_delta((amount * ms as f64).round())?),
        _ => None,
    }
}

fn add(call: &ApiCall, instance: &Value, args: &[Value], sign: f64) -> FaultResult<Value> {
    let mut date = instance_date(call, instance)?;
    let mut steps: Vec<(f64, Unit)> = match &args[0] {
        Value::Object(map) => map
            .iter()
            .map(|(unit, amount)| -> FaultResult<(f64, Unit)> {
                Ok((
                    number_arg(call, amount, "amount")?,
                    Unit::parse(unit).ok_or_else(|| call.invalid(format!("Invalid unit: {}", unit)))?,
                ))
            })
            .collect::<FaultResult<_>>()?,
        amount => vec![(number_arg(call, amount, "amount")?, unit_arg(call, &args[1])?)],
    };
    // time of day first, then days, then calendar months
    steps.sort_by_key(|(_, unit)| match unit {
        Unit::Year | Unit::Quarter | Unit::Month => 2,
        Unit::Week | Unit::IsoWeek | Unit::Day => 1,
        _ => 0,
    });
    for (amount, unit) in steps {
        date = shift(date, amount * sign, unit).ok_or_else(|| call.invalid("date out of range"))?;
    }
    Ok(Value::Date(date))
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn start_of(date: DateTime<Utc>, unit: Unit) -> Option<DateTime<Utc>> {
    let day = date.date_naive();
    match unit {
        Unit::Year => midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1)?),
        Unit::Quarter => {
            midnight(NaiveDate::from_ymd_opt(date.year(), (date.month0() / 3) * 3 + 1, 1)?)
        }
        Unit::Month => midnight(NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?),
        Unit::Week => midnight(day - Duration::days(day.weekday().num_days_from_sunday() as i64)),
        Unit::IsoWeek => {
            midnight(day - Duration::days(day.weekday().num_days_from_monday() as i64))
        }
        Unit::Day => midnight(day),
        Unit::Hour => date.with_nanosecond(0)?.with_second(0)?.with_minute(0),
        Unit::Minute => date.with_nanosecond(0)?.with_second(0),
        Unit::Second => date.with_nanosecond(0),
        Unit::Millisecond => date.with_nanosecond((date.nanosecond() / 1_000_000) * 1_000_000),
    }
}

fn end_of(date: DateTime<Utc>, unit: Unit) -> Option<DateTime<Utc>> {
    let start = start_of(date, unit)?;
    let next = match unit {
        Unit::Millisecond => return Some(start),
        _ => shift(start, 1.0, unit)?,
    };
    Some(next - Duration::milliseconds(1))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Getter without an argument, setter (with overflow into larger units)
/// with one.
fn get_set(
    call: &ApiCall,
    instance: &Value,
    arg: &Value,
    get: fn(&DateTime<Utc>) -> i64,
    unit: Unit,
) -> FaultResult<Value> {
    let date = instance_date(call, instance)?;
    let current = get(&date);
    if arg.is_nullish() {
        return Ok(Value::Number(current as f64));
    }
    let target = number_arg(call, arg, "value")?.trunc();
    let delta = target - current as f64;
    let shifted = match unit {
        Unit::Year => shift(date, delta * 12.0, Unit::Month),
        Unit::Month => shift(date, delta, Unit::Month),
        _ => shift(date, delta, unit),
    };
    shifted
        .map(Value::Date)
        .ok_or_else(|| call.invalid("date out of range"))
}

/// moment's month difference: whole months plus the fraction of the
/// surrounding month.
fn month_diff(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<f64> {
    let whole = (b.year() - a.year()) as i64 * 12 + (b.month() as i64 - a.month() as i64);
    let anchor = add_months(a, whole)?;
    let millis = |d: DateTime<Utc>| d.timestamp_millis() as f64;
    let adjust = if b < anchor {
        let anchor2 = add_months(a, whole - 1)?;
        (millis(b) - millis(anchor)) / (millis(anchor) - millis(anchor2))
    } else {
        let anchor2 = add_months(a, whole + 1)?;
        (millis(b) - millis(anchor)) / (millis(anchor2) - millis(anchor))
    };
    let result = -(whole as f64 + adjust);
    Some(if result == 0.0 { 0.0 } else { result })
}

fn diff(call: &ApiCall, instance: &Value, args: &[Value]) -> FaultResult<Value> {
    let this = instance_date(call, instance)?;
    let that = date_arg(call, &args[0])?;
    let unit = optional_unit(call, &args[1])?.unwrap_or(Unit::Millisecond);
    let precise = args[2].is_truthy();

    let output = match (unit.months(), unit.millis()) {
        (Some(months), _) => {
            month_diff(this, that).ok_or_else(|| call.invalid("date out of range"))? / months as f64
        }
        (_, Some(ms)) => {
            (this.timestamp_millis() - that.timestamp_millis()) as f64 / ms as f64
        }
        _ => return Err(Fault::internal("unit without length")),
    };
    Ok(Value::Number(if precise { output } else { output.trunc() + 0.0 }))
}

fn compare(
    call: &ApiCall,
    instance: &Value,
    args: &[Value],
    accept: fn(std::cmp::Ordering) -> bool,
) -> FaultResult<Value> {
    let this = instance_date(call, instance)?;
    let other = date_arg(call, &args[0])?;
    let (a, b) = match optional_unit(call, &args[1])? {
        Some(unit) => (
            start_of(this, unit).ok_or_else(|| call.invalid("date out of range"))?,
            start_of(other, unit).ok_or_else(|| call.invalid("date out of range"))?,
        ),
        None => (this, other),
    };
    Ok(Value::Boolean(accept(a.cmp(&b))))
}

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
const WEEKDAYS: [&str; 7] = [
    "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
];

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Week of year with weeks starting on Sunday and week 1 holding Jan 1.
fn locale_week(date: &DateTime<Utc>) -> u32 {
    let day = date.date_naive();
    let week_start = day - Duration::days(day.weekday().num_days_from_sunday() as i64);
    if (week_start + Duration::days(6)).year() > day.year() {
        return 1;
    }
    let offset = NaiveDate::from_ymd_opt(day.year(), 1, 1)
        .map_or(0, |jan1| jan1.weekday().num_days_from_sunday());
    (day.ordinal0() + offset) / 7 + 1
}

const FORMAT_TOKENS: [&str; 41] = [
    "YYYY", "YY", "Q", "MMMM", "MMM", "MM", "M", "DDDD", "DDD", "Do", "DD", "D", "dddd", "ddd",
    "dd", "d", "E", "e", "HH", "H", "hh", "h", "kk", "k", "mm", "m", "ss", "s", "SSS", "SS", "S",
    "A", "a", "ZZ", "Z", "X", "x", "WW", "W", "ww", "w",
];

fn render_token(date: &DateTime<Utc>, token: &str) -> String {
    let hour12 = match date.hour() % 12 {
        0 => 12,
        h => h,
    };
    let millis = date.timestamp_subsec_millis();
    let weekday = date.weekday().num_days_from_sunday() as usize;
    match token {
        "YYYY" => format!("{:04}", date.year()),
        "YY" => format!("{:02}", date.year().rem_euclid(100)),
        "Q" => (date.month0() / 3 + 1).to_string(),
        "MMMM" => MONTHS[date.month0() as usize].to_string(),
        "MMM" => MONTHS[date.month0() as usize][..3].to_string(),
        "MM" => format!("{:02}", date.month()),
        "M" => date.month().to_string(),
        "DDDD" => format!("{:03}", date.ordinal()),
        "DDD" => date.ordinal().to_string(),
        "Do" => ordinal(date.day()),
        "DD" => format!("{:02}", date.day()),
        "D" => date.day().to_string(),
        "dddd" => WEEKDAYS[weekday].to_string(),
        "ddd" => WEEKDAYS[weekday][..3].to_string(),
        "dd" => WEEKDAYS[weekday][..2].to_string(),
        "d" | "e" => weekday.to_string(),
        "E" => date.weekday().number_from_monday().to_string(),
        "HH" => format!("{:02}", date.hour()),
        "H" => date.hour().to_string(),
        "hh" => format!("{:02}", hour12),
        "h" => hour12.to_string(),
        "kk" => format!("{:02}", date.hour() + if date.hour() == 0 { 24 } else { 0 }),
        "k" => (date.hour() + if date.hour() == 0 { 24 } else { 0 }).to_string(),
        "mm" => format!("{:02}", date.minute()),
        "m" => date.minute().to_string(),
        "ss" => format!("{:02}", date.second()),
        "s" => date.second().to_string(),
        "SSS" => format!("{:03}", millis),
        "SS" => format!("{:02}", millis / 10),
        "S" => (millis / 100).to_string(),
        "A" => (if date.hour() < 12 { "AM" } else { "PM" }).to_string(),
        "a" => (if date.hour() < 12 { "am" } else { "pm" }).to_string(),
        "ZZ" => "+0000".to_string(),
        "Z" => "+00:00".to_string(),
        "X" => date.timestamp().to_string(),
        "x" => date.timestamp_millis().to_string(),
        "WW" => format!("{:02}", date.iso_week().week()),
        "W" => date.iso_week().week().to_string(),
        "ww" => format!("{:02}", locale_week(date)),
        "w" => locale_week(date).to_string(),
        _ => token.to_string(),
    }
}

/// Renders a moment format string; `[...]` escapes literal text.
pub fn format_date(date: &DateTime<Utc>, pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end]);
                rest = &rest[end + 1..];
                continue;
            }
        }
        if let Some(token) = FORMAT_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str(&render_token(date, token));
            rest = &rest[token.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

pub struct MomentOperator;

impl MomentOperator {
    fn api_table() -> Api {
        Api::builder()
            .sync_command("add", Arity::Fixed(2), |call, instance, args| {
                add(call, instance, args, 1.0)
            })
            .sync_command("subtract", Arity::Fixed(2), |call, instance, args| {
                add(call, instance, args, -1.0)
            })
            .sync_command("startOf", Arity::Fixed(1), |call, instance, args| {
                let unit = unit_arg(call, &args[0])?;
                start_of(instance_date(call, instance)?, unit)
                    .map(Value::Date)
                    .ok_or_else(|| call.invalid("date out of range"))
            })
            .sync_command("endOf", Arity::Fixed(1), |call, instance, args| {
                let unit = unit_arg(call, &args[0])?;
                end_of(instance_date(call, instance)?, unit)
                    .map(Value::Date)
                    .ok_or_else(|| call.invalid("date out of range"))
            })
            .sync_command("year", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.year() as i64, Unit::Year)
            })
            .sync_command("month", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.month0() as i64, Unit::Month)
            })
            .sync_command("date", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.day() as i64, Unit::Day)
            })
            .sync_command("day", Arity::Fixed(1), |call, instance, args| {
                get_set(
                    call,
                    instance,
                    &args[0],
                    |d| d.weekday().num_days_from_sunday() as i64,
                    Unit::Day,
                )
            })
            .sync_command("hour", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.hour() as i64, Unit::Hour)
            })
            .sync_command("minute", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.minute() as i64, Unit::Minute)
            })
            .sync_command("second", Arity::Fixed(1), |call, instance, args| {
                get_set(call, instance, &args[0], |d| d.second() as i64, Unit::Second)
            })
            .sync_command("millisecond", Arity::Fixed(1), |call, instance, args| {
                get_set(
                    call,
                    instance,
                    &args[0],
                    |d| d.timestamp_subsec_millis() as i64,
                    Unit::Millisecond,
                )
            })
            .sync_command("format", Arity::Fixed(1), |call, instance, args| {
                let date = instance_date(call, instance)?;
                let pattern = match &args[0] {
                    Value::String(s) => s.as_str(),
                    v if v.is_nullish() => DEFAULT_FORMAT,
                    _ => return Err(call.invalid("format must be a string")),
                };
                Ok(Value::from(format_date(&date, pattern)))
            })
            .sync_command("toISOString", Arity::Fixed(0), |call, instance, _| {
                Ok(Value::from(format_iso(&instance_date(call, instance)?)))
            })
            .sync_command("toJSON", Arity::Fixed(0), |call, instance, _| {
                Ok(Value::from(format_iso(&instance_date(call, instance)?)))
            })
            .sync_command("valueOf", Arity::Fixed(0), |call, instance, _| {
                Ok(Value::Number(
                    instance_date(call, instance)?.timestamp_millis() as f64,
                ))
            })
            .sync_command("unix", Arity::Fixed(0), |call, instance, _| {
                Ok(Value::Number(instance_date(call, instance)?.timestamp() as f64))
            })
            .sync_command("toDate", Arity::Fixed(0), |call, instance, _| {
                instance_date(call, instance).map(Value::Date)
            })
            .sync_command("clone", Arity::Fixed(0), |call, instance, _| {
                instance_date(call, instance).map(Value::Date)
            })
            .sync_command("utc", Arity::Fixed(0), |call, instance, _| {
                instance_date(call, instance).map(Value::Date)
            })
            .sync_command("isBefore", Arity::Fixed(2), |call, instance, args| {
                compare(call, instance, args, |o| o.is_lt())
            })
            .sync_command("isAfter", Arity::Fixed(2), |call, instance, args| {
                compare(call, instance, args, |o| o.is_gt())
            })
            .sync_command("isSame", Arity::Fixed(2), |call, instance, args| {
                compare(call, instance, args, |o| o.is_eq())
            })
            .sync_command("isSameOrBefore", Arity::Fixed(2), |call, instance, args| {
                compare(call, instance, args, |o| o.is_le())
            })
            .sync_command("isSameOrAfter", Arity::Fixed(2), |call, instance, args| {
                compare(call, instance, args, |o| o.is_ge())
            })
            .sync_command("diff", Arity::Fixed(3), diff)
            .sync_command("daysInMonth", Arity::Fixed(0), |call, instance, _| {
                let date = instance_date(call, instance)?;
                Ok(Value::Number(days_in_month(date.year(), date.month()) as f64))
            })
            .sync_command("isLeapYear", Arity::Fixed(0), |call, instance, _| {
                Ok(Value::Boolean(is_leap_year(instance_date(call, instance)?.year())))
            })
            .sync_command("isValid", Arity::Fixed(0), |_, instance, _| {
                Ok(Value::Boolean(instance.as_date().is_some()))
            })
            .sync_command("toArray", Arity::Fixed(0), |call, instance, _| {
                let d = instance_date(call, instance)?;
                Ok(Value::Array(
                    [
                        d.year() as i64,
                        d.month0() as i64,
                        d.day() as i64,
                        d.hour() as i64,
                        d.minute() as i64,
                        d.second() as i64,
                        d.timestamp_subsec_millis() as i64,
                    ]
                    .into_iter()
                    .map(Value::from)
                    .collect(),
                ))
            })
            .build()
    }
}

#[async_trait]
impl ApiOperator for MomentOperator {
    fn name(&self) -> &'static str {
        "$moment"
    }

    fn api(&self) -> Api {
        Self::api_table()
    }

    fn multiple_commands(&self) -> bool {
        true
    }

    fn chain_commands(&self) -> bool {
        true
    }

    /// Undefined input means now.
    async fn initialize_instance(
        &self,
        _ec: &ExecutionContext,
        input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        to_date(&input)
            .map(Value::Date)
            .ok_or_else(|| Fault::invalid_argument(format!("$moment: invalid date {}", input)))
    }

    async fn finalize_instance(
        &self,
        _ec: &ExecutionContext,
        instance: Value,
        _last: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(instance)
    }
}
