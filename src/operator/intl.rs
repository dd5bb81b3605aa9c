//! `$intl`: a small locale-aware formatting surface.
//!
//! `{"$intl": [1234.5, {"NumberFormat": ["de-DE", {"maximumFractionDigits": 1}]}]}`
//!
//! Only the separators, currency symbols, date layouts and plural rules of a
//! handful of languages are known; everything else formats like English.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Api, ApiCall, ApiOperator, Arity, ParsedCommand};
use crate::error::FaultResult;
use crate::eval::ExecutionContext;
use crate::types::{CastOptions, TypeKind};
use crate::value::Value;

fn canonicalize(call: &ApiCall, tag: &str) -> FaultResult<String> {
    let mut parts = tag.split(['-', '_']);
    let language = parts
        .next()
        .filter(|l| (2..=8).contains(&l.len()) && l.chars().all(|c| c.is_ascii_alphabetic()))
        .ok_or_else(|| call.invalid(format!("Incorrect locale information provided: {}", tag)))?;
    let mut canonical = vec![language.to_ascii_lowercase()];
    for part in parts {
        let formatted = match part.len() {
            4 if part.chars().all(|c| c.is_ascii_alphabetic()) => {
                let mut chars = part.chars();
                chars
                    .next()
                    .map(|first| {
                        first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                    })
                    .unwrap_or_default()
            }
            2 if part.chars().all(|c| c.is_ascii_alphabetic()) => part.to_ascii_uppercase(),
            3 if part.chars().all(|c| c.is_ascii_digit()) => part.to_string(),
            n if n >= 1 && part.chars().all(|c| c.is_ascii_alphanumeric()) => {
                part.to_ascii_lowercase()
            }
            _ => {
                return Err(call.invalid(format!(
                    "Incorrect locale information provided: {}",
                    tag
                )))
            }
        };
        canonical.push(formatted);
    }
    Ok(canonical.join("-"))
}

/// Canonical tags from a string, an array of strings or nothing (the
/// caller's locale).
fn locales(call: &ApiCall, value: &Value) -> FaultResult<Vec<String>> {
    let raw: Vec<String> = match value {
        Value::Undefined | Value::Null => vec![call.ec.locale()],
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| call.invalid("locales must be strings"))
            })
            .collect::<FaultResult<_>>()?,
        _ => return Err(call.invalid("locales must be a string or an array")),
    };
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let tag = canonicalize(call, &tag)?;
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

fn primary(call: &ApiCall, value: &Value) -> FaultResult<(String, Option<String>)> {
    let tag = locales(call, value)?
        .into_iter()
        .next()
        .unwrap_or_else(|| "en-US".to_string());
    let mut parts = tag.split('-');
    let language = parts.next().unwrap_or("en").to_string();
    let region = parts.find(|p| p.len() == 2).map(str::to_string);
    Ok((language, region))
}

fn separators(language: &str) -> (&'static str, &'static str) {
    match language {
        "de" | "es" | "it" | "nl" | "pt" | "id" | "da" | "tr" => (".", ","),
        "fr" | "nb" | "sv" | "fi" | "cs" | "pl" | "ru" => ("\u{202f}", ","),
        _ => (",", "."),
    }
}

fn option_usize(call: &ApiCall, options: &Value, key: &str) -> FaultResult<Option<usize>> {
    match options.as_object().and_then(|o| o.get(key)) {
        None | Some(Value::Undefined) => Ok(None),
        Some(Value::Number(n)) if (0.0..=20.0).contains(n) => Ok(Some(*n as usize)),
        Some(_) => Err(call.invalid(format!("{} must be a number between 0 and 20", key))),
    }
}

fn option_str<'a>(options: &'a Value, key: &str) -> Option<&'a str> {
    options
        .as_object()
        .and_then(|o| o.get(key))
        .and_then(Value::as_str)
}

fn group(digits: &str, separator: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(c);
    }
    out
}

fn currency_symbol(code: &str) -> String {
    match code {
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        "JPY" | "CNY" => "¥".to_string(),
        "INR" => "₹".to_string(),
        other => format!("{}\u{a0}", other),
    }
}

fn number_format(call: &ApiCall, input: &Value, locale: &Value, options: &Value) -> FaultResult<Value> {
    let number = TypeKind::Number
        .cast(input, &CastOptions::default())
        .map_err(|e| call.invalid(e.reason))?
        .as_f64()
        .unwrap_or(f64::NAN);
    let (language, _) = primary(call, locale)?;
    if !number.is_finite() {
        return Ok(Value::from(if number.is_nan() {
            "NaN".to_string()
        } else if number > 0.0 {
            "∞".to_string()
        } else {
            "-∞".to_string()
        }));
    }

    let style = option_str(options, "style").unwrap_or("decimal");
    let currency = option_str(options, "currency").map(str::to_ascii_uppercase);
    let (scaled, default_max, default_min) = match style {
        "decimal" => (number, 3, 0),
        "percent" => (number * 100.0, 0, 0),
        "currency" => {
            let digits = if currency.as_deref() == Some("JPY") { 0 } else { 2 };
            if currency.is_none() {
                return Err(call.invalid("currency is required with currency style"));
            }
            (number, digits, digits)
        }
        other => return Err(call.invalid(format!("Unknown number style: {}", other))),
    };
    let min = option_usize(call, options, "minimumFractionDigits")?.unwrap_or(default_min);
    let max = option_usize(call, options, "maximumFractionDigits")?
        .unwrap_or(default_max)
        .max(min);
    let grouping = options
        .as_object()
        .and_then(|o| o.get("useGrouping"))
        .map_or(true, Value::is_truthy);

    let fixed = format!("{:.*}", max, scaled.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut frac = frac_part.to_string();
    while frac.len() > min && frac.ends_with('0') {
        frac.pop();
    }
    let (group_sep, decimal_sep) = separators(&language);
    let mut out = if grouping {
        group(int_part, group_sep)
    } else {
        int_part.to_string()
    };
    if !frac.is_empty() {
        out.push_str(decimal_sep);
        out.push_str(&frac);
    }
    let is_zero = out.chars().all(|c| !c.is_ascii_digit() || c == '0');
    let sign = if scaled < 0.0 && !is_zero { "-" } else { "" };

    Ok(Value::from(match (style, currency) {
        ("percent", _) => format!("{}{}%", sign, out),
        ("currency", Some(code)) if decimal_sep == "," => {
            format!("{}{}\u{a0}{}", sign, out, currency_symbol(&code).trim_end())
        }
        ("currency", Some(code)) => format!("{}{}{}", sign, currency_symbol(&code), out),
        _ => format!("{}{}", sign, out),
    }))
}

fn date_layout(language: &str, region: Option<&str>, style: &str) -> &'static str {
    match (language, style) {
        ("en", "full") => "%A, %B %-d, %Y",
        ("en", "long") => "%B %-d, %Y",
        ("en", "medium") => "%b %-d, %Y",
        ("en", _) if matches!(region, Some("US") | None) => "%-m/%-d/%Y",
        ("en", _) => "%d/%m/%Y",
        ("de" | "ru" | "pl" | "fi" | "nb" | "cs" | "tr", _) => "%d.%m.%Y",
        ("ja" | "zh" | "ko", _) => "%Y/%m/%d",
        ("sv" | "lt", _) => "%Y-%m-%d",
        ("nl", _) => "%d-%m-%Y",
        _ => "%d/%m/%Y",
    }
}

fn time_layout(language: &str, style: &str) -> &'static str {
    match (language, style) {
        ("en", "short") => "%-I:%M %p",
        ("en", _) => "%-I:%M:%S %p",
        (_, "short") => "%H:%M",
        _ => "%H:%M:%S",
    }
}

fn date_time_format(call: &ApiCall, input: &Value, locale: &Value, options: &Value) -> FaultResult<Value> {
    let date: DateTime<Utc> = match TypeKind::Date
        .cast(input, &CastOptions::default())
        .map_err(|e| call.invalid(e.reason))?
    {
        Value::Date(d) => d,
        _ => Utc::now(),
    };
    if let Some(zone) = option_str(options, "timeZone") {
        if !zone.eq_ignore_ascii_case("UTC") {
            return Err(call.invalid(format!("Unsupported time zone: {}", zone)));
        }
    }
    let (language, region) = primary(call, locale)?;
    let date_style = option_str(options, "dateStyle");
    let time_style = option_str(options, "timeStyle");
    for style in [date_style, time_style].into_iter().flatten() {
        if !matches!(style, "full" | "long" | "medium" | "short") {
            return Err(call.invalid(format!("Invalid style: {}", style)));
        }
    }

    let mut pieces = Vec::new();
    match (date_style, time_style) {
        (None, None) => pieces.push(date.format(date_layout(&language, region.as_deref(), "short")).to_string()),
        (date_style, time_style) => {
            if let Some(style) = date_style {
                pieces.push(date.format(date_layout(&language, region.as_deref(), style)).to_string());
            }
            if let Some(style) = time_style {
                pieces.push(date.format(time_layout(&language, style)).to_string());
            }
        }
    }
    Ok(Value::from(pieces.join(", ")))
}

fn plural_rules(call: &ApiCall, input: &Value, locale: &Value, options: &Value) -> FaultResult<Value> {
    let n = TypeKind::Number
        .cast(input, &CastOptions::default())
        .map_err(|e| call.invalid(e.reason))?
        .as_f64()
        .unwrap_or(f64::NAN);
    let (language, _) = primary(call, locale)?;
    let ordinal = match option_str(options, "type").unwrap_or("cardinal") {
        "cardinal" => false,
        "ordinal" => true,
        other => return Err(call.invalid(format!("Invalid plural type: {}", other))),
    };
    let integral = n.is_finite() && n.fract() == 0.0;
    let i = n.abs() as u64;

    let category = match (language.as_str(), ordinal) {
        ("ja" | "zh" | "ko" | "th" | "vi" | "id", _) => "other",
        ("en", true) if integral => match (i % 10, i % 100) {
            (1, m) if m != 11 => "one",
            (2, m) if m != 12 => "two",
            (3, m) if m != 13 => "few",
            _ => "other",
        },
        ("fr", true) if integral && i == 1 => "one",
        (_, true) => "other",
        ("fr" | "pt", false) if n.abs() < 2.0 && n.is_finite() && i <= 1 => "one",
        (_, false) if integral && i == 1 => "one",
        _ => "other",
    };
    Ok(Value::from(category))
}

/// The instance is the input; each command formats it.
pub struct IntlOperator;

#[async_trait]
impl ApiOperator for IntlOperator {
    fn name(&self) -> &'static str {
        "$intl"
    }

    fn api(&self) -> Api {
        Api::builder()
            .sync_command("getCanonicalLocales", Arity::Fixed(1), |call, _, args| {
                Ok(Value::Array(
                    locales(call, &args[0])?.into_iter().map(Value::from).collect(),
                ))
            })
            .sync_command("NumberFormat", Arity::Fixed(2), |call, input, args| {
                number_format(call, input, &args[0], &args[1])
            })
            .sync_command("DateTimeFormat", Arity::Fixed(2), |call, input, args| {
                date_time_format(call, input, &args[0], &args[1])
            })
            .sync_command("PluralRules", Arity::Fixed(2), |call, input, args| {
                plural_rules(call, input, &args[0], &args[1])
            })
            .build()
    }

    async fn initialize_instance(
        &self,
        _ec: &ExecutionContext,
        input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(input)
    }
}
