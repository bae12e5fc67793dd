//! Small serialization helpers shared by every repository impl: JSON text
//! columns and `Decimal::to_string()`/`from_str()` round-trips, the same
//! idiom the teacher uses for decimal-valued columns.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};
use std::str::FromStr;

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize JSON column")
}

pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).context("failed to deserialize JSON column")
}

pub fn decimal_to_text(value: Decimal) -> String {
    value.to_string()
}

pub fn decimal_from_text(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("invalid decimal column value: {text}"))
}

pub fn timestamp_to_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub fn timestamp_from_text(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp column value: {text}"))
}
