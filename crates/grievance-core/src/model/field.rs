//! Field-kind descriptors and kind-normalized values.
//!
//! Ticket payloads key proposed values by field name. Each name is resolved
//! once against a [`FieldRegistry`] to a [`FieldKind`], and the raw JSON is
//! normalized into a [`FieldValue`] of that kind. Names the registry does not
//! know resolve to [`FieldKind::Opaque`] and keep their raw JSON.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::{fmt, str::FromStr};

use super::status::ParseEnumError;

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    SelectOne,
    SelectMany,
    Bool,
    Date,
    String,
    Integer,
    Decimal,
    Image,
    Opaque,
}

impl FieldKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SelectOne => "SELECT_ONE",
            Self::SelectMany => "SELECT_MANY",
            Self::Bool => "BOOL",
            Self::Date => "DATE",
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::Image => "IMAGE",
            Self::Opaque => "OPAQUE",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT_ONE" => Ok(Self::SelectOne),
            "SELECT_MANY" => Ok(Self::SelectMany),
            "BOOL" | "BOOLEAN" => Ok(Self::Bool),
            "DATE" => Ok(Self::Date),
            "STRING" => Ok(Self::String),
            "INTEGER" => Ok(Self::Integer),
            "DECIMAL" => Ok(Self::Decimal),
            "IMAGE" => Ok(Self::Image),
            "OPAQUE" => Ok(Self::Opaque),
            _ => Err(ParseEnumError {
                expected: "field kind",
                got: s.to_string(),
            }),
        }
    }
}

/// A value normalized according to its field kind.
///
/// `Null` is a distinct state for every kind; in particular a boolean field
/// that is unset is never coerced to `false`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    /// Opaque choice code; label resolution happens outside the engine.
    Code(String),
    Codes(Vec<String>),
    Date(NaiveDate),
    Text(String),
    Integer(i64),
    Decimal(f64),
    /// Reference (URL or storage key) to an image.
    Image(String),
    Opaque(Value),
}

impl FieldValue {
    /// Normalize a raw JSON value for a field of the given kind.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when `raw` cannot be read as
    /// `kind`.
    pub fn normalize(kind: FieldKind, raw: &Value) -> Result<Self, String> {
        if raw.is_null() {
            return Ok(Self::Null);
        }

        match kind {
            FieldKind::SelectOne => match raw {
                Value::String(code) => Ok(Self::Code(code.clone())),
                Value::Number(n) => Ok(Self::Code(n.to_string())),
                other => Err(format!("expected a choice code, got {other}")),
            },
            FieldKind::SelectMany => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(code) => Ok(code.clone()),
                        Value::Number(n) => Ok(n.to_string()),
                        other => Err(format!("expected choice codes, got {other}")),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Codes),
                Value::String(code) => Ok(Self::Codes(vec![code.clone()])),
                other => Err(format!("expected a list of choice codes, got {other}")),
            },
            FieldKind::Bool => match raw {
                Value::Bool(b) => Ok(Self::Bool(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Self::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Self::Bool(false)),
                other => Err(format!("expected a boolean, got {other}")),
            },
            FieldKind::Date => match raw {
                Value::String(s) => parse_date(s).map(Self::Date),
                other => Err(format!("expected a date string, got {other}")),
            },
            FieldKind::String => match raw {
                Value::String(s) => Ok(Self::Text(s.clone())),
                Value::Number(n) => Ok(Self::Text(n.to_string())),
                other => Err(format!("expected text, got {other}")),
            },
            FieldKind::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(Self::Integer)
                    .ok_or_else(|| format!("expected an integer, got {n}")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Integer)
                    .map_err(|e| format!("expected an integer, got '{s}': {e}")),
                other => Err(format!("expected an integer, got {other}")),
            },
            FieldKind::Decimal => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(Self::Decimal)
                    .ok_or_else(|| format!("expected a number, got {n}")),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Self::Decimal)
                    .map_err(|e| format!("expected a number, got '{s}': {e}")),
                other => Err(format!("expected a number, got {other}")),
            },
            FieldKind::Image => match raw {
                Value::String(reference) => Ok(Self::Image(reference.clone())),
                other => Err(format!("expected an image reference, got {other}")),
            },
            FieldKind::Opaque => Ok(Self::Opaque(raw.clone())),
        }
    }

    /// Kind-aware equality used to detect no-op diffs.
    ///
    /// Multi-select values compare as code sets, text compares after trimming,
    /// images compare by reference and opaque values compare structurally.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Codes(a), Self::Codes(b)) => {
                a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
            }
            (Self::Text(a), Self::Text(b)) => a.trim() == b.trim(),
            _ => self == other,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON form as it travels on the wire.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Code(s) | Self::Text(s) | Self::Image(s) => Value::String(s.clone()),
            Self::Codes(codes) => Value::Array(codes.iter().cloned().map(Value::String).collect()),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Integer(n) => Value::from(*n),
            Self::Decimal(n) => Value::from(*n),
            Self::Opaque(raw) => raw.clone(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Code(s) | Self::Text(s) | Self::Image(s) => f.write_str(s),
            Self::Codes(codes) => f.write_str(&codes.join(", ")),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n}"),
            Self::Opaque(raw) => write!(f, "{raw}"),
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let s = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|ts| ts.date())
        .map_err(|_| format!("expected a date, got '{raw}'"))
}

/// Resolves field names to kinds, separately for fixed-schema and flex fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRegistry {
    fixed: BTreeMap<String, FieldKind>,
    flex: BTreeMap<String, FieldKind>,
}

const BUILTIN_FIXED: &[(&str, FieldKind)] = &[
    // individual
    ("full_name", FieldKind::String),
    ("given_name", FieldKind::String),
    ("middle_name", FieldKind::String),
    ("family_name", FieldKind::String),
    ("sex", FieldKind::SelectOne),
    ("birth_date", FieldKind::Date),
    ("estimated_birth_date", FieldKind::Bool),
    ("marital_status", FieldKind::SelectOne),
    ("relationship", FieldKind::SelectOne),
    ("phone_no", FieldKind::String),
    ("phone_no_alternative", FieldKind::String),
    ("email", FieldKind::String),
    ("disability", FieldKind::SelectOne),
    ("observed_disability", FieldKind::SelectMany),
    ("work_status", FieldKind::SelectOne),
    ("pregnant", FieldKind::Bool),
    ("preferred_language", FieldKind::SelectOne),
    ("photo", FieldKind::Image),
    ("payment_delivery_phone_no", FieldKind::String),
    // household
    ("size", FieldKind::Integer),
    ("address", FieldKind::String),
    ("village", FieldKind::String),
    ("country", FieldKind::SelectOne),
    ("country_origin", FieldKind::SelectOne),
    ("admin_area_title", FieldKind::String),
    ("residence_status", FieldKind::SelectOne),
    ("returnee", FieldKind::Bool),
    ("fchild_hoh", FieldKind::Bool),
    ("child_hoh", FieldKind::Bool),
    ("consent", FieldKind::Bool),
    ("start", FieldKind::Date),
    ("first_registration_date", FieldKind::Date),
    ("female_age_group_0_5_count", FieldKind::Integer),
    ("male_age_group_0_5_count", FieldKind::Integer),
    ("pregnant_count", FieldKind::Integer),
    ("latitude", FieldKind::Decimal),
    ("longitude", FieldKind::Decimal),
];

impl FieldRegistry {
    /// Empty registry; every name resolves to nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry seeded with the common individual and household fields.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for (name, kind) in BUILTIN_FIXED {
            registry.fixed.insert((*name).to_string(), *kind);
        }
        registry
    }

    pub fn register_fixed(&mut self, name: impl Into<String>, kind: FieldKind) {
        self.fixed.insert(name.into(), kind);
    }

    pub fn register_flex(&mut self, name: impl Into<String>, kind: FieldKind) {
        self.flex.insert(name.into(), kind);
    }

    #[must_use]
    pub fn with_fixed(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.register_fixed(name, kind);
        self
    }

    #[must_use]
    pub fn with_flex(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.register_flex(name, kind);
        self
    }

    /// Kind descriptor for `name`, if registered.
    #[must_use]
    pub fn lookup(&self, name: &str, is_flex: bool) -> Option<FieldKind> {
        let table = if is_flex { &self.flex } else { &self.fixed };
        table.get(name).copied()
    }
}
