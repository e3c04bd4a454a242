//! Typed parameters and parameter groups.

use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, IndexSetH, ParameterGroupH};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A calendar date, used by `Time` parameters.
pub type Date = NaiveDate;

/// Build a date, rejecting days that do not exist.
pub fn date(year: i32, month: u32, day: u32) -> CatchmentResult<Date> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CatchmentError::InvalidDate(format!("{:04}-{:02}-{:02}", year, month, day)))
}

/// The type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Real,
    UInt,
    Bool,
    Time,
    Enum,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::Real => "real",
            ParameterType::UInt => "uint",
            ParameterType::Bool => "bool",
            ParameterType::Time => "time",
            ParameterType::Enum => "enum",
        };
        write!(f, "{}", name)
    }
}

/// A parameter value. Stored unboxed so parameter storage is a flat array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Real(f64),
    UInt(u64),
    Bool(bool),
    Time(Date),
    /// Position of the selected variant in the parameter's variant list.
    Enum(u32),
}

impl ParameterValue {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::Real(_) => ParameterType::Real,
            ParameterValue::UInt(_) => ParameterType::UInt,
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Time(_) => ParameterType::Time,
            ParameterValue::Enum(_) => ParameterType::Enum,
        }
    }

    /// The neutral value of a type, returned while tracing.
    pub fn neutral(parameter_type: ParameterType) -> Self {
        match parameter_type {
            ParameterType::Real => ParameterValue::Real(0.0),
            ParameterType::UInt => ParameterValue::UInt(0),
            ParameterType::Bool => ParameterValue::Bool(false),
            ParameterType::Time => ParameterValue::Time(Date::default()),
            ParameterType::Enum => ParameterValue::Enum(0),
        }
    }

    /// Numeric view of the value. Dates convert to their day of the year.
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParameterValue::Real(v) => v,
            ParameterValue::UInt(v) => v as f64,
            ParameterValue::Bool(v) => f64::from(u8::from(v)),
            ParameterValue::Time(d) => f64::from(d.ordinal()),
            ParameterValue::Enum(v) => f64::from(v),
        }
    }

    pub fn as_u64(&self) -> u64 {
        match *self {
            ParameterValue::UInt(v) => v,
            ParameterValue::Enum(v) => u64::from(v),
            ParameterValue::Bool(v) => u64::from(v),
            other => other.as_f64().max(0.0) as u64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            ParameterValue::Bool(v) => v,
            other => other.as_f64() != 0.0,
        }
    }

    pub fn as_date(&self) -> Date {
        match *self {
            ParameterValue::Time(d) => d,
            _ => Date::default(),
        }
    }

    /// Convert a computed number into a value of the given type.
    ///
    /// Dates can not be computed, so `Time` gives `None`.
    pub fn from_f64(parameter_type: ParameterType, value: f64) -> Option<Self> {
        Some(match parameter_type {
            ParameterType::Real => ParameterValue::Real(value),
            ParameterType::UInt => ParameterValue::UInt(value.max(0.0).round() as u64),
            ParameterType::Bool => ParameterValue::Bool(value != 0.0),
            ParameterType::Enum => ParameterValue::Enum(value.max(0.0).round() as u32),
            ParameterType::Time => return None,
        })
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Real(v) => write!(f, "{}", v),
            ParameterValue::UInt(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Time(d) => write!(f, "{}", d),
            ParameterValue::Enum(v) => write!(f, "variant {}", v),
        }
    }
}

/// Optional lower and upper bounds of a numeric parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub min: Option<ParameterValue>,
    pub max: Option<ParameterValue>,
}

impl ParameterBounds {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, value: &ParameterValue) -> bool {
        let v = value.as_f64();
        let above_min = self.min.map_or(true, |m| v >= m.as_f64());
        let below_max = self.max.map_or(true, |m| v <= m.as_f64());
        above_min && below_max
    }
}

/// A group of parameters sharing the same index sets.
#[derive(Debug, Clone)]
pub struct ParameterGroupSpec {
    pub index_sets: Vec<IndexSetH>,
}

/// Registration details of a parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub group: ParameterGroupH,
    pub parameter_type: ParameterType,
    pub default: ParameterValue,
    pub bounds: ParameterBounds,
    pub unit: String,
    pub description: String,
    /// Variant names for `Enum` parameters.
    pub variants: Vec<String>,
    /// Initial-value equation that computes this parameter, if any.
    pub computed_by: Option<EquationH>,
}

impl ParameterSpec {
    pub fn new(group: ParameterGroupH, default: ParameterValue) -> Self {
        Self {
            group,
            parameter_type: default.parameter_type(),
            default,
            bounds: ParameterBounds::default(),
            unit: String::new(),
            description: String::new(),
            variants: vec![],
            computed_by: None,
        }
    }

    /// Checks a value against the declared bounds.
    pub fn in_bounds(&self, value: &ParameterValue) -> bool {
        self.bounds.contains(value)
    }
}
