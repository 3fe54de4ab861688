//! Typed named values carried by devices.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::quantity::Quantity;

/// Value name for the number of active pumps.
pub const ACTIVE_COUNT: &str = "activeCount";
/// Value name for the water alarm flag.
pub const ALARM: &str = "alarm";
/// Value name for the pressure reading.
pub const PRESSURE: &str = "pressure";

/// Value type tag. Exactly one is active for a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValueType {
    Integer,
    #[default]
    Float,
    Boolean,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "Integer",
            ValueType::Float => "Float",
            ValueType::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of the value names the system knows how to create on first write.
pub fn known_value_type(name: &str) -> Option<ValueType> {
    match name {
        ALARM => Some(ValueType::Boolean),
        ACTIVE_COUNT => Some(ValueType::Integer),
        PRESSURE => Some(ValueType::Float),
        _ => None,
    }
}

/// A named, typed scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    pub value: Quantity,
}

impl Value {
    pub fn new(name: impl Into<String>, value_type: ValueType, value: Quantity) -> Self {
        Self {
            name: name.into(),
            value_type,
            value,
        }
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, ValueType::Integer, Quantity::from_i64(value))
    }

    pub fn float(name: impl Into<String>, value: Quantity) -> Self {
        Self::new(name, ValueType::Float, value)
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, ValueType::Boolean, Quantity::from_bool(value))
    }

    /// Check that the numeric payload agrees with the type tag.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_value("", "value name must not be empty"));
        }
        match self.value_type {
            ValueType::Float => Ok(()),
            ValueType::Integer if self.value.is_integer() => Ok(()),
            ValueType::Integer => Err(CoreError::invalid_value(
                &self.name,
                format!("{} is not an integer", self.value),
            )),
            ValueType::Boolean => match self.value.to_i64() {
                Some(0) | Some(1) => Ok(()),
                _ => Err(CoreError::invalid_value(
                    &self.name,
                    format!("{} is not a boolean (0 or 1)", self.value),
                )),
            },
        }
    }
}

/// Find a value by name.
pub fn find_value<'a>(values: &'a [Value], name: &str) -> Option<&'a Value> {
    values.iter().find(|v| v.name == name)
}

/// Insert or replace a value by name, keeping list order.
///
/// Returns `true` when the list changed.
pub fn set_value(values: &mut Vec<Value>, value: Value) -> bool {
    match values.iter_mut().find(|v| v.name == value.name) {
        Some(existing) if *existing == value => false,
        Some(existing) => {
            *existing = value;
            true
        }
        None => {
            values.push(value);
            true
        }
    }
}

/// Validate each value and reject duplicate names within one list.
pub fn validate_values(values: &[Value], list: &str) -> Result<()> {
    for (i, value) in values.iter().enumerate() {
        value.validate()?;
        if values[..i].iter().any(|v| v.name == value.name) {
            return Err(CoreError::duplicate_value(&value.name, list));
        }
    }
    Ok(())
}

/// Whether two lists hold the same values, ignoring order.
pub fn same_values(left: &[Value], right: &[Value]) -> bool {
    left.len() == right.len() && left.iter().all(|v| find_value(right, &v.name) == Some(v))
}
