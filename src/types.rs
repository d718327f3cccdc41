//! TEL data types
//!
//! Every expression node evaluates to a `TelType`: a data type plus a
//! constancy flag. `Any` and `NoneOptional` act as wildcards that are
//! compatible with every concrete family.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Data type of a TEL expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelDataType {
    /// No consistent type could be determined
    Unknown,
    /// Produced by optional taxons that resolved to nothing
    NoneOptional,
    /// Compatible with every concrete type
    Any,
    String,
    Integer,
    Numeric,
    DateTime,
    Boolean,
}

impl TelDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelDataType::Unknown => "unknown",
            TelDataType::NoneOptional => "none_optional",
            TelDataType::Any => "any",
            TelDataType::String => "string",
            TelDataType::Integer => "integer",
            TelDataType::Numeric => "numeric",
            TelDataType::DateTime => "datetime",
            TelDataType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for TelDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a TEL expression: data type and constancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelType {
    pub data_type: TelDataType,
    pub is_constant: bool,
}

impl TelType {
    pub fn new(data_type: TelDataType, is_constant: bool) -> Self {
        Self { data_type, is_constant }
    }

    pub fn constant(data_type: TelDataType) -> Self {
        Self::new(data_type, true)
    }

    pub fn column(data_type: TelDataType) -> Self {
        Self::new(data_type, false)
    }

    /// Same constancy, different data type.
    pub fn with_data_type(&self, data_type: TelDataType) -> Self {
        Self::new(data_type, self.is_constant)
    }

    /// Same data type, different constancy.
    pub fn with_constant(&self, is_constant: bool) -> Self {
        Self::new(self.data_type, is_constant)
    }

    pub fn is_any(&self) -> bool {
        matches!(self.data_type, TelDataType::Any | TelDataType::NoneOptional)
    }

    pub fn is_string(&self) -> bool {
        self.is_any() || self.data_type == TelDataType::String
    }

    pub fn is_integer(&self) -> bool {
        self.is_any() || self.data_type == TelDataType::Integer
    }

    pub fn is_number(&self) -> bool {
        self.is_any()
            || matches!(self.data_type, TelDataType::Integer | TelDataType::Numeric)
    }

    pub fn is_datetime(&self) -> bool {
        self.is_any() || self.data_type == TelDataType::DateTime
    }

    pub fn is_boolean(&self) -> bool {
        self.is_any() || self.data_type == TelDataType::Boolean
    }
}

impl Default for TelType {
    fn default() -> Self {
        TelType::constant(TelDataType::Any)
    }
}

/// Common type of a list of operand types.
///
/// Wildcards (`Any`, `NoneOptional`) defer to the concrete operands. A mix
/// of integer and numeric operands widens to numeric; any other mix is
/// `Unknown`. The result is constant only when every operand is constant.
pub fn return_common_type(types: &[TelType]) -> TelType {
    if types.is_empty() {
        return TelType::constant(TelDataType::Unknown);
    }

    let only_constants = types.iter().all(|t| t.is_constant);
    let known: Vec<TelDataType> = types
        .iter()
        .filter(|t| !t.is_any())
        .map(|t| t.data_type)
        .collect();

    if known.is_empty() {
        return TelType::new(TelDataType::Any, only_constants);
    }

    let first = known[0];
    if known.iter().all(|dt| *dt == first) {
        return TelType::new(first, only_constants);
    }

    let all_numbers = known
        .iter()
        .all(|dt| matches!(dt, TelDataType::Integer | TelDataType::Numeric));
    if all_numbers {
        return TelType::new(TelDataType::Numeric, only_constants);
    }

    TelType::new(TelDataType::Unknown, only_constants)
}

/// True when the operands share a usable common type.
pub fn are_compatible(types: &[TelType]) -> bool {
    return_common_type(types).data_type != TelDataType::Unknown
}

/// Validation types carried by taxon definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    Text,
    Enum,
    Url,
    Variant,
    Integer,
    Numeric,
    Percent,
    Money,
    Duration,
    Datetime,
    Boolean,
    #[serde(other)]
    Unrecognized,
}

impl ValidationType {
    /// Column type of a raw taxon with this validation type.
    pub fn to_tel_type(self) -> TelType {
        let data_type = match self {
            ValidationType::Text
            | ValidationType::Enum
            | ValidationType::Url
            | ValidationType::Variant
            | ValidationType::Unrecognized => TelDataType::String,
            ValidationType::Integer => TelDataType::Integer,
            ValidationType::Numeric
            | ValidationType::Percent
            | ValidationType::Money
            | ValidationType::Duration => TelDataType::Numeric,
            ValidationType::Datetime => TelDataType::DateTime,
            ValidationType::Boolean => TelDataType::Boolean,
        };
        TelType::column(data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(dt: TelDataType) -> TelType {
        TelType::column(dt)
    }

    #[test]
    fn test_common_type_empty() {
        let common = return_common_type(&[]);
        assert_eq!(common.data_type, TelDataType::Unknown);
        assert!(common.is_constant);
    }

    #[test]
    fn test_common_type_single() {
        let common = return_common_type(&[t(TelDataType::String)]);
        assert_eq!(common.data_type, TelDataType::String);
        assert!(!common.is_constant);
    }

    #[test]
    fn test_common_type_numbers_widen() {
        let common = return_common_type(&[t(TelDataType::Integer), t(TelDataType::Numeric)]);
        assert_eq!(common.data_type, TelDataType::Numeric);
    }

    #[test]
    fn test_common_type_order_insensitive() {
        let a = return_common_type(&[t(TelDataType::Integer), t(TelDataType::String)]);
        let b = return_common_type(&[t(TelDataType::String), t(TelDataType::Integer)]);
        assert_eq!(a.data_type, b.data_type);
        assert_eq!(a.data_type, TelDataType::Unknown);
    }

    #[test]
    fn test_common_type_any_defers() {
        let common = return_common_type(&[t(TelDataType::Any), t(TelDataType::DateTime)]);
        assert_eq!(common.data_type, TelDataType::DateTime);

        let common = return_common_type(&[t(TelDataType::Any), t(TelDataType::NoneOptional)]);
        assert_eq!(common.data_type, TelDataType::Any);
    }

    #[test]
    fn test_common_type_constancy() {
        let common = return_common_type(&[
            TelType::constant(TelDataType::Integer),
            TelType::constant(TelDataType::Integer),
        ]);
        assert!(common.is_constant);

        let common = return_common_type(&[
            TelType::constant(TelDataType::Integer),
            t(TelDataType::Integer),
        ]);
        assert!(!common.is_constant);
    }

    #[test]
    fn test_compatibility() {
        assert!(are_compatible(&[t(TelDataType::Integer), t(TelDataType::Numeric)]));
        assert!(!are_compatible(&[t(TelDataType::Boolean), t(TelDataType::DateTime)]));
    }

    #[test]
    fn test_wildcard_predicates() {
        assert!(t(TelDataType::NoneOptional).is_number());
        assert!(t(TelDataType::NoneOptional).is_boolean());
        assert!(t(TelDataType::Any).is_datetime());
        assert!(!t(TelDataType::String).is_number());
    }

    #[test]
    fn test_validation_type_mapping() {
        assert_eq!(ValidationType::Money.to_tel_type().data_type, TelDataType::Numeric);
        assert_eq!(ValidationType::Enum.to_tel_type().data_type, TelDataType::String);
        assert_eq!(
            ValidationType::Unrecognized.to_tel_type().data_type,
            TelDataType::String
        );
        assert!(!ValidationType::Integer.to_tel_type().is_constant);
    }
}
