//! Typed Property Values
//!
//! A property's value lives in a [`PropertyValue`] holder: a three-state
//! `Option<Result<Value>>` (never read / read failed / present) plus a
//! *kind* strategy that knows how to validate and render candidates.
//!
//! The supported dynamic types are the closed [`Value`] set; typed access
//! from transactions goes through the [`Scalar`] bridge, which checks the
//! tag instead of downcasting.

use crate::properties::id::PropertyId;
use crate::result::{Error, OptionalResult, Result};

use std::collections::BTreeMap;

// =============================================================================
// Dynamic Value
// =============================================================================

/// A dynamically typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Unsigned 32-bit register-backed quantity (also backs enumerations)
    U32(u32),
    /// Signed 64-bit quantity
    I64(i64),
    /// Floating-point quantity (temperatures, gains)
    F64(f64),
    /// Short device string (serial numbers, versions)
    Text(String),
}

impl Value {
    /// The tag of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::U32(_) => ValueType::U32,
            Value::I64(_) => ValueType::I64,
            Value::F64(_) => ValueType::F64,
            Value::Text(_) => ValueType::Text,
        }
    }

    /// Default rendering used when a property has no custom formatter.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Bool(value) => value.to_string(),
            Value::U32(value) => value.to_string(),
            Value::I64(value) => value.to_string(),
            Value::F64(value) => value.to_string(),
            Value::Text(value) => value.clone(),
        }
    }

    /// Ordering between two values of the same numeric type.
    #[must_use]
    pub fn partial_cmp_same_type(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::U32(a), Value::U32(b)) => Some(a.cmp(b)),
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ValueType {
    Bool,
    U32,
    I64,
    F64,
    Text,
}

impl ValueType {
    /// Name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::U32 => "u32",
            ValueType::I64 => "i64",
            ValueType::F64 => "f64",
            ValueType::Text => "text",
        }
    }

    /// Whether values of this type support range comparison.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, ValueType::U32 | ValueType::I64 | ValueType::F64)
    }
}

// =============================================================================
// Scalar Bridge
// =============================================================================

/// Compile-time bridge between host types and [`Value`] variants.
pub trait Scalar: Sized + Clone {
    /// The tag this type maps to.
    const TYPE: ValueType;

    /// Wrap into a dynamic value.
    fn into_value(self) -> Value;

    /// Unwrap from a dynamic value of the matching tag.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($($host:ty => $variant:ident),+ $(,)?) => {
        $(
            impl Scalar for $host {
                const TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_scalar!(bool => Bool, u32 => U32, i64 => I64, f64 => F64, String => Text);

// =============================================================================
// Value Kinds
// =============================================================================

/// Per-kind validation/rendering strategy of a property.
pub enum ValueKind {
    /// Any value of the declared type is structurally valid.
    Plain,
    /// Numeric value constrained to `[min, max]` (inclusive).
    Arithmetic {
        /// Smallest valid value.
        min: Value,
        /// Largest valid value.
        max: Value,
    },
    /// Closed map of valid raw values to display names.
    Enum {
        /// Raw value to user-facing name.
        names: BTreeMap<u32, String>,
    },
}

impl std::fmt::Debug for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Plain => f.write_str("Plain"),
            ValueKind::Arithmetic { min, max } => {
                f.debug_struct("Arithmetic").field("min", min).field("max", max).finish()
            }
            ValueKind::Enum { names } => {
                f.debug_struct("Enum").field("variants", &names.len()).finish()
            }
        }
    }
}

// =============================================================================
// Property Value Holder
// =============================================================================

type ValidateFn = Box<dyn Fn(&Value) -> Result<()> + Send + Sync>;
type FormatFn = Box<dyn Fn(&Value) -> String + Send + Sync>;

/// One property's value state plus its validation/rendering strategy.
pub struct PropertyValue {
    id: PropertyId,
    value_type: ValueType,
    kind: ValueKind,
    state: OptionalResult<Value>,
    validate_fn: Option<ValidateFn>,
    format_fn: Option<FormatFn>,
}

impl PropertyValue {
    /// Plain holder of the given type.
    #[must_use]
    pub fn plain(id: PropertyId, value_type: ValueType) -> Self {
        Self {
            id,
            value_type,
            kind: ValueKind::Plain,
            state: None,
            validate_fn: None,
            format_fn: None,
        }
    }

    /// Numeric holder constrained to `[min, max]`.
    #[must_use]
    pub fn arithmetic(id: PropertyId, min: Value, max: Value) -> Self {
        let value_type = min.value_type();
        debug_assert!(value_type.is_numeric(), "arithmetic kind needs a numeric type");
        debug_assert_eq!(value_type, max.value_type(), "min/max type mismatch");
        debug_assert!(
            min.partial_cmp_same_type(&max).is_some_and(std::cmp::Ordering::is_le),
            "inverted range"
        );
        Self {
            id,
            value_type,
            kind: ValueKind::Arithmetic { min, max },
            state: None,
            validate_fn: None,
            format_fn: None,
        }
    }

    /// Enumerated holder over a closed raw-value→name map.
    #[must_use]
    pub fn enumerated(id: PropertyId, names: BTreeMap<u32, String>) -> Self {
        debug_assert!(!names.is_empty(), "empty enumeration");
        Self {
            id,
            value_type: ValueType::U32,
            kind: ValueKind::Enum { names },
            state: None,
            validate_fn: None,
            format_fn: None,
        }
    }

    /// Attach an additional validator, run after the kind check.
    #[must_use]
    pub fn with_validator(mut self, validate: impl Fn(&Value) -> Result<()> + Send + Sync + 'static) -> Self {
        self.validate_fn = Some(Box::new(validate));
        self
    }

    /// Override the default rendering.
    #[must_use]
    pub fn with_formatter(mut self, format: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.format_fn = Some(Box::new(format));
        self
    }

    /// The owning property handle.
    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// Declared type tag.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Validation/rendering strategy.
    #[must_use]
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Current three-state value.
    #[must_use]
    pub fn current(&self) -> &OptionalResult<Value> {
        &self.state
    }

    /// Whether a value result (success or failure) is present.
    #[must_use]
    pub fn has_value_result(&self) -> bool {
        self.state.is_some()
    }

    /// Ok when the state is present-and-ok or absent; a stored read
    /// failure propagates.
    pub fn validation_result(&self) -> Result<()> {
        match &self.state {
            Some(Err(err)) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Replace the state; returns whether it actually changed.
    pub fn set_current(&mut self, new_state: OptionalResult<Value>) -> bool {
        if let Some(Ok(value)) = &new_state {
            debug_assert_eq!(value.value_type(), self.value_type, "value type mismatch");
        }
        if self.state == new_state {
            return false;
        }
        self.state = new_state;
        true
    }

    /// Drop back to the absent state; returns whether it changed.
    pub fn reset(&mut self) -> bool {
        self.set_current(None)
    }

    // =========================================================================
    // Validation and Rendering
    // =========================================================================

    /// Validate a candidate against the kind strategy, then the custom
    /// validator.
    pub fn validate_value(&self, value: &Value) -> Result<()> {
        if value.value_type() != self.value_type {
            return Err(Error::with_detail(
                "Value of wrong type!",
                format!("got: {} expected: {}", value.value_type().as_str(), self.value_type.as_str()),
            ));
        }

        match &self.kind {
            ValueKind::Plain => {}
            ValueKind::Arithmetic { min, max } => {
                let below = value.partial_cmp_same_type(min).is_none_or(std::cmp::Ordering::is_lt);
                let above = value.partial_cmp_same_type(max).is_none_or(std::cmp::Ordering::is_gt);
                if below || above {
                    return Err(Error::with_detail(
                        "Value out of range!",
                        format!(
                            "value: {} min: {} max: {}",
                            value.to_display_string(),
                            min.to_display_string(),
                            max.to_display_string()
                        ),
                    ));
                }
            }
            ValueKind::Enum { names } => {
                let Value::U32(raw) = value else {
                    unreachable!("enum kind is always u32-typed");
                };
                if !names.contains_key(raw) {
                    return Err(Error::with_detail(
                        "Value out of range!",
                        format!("value: {raw}"),
                    ));
                }
            }
        }

        if let Some(validate) = &self.validate_fn {
            return validate(value);
        }
        Ok(())
    }

    /// Render a value with the custom formatter, the enum name map, or the
    /// default rendering, in that order of preference.
    #[must_use]
    pub fn convert_to_string(&self, value: &Value) -> String {
        if let Some(format) = &self.format_fn {
            return format(value);
        }
        if let ValueKind::Enum { names } = &self.kind
            && let Value::U32(raw) = value
            && let Some(name) = names.get(raw)
        {
            return name.clone();
        }
        value.to_display_string()
    }

    /// Render the current value; empty when absent or failed.
    #[must_use]
    pub fn value_as_string(&self) -> String {
        match &self.state {
            Some(Ok(value)) => self.convert_to_string(value),
            _ => String::new(),
        }
    }

    /// Range bounds of an arithmetic holder.
    #[must_use]
    pub fn min_max(&self) -> Option<(Value, Value)> {
        match &self.kind {
            ValueKind::Arithmetic { min, max } => Some((min.clone(), max.clone())),
            _ => None,
        }
    }

    /// Name map of an enumerated holder.
    #[must_use]
    pub fn enum_names(&self) -> Option<&BTreeMap<u32, String>> {
        match &self.kind {
            ValueKind::Enum { names } => Some(names),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyValue")
            .field("id", &self.id)
            .field("value_type", &self.value_type)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
