//! Runtime value model
//!
//! Column data and constructed instances flow through the engine as [`Value`]s.
//! This module also defines the implicit convertibility rules between column
//! runtime types and declared slot types, and the [`Row`] contract a cursor
//! must satisfy for a compiled parser to read it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use strum_macros::{EnumIter, IntoStaticStr};
use thiserror::Error;
use uuid::Uuid;

/// Runtime type of a column value, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum BasicType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    Char,
    Text,
    Bytes,
    Uuid,
    DateTime,
}

impl BasicType {
    /// True for types that participate in numeric widening/narrowing.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            BasicType::I16
                | BasicType::I32
                | BasicType::I64
                | BasicType::F32
                | BasicType::F64
                | BasicType::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, BasicType::I16 | BasicType::I32 | BasicType::I64)
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = (*self).into();
        f.write_str(s)
    }
}

/// A dynamically typed value: a column datum or a constructed instance.
#[derive(Debug, Clone)]
pub enum Value {
    /// Database NULL, and the null representation of optional slots.
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    /// A constructed instance of a registered type.
    Custom(CustomValue),
}

/// Type-erased holder for constructed instances.
///
/// The `Arc` is unique for values produced inside a single parse, so member
/// assignment can borrow the payload mutably via [`Value::custom_mut`].
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomValue<{}>", self.type_name)
    }
}

impl Value {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Value::Custom(CustomValue {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The runtime type of a non-custom, non-null value.
    pub fn basic_type(&self) -> Option<BasicType> {
        Some(match self {
            Value::Bool(_) => BasicType::Bool,
            Value::I16(_) => BasicType::I16,
            Value::I32(_) => BasicType::I32,
            Value::I64(_) => BasicType::I64,
            Value::F32(_) => BasicType::F32,
            Value::F64(_) => BasicType::F64,
            Value::Decimal(_) => BasicType::Decimal,
            Value::Char(_) => BasicType::Char,
            Value::Text(_) => BasicType::Text,
            Value::Bytes(_) => BasicType::Bytes,
            Value::Uuid(_) => BasicType::Uuid,
            Value::DateTime(_) => BasicType::DateTime,
            Value::Null | Value::Custom(_) => return None,
        })
    }

    /// Short label for error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Custom(_) => "custom",
            other => other
                .basic_type()
                .map(|b| b.into())
                .unwrap_or("unknown"),
        }
    }

    /// Unwrap a constructed instance of `T`.
    ///
    /// The payload `Arc` is unique inside a parse, so this moves the instance
    /// out without cloning.
    pub fn into_custom<T: Any + Send + Sync>(self) -> Result<T, RowError> {
        match self {
            Value::Custom(c) => {
                let arc = c.inner.downcast::<T>().map_err(|_| {
                    RowError::ShapeMismatch(format!(
                        "expected instance of {}, found {}",
                        std::any::type_name::<T>(),
                        c.type_name
                    ))
                })?;
                Arc::try_unwrap(arc).map_err(|_| {
                    RowError::ShapeMismatch(format!(
                        "instance of {} is shared and cannot be moved out",
                        std::any::type_name::<T>()
                    ))
                })
            }
            other => Err(RowError::ShapeMismatch(format!(
                "expected instance of {}, found {}",
                std::any::type_name::<T>(),
                other.type_label()
            ))),
        }
    }

    /// Like [`Value::into_custom`], mapping `Null` to `None`.
    pub fn into_custom_opt<T: Any + Send + Sync>(self) -> Result<Option<T>, RowError> {
        match self {
            Value::Null => Ok(None),
            other => other.into_custom().map(Some),
        }
    }

    /// Mutable access to the constructed instance, for member assignment.
    pub fn custom_mut<T: Any + Send + Sync>(&mut self) -> Result<&mut T, RowError> {
        match self {
            Value::Custom(c) => {
                let name = c.type_name;
                Arc::get_mut(&mut c.inner)
                    .and_then(|any| any.downcast_mut::<T>())
                    .ok_or_else(|| {
                        RowError::ShapeMismatch(format!(
                            "cannot mutate instance of {name} as {}",
                            std::any::type_name::<T>()
                        ))
                    })
            }
            other => Err(RowError::ShapeMismatch(format!(
                "expected instance of {}, found {}",
                std::any::type_name::<T>(),
                other.type_label()
            ))),
        }
    }

    /// Extract a typed value. Shorthand for `V::from_value(self)`.
    pub fn get<V: FromValue>(self) -> Result<V, RowError> {
        V::from_value(self)
    }
}

/// Errors raised while a compiled parser executes against a row.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("column {position} ('{name}') is NULL but the target slot is not nullable")]
    NullAssignment { position: u16, name: String },

    #[error("cannot convert {from} value {value} at column {position} to {to}")]
    ConvertFailure {
        position: u16,
        from: &'static str,
        to: &'static str,
        value: String,
    },

    #[error("value {value} has no variant in enum {enum_name}")]
    EnumOutOfRange { enum_name: String, value: i64 },

    #[error("row has no column at position {0}")]
    MissingColumn(u16),

    #[error("constructed value has unexpected shape: {0}")]
    ShapeMismatch(String),
}

/// The current row of a forward-only cursor.
///
/// The engine never repositions the cursor; it only reads column values of
/// the row the cursor is parked on. Drivers adapt their row type to this
/// trait; [`VecRow`] is the in-memory stand-in used by tests.
pub trait Row {
    /// Value at `position`, or `None` when the row has no such column.
    /// SQL NULL is `Some(Value::Null)`.
    fn value(&self, position: u16) -> Option<Value>;

    /// Number of columns in the row.
    fn width(&self) -> u16;
}

/// An owned in-memory row.
#[derive(Debug, Clone)]
pub struct VecRow {
    values: Vec<Value>,
}

impl VecRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl Row for VecRow {
    fn value(&self, position: u16) -> Option<Value> {
        self.values.get(position as usize).cloned()
    }

    fn width(&self) -> u16 {
        self.values.len() as u16
    }
}

/// Implicit convertibility between a column runtime type and a slot type.
///
/// Identity always holds; numeric types widen and narrow freely among
/// themselves (narrowing is range-checked at parse time); char and string
/// never interchange; everything else is identity-only.
pub fn convertible(from: BasicType, to: BasicType) -> bool {
    from == to || (from.is_numeric() && to.is_numeric())
}

/// The conversion a terminal read applies to the fetched column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvertOp {
    Identity,
    Numeric { to: BasicType },
}

impl ConvertOp {
    /// The operator converting `from` into `to`, if the pair is convertible.
    pub fn between(from: BasicType, to: BasicType) -> Option<ConvertOp> {
        if from == to {
            Some(ConvertOp::Identity)
        } else if convertible(from, to) {
            Some(ConvertOp::Numeric { to })
        } else {
            None
        }
    }

    /// Apply the conversion. `position` is only used in error payloads.
    pub fn apply(&self, value: Value, position: u16) -> Result<Value, RowError> {
        match self {
            ConvertOp::Identity => Ok(value),
            ConvertOp::Numeric { to } => {
                if value.is_null() {
                    return Ok(value);
                }
                convert_numeric(value, *to, position)
            }
        }
    }
}

fn convert_failure(value: &Value, to: BasicType, position: u16) -> RowError {
    RowError::ConvertFailure {
        position,
        from: value.type_label(),
        to: to.into(),
        value: format!("{value:?}"),
    }
}

/// Exact integral reading of a numeric value. Fractional floats and
/// out-of-range decimals are rejected.
fn to_i64_exact(value: &Value) -> Option<i64> {
    fn float_to_i64(f: f64) -> Option<i64> {
        let in_range = f >= i64::MIN as f64 && f <= i64::MAX as f64;
        (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
    }

    match value {
        Value::I16(v) => Some(i64::from(*v)),
        Value::I32(v) => Some(i64::from(*v)),
        Value::I64(v) => Some(*v),
        Value::F32(v) => float_to_i64(f64::from(*v)),
        Value::F64(f) => float_to_i64(*f),
        Value::Decimal(d) => {
            if d.fract().is_zero() {
                d.to_i64()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn to_f64_lossy(value: &Value) -> Option<f64> {
    match value {
        Value::I16(v) => Some(f64::from(*v)),
        Value::I32(v) => Some(f64::from(*v)),
        Value::I64(v) => Some(*v as f64),
        Value::F32(v) => Some(f64::from(*v)),
        Value::F64(v) => Some(*v),
        Value::Decimal(d) => d.to_f64(),
        _ => None,
    }
}

fn convert_numeric(value: Value, to: BasicType, position: u16) -> Result<Value, RowError> {
    let fail = || convert_failure(&value, to, position);
    match to {
        BasicType::I16 => {
            let i = to_i64_exact(&value).ok_or_else(fail)?;
            i16::try_from(i).map(Value::I16).map_err(|_| fail())
        }
        BasicType::I32 => {
            let i = to_i64_exact(&value).ok_or_else(fail)?;
            i32::try_from(i).map(Value::I32).map_err(|_| fail())
        }
        BasicType::I64 => to_i64_exact(&value).map(Value::I64).ok_or_else(fail),
        BasicType::F32 => to_f64_lossy(&value)
            .map(|f| Value::F32(f as f32))
            .ok_or_else(fail),
        BasicType::F64 => to_f64_lossy(&value).map(Value::F64).ok_or_else(fail),
        BasicType::Decimal => match &value {
            Value::I16(v) => Ok(Value::Decimal(Decimal::from(*v))),
            Value::I32(v) => Ok(Value::Decimal(Decimal::from(*v))),
            Value::I64(v) => Ok(Value::Decimal(Decimal::from(*v))),
            Value::F32(v) => Decimal::try_from(*v).map(Value::Decimal).map_err(|_| fail()),
            Value::F64(v) => Decimal::try_from(*v).map(Value::Decimal).map_err(|_| fail()),
            _ => Err(fail()),
        },
        _ => Err(fail()),
    }
}

/// Typed extraction from a [`Value`]. The conversion operator has already
/// normalized the value to the declared slot type, so extraction is an exact
/// variant match.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, RowError>;
}

macro_rules! from_value_exact {
    ($ty:ty, $variant:ident, $label:expr) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, RowError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(RowError::ShapeMismatch(format!(
                        "expected {}, found {}",
                        $label,
                        other.type_label()
                    ))),
                }
            }
        }
    };
}

from_value_exact!(bool, Bool, "bool");
from_value_exact!(i16, I16, "i16");
from_value_exact!(i32, I32, "i32");
from_value_exact!(i64, I64, "i64");
from_value_exact!(f32, F32, "f32");
from_value_exact!(f64, F64, "f64");
from_value_exact!(Decimal, Decimal, "decimal");
from_value_exact!(char, Char, "char");
from_value_exact!(String, Text, "text");
from_value_exact!(Vec<u8>, Bytes, "bytes");
from_value_exact!(Uuid, Uuid, "uuid");
from_value_exact!(DateTime<Utc>, DateTime, "datetime");

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, RowError> {
        Ok(value)
    }
}

impl<V: FromValue> FromValue for Option<V> {
    fn from_value(value: Value) -> Result<Self, RowError> {
        match value {
            Value::Null => Ok(None),
            other => V::from_value(other).map(Some),
        }
    }
}

/// A [`FromValue`] type with a fixed column runtime type, usable when
/// declaring parameters and members without spelling the [`BasicType`] out.
pub trait BasicValue: FromValue {
    const TYPE: BasicType;
}

macro_rules! basic_value {
    ($ty:ty, $basic:ident) => {
        impl BasicValue for $ty {
            const TYPE: BasicType = BasicType::$basic;
        }
    };
}

basic_value!(bool, Bool);
basic_value!(i16, I16);
basic_value!(i32, I32);
basic_value!(i64, I64);
basic_value!(f32, F32);
basic_value!(f64, F64);
basic_value!(Decimal, Decimal);
basic_value!(char, Char);
basic_value!(String, Text);
basic_value!(Vec<u8>, Bytes);
basic_value!(Uuid, Uuid);
basic_value!(DateTime<Utc>, DateTime);

/// Argument list handed to a construction path's invoke closure.
///
/// Arguments arrive in declaration order; each `take_*` call consumes the
/// next one.
pub struct PathArgs {
    values: std::vec::IntoIter<Value>,
}

impl PathArgs {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    fn next(&mut self) -> Result<Value, RowError> {
        self.values
            .next()
            .ok_or_else(|| RowError::ShapeMismatch("construction path ran out of arguments".into()))
    }

    /// Consume the next argument as a basic value (or `Option` of one).
    pub fn take<V: FromValue>(&mut self) -> Result<V, RowError> {
        V::from_value(self.next()?)
    }

    /// Consume the next argument as a constructed instance of `T`.
    pub fn take_nested<T: Any + Send + Sync>(&mut self) -> Result<T, RowError> {
        self.next()?.into_custom()
    }

    /// Consume the next argument as an optional constructed instance of `T`.
    pub fn take_nested_opt<T: Any + Send + Sync>(&mut self) -> Result<Option<T>, RowError> {
        self.next()?.into_custom_opt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_identity_is_always_convertible() {
        for ty in BasicType::iter() {
            assert!(convertible(ty, ty), "{ty} should convert to itself");
        }
    }

    #[test]
    fn test_char_and_text_never_interchange() {
        assert!(!convertible(BasicType::Char, BasicType::Text));
        assert!(!convertible(BasicType::Text, BasicType::Char));
    }

    #[test]
    fn test_numeric_widening_and_narrowing() {
        assert!(convertible(BasicType::I16, BasicType::I64));
        assert!(convertible(BasicType::I64, BasicType::I16));
        assert!(convertible(BasicType::I32, BasicType::Decimal));
        assert!(convertible(BasicType::F32, BasicType::F64));
        assert!(!convertible(BasicType::Bool, BasicType::I32));
        assert!(!convertible(BasicType::Uuid, BasicType::Text));
    }

    #[test]
    fn test_narrowing_is_range_checked() {
        let op = ConvertOp::between(BasicType::I64, BasicType::I32).unwrap();
        assert!(matches!(
            op.apply(Value::I64(41), 0),
            Ok(Value::I32(41))
        ));
        assert!(matches!(
            op.apply(Value::I64(i64::MAX), 0),
            Err(RowError::ConvertFailure { .. })
        ));
    }

    #[test]
    fn test_fractional_float_does_not_become_integer() {
        let op = ConvertOp::between(BasicType::F64, BasicType::I32).unwrap();
        assert!(matches!(
            op.apply(Value::F64(1.5), 0),
            Err(RowError::ConvertFailure { .. })
        ));
        assert!(matches!(op.apply(Value::F64(2.0), 0), Ok(Value::I32(2))));
    }

    #[test]
    fn test_decimal_from_integer() {
        let op = ConvertOp::between(BasicType::I32, BasicType::Decimal).unwrap();
        match op.apply(Value::I32(7), 0).unwrap() {
            Value::Decimal(d) => assert_eq!(d, Decimal::from(7)),
            other => panic!("expected decimal, got {other:?}"),
        }
    }

    #[test]
    fn test_null_passes_through_conversion() {
        let op = ConvertOp::between(BasicType::I64, BasicType::I32).unwrap();
        assert!(matches!(op.apply(Value::Null, 0), Ok(Value::Null)));
    }

    #[test]
    fn test_custom_round_trip() {
        #[derive(Debug, PartialEq)]
        struct Widget {
            size: i32,
        }

        let v = Value::custom(Widget { size: 3 });
        let w: Widget = v.into_custom().unwrap();
        assert_eq!(w, Widget { size: 3 });
    }

    #[test]
    fn test_custom_mut_assigns_member() {
        struct Widget {
            size: i32,
        }

        let mut v = Value::custom(Widget { size: 0 });
        v.custom_mut::<Widget>().unwrap().size = 9;
        assert_eq!(v.into_custom::<Widget>().unwrap().size, 9);
    }

    #[test]
    fn test_custom_downcast_mismatch() {
        struct A;
        struct B;

        let v = Value::custom(A);
        assert!(matches!(
            v.into_custom::<B>(),
            Err(RowError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_option_extraction_maps_null() {
        assert_eq!(Option::<f64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Option::<f64>::from_value(Value::F64(1.25)).unwrap(),
            Some(1.25)
        );
    }

    #[test]
    fn test_path_args_consume_in_order() {
        let mut args = PathArgs::new(vec![Value::I32(1), Value::Text("two".into())]);
        assert_eq!(args.take::<i32>().unwrap(), 1);
        assert_eq!(args.take::<String>().unwrap(), "two");
        assert!(args.take::<i32>().is_err());
    }
}
