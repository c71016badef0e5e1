//! Values crossing the dispatch boundary.
//!
//! Generated code hands arguments to the hooks as an `Object[]` and receives an `Object`
//! back, boxing and unboxing primitives around the call. [`Value`] is the Rust-side view
//! of those boxed values, and [`Value::narrow`] reproduces the unpacking the generated
//! code performs before returning to the caller.

use std::fmt;

use crate::{
    classfile::descriptor::{FieldType, ReturnType},
    dispatch::{instance::Instance, throwable::Throwable},
};

/// A boxed value passed to or returned from dispatch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The result of a `void` method
    #[default]
    Void,
    /// `null`
    Null,
    /// `java.lang.Boolean`
    Boolean(bool),
    /// `java.lang.Byte`
    Byte(i8),
    /// `java.lang.Character` (a UTF-16 code unit)
    Char(u16),
    /// `java.lang.Short`
    Short(i16),
    /// `java.lang.Integer`
    Int(i32),
    /// `java.lang.Long`
    Long(i64),
    /// `java.lang.Float`
    Float(f32),
    /// `java.lang.Double`
    Double(f64),
    /// `java.lang.String`
    Str(String),
    /// An instance of a class defined in a sandbox
    Object(Instance),
}

impl Value {
    /// The value a method with return type `ret` yields when it does nothing: zero,
    /// `false`, `null` or nothing at all.
    #[must_use]
    pub fn default_for(ret: &ReturnType) -> Value {
        match ret {
            ReturnType::Void => Value::Void,
            ReturnType::Value(ty) => Value::default_of(ty),
        }
    }

    /// The default value of a field type.
    #[must_use]
    pub fn default_of(ty: &FieldType) -> Value {
        match ty {
            FieldType::Boolean => Value::Boolean(false),
            FieldType::Byte => Value::Byte(0),
            FieldType::Char => Value::Char(0),
            FieldType::Short => Value::Short(0),
            FieldType::Int => Value::Int(0),
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Null,
        }
    }

    /// Internal name of the boxed runtime class, `None` for `null` and `void`.
    #[must_use]
    pub fn runtime_class(&self) -> Option<&str> {
        Some(match self {
            Value::Void | Value::Null => return None,
            Value::Boolean(_) => "java/lang/Boolean",
            Value::Byte(_) => "java/lang/Byte",
            Value::Char(_) => "java/lang/Character",
            Value::Short(_) => "java/lang/Short",
            Value::Int(_) => "java/lang/Integer",
            Value::Long(_) => "java/lang/Long",
            Value::Float(_) => "java/lang/Float",
            Value::Double(_) => "java/lang/Double",
            Value::Str(_) => "java/lang/String",
            Value::Object(instance) => instance.class_name(),
        })
    }

    /// Returns `true` for `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for boxed numbers (subclasses of `java.lang.Number`).
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Byte(_)
                | Value::Short(_)
                | Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
        )
    }

    /// `Number.longValue()`, for any boxed number.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        Some(match self {
            Value::Byte(v) => i64::from(*v),
            Value::Short(v) => i64::from(*v),
            Value::Int(v) => i64::from(*v),
            Value::Long(v) => *v,
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(v) => *v as i64,
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(v) => *v as i64,
            _ => return None,
        })
    }

    /// `Number.doubleValue()`, for any boxed number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_double(&self) -> Option<f64> {
        Some(match self {
            Value::Float(v) => f64::from(*v),
            Value::Double(v) => *v,
            other => other.as_long()? as f64,
        })
    }

    /// `Number.intValue()`, for any boxed number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Float(v) => Some(*v as i32),
            Value::Double(v) => Some(*v as i32),
            other => other.as_long().map(|v| v as i32),
        }
    }

    /// The boolean, if this is a `java.lang.Boolean`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// The string, if this is a `java.lang.String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// The instance, if this is a sandbox object.
    #[must_use]
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    /// Unpacks a dispatch result for a method returning `ret`.
    ///
    /// Mirrors the generated epilogue: the result of a `void` method is discarded, a
    /// `null` for a primitive becomes its default, numbers are narrowed through the
    /// `Number` accessors, `boolean` and `char` require their exact box and references
    /// are checked against the declared type.
    ///
    /// # Errors
    /// Returns a `java.lang.ClassCastException` throwable when the value does not fit.
    pub fn narrow(self, ret: &ReturnType) -> Result<Value, Throwable> {
        let ReturnType::Value(ty) = ret else {
            return Ok(Value::Void);
        };
        if self.is_null() {
            return Ok(Value::default_of(ty));
        }

        #[allow(clippy::cast_possible_truncation)]
        let narrowed = match ty {
            FieldType::Boolean => self.as_bool().map(Value::Boolean),
            FieldType::Char => match self {
                Value::Char(c) => Some(Value::Char(c)),
                _ => None,
            },
            FieldType::Byte => self.as_int().map(|v| Value::Byte(v as i8)),
            FieldType::Short => self.as_int().map(|v| Value::Short(v as i16)),
            FieldType::Int => self.as_int().map(Value::Int),
            FieldType::Long => self.as_long().map(Value::Long),
            FieldType::Float => self.as_double().map(|v| Value::Float(v as f32)),
            FieldType::Double => self.as_double().map(Value::Double),
            FieldType::Object(name) => self.is_assignable_to(name).then(|| self.clone()),
            FieldType::Array(_) => None,
        };

        narrowed.ok_or_else(|| {
            Throwable::class_cast(&format!(
                "{} cannot be cast to {}",
                self.runtime_class().unwrap_or("void").replace('/', "."),
                ty.java_name()
            ))
        })
    }

    fn is_assignable_to(&self, class: &str) -> bool {
        if class == "java/lang/Object" || self.runtime_class() == Some(class) {
            return true;
        }
        match self {
            Value::Object(instance) => instance.is_instance_of(class),
            Value::Str(_) => class == "java/lang/CharSequence",
            other => other.is_number() && class == "java/lang/Number",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "{c}"),
                None => write!(f, "\\u{v:04x}"),
            },
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Object(instance) => write!(f, "{instance}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_from!(
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => Str,
    Instance => Object,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ret(descriptor: &str) -> ReturnType {
        crate::classfile::descriptor::MethodDescriptor::parse(&format!("(){descriptor}"))
            .unwrap()
            .ret
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Value::default_for(&ret("V")), Value::Void);
        assert_eq!(Value::default_for(&ret("Z")), Value::Boolean(false));
        assert_eq!(Value::default_for(&ret("J")), Value::Long(0));
        assert_eq!(Value::default_for(&ret("Ljava/lang/String;")), Value::Null);
        assert_eq!(Value::default_for(&ret("[I")), Value::Null);
    }

    #[test]
    fn test_narrow_numbers() {
        assert_eq!(Value::Long(300).narrow(&ret("B")).unwrap(), Value::Byte(44));
        assert_eq!(Value::Int(7).narrow(&ret("J")).unwrap(), Value::Long(7));
        assert_eq!(Value::Double(2.9).narrow(&ret("I")).unwrap(), Value::Int(2));
        assert_eq!(Value::Null.narrow(&ret("I")).unwrap(), Value::Int(0));
        assert_eq!(Value::Int(1).narrow(&ret("V")).unwrap(), Value::Void);
    }

    #[test]
    fn test_narrow_rejects_mismatched_boxes() {
        let err = Value::Char(65).narrow(&ret("I")).unwrap_err();
        assert_eq!(err.class_name, "java.lang.ClassCastException");

        assert!(Value::Int(1).narrow(&ret("Z")).is_err());
        assert!(Value::Int(1).narrow(&ret("Ljava/lang/String;")).is_err());
        assert!(Value::Int(1).narrow(&ret("Ljava/lang/Number;")).is_ok());
        assert!(Value::from("x").narrow(&ret("Ljava/lang/CharSequence;")).is_ok());
    }

    #[test]
    fn test_narrow_instances_by_ancestry() {
        let widget = Instance::new(
            "pkg/a/Widget",
            vec!["pkg/a/Base".to_string(), "java/lang/Object".to_string()],
        );
        let value = Value::from(widget);
        assert!(value.clone().narrow(&ret("Lpkg/a/Base;")).is_ok());
        assert!(value.clone().narrow(&ret("Ljava/lang/Object;")).is_ok());
        assert!(value.narrow(&ret("Lpkg/b/Other;")).is_err());
    }
}
