//! The dynamically typed value used everywhere in the engine.
//!
//! Compared to the upstream value system this trades the fully type-erased,
//! `Arc`-shared `ValueRepr`/`DynObject` machinery for a flatter enum that
//! matches the engine's data model one-to-one: it is meant to be read
//! alongside that model, not reverse engineered from the variants.

mod deserialize;
mod object;
mod ops;
mod serialize;

pub use self::object::{Enumerator, Object};
pub use self::serialize::to_value;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind};

/// An insertion-ordered string-keyed map, the backing storage for
/// [`Value::Map`] and for template contexts.
pub type ValueMap = IndexMap<String, Value>;

/// Why a name resolved to [`Value::Undefined`] rather than a real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedKind {
    /// A name that was never bound in any scope.
    Missing,
    /// An attribute or item lookup on a known value that doesn't have it.
    ChainedAttr,
    /// The loop variable accessed outside of a `{% for %}` body.
    Loop,
}

/// The dynamically typed value type, see the module documentation for the
/// rationale for this shape.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    /// A string that auto-escaping must not re-escape, e.g. the output of
    /// the `safe` filter or markup produced by another `Safe` value.
    Safe(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<ValueMap>),
    Tuple(Arc<Vec<Value>>),
    /// A dynamic host object: namespaces, loop objects, cyclers, joiners,
    /// and anything registered through [`Value::from_object`].
    Object(Arc<dyn Object>),
    /// An unresolved name together with the reason, carried so `default`/
    /// `is defined` can inspect it without the lookup becoming a hard
    /// error until the value is actually used.
    Undefined(Arc<str>, UndefinedKind),
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined(Arc::from(""), UndefinedKind::Missing)
    }
}

impl Value {
    pub fn undefined(name: impl Into<Arc<str>>, kind: UndefinedKind) -> Value {
        Value::Undefined(name.into(), kind)
    }

    pub fn from_safe_string(s: String) -> Value {
        Value::Safe(Arc::from(s))
    }

    pub fn from_map(map: ValueMap) -> Value {
        Value::Map(Arc::new(map))
    }

    pub fn from_vec(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn from_tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn from_object<T: Object + 'static>(obj: T) -> Value {
        Value::Object(Arc::new(obj))
    }

    /// Converts any `serde::Serialize` value into a `Value` directly,
    /// without round tripping through JSON.
    pub fn from_serializable<T: serde::Serialize>(value: &T) -> Value {
        to_value(value).unwrap_or(Value::Nil)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(..))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }

    /// Is this value truthy under Jinja2's rules (empty collections and the
    /// empty string are falsy, as are `0`/`0.0`/nil/undefined).
    pub fn is_true(&self) -> bool {
        match self {
            Value::Nil | Value::Undefined(..) => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(obj) => obj.is_truthy(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(*v as i64 as f64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|v| usize::try_from(v).ok())
    }

    /// A stable type name for error messages, mirroring the engine's type
    /// vocabulary (`none`, `bool`, `number`, `string`, `sequence`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "none",
            Value::Undefined(..) => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) | Value::Safe(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// Length, for `{{ x|length }}`/`len()` style filters.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s.chars().count()),
            Value::List(v) | Value::Tuple(v) => Some(v.len()),
            Value::Map(m) => Some(m.len()),
            Value::Object(obj) => obj.enumerate().len(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Attribute access (`value.name`): maps look up by key, objects defer
    /// to [`Object::get_attr`], everything else is undefined.
    pub fn get_attr(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.get(name).cloned().unwrap_or_else(|| {
                Value::undefined(name.to_string(), UndefinedKind::ChainedAttr)
            }),
            Value::Object(obj) => obj
                .get_attr(name)
                .unwrap_or_else(|| Value::undefined(name.to_string(), UndefinedKind::ChainedAttr)),
            _ => Value::undefined(name.to_string(), UndefinedKind::ChainedAttr),
        }
    }

    /// Item access (`value[key]`): sequences accept integer indices
    /// (including negative, Python style), maps and objects accept any key.
    pub fn get_item(&self, key: &Value) -> Result<Value, Error> {
        match self {
            Value::List(v) | Value::Tuple(v) => {
                let idx = ok_index(v.len(), key)?;
                Ok(v.get(idx).cloned().unwrap_or(Value::Nil))
            }
            Value::Map(m) => {
                let key_str = key
                    .as_str()
                    .ok_or_else(|| Error::new(ErrorKind::TypeError, "map keys must be strings"))?;
                Ok(m.get(key_str).cloned().unwrap_or(Value::Nil))
            }
            Value::Object(obj) => {
                let name = key.as_str().unwrap_or_default();
                Ok(obj
                    .get_item(key)
                    .or_else(|| obj.get_attr(name))
                    .unwrap_or(Value::Nil))
            }
            _ => Err(Error::new(
                ErrorKind::TypeError,
                format!("{} is not indexable", self.type_name()),
            )),
        }
    }

    /// Iterates a value the way `{% for %}` does: lists/tuples in order,
    /// maps over their keys (insertion order), objects via [`Object::enumerate`].
    pub fn try_iter(&self) -> Result<Box<dyn Iterator<Item = Value> + '_>, Error> {
        match self {
            Value::List(v) | Value::Tuple(v) => Ok(Box::new(v.iter().cloned())),
            Value::Map(m) => Ok(Box::new(m.keys().cloned().map(Value::from))),
            Value::String(s) | Value::Safe(s) => {
                Ok(Box::new(s.chars().map(|c| Value::from(c.to_string()))))
            }
            Value::Object(obj) => obj.try_iter(),
            _ => Err(Error::new(
                ErrorKind::TypeError,
                format!("{} is not iterable", self.type_name()),
            )),
        }
    }
}

fn ok_index(len: usize, key: &Value) -> Result<usize, Error> {
    let idx = key
        .as_i64()
        .ok_or_else(|| Error::new(ErrorKind::TypeError, "sequence indices must be integers"))?;
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    usize::try_from(idx).map_err(|_| Error::new(ErrorKind::RuntimeError, "index out of range"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil | Value::Undefined(..) => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::String(s) | Value::Safe(s) => write!(f, "{s}"),
            Value::List(v) | Value::Tuple(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v:?}")?;
                }
                write!(f, "}}")
            }
            Value::Object(obj) => fmt::Display::fmt(obj, f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        ops::value_cmp(self, other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        ops::value_cmp(self, other)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::String(Arc::from(v.to_string()))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Nil,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::from_vec(v.into_iter().map(Into::into).collect())
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}
value_from_int!(i8, i16, i32, i64, u8, u16, u32, usize);

/// A call's packed keyword arguments, e.g. `greet="Yo"` in `g("Ada",
/// greet="Yo")`. Wrapped as an [`Object`] rather than a plain
/// [`Value::Map`] so the callee can tell "these are named arguments" apart
/// from "the caller passed a map value positionally" — a trailing map
/// value and a trailing kwargs value look identical once they're both just
/// `Value`s, so the distinction has to live in the type, not in a count
/// heuristic over how many arguments were passed.
#[derive(Debug)]
pub(crate) struct Kwargs(ValueMap);

impl Kwargs {
    pub(crate) fn wrap(map: ValueMap) -> Value {
        Value::from_object(Kwargs(map))
    }
}

impl Object for Kwargs {
    fn get_attr(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::Values(self.0.keys().cloned().map(Value::from).collect())
    }

    fn type_name(&self) -> &'static str {
        "kwargs"
    }

    fn as_kwargs(&self) -> Option<&ValueMap> {
        Some(&self.0)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
