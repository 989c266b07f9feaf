//! The trait backing every dynamic, non-literal [`Value`]: namespaces,
//! macros, loop objects, `cycler()`/`joiner()` results, and anything a
//! host application registers with [`Value::from_object`].
//!
//! This is a deliberately smaller surface than the upstream `Object`/
//! `DynObject` pair — there is no type-erasure layer and no `ObjectRepr`,
//! because the concrete dynamic objects this engine needs (namespaces,
//! macros, loop state, cyclers, joiners) are all known ahead of time and
//! don't need a general purpose sequence/map/plain split to render
//! correctly.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::value::Value;

/// What [`Object::enumerate`] returns: either the object is not iterable at
/// all, or here are its elements.
pub enum Enumerator {
    NonEnumerable,
    Str(&'static [&'static str]),
    Values(Vec<Value>),
}

impl Enumerator {
    pub fn len(&self) -> Option<usize> {
        match self {
            Enumerator::NonEnumerable => None,
            Enumerator::Str(s) => Some(s.len()),
            Enumerator::Values(v) => Some(v.len()),
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Value>> {
        match self {
            Enumerator::NonEnumerable => Box::new(std::iter::empty()),
            Enumerator::Str(s) => Box::new(s.iter().map(|s| Value::from(*s))),
            Enumerator::Values(v) => Box::new(v.into_iter()),
        }
    }
}

/// A dynamic, host-implemented value.
///
/// Every method has a default so a minimal implementation (e.g. a plain
/// struct exposing a couple of attributes) only needs to override
/// [`get_attr`](Self::get_attr) and [`enumerate`](Self::enumerate).
pub trait Object: fmt::Debug + Send + Sync {
    /// Looks up an attribute (`obj.name`).
    fn get_attr(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Looks up an item (`obj[key]`). Defaults to [`get_attr`](Self::get_attr)
    /// when the key is a string, matching Jinja2's `obj['x'] == obj.x`.
    fn get_item(&self, key: &Value) -> Option<Value> {
        self.get_attr(key.as_str()?)
    }

    /// The keys or elements this object exposes to `{% for %}` and `length`.
    fn enumerate(&self) -> Enumerator {
        Enumerator::NonEnumerable
    }

    fn try_iter(&self) -> Result<Box<dyn Iterator<Item = Value> + '_>, Error> {
        Ok(self.enumerate().into_iter())
    }

    /// Whether the object counts as truthy. Defaults to "known length is
    /// nonzero, otherwise true" which matches how plain objects behave in
    /// Jinja2 (an object with no `__len__` equivalent is always truthy).
    fn is_truthy(&self) -> bool {
        self.enumerate().len().is_none_or_nonzero()
    }

    /// A stable type name used in error messages and by `|pprint`.
    fn type_name(&self) -> &'static str {
        "object"
    }

    /// Whether this object can be invoked as `obj(...)`, used by the
    /// `callable` test. Defaults to `false`; objects that override
    /// [`call`](Self::call) should override this too.
    fn is_callable(&self) -> bool {
        false
    }

    /// Downcasts to a template-defined macro, if this object is one.
    ///
    /// The evaluator needs [`State`](crate::state::State) to invoke a macro
    /// body (to resolve filters/tests in the defining environment), which
    /// [`call`](Self::call) deliberately doesn't carry — so macro invocation
    /// is special-cased in `src/eval.rs` via this accessor instead of going
    /// through `call`.
    fn as_macro(&self) -> Option<&crate::context::Macro> {
        None
    }

    /// Downcasts to a call's packed keyword arguments, if this object is
    /// one. Keeps keyword arguments unambiguously distinct from an ordinary
    /// `{"key": value}` map value passed positionally, the same way
    /// [`as_macro`](Self::as_macro) keeps macro values distinct from plain
    /// callables.
    fn as_kwargs(&self) -> Option<&crate::value::ValueMap> {
        None
    }

    /// Calling the object itself, e.g. a stored macro value used as
    /// `{{ m(1, 2) }}`.
    fn call(self: &Arc<Self>, args: &[Value]) -> Result<Value, Error> {
        let _ = args;
        Err(Error::new(
            crate::error::ErrorKind::RuntimeError,
            format!("{} is not callable", self.type_name()),
        ))
    }

    /// Calling a method on the object, e.g. `cycler.next()`.
    fn call_method(self: &Arc<Self>, name: &str, args: &[Value]) -> Result<Value, Error> {
        let _ = args;
        Err(Error::new(
            crate::error::ErrorKind::RuntimeError,
            format!("{} has no method named {name}", self.type_name()),
        ))
    }
}

trait OptionLenExt {
    fn is_none_or_nonzero(self) -> bool;
}

impl OptionLenExt for Option<usize> {
    fn is_none_or_nonzero(self) -> bool {
        match self {
            Some(n) => n != 0,
            None => true,
        }
    }
}

impl fmt::Display for dyn Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
