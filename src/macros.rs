#[cfg(test)]
use similar_asserts::assert_eq;

// `ok!` and `some!` are less bloaty alternatives to the standard library's try
// operator (`?`).  Since most call sites here never need a type conversion we
// fall back to much simpler match patterns that compile faster and produce
// less bloaty code than a generic `From`-converting `?`.

macro_rules! ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(err) => return Err(err),
        }
    };
}

macro_rules! some {
    ($expr:expr) => {
        match $expr {
            Some(val) => val,
            None => return None,
        }
    };
}

/// Hidden utility module for the [`context!`](crate::context!) macro.
#[doc(hidden)]
pub mod __context {
    use crate::value::{Value, ValueMap};

    #[inline(always)]
    pub fn make() -> ValueMap {
        ValueMap::default()
    }

    #[inline(always)]
    pub fn add(ctx: &mut ValueMap, key: &'static str, value: Value) {
        ctx.insert(key.into(), value);
    }

    #[inline(always)]
    pub fn build(ctx: ValueMap) -> Value {
        Value::from_map(ctx)
    }
}

/// Creates a template context with keys and values.
///
/// ```rust
/// # use jinja_engine::context;
/// let ctx = context! {
///     name => "Peter",
///     location => "World",
/// };
/// ```
///
/// Alternatively if the variable name matches the key name it can be
/// omitted:
///
/// ```rust
/// # use jinja_engine::context;
/// let name = "Peter";
/// let ctx = context! { name };
/// ```
#[macro_export]
macro_rules! context {
    () => {
        $crate::__context::build($crate::__context::make())
    };
    (
        $($key:ident $(=> $value:expr)?),* $(,)?
    ) => {{
        let mut ctx = $crate::__context::make();
        $(
            $crate::__context::add(&mut ctx, stringify!($key), $crate::context_value!($key $(, $value)?));
        )*
        $crate::__context::build(ctx)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! context_value {
    ($key:ident, $value:expr) => {
        $crate::value::Value::from($value)
    };
    ($key:ident) => {
        $crate::value::Value::from($key)
    };
}
