//! Global functions: plain callables registered on the [`Environment`] and
//! looked up through the same namespace as other globals, plus the handful
//! of stateful helper objects (`namespace()`, `cycler()`, `joiner()`) Jinja2
//! templates expect to be able to construct.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::environment::{Environment, GlobalFunc};
use crate::error::{Error, ErrorKind};
use crate::value::{Enumerator, Object, Value, ValueMap};

/// Wraps a `Fn(&[Value]) -> Result<Value, Error>` as a callable [`Value`].
pub(crate) struct Global(Arc<GlobalFunc>);

impl Global {
    pub fn new<F>(f: F) -> Global
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Global(Arc::new(f))
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

impl Object for Global {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(self: &Arc<Self>, args: &[Value]) -> Result<Value, Error> {
        (self.0)(args)
    }
}

/// Backs the `namespace()` global: a mutable, attribute-addressable bag of
/// values, the only kind of object `{% set ns.x = ... %}` is allowed to
/// mutate in place.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    data: Mutex<ValueMap>,
}

impl Namespace {
    pub(crate) fn set_attr(&self, key: &str, value: Value) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }
}

impl Object for Namespace {
    fn type_name(&self) -> &'static str {
        "namespace"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.data.lock().unwrap().get(name).cloned()
    }

    fn enumerate(&self) -> Enumerator {
        let keys: Vec<Value> = self
            .data
            .lock()
            .unwrap()
            .keys()
            .map(|k| Value::from(k.clone()))
            .collect();
        Enumerator::Values(keys)
    }
}

/// Backs `cycler()`: `.next()` returns the next item, wrapping around;
/// `.current` is the item the last `.next()` call returned.
#[derive(Debug)]
pub(crate) struct Cycler {
    items: Vec<Value>,
    pos: Mutex<usize>,
}

impl Cycler {
    fn new(items: Vec<Value>) -> Cycler {
        Cycler {
            items,
            pos: Mutex::new(0),
        }
    }
}

impl Object for Cycler {
    fn type_name(&self) -> &'static str {
        "cycler"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "current" => {
                let pos = *self.pos.lock().unwrap();
                self.items.get(pos.saturating_sub(1).min(self.items.len().saturating_sub(1)))
                    .or_else(|| self.items.first())
                    .cloned()
            }
            _ => None,
        }
    }

    fn call_method(self: &Arc<Self>, name: &str, _args: &[Value]) -> Result<Value, Error> {
        match name {
            "next" => {
                if self.items.is_empty() {
                    return Ok(Value::Nil);
                }
                let mut pos = self.pos.lock().unwrap();
                let item = self.items[*pos % self.items.len()].clone();
                *pos += 1;
                Ok(item)
            }
            "reset" => {
                *self.pos.lock().unwrap() = 0;
                Ok(Value::Nil)
            }
            other => Err(Error::new(
                ErrorKind::RuntimeError,
                format!("cycler has no method named {other}"),
            )),
        }
    }
}

/// Backs `joiner()`: calling it returns an empty string the first time and
/// the separator on every subsequent call, used to comma-join loop bodies.
#[derive(Debug)]
pub(crate) struct Joiner {
    sep: String,
    used: Mutex<bool>,
}

impl Joiner {
    fn new(sep: String) -> Joiner {
        Joiner {
            sep,
            used: Mutex::new(false),
        }
    }
}

impl Object for Joiner {
    fn type_name(&self) -> &'static str {
        "joiner"
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(self: &Arc<Self>, _args: &[Value]) -> Result<Value, Error> {
        let mut used = self.used.lock().unwrap();
        if *used {
            Ok(Value::from(self.sep.clone()))
        } else {
            *used = true;
            Ok(Value::from(""))
        }
    }
}

pub(crate) fn register_builtins(env: &mut Environment) {
    env.add_function("range", range);
    env.add_function("dict", dict);
    env.add_function("namespace", namespace);
    env.add_function("cycler", cycler);
    env.add_function("joiner", joiner);
}

fn range(args: &[Value]) -> Result<Value, Error> {
    let nums: Vec<i64> = args
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "range() arguments must be integers"))
        })
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match nums.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(Error::new(
                ErrorKind::RuntimeError,
                "range() takes 1 to 3 arguments",
            ))
        }
    };
    if step == 0 {
        return Err(Error::new(ErrorKind::RuntimeError, "range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::from(i));
        i += step;
    }
    Ok(Value::from_vec(items))
}

fn dict(args: &[Value]) -> Result<Value, Error> {
    let mut map = ValueMap::new();
    for arg in args {
        if let Value::Map(m) = arg {
            for (k, v) in m.iter() {
                map.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(Value::from_map(map))
}

fn namespace(args: &[Value]) -> Result<Value, Error> {
    let ns = Namespace::default();
    for arg in args {
        if let Value::Map(m) = arg {
            for (k, v) in m.iter() {
                ns.set_attr(k, v.clone());
            }
        }
    }
    Ok(Value::from_object(ns))
}

fn cycler(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from_object(Cycler::new(args.to_vec())))
}

fn joiner(args: &[Value]) -> Result<Value, Error> {
    let sep = args.first().and_then(Value::as_str).unwrap_or(", ").to_string();
    Ok(Value::from_object(Joiner::new(sep)))
}
