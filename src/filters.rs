//! The representative filter set described in the engine's documentation.
//!
//! A filter is `Fn(&State, Value, &[Value]) -> Result<Value, Error>`,
//! registered with [`Environment::add_filter`](crate::environment::Environment::add_filter).
//! `{{ value|name(arg1, arg2) }}` looks up `name`, then calls it with
//! `value` and `[arg1, arg2]`.

use std::cmp::Ordering;

use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::state::State;
use crate::utils::HtmlEscape;
use crate::value::Value;

fn type_error(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::FilterError, msg.into())
}

fn arg(args: &[Value], i: usize) -> Option<&Value> {
    args.get(i)
}

pub(crate) fn register_builtins(env: &mut Environment) {
    env.add_filter("safe", safe);
    env.add_filter("escape", escape);
    env.add_filter("e", escape);
    env.add_filter("tojson", tojson);
    env.add_filter("default", default);
    env.add_filter("d", default);
    env.add_filter("length", length);
    env.add_filter("count", length);
    env.add_filter("join", join);
    env.add_filter("sort", sort);
    env.add_filter("reverse", reverse);
    env.add_filter("upper", upper);
    env.add_filter("lower", lower);
    env.add_filter("trim", trim);
    env.add_filter("int", int);
    env.add_filter("float", float);
    env.add_filter("round", round);
    env.add_filter("abs", abs);
    env.add_filter("first", first);
    env.add_filter("last", last);
    env.add_filter("list", list);
    env.add_filter("map", map);
    env.add_filter("select", select);
    env.add_filter("selectattr", selectattr);
    env.add_filter("reject", reject);
    env.add_filter("rejectattr", rejectattr);
    env.add_filter("items", items);
    env.add_filter("dictsort", dictsort);
    env.add_filter("replace", replace);
    env.add_filter("title", title);
    env.add_filter("capitalize", capitalize);
    env.add_filter("truncate", truncate);
    env.add_filter("wordcount", wordcount);
    env.add_filter("pprint", pprint);
    env.add_filter("attr", attr);
    env.add_filter("batch", batch);
    env.add_filter("slice", slice);
    env.add_filter("sum", sum);
    env.add_filter("min", min);
    env.add_filter("max", max);
    env.add_filter("unique", unique);
    env.add_filter("dateformat", dateformat);
    #[cfg(feature = "urlencode")]
    env.add_filter("urlencode", urlencode);
}

fn safe(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from_safe_string(value.to_string()))
}

fn escape(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    if value.is_safe() {
        return Ok(value);
    }
    Ok(Value::from_safe_string(HtmlEscape(&value.to_string()).to_string()))
}

fn tojson(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    #[cfg(feature = "json")]
    {
        let rendered = serde_json::to_string(&value)
            .map_err(|err| Error::new(ErrorKind::BadSerialization, "unable to format to JSON").with_source(err))?;
        Ok(Value::from_safe_string(rendered))
    }
    #[cfg(not(feature = "json"))]
    {
        Err(type_error("tojson requires the 'json' feature"))
    }
}

fn default(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let use_default_for_falsy = arg(args, 1).map(Value::is_true).unwrap_or(false);
    if value.is_undefined() || (use_default_for_falsy && !value.is_true()) {
        Ok(arg(args, 0).cloned().unwrap_or(Value::from("")))
    } else {
        Ok(value)
    }
}

fn length(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    value
        .len()
        .map(Value::from)
        .ok_or_else(|| type_error(format!("{} has no length", value.type_name())))
}

fn join(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let sep = arg(args, 0).and_then(Value::as_str).unwrap_or("").to_string();
    let items: Vec<String> = value.try_iter()?.map(|v| v.to_string()).collect();
    Ok(Value::from(items.join(&sep)))
}

fn sort(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let reverse = arg(args, 0).map(Value::is_true).unwrap_or(false);
    let mut items: Vec<Value> = value.try_iter()?.collect();
    items.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    if reverse {
        items.reverse();
    }
    Ok(Value::from_vec(items))
}

fn reverse(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    if let Some(s) = value.as_str() {
        return Ok(Value::from(s.chars().rev().collect::<String>()));
    }
    let mut items: Vec<Value> = value.try_iter()?.collect();
    items.reverse();
    Ok(Value::from_vec(items))
}

fn upper(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.to_string().to_uppercase()))
}

fn lower(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.to_string().to_lowercase()))
}

fn trim(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let s = value.to_string();
    Ok(match arg(args, 0).and_then(Value::as_str) {
        Some(chars) => Value::from(s.trim_matches(|c| chars.contains(c)).to_string()),
        None => Value::from(s.trim().to_string()),
    })
}

fn int(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    match value.as_i64() {
        Some(i) => Ok(Value::from(i)),
        None => match value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
            Some(i) => Ok(Value::from(i)),
            None => Ok(arg(args, 0).cloned().unwrap_or(Value::from(0))),
        },
    }
}

fn float(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    match value.as_f64() {
        Some(f) => Ok(Value::from(f)),
        None => match value.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
            Some(f) => Ok(Value::from(f)),
            None => Ok(arg(args, 0).cloned().unwrap_or(Value::from(0.0))),
        },
    }
}

fn round(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let precision = arg(args, 0).and_then(Value::as_i64).unwrap_or(0);
    let f = value.as_f64().ok_or_else(|| type_error("round requires a number"))?;
    let factor = 10f64.powi(precision as i32);
    Ok(Value::from((f * factor).round() / factor))
}

fn abs(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::from)
            .ok_or_else(|| Error::new(ErrorKind::RuntimeError, "overflow on abs")),
        Value::Float(f) => Ok(Value::from(f.abs())),
        _ => Err(type_error("abs requires a number")),
    }
}

fn first(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(value.try_iter()?.next().unwrap_or(Value::Nil))
}

fn last(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(value.try_iter()?.last().unwrap_or(Value::Nil))
}

fn list(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from_vec(value.try_iter()?.collect()))
}

fn map(state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let name = arg(args, 0)
        .and_then(Value::as_str)
        .ok_or_else(|| type_error("map requires a filter name"))?;
    let rest = &args[1.min(args.len())..];
    let mapped: Result<Vec<Value>, Error> = value
        .try_iter()?
        .map(|item| state.apply_filter(name, item, rest))
        .collect();
    Ok(Value::from_vec(mapped?))
}

fn select_impl(state: &State, value: Value, args: &[Value], negate: bool) -> Result<Value, Error> {
    let name = arg(args, 0)
        .and_then(Value::as_str)
        .ok_or_else(|| type_error("select requires a test name"))?;
    let rest = &args[1.min(args.len())..];
    let mut out = Vec::new();
    for item in value.try_iter()? {
        let keep = state.perform_test(name, &item, rest)?;
        if keep != negate {
            out.push(item);
        }
    }
    Ok(Value::from_vec(out))
}

fn select(state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, value, args, false)
}

fn reject(state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, value, args, true)
}

fn select_attr_impl(state: &State, value: Value, args: &[Value], negate: bool) -> Result<Value, Error> {
    let attr_name = arg(args, 0)
        .and_then(Value::as_str)
        .ok_or_else(|| type_error("selectattr requires an attribute name"))?;
    let test_name = arg(args, 1).and_then(Value::as_str);
    let rest = &args[2.min(args.len())..];
    let mut out = Vec::new();
    for item in value.try_iter()? {
        let attr_value = item.get_attr(attr_name);
        let keep = match test_name {
            Some(name) => state.perform_test(name, &attr_value, rest)?,
            None => attr_value.is_true(),
        };
        if keep != negate {
            out.push(item);
        }
    }
    Ok(Value::from_vec(out))
}

fn selectattr(state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    select_attr_impl(state, value, args, false)
}

fn rejectattr(state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    select_attr_impl(state, value, args, true)
}

fn items(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    match value {
        Value::Map(m) => Ok(Value::from_vec(
            m.iter()
                .map(|(k, v)| Value::from_tuple(vec![Value::from(k.clone()), v.clone()]))
                .collect(),
        )),
        _ => Err(type_error("items requires a map")),
    }
}

fn dictsort(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    match value {
        Value::Map(m) => {
            let mut pairs: Vec<(String, Value)> = m.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Value::from_vec(
                pairs
                    .into_iter()
                    .map(|(k, v)| Value::from_tuple(vec![Value::from(k), v]))
                    .collect(),
            ))
        }
        _ => Err(type_error("dictsort requires a map")),
    }
}

fn replace(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let from = arg(args, 0).and_then(Value::as_str).unwrap_or("");
    let to = arg(args, 1).and_then(Value::as_str).unwrap_or("");
    Ok(Value::from(value.to_string().replace(from, to)))
}

fn title(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    let s = value.to_string();
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(if start_of_word { c.to_uppercase().next() } else { c.to_lowercase().next() });
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = true;
        }
    }
    Ok(Value::from(out))
}

fn capitalize(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    let s = value.to_string();
    let mut chars = s.chars();
    let rv = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::from(rv))
}

fn truncate(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let s = value.to_string();
    let len = arg(args, 0).and_then(Value::as_usize).unwrap_or(255);
    let end = arg(args, 1).and_then(Value::as_str).unwrap_or("...");
    if s.chars().count() <= len {
        return Ok(Value::from(s));
    }
    let truncated: String = s.chars().take(len.saturating_sub(end.chars().count())).collect();
    Ok(Value::from(format!("{truncated}{end}")))
}

fn wordcount(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(value.to_string().split_whitespace().count()))
}

fn pprint(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(format!("{value:?}")))
}

fn attr(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let name = arg(args, 0)
        .and_then(Value::as_str)
        .ok_or_else(|| type_error("attr requires a name"))?;
    Ok(value.get_attr(name))
}

fn batch(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let size = arg(args, 0)
        .and_then(Value::as_usize)
        .filter(|n| *n > 0)
        .ok_or_else(|| type_error("batch requires a positive size"))?;
    let fill = arg(args, 1).cloned();
    let items: Vec<Value> = value.try_iter()?.collect();
    let mut out = Vec::new();
    for chunk in items.chunks(size) {
        let mut batch: Vec<Value> = chunk.to_vec();
        if let Some(fill) = &fill {
            while batch.len() < size {
                batch.push(fill.clone());
            }
        }
        out.push(Value::from_vec(batch));
    }
    Ok(Value::from_vec(out))
}

fn slice(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let count = arg(args, 0)
        .and_then(Value::as_usize)
        .filter(|n| *n > 0)
        .ok_or_else(|| type_error("slice requires a positive slice count"))?;
    let items: Vec<Value> = value.try_iter()?.collect();
    let per_slice = items.len() / count;
    let extra = items.len() % count;
    let mut out = Vec::new();
    let mut offset = 0;
    for i in 0..count {
        let this_len = per_slice + usize::from(i < extra);
        out.push(Value::from_vec(items[offset..offset + this_len].to_vec()));
        offset += this_len;
    }
    Ok(Value::from_vec(out))
}

fn sum(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let attr_name = arg(args, 0).and_then(Value::as_str);
    let mut total = 0.0;
    for item in value.try_iter()? {
        let n = match attr_name {
            Some(name) => item.get_attr(name),
            None => item,
        };
        total += n.as_f64().ok_or_else(|| type_error("sum requires numeric items"))?;
    }
    if total.fract() == 0.0 {
        Ok(Value::from(total as i64))
    } else {
        Ok(Value::from(total))
    }
}

fn min(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(value
        .try_iter()?
        .fold(None, |acc: Option<Value>, v| match acc {
            Some(a) if a.partial_cmp(&v) != Some(Ordering::Greater) => Some(a),
            _ => Some(v),
        })
        .unwrap_or(Value::Nil))
}

fn max(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(value
        .try_iter()?
        .fold(None, |acc: Option<Value>, v| match acc {
            Some(a) if a.partial_cmp(&v) != Some(Ordering::Less) => Some(a),
            _ => Some(v),
        })
        .unwrap_or(Value::Nil))
}

fn unique(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    let mut seen: Vec<Value> = Vec::new();
    let mut out = Vec::new();
    for item in value.try_iter()? {
        if !seen.contains(&item) {
            seen.push(item.clone());
            out.push(item);
        }
    }
    Ok(Value::from_vec(out))
}

/// Formats an ISO-8601 date/datetime string (`YYYY-MM-DD[THH:MM:SS]`) using a
/// `strftime`-like subset (`%Y %m %d %H %M %S`). No `chrono` dependency is
/// added for this; see `DESIGN.md`.
fn dateformat(_state: &State, value: Value, args: &[Value]) -> Result<Value, Error> {
    let s = value
        .as_str()
        .ok_or_else(|| type_error("dateformat requires a string"))?;
    let fmt = arg(args, 0).and_then(Value::as_str).unwrap_or("%Y-%m-%d");
    let date_part = s.split('T').next().unwrap_or(s);
    let time_part = s.split('T').nth(1).unwrap_or("00:00:00");
    let mut date_fields = date_part.splitn(3, '-');
    let year = date_fields.next().unwrap_or("0000");
    let month = date_fields.next().unwrap_or("01");
    let day = date_fields.next().unwrap_or("01");
    let mut time_fields = time_part.splitn(3, ':');
    let hour = time_fields.next().unwrap_or("00");
    let minute = time_fields.next().unwrap_or("00");
    let second = time_fields.next().unwrap_or("00");

    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('Y') => out.push_str(year),
                Some('m') => out.push_str(month),
                Some('d') => out.push_str(day),
                Some('H') => out.push_str(hour),
                Some('M') => out.push_str(minute),
                Some('S') => out.push_str(second),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::from(out))
}

#[cfg(feature = "urlencode")]
fn urlencode(_state: &State, value: Value, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(
        percent_encoding::utf8_percent_encode(&value.to_string(), percent_encoding::NON_ALPHANUMERIC)
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state(env: &Environment) -> State<'_> {
        State::for_env(env, Context::new(Arc::new(HashMap::new())))
    }

    #[test]
    fn test_join() {
        let env = Environment::empty();
        let st = state(&env);
        let v = Value::from_vec(vec![Value::from(1), Value::from(2), Value::from(3)]);
        let rv = join(&st, v, &[Value::from(", ")]).unwrap();
        assert_eq!(rv.to_string(), "1, 2, 3");
    }

    #[test]
    fn test_default_for_undefined() {
        let env = Environment::empty();
        let st = state(&env);
        let rv = default(&st, Value::default(), &[Value::from("fallback")]).unwrap();
        assert_eq!(rv.to_string(), "fallback");
    }

    #[test]
    fn test_title() {
        let env = Environment::empty();
        let st = state(&env);
        let rv = title(&st, Value::from("hello world"), &[]).unwrap();
        assert_eq!(rv.to_string(), "Hello World");
    }
}
