//! `serde::Deserialize for Value`, used by [`crate::Environment::add_global`]
//! style call sites that hand the engine already-parsed JSON/YAML/etc., and
//! internally by the `json` feature's `fromjson` filter.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;

use crate::value::{Value, ValueMap};

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

macro_rules! visit_primitive {
    ($name:ident, $ty:ty) => {
        fn $name<E>(self, v: $ty) -> Result<Value, E>
        where
            E: de::Error,
        {
            Ok(Value::from(v))
        }
    };
}

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str("any compatible value")
    }

    visit_primitive!(visit_bool, bool);
    visit_primitive!(visit_i8, i8);
    visit_primitive!(visit_i16, i16);
    visit_primitive!(visit_i32, i32);
    visit_primitive!(visit_i64, i64);
    visit_primitive!(visit_u8, u8);
    visit_primitive!(visit_u16, u16);
    visit_primitive!(visit_u32, u32);
    visit_primitive!(visit_f32, f32);
    visit_primitive!(visit_f64, f64);
    visit_primitive!(visit_char, char);
    visit_primitive!(visit_str, &str);
    visit_primitive!(visit_string, String);

    fn visit_u64<E>(self, v: u64) -> Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Int(v as i64))
    }

    fn visit_unit<E>(self) -> Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Nil)
    }

    fn visit_none<E>(self) -> Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Nil)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::from_vec(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut out = ValueMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            out.insert(key, value);
        }
        Ok(Value::from_map(out))
    }
}
