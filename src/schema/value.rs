/// Generic document tree — the parsed form of generator specs and
/// templates, plus the four placeholder variants of the spec language.
///
/// Placeholder lifecycle:
/// - `Reference` / `Include` are resolved (and removed) during
///   structural resolution, before any template expansion.
/// - `Evaluable` is resolved once, at parameter-binding time.
/// - `Quoted` is never resolved here; it is carried through as opaque
///   expression text for the simulation engine.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unsupported document node: {0}")]
    Unsupported(String),
    #[error("map keys must be strings, found: {0}")]
    NonStringKey(String),
}

/// A node in the parsed document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    /// Ordered mapping. Declaration order is preserved when built
    /// programmatically; lookups are linear, which is fine at spec sizes.
    Map(Vec<(String, Value)>),
    /// `!ref name.or.dotted.path` — resolved structurally, by copy.
    Reference(String),
    /// `!include relative/path` — replaced by parsed file contents.
    Include(String),
    /// `!ev expr` — evaluated once during parameter binding.
    Evaluable(String),
    /// `!quote expr` — opaque, handed downstream unevaluated.
    Quoted(String),
}

impl Value {
    /// Parse a RON document into a `Value` tree, hydrating
    /// sigil-prefixed strings into placeholder variants.
    pub fn parse_ron(input: &str) -> Result<Value, ValueError> {
        let raw: ron::Value = ron::from_str(input)?;
        Self::from_ron(&raw)
    }

    /// Convert a raw `ron::Value` into a document tree. Strings with a
    /// recognized sigil prefix become placeholders:
    /// `"!ref x"`, `"!include x"`, `"!ev x"`, `"!quote x"`.
    pub fn from_ron(raw: &ron::Value) -> Result<Value, ValueError> {
        match raw {
            ron::Value::Unit => Ok(Value::Null),
            ron::Value::Option(None) => Ok(Value::Null),
            ron::Value::Option(Some(inner)) => Self::from_ron(inner),
            ron::Value::Bool(b) => Ok(Value::Bool(*b)),
            ron::Value::Char(c) => Ok(Value::Str(c.to_string())),
            ron::Value::Number(n) => Ok(match n {
                ron::value::Number::Integer(i) => Value::Int(*i),
                ron::value::Number::Float(f) => Value::Float(f.get()),
            }),
            ron::Value::String(s) => Ok(Self::from_tagged_str(s)),
            ron::Value::Seq(items) => {
                let mut seq = Vec::with_capacity(items.len());
                for item in items {
                    seq.push(Self::from_ron(item)?);
                }
                Ok(Value::Seq(seq))
            }
            ron::Value::Map(map) => {
                let mut entries = Vec::new();
                for (k, v) in map.iter() {
                    let key = match k {
                        ron::Value::String(s) => s.clone(),
                        other => return Err(ValueError::NonStringKey(format!("{:?}", other))),
                    };
                    entries.push((key, Self::from_ron(v)?));
                }
                Ok(Value::Map(entries))
            }
        }
    }

    /// Hydrate a string into a placeholder if it carries a sigil prefix.
    pub fn from_tagged_str(s: &str) -> Value {
        if let Some(rest) = s.strip_prefix("!ref ") {
            Value::Reference(rest.trim().to_string())
        } else if let Some(rest) = s.strip_prefix("!include ") {
            Value::Include(rest.trim().to_string())
        } else if let Some(rest) = s.strip_prefix("!ev ") {
            Value::Evaluable(rest.trim().to_string())
        } else if let Some(rest) = s.strip_prefix("!quote ") {
            Value::Quoted(rest.trim().to_string())
        } else {
            Value::Str(s.to_string())
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(f.round() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Follow a dotted path through nested maps.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Insert or replace a key in a map value. No-op on non-maps.
    pub fn insert(&mut self, key: &str, value: Value) {
        if let Value::Map(entries) = self {
            if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value;
            } else {
                entries.push((key.to_string(), value));
            }
        }
    }

    /// Deep merge: `overlay` wins on conflicts; maps merge recursively,
    /// everything else is replaced wholesale. Used for `extends:`.
    pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
        match (base, overlay) {
            (Value::Map(base_entries), Value::Map(over_entries)) => {
                let mut merged = base_entries.clone();
                for (key, over_val) in over_entries {
                    if let Some(slot) = merged.iter_mut().find(|(k, _)| k == key) {
                        slot.1 = Value::deep_merge(&slot.1, over_val);
                    } else {
                        merged.push((key.clone(), over_val.clone()));
                    }
                }
                Value::Map(merged)
            }
            _ => overlay.clone(),
        }
    }

    /// True if any `Reference` or `Include` placeholder remains in the
    /// tree. Structural resolution guarantees this returns false.
    pub fn has_structural_placeholder(&self) -> bool {
        match self {
            Value::Reference(_) | Value::Include(_) => true,
            Value::Seq(items) => items.iter().any(Value::has_structural_placeholder),
            Value::Map(entries) => entries.iter().any(|(_, v)| v.has_structural_placeholder()),
            _ => false,
        }
    }

    /// True if any `Evaluable` placeholder remains in the tree.
    /// Parameter binding guarantees this returns false for params.
    pub fn has_evaluable(&self) -> bool {
        match self {
            Value::Evaluable(_) => true,
            Value::Seq(items) => items.iter().any(Value::has_evaluable),
            Value::Map(entries) => entries.iter().any(|(_, v)| v.has_evaluable()),
            _ => false,
        }
    }

    /// Empty map constructor.
    pub fn map() -> Value {
        Value::Map(Vec::new())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::map()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scalars_and_maps() {
        let v = Value::parse_ron(r#"{"count": 3, "rate": 0.5, "name": "krel"}"#).unwrap();
        assert_eq!(v.get("count"), Some(&Value::Int(3)));
        assert_eq!(v.get("rate"), Some(&Value::Float(0.5)));
        assert_eq!(v.get("name").and_then(Value::as_str), Some("krel"));
    }

    #[test]
    fn sigil_strings_become_placeholders() {
        let v = Value::parse_ron(
            r#"{
                "a": "!ref constants.high",
                "b": "!ev normal(50, 10)",
                "c": "!quote k * S",
                "d": "!include shared/molecules.ron",
                "e": "plain text",
            }"#,
        )
        .unwrap();
        assert_eq!(v.get("a"), Some(&Value::Reference("constants.high".into())));
        assert_eq!(v.get("b"), Some(&Value::Evaluable("normal(50, 10)".into())));
        assert_eq!(v.get("c"), Some(&Value::Quoted("k * S".into())));
        assert_eq!(
            v.get("d"),
            Some(&Value::Include("shared/molecules.ron".into()))
        );
        assert_eq!(v.get("e"), Some(&Value::Str("plain text".into())));
    }

    #[test]
    fn get_path_follows_nested_maps() {
        let v = Value::parse_ron(r#"{"outer": {"inner": {"leaf": 7}}}"#).unwrap();
        assert_eq!(v.get_path("outer.inner.leaf"), Some(&Value::Int(7)));
        assert_eq!(v.get_path("outer.missing"), None);
    }

    #[test]
    fn deep_merge_overrides_and_recurses() {
        let base = Value::parse_ron(r#"{"params": {"x": 1, "y": 2}, "kept": true}"#).unwrap();
        let overlay = Value::parse_ron(r#"{"params": {"y": 3, "z": 4}}"#).unwrap();
        let merged = Value::deep_merge(&base, &overlay);
        assert_eq!(merged.get_path("params.x"), Some(&Value::Int(1)));
        assert_eq!(merged.get_path("params.y"), Some(&Value::Int(3)));
        assert_eq!(merged.get_path("params.z"), Some(&Value::Int(4)));
        assert_eq!(merged.get("kept"), Some(&Value::Bool(true)));
    }

    #[test]
    fn structural_placeholder_detection() {
        let v = Value::Map(vec![(
            "nested".into(),
            Value::Seq(vec![Value::Reference("x".into())]),
        )]);
        assert!(v.has_structural_placeholder());
        let clean = Value::Map(vec![("e".into(), Value::Evaluable("1 + 1".into()))]);
        assert!(!clean.has_structural_placeholder());
        assert!(clean.has_evaluable());
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut v = Value::map();
        v.insert("k", Value::Int(1));
        v.insert("k", Value::Int(2));
        assert_eq!(v.get("k"), Some(&Value::Int(2)));
        assert_eq!(v.as_map().unwrap().len(), 1);
    }
}
