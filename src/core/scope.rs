/// Chained key/value namespace with lexical inheritance.
///
/// Lookups check local entries first, then climb the parent chain.
/// Scopes are built during loading and binding, shared read-only
/// afterwards; multiple children may share one parent.
use rustc_hash::FxHashMap;
use std::rc::Rc;
use thiserror::Error;

use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("unresolved name '{name}' (searched scopes: {chain})")]
    UnresolvedName { name: String, chain: String },
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: FxHashMap<String, Value>,
    parent: Option<Rc<Scope>>,
    name: Option<String>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    /// Root scope with a debugging name.
    pub fn named(name: &str) -> Scope {
        Scope {
            values: FxHashMap::default(),
            parent: None,
            name: Some(name.to_string()),
        }
    }

    pub fn from_entries(entries: &[(String, Value)]) -> Scope {
        let mut scope = Scope::new();
        for (k, v) in entries {
            scope.set_local(k, v.clone());
        }
        scope
    }

    /// Define or overwrite a name in this scope only. Parent scopes
    /// are never mutated through a child.
    pub fn set_local(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Create a child scope inheriting from `self`.
    pub fn child(self: &Rc<Self>, overrides: &[(String, Value)], name: Option<&str>) -> Scope {
        let mut values = FxHashMap::default();
        for (k, v) in overrides {
            values.insert(k.clone(), v.clone());
        }
        Scope {
            values,
            parent: Some(Rc::clone(self)),
            name: name.map(str::to_string),
        }
    }

    /// Look up a name, climbing the parent chain. First match wins.
    pub fn get(&self, name: &str) -> Result<&Value, ScopeError> {
        self.resolve(name).map(|(value, _)| value)
    }

    /// Look up a name and report which scope defined it, for
    /// diagnostics.
    pub fn resolve(&self, name: &str) -> Result<(&Value, &str), ScopeError> {
        let mut current = self;
        loop {
            if let Some(value) = current.values.get(name) {
                return Ok((value, current.name.as_deref().unwrap_or("<anonymous>")));
            }
            match &current.parent {
                Some(parent) => current = parent,
                None => {
                    return Err(ScopeError::UnresolvedName {
                        name: name.to_string(),
                        chain: self.chain_description(),
                    })
                }
            }
        }
    }

    /// Dotted-path lookup: the first segment resolves through the
    /// chain, remaining segments dig into nested maps.
    pub fn get_path(&self, path: &str) -> Result<&Value, ScopeError> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or(path);
        let mut current = self.get(head)?;
        for segment in segments {
            current = current.get(segment).ok_or_else(|| ScopeError::UnresolvedName {
                name: path.to_string(),
                chain: self.chain_description(),
            })?;
        }
        Ok(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Names defined directly in this scope, not inherited.
    pub fn local_keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn chain_description(&self) -> String {
        let mut parts = Vec::new();
        let mut current = Some(self);
        while let Some(scope) = current {
            parts.push(scope.name.clone().unwrap_or_else(|| "<anonymous>".to_string()));
            current = scope.parent.as_deref();
        }
        parts.join(" -> ")
    }
}
