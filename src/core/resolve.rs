/// Structural placeholder resolution (hydration phase 1).
///
/// Replaces every `Reference` with a copy of the target structure and
/// every `Include` with the parsed contents of the named resource.
/// `Evaluable` and `Quoted` pass through untouched. Postcondition: no
/// `Reference` or `Include` remains anywhere in the tree.
use thiserror::Error;

use crate::core::scope::{Scope, ScopeError};
use crate::schema::value::{Value, ValueError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Unresolved(#[from] ScopeError),
    #[error("circular reference chain: {0}")]
    CircularReference(String),
    #[error("circular include chain: {0}")]
    CircularInclude(String),
    #[error("include '{path}' failed: {reason}")]
    IncludeFailed { path: String, reason: String },
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Injected collaborator that fetches included resources. The core
/// never touches the filesystem directly.
pub trait IncludeLoader {
    fn load(&self, path: &str) -> Result<Value, ResolveError>;
}

/// Loader for specs that declare no includes.
pub struct NoIncludes;

impl IncludeLoader for NoIncludes {
    fn load(&self, path: &str) -> Result<Value, ResolveError> {
        Err(ResolveError::IncludeFailed {
            path: path.to_string(),
            reason: "no include loader configured".to_string(),
        })
    }
}

/// Filesystem loader rooted at a base directory. `.ron` files parse
/// into document trees; anything else loads as raw text.
pub struct FsIncludeLoader {
    base_dir: std::path::PathBuf,
}

impl FsIncludeLoader {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> FsIncludeLoader {
        FsIncludeLoader {
            base_dir: base_dir.into(),
        }
    }
}

impl IncludeLoader for FsIncludeLoader {
    fn load(&self, path: &str) -> Result<Value, ResolveError> {
        let full = self.base_dir.join(path);
        let text = std::fs::read_to_string(&full).map_err(|e| ResolveError::IncludeFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if full.extension().and_then(|s| s.to_str()) == Some("ron") {
            Ok(Value::parse_ron(&text)?)
        } else {
            Ok(Value::Str(text))
        }
    }
}

/// In-memory loader, used by tests and embedded template packs.
#[derive(Default)]
pub struct MapIncludeLoader {
    entries: rustc_hash::FxHashMap<String, Value>,
}

impl MapIncludeLoader {
    pub fn new() -> MapIncludeLoader {
        MapIncludeLoader::default()
    }

    pub fn insert(&mut self, path: &str, value: Value) {
        self.entries.insert(path.to_string(), value);
    }
}

impl IncludeLoader for MapIncludeLoader {
    fn load(&self, path: &str) -> Result<Value, ResolveError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::IncludeFailed {
                path: path.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Resolve all structural placeholders in `value`.
pub fn resolve_structural(
    value: &Value,
    scope: &Scope,
    loader: &dyn IncludeLoader,
) -> Result<Value, ResolveError> {
    let mut ref_chain = Vec::new();
    let mut include_chain = Vec::new();
    resolve_inner(value, scope, loader, &mut ref_chain, &mut include_chain)
}

fn resolve_inner(
    value: &Value,
    scope: &Scope,
    loader: &dyn IncludeLoader,
    ref_chain: &mut Vec<String>,
    include_chain: &mut Vec<String>,
) -> Result<Value, ResolveError> {
    match value {
        Value::Reference(path) => {
            if ref_chain.iter().any(|p| p == path) {
                let mut cycle = ref_chain.clone();
                cycle.push(path.clone());
                return Err(ResolveError::CircularReference(cycle.join(" -> ")));
            }
            // The target is copied, never shared; it may itself carry
            // further references.
            let target = scope.get_path(path)?.clone();
            ref_chain.push(path.clone());
            let resolved = resolve_inner(&target, scope, loader, ref_chain, include_chain);
            ref_chain.pop();
            resolved
        }
        Value::Include(path) => {
            if include_chain.iter().any(|p| p == path) {
                let mut cycle = include_chain.clone();
                cycle.push(path.clone());
                return Err(ResolveError::CircularInclude(cycle.join(" -> ")));
            }
            let loaded = loader.load(path)?;
            include_chain.push(path.clone());
            let resolved = resolve_inner(&loaded, scope, loader, ref_chain, include_chain);
            include_chain.pop();
            resolved
        }
        Value::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_inner(item, scope, loader, ref_chain, include_chain)?);
            }
            Ok(Value::Seq(out))
        }
        Value::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((
                    k.clone(),
                    resolve_inner(v, scope, loader, ref_chain, include_chain)?,
                ));
            }
            Ok(Value::Map(out))
        }
        // Deferred placeholders and scalars pass through unchanged.
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with(entries: &[(&str, Value)]) -> Scope {
        let mut scope = Scope::named("spec");
        for (k, v) in entries {
            scope.set_local(k, v.clone());
        }
        scope
    }

    #[test]
    fn reference_replaced_by_copy() {
        let constants = Value::Map(vec![("high".to_string(), Value::Float(0.8))]);
        let scope = scope_with(&[("constants", constants)]);
        let tree = Value::Map(vec![(
            "permeability".to_string(),
            Value::Reference("constants.high".to_string()),
        )]);

        let resolved = resolve_structural(&tree, &scope, &NoIncludes).unwrap();
        assert_eq!(resolved.get("permeability"), Some(&Value::Float(0.8)));
        assert!(!resolved.has_structural_placeholder());
    }

    #[test]
    fn reference_target_may_itself_reference() {
        let scope = scope_with(&[
            ("a", Value::Reference("b".to_string())),
            ("b", Value::Int(7)),
        ]);
        let tree = Value::Reference("a".to_string());
        let resolved = resolve_structural(&tree, &scope, &NoIncludes).unwrap();
        assert_eq!(resolved, Value::Int(7));
    }

    #[test]
    fn circular_reference_names_cycle() {
        let scope = scope_with(&[
            ("a", Value::Reference("b".to_string())),
            ("b", Value::Reference("a".to_string())),
        ]);
        let tree = Value::Reference("a".to_string());
        let err = resolve_structural(&tree, &scope, &NoIncludes).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("circular reference"));
        assert!(msg.contains("a -> b -> a"));
    }

    #[test]
    fn include_replaced_by_contents() {
        let mut loader = MapIncludeLoader::new();
        loader.insert(
            "shared/molecules.ron",
            Value::Map(vec![("ME1".to_string(), Value::map())]),
        );
        let scope = scope_with(&[]);
        let tree = Value::Map(vec![(
            "molecules".to_string(),
            Value::Include("shared/molecules.ron".to_string()),
        )]);

        let resolved = resolve_structural(&tree, &scope, &loader).unwrap();
        assert!(resolved.get_path("molecules.ME1").is_some());
    }

    #[test]
    fn circular_include_names_cycle() {
        let mut loader = MapIncludeLoader::new();
        loader.insert("a.ron", Value::Include("b.ron".to_string()));
        loader.insert("b.ron", Value::Include("a.ron".to_string()));
        let scope = scope_with(&[]);
        let tree = Value::Include("a.ron".to_string());

        let err = resolve_structural(&tree, &scope, &loader).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("circular include"));
        assert!(msg.contains("a.ron -> b.ron -> a.ron"));
    }

    #[test]
    fn missing_include_is_an_error() {
        let scope = scope_with(&[]);
        let tree = Value::Include("nope.ron".to_string());
        assert!(matches!(
            resolve_structural(&tree, &scope, &MapIncludeLoader::new()),
            Err(ResolveError::IncludeFailed { .. })
        ));
    }

    #[test]
    fn deferred_placeholders_pass_through() {
        let scope = scope_with(&[]);
        let tree = Value::Map(vec![
            ("count".to_string(), Value::Evaluable("normal(5, 1)".to_string())),
            ("rate".to_string(), Value::Quoted("k * S".to_string())),
        ]);
        let resolved = resolve_structural(&tree, &scope, &NoIncludes).unwrap();
        assert_eq!(resolved, tree);
    }

    #[test]
    fn sibling_references_to_same_target_are_not_cyclic() {
        let scope = scope_with(&[("shared", Value::Int(1))]);
        let tree = Value::Seq(vec![
            Value::Reference("shared".to_string()),
            Value::Reference("shared".to_string()),
        ]);
        let resolved = resolve_structural(&tree, &scope, &NoIncludes).unwrap();
        assert_eq!(resolved, Value::Seq(vec![Value::Int(1), Value::Int(1)]));
    }
}
