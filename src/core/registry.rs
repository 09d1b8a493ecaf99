/// Template registry — explicit, injected store of template
/// definitions. Lookup flattens `extends:` chains so instantiation only
/// ever sees self-contained templates.
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::core::resolve::ResolveError;
use crate::schema::template::{Template, TemplateError};
use crate::schema::value::{Value, ValueError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("template '{name}' not found; available: [{available}]")]
    TemplateNotFound { name: String, available: String },
    #[error("circular extends chain: {0}")]
    CircularExtends(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("template dir '{path}': {reason}")]
    LoadFailed { path: String, reason: String },
}

/// Raw template bodies keyed by name. Bodies stay as document trees
/// until lookup so `extends:` can deep-merge before parsing.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    bodies: FxHashMap<String, Value>,
}

impl TemplateRegistry {
    pub fn new() -> TemplateRegistry {
        TemplateRegistry::default()
    }

    pub fn register(&mut self, name: &str, body: Value) {
        self.bodies.insert(name.to_string(), body);
    }

    /// Register every entry of a `templates:` map from a spec document.
    pub fn register_from_doc(&mut self, doc: &Value) {
        if let Some(entries) = doc.as_map() {
            for (name, body) in entries {
                self.register(name, body.clone());
            }
        }
    }

    /// Load every `.ron` file under `dir` (recursively). The template
    /// name is the file path relative to `dir`, without the extension,
    /// so `primitives/base_cycle.ron` registers as
    /// `primitives/base_cycle`.
    pub fn load_from_dir(&mut self, dir: &std::path::Path) -> Result<(), RegistryError> {
        self.load_dir_inner(dir, "")
    }

    fn load_dir_inner(&mut self, dir: &std::path::Path, prefix: &str) -> Result<(), RegistryError> {
        let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::LoadFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| RegistryError::LoadFailed {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if path.is_dir() {
                let nested = format!("{}{}/", prefix, stem);
                self.load_dir_inner(&path, &nested)?;
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                let text =
                    std::fs::read_to_string(&path).map_err(|e| RegistryError::LoadFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                let body = Value::parse_ron(&text)?;
                self.register(&format!("{}{}", prefix, stem), body);
            }
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bodies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a template by name with its inheritance chain flattened.
    pub fn get(&self, name: &str) -> Result<Template, RegistryError> {
        let body = self.flattened_body(name, &mut Vec::new())?;
        let mut template = Template::parse(name, &body)?;
        // The chain is already merged in; nothing downstream should
        // chase it again.
        template.extends = None;
        Ok(template)
    }

    fn flattened_body(&self, name: &str, chain: &mut Vec<String>) -> Result<Value, RegistryError> {
        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(RegistryError::CircularExtends(cycle.join(" -> ")));
        }
        let body = self
            .bodies
            .get(name)
            .ok_or_else(|| RegistryError::TemplateNotFound {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        match body.get("extends").and_then(Value::as_str) {
            Some(parent) => {
                chain.push(name.to_string());
                let base = self.flattened_body(&parent.to_string(), chain)?;
                chain.pop();
                Ok(Value::deep_merge(&base, body))
            }
            None => Ok(body.clone()),
        }
    }
}
