/// Template tree construction: expands `_instantiate_` blocks, with
/// their `_as_ name{i in lo..hi}` replication keys, into a concrete
/// tree of named instances. Every node gets its dotted namespace path
/// here; later stages never invent names.
use std::rc::Rc;

use thiserror::Error;

use crate::core::registry::{RegistryError, TemplateRegistry};
use crate::core::scope::Scope;
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("bad instantiation key '{key}': {reason}")]
    BadKey { key: String, reason: String },
    #[error("bad replication range in '{key}': {reason}")]
    BadRange { key: String, reason: String },
    #[error("instance '{path}' is missing '_template_'")]
    MissingTemplate { path: String },
    #[error("duplicate sibling instance '{name}' under '{parent}'")]
    DuplicateSibling { name: String, parent: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One node of the expanded instantiation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Instance name, replication index already concatenated.
    pub name: String,
    /// Dotted path from the root, e.g. `krel.energy`.
    pub namespace_path: String,
    /// Template this node instantiates (flattened on lookup).
    pub template: String,
    /// Parameter overrides from the instantiation body, still
    /// unevaluated. Replication adds the loop variable as an `Int`.
    pub params: Vec<(String, Value)>,
    /// Wiring edges declared inline, local port path to target path.
    pub pending_edges: Vec<(String, String)>,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemplateTree {
    pub roots: Vec<TreeNode>,
}

impl TemplateTree {
    /// Depth-first traversal over all nodes.
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        fn visit<'a>(node: &'a TreeNode, out: &mut Vec<&'a TreeNode>) {
            out.push(node);
            for child in &node.children {
                visit(child, out);
            }
        }
        for root in &self.roots {
            visit(root, &mut out);
        }
        out
    }

}

/// Parsed form of an `_as_` key.
struct AsKey {
    name: String,
    range: Option<Replication>,
}

struct Replication {
    var: String,
    lo: RangeEnd,
    hi: RangeEnd,
}

enum RangeEnd {
    Literal(i64),
    Param(String),
}

impl RangeEnd {
    fn resolve(&self, key: &str, scope: &Scope) -> Result<i64, TreeError> {
        match self {
            RangeEnd::Literal(n) => Ok(*n),
            RangeEnd::Param(name) => scope
                .get_path(name)
                .ok()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| TreeError::BadRange {
                    key: key.to_string(),
                    reason: format!("'{}' is not a bound numeric parameter", name),
                }),
        }
    }
}

/// Parse `_as_ name` or `_as_ name{var in lo..hi}`. Range ends are
/// integer literals or names of already-bound parameters.
fn parse_as_key(key: &str) -> Result<AsKey, TreeError> {
    let rest = key
        .strip_prefix("_as_")
        .ok_or_else(|| TreeError::BadKey {
            key: key.to_string(),
            reason: "expected '_as_ <name>'".to_string(),
        })?
        .trim();
    if rest.is_empty() {
        return Err(TreeError::BadKey {
            key: key.to_string(),
            reason: "missing instance name".to_string(),
        });
    }
    let Some(brace) = rest.find('{') else {
        return Ok(AsKey {
            name: rest.to_string(),
            range: None,
        });
    };
    let name = rest[..brace].trim().to_string();
    let inner = rest[brace + 1..]
        .strip_suffix('}')
        .ok_or_else(|| TreeError::BadRange {
            key: key.to_string(),
            reason: "unterminated '{'".to_string(),
        })?
        .trim();
    let (var, range_text) = inner.split_once(" in ").ok_or_else(|| TreeError::BadRange {
        key: key.to_string(),
        reason: "expected '<var> in <lo>..<hi>'".to_string(),
    })?;
    let (lo, hi) = range_text
        .split_once("..")
        .ok_or_else(|| TreeError::BadRange {
            key: key.to_string(),
            reason: "expected '<lo>..<hi>'".to_string(),
        })?;
    let parse_end = |text: &str| -> RangeEnd {
        let text = text.trim();
        match text.parse::<i64>() {
            Ok(n) => RangeEnd::Literal(n),
            Err(_) => RangeEnd::Param(text.to_string()),
        }
    };
    Ok(AsKey {
        name,
        range: Some(Replication {
            var: var.trim().to_string(),
            lo: parse_end(lo),
            hi: parse_end(hi),
        }),
    })
}

/// Expand an `_instantiate_` section into tree nodes. `scope` holds the
/// already-bound spec-level parameters plus, for nested blocks, literal
/// numeric params of enclosing instances; replication range ends
/// resolve against it.
pub fn build_tree(
    instantiate: &[(String, Value)],
    registry: &TemplateRegistry,
    scope: &Rc<Scope>,
) -> Result<TemplateTree, TreeError> {
    let roots = expand_level(instantiate, "", registry, scope, 0)?;
    Ok(TemplateTree { roots })
}

const MAX_DEPTH: usize = 16;

fn expand_level(
    entries: &[(String, Value)],
    parent_path: &str,
    registry: &TemplateRegistry,
    scope: &Rc<Scope>,
    depth: usize,
) -> Result<Vec<TreeNode>, TreeError> {
    if depth > MAX_DEPTH {
        return Err(TreeError::BadKey {
            key: parent_path.to_string(),
            reason: format!("instantiation nesting exceeds {} levels", MAX_DEPTH),
        });
    }
    let mut nodes: Vec<TreeNode> = Vec::new();
    for (key, body) in entries {
        let parsed = parse_as_key(key)?;
        match &parsed.range {
            None => {
                push_node(
                    &mut nodes,
                    make_node(&parsed.name, None, body, parent_path, registry, scope, depth)?,
                    parent_path,
                )?;
            }
            Some(replication) => {
                let lo = replication.lo.resolve(key, scope)?;
                let hi = replication.hi.resolve(key, scope)?;
                if hi < lo {
                    return Err(TreeError::BadRange {
                        key: key.clone(),
                        reason: format!("empty range {}..{}", lo, hi),
                    });
                }
                for i in lo..=hi {
                    let name = format!("{}{}", parsed.name, i);
                    push_node(
                        &mut nodes,
                        make_node(
                            &name,
                            Some((&replication.var, i)),
                            body,
                            parent_path,
                            registry,
                            scope,
                            depth,
                        )?,
                        parent_path,
                    )?;
                }
            }
        }
    }
    Ok(nodes)
}

fn literal_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::Int(_) | Value::Float(_) => Some(value.clone()),
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k == "default")
            .and_then(|(_, v)| literal_numeric(v)),
        _ => None,
    }
}

fn push_node(nodes: &mut Vec<TreeNode>, node: TreeNode, parent: &str) -> Result<(), TreeError> {
    if nodes.iter().any(|n| n.name == node.name) {
        return Err(TreeError::DuplicateSibling {
            name: node.name,
            parent: if parent.is_empty() {
                "<root>".to_string()
            } else {
                parent.to_string()
            },
        });
    }
    nodes.push(node);
    Ok(())
}

fn make_node(
    name: &str,
    index: Option<(&str, i64)>,
    body: &Value,
    parent_path: &str,
    registry: &TemplateRegistry,
    scope: &Rc<Scope>,
    depth: usize,
) -> Result<TreeNode, TreeError> {
    let namespace_path = if parent_path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent_path, name)
    };

    let mut template_name = None;
    let mut params: Vec<(String, Value)> = Vec::new();
    let mut pending_edges = Vec::new();

    if let Some((var, i)) = index {
        params.push((var.to_string(), Value::Int(i)));
    }

    if let Some(entries) = body.as_map() {
        for (key, value) in entries {
            match key.as_str() {
                "_template_" => template_name = value.as_str().map(str::to_string),
                "_params_" => {
                    if let Some(overrides) = value.as_map() {
                        for (k, v) in overrides {
                            params.push((k.clone(), v.clone()));
                        }
                    }
                }
                "wiring" => {
                    if let Some(edges) = value.as_map() {
                        for (from, to) in edges {
                            if let Some(to) = to.as_str() {
                                pending_edges.push((from.clone(), to.to_string()));
                            }
                        }
                    }
                }
                // A dotted key with a string value names a port on this
                // node wired to a target path.
                k if k.contains('.') => {
                    if let Some(target) = value.as_str() {
                        pending_edges.push((k.to_string(), target.to_string()));
                    } else {
                        params.push((key.clone(), value.clone()));
                    }
                }
                _ => params.push((key.clone(), value.clone())),
            }
        }
    }

    let template_name = template_name.ok_or_else(|| TreeError::MissingTemplate {
        path: namespace_path.clone(),
    })?;
    // Unknown templates fail here, before any sampling happens.
    let template = registry.get(&template_name)?;
    for (from, to) in &template.wiring {
        pending_edges.push((from.clone(), to.clone()));
    }

    // Nested replication ranges may name this instance's params, so
    // long as they are plain numbers (sampled params bind too late to
    // drive tree shape).
    let mut literal: Vec<(String, Value)> = Vec::new();
    for (name, value) in template.params.iter().chain(params.iter()) {
        if let Some(v) = literal_numeric(value) {
            literal.retain(|(n, _)| n != name);
            literal.push((name.clone(), v));
        }
    }
    let child_scope = Rc::new(scope.child(&literal, Some(&namespace_path)));
    let children = expand_level(
        &template.instances,
        &namespace_path,
        registry,
        &child_scope,
        depth + 1,
    )?;

    Ok(TreeNode {
        name: name.to_string(),
        namespace_path,
        template: template_name,
        params,
        pending_edges,
        children,
    })
}
