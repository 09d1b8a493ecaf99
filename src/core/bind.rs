/// Parameter binding: turns every `Evaluable` parameter into a concrete
/// value, spec-level params first, then each tree node depth-first.
///
/// Entries may reference each other regardless of declaration order, so
/// binding runs a worklist to a fixpoint: an entry whose expression
/// names a still-unbound sibling is deferred and retried after the rest
/// of the pass. A round that defers everything means a genuine cycle or
/// a missing name.
use std::rc::Rc;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::core::distributions::DistributionRegistry;
use crate::core::expr::{self, ExprError};
use crate::core::registry::{RegistryError, TemplateRegistry};
use crate::core::rng::derive_rng;
use crate::core::scope::Scope;
use crate::core::tree::{TemplateTree, TreeNode};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("parameter '{name}' at '{path}' depends on unbound '{dependency}'")]
    UnresolvedParam {
        path: String,
        name: String,
        dependency: String,
    },
    #[error("parameter '{name}' at '{path}' is {value}, outside declared range [{lo}, {hi}]")]
    OutOfRange {
        path: String,
        name: String,
        value: f64,
        lo: f64,
        hi: f64,
    },
    #[error("parameter '{name}' at '{path}' still contains an evaluable after binding")]
    ResidualEvaluable { path: String, name: String },
}

/// A tree node with every parameter bound to a concrete value.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundNode {
    pub name: String,
    pub namespace_path: String,
    pub template: String,
    pub values: Vec<(String, Value)>,
    pub pending_edges: Vec<(String, String)>,
    pub children: Vec<BoundNode>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundTree {
    pub roots: Vec<BoundNode>,
}

impl BoundTree {
    pub fn walk(&self) -> Vec<&BoundNode> {
        let mut out = Vec::new();
        fn visit<'a>(node: &'a BoundNode, out: &mut Vec<&'a BoundNode>) {
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

/// Declared range on a parameter default:
/// `{"default": ..., "range": [lo, hi]}`.
struct Declared {
    default: Value,
    range: Option<(f64, f64)>,
}

fn split_declaration(value: &Value) -> Declared {
    if let (Some(default), Some(range)) = (value.get("default"), value.get("range")) {
        let bounds = range.as_seq().and_then(|items| match items {
            [lo, hi] => Some((lo.as_f64()?, hi.as_f64()?)),
            _ => None,
        });
        Declared {
            default: default.clone(),
            range: bounds,
        }
    } else {
        Declared {
            default: value.clone(),
            range: None,
        }
    }
}

/// Bind one set of parameter entries against `parent` scope, using the
/// worklist strategy. Returns bound values in declaration order.
fn bind_entries(
    path: &str,
    entries: &[(String, Value)],
    ranges: &[(String, (f64, f64))],
    parent: &Rc<Scope>,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<Vec<(String, Value)>, BindError> {
    let order: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
    let mut pending: Vec<(String, Value)> = entries.to_vec();
    // Unbound entries sit in the scope as raw `Evaluable`s, so an
    // expression naming one gets `DependsOnUnbound` instead of a
    // missing-name error, whatever the declaration order.
    let mut scope = parent.child(entries, Some(path));

    while !pending.is_empty() {
        let mut deferred: Vec<(String, Value)> = Vec::new();
        let mut progressed = false;
        let mut last_dependency: Option<(String, String)> = None;

        for (name, raw) in pending.drain(..) {
            match eval_value(&raw, &scope, distributions, rng) {
                Ok(value) => {
                    scope.set_local(&name, value);
                    progressed = true;
                }
                Err(ExprError::DependsOnUnbound { name: dep, .. }) => {
                    last_dependency = Some((name.clone(), dep));
                    deferred.push((name, raw));
                }
                Err(other) => return Err(BindError::Expr(other)),
            }
        }

        if !progressed {
            let (name, dependency) = last_dependency.unwrap_or_default();
            return Err(BindError::UnresolvedParam {
                path: path.to_string(),
                name,
                dependency,
            });
        }
        pending = deferred;
    }

    let mut values = Vec::with_capacity(order.len());
    for name in order {
        if let Ok((value, _)) = scope.resolve(&name) {
            if value.has_evaluable() {
                return Err(BindError::ResidualEvaluable {
                    path: path.to_string(),
                    name,
                });
            }
            if let Some((_, (lo, hi))) = ranges.iter().find(|(n, _)| n == &name) {
                if let Some(v) = value.as_f64() {
                    if v < *lo || v > *hi {
                        return Err(BindError::OutOfRange {
                            path: path.to_string(),
                            name,
                            value: v,
                            lo: *lo,
                            hi: *hi,
                        });
                    }
                }
            }
            values.push((name, value.clone()));
        }
    }
    Ok(values)
}

/// Evaluate every `Evaluable` inside a value. `Quoted` passes through.
pub(crate) fn eval_value(
    value: &Value,
    scope: &Scope,
    distributions: &DistributionRegistry,
    rng: &mut StdRng,
) -> Result<Value, ExprError> {
    match value {
        Value::Evaluable(source) => expr::eval_source(source, scope, distributions, rng),
        Value::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_value(item, scope, distributions, rng)?);
            }
            Ok(Value::Seq(out))
        }
        Value::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((k.clone(), eval_value(v, scope, distributions, rng)?));
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

/// Bind spec-level `_params_` against the constants scope.
pub fn bind_spec_params(
    params: &[(String, Value)],
    constants: &Rc<Scope>,
    distributions: &DistributionRegistry,
    master_seed: u64,
) -> Result<Vec<(String, Value)>, BindError> {
    let mut rng = derive_rng(master_seed, "_params_", "bind");
    let entries: Vec<(String, Value)> = params
        .iter()
        .map(|(k, v)| (k.clone(), split_declaration(v).default))
        .collect();
    let ranges: Vec<(String, (f64, f64))> = params
        .iter()
        .filter_map(|(k, v)| split_declaration(v).range.map(|r| (k.clone(), r)))
        .collect();
    bind_entries("_params_", &entries, &ranges, constants, distributions, &mut rng)
}

/// Bind every node of the tree. Each node sees its parent's bound
/// values through the scope chain and draws from an RNG derived from
/// its own namespace path, so sibling order never shifts results.
pub fn bind_tree(
    tree: &TemplateTree,
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
    spec_scope: &Rc<Scope>,
) -> Result<BoundTree, BindError> {
    let mut roots = Vec::with_capacity(tree.roots.len());
    for root in &tree.roots {
        roots.push(bind_node(
            root,
            registry,
            distributions,
            master_seed,
            spec_scope,
        )?);
    }
    Ok(BoundTree { roots })
}

fn bind_node(
    node: &TreeNode,
    registry: &TemplateRegistry,
    distributions: &DistributionRegistry,
    master_seed: u64,
    parent: &Rc<Scope>,
) -> Result<BoundNode, BindError> {
    let template = registry.get(&node.template)?;

    // Template defaults first, then instance overrides on top.
    let mut entries: Vec<(String, Value)> = Vec::new();
    let mut ranges: Vec<(String, (f64, f64))> = Vec::new();
    for (name, decl) in &template.params {
        let declared = split_declaration(decl);
        entries.push((name.clone(), declared.default));
        if let Some(range) = declared.range {
            ranges.push((name.clone(), range));
        }
    }
    for (name, value) in &node.params {
        if let Some(slot) = entries.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value.clone();
        } else {
            entries.push((name.clone(), value.clone()));
        }
    }

    let mut rng = derive_rng(master_seed, &node.namespace_path, "bind");
    let values = bind_entries(
        &node.namespace_path,
        &entries,
        &ranges,
        parent,
        distributions,
        &mut rng,
    )?;

    let child_scope = Rc::new(parent.child(&values, Some(&node.namespace_path)));

    let mut children = Vec::with_capacity(node.children.len());
    for child in &node.children {
        children.push(bind_node(
            child,
            registry,
            distributions,
            master_seed,
            &child_scope,
        )?);
    }

    Ok(BoundNode {
        name: node.name.clone(),
        namespace_path: node.namespace_path.clone(),
        template: node.template.clone(),
        values,
        pending_edges: node.pending_edges.clone(),
        children,
    })
}
