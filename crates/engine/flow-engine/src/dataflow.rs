/*!
# Data Flow Engine

Resolves the input map a node runs with. Sources merge with a fixed
precedence (earlier wins on name collisions):

1. Node config
2. Outputs of already-completed predecessors
3. Workflow variables
4. Caller-supplied execution inputs

Config values of the form `${dotted.path}` are substituted against the
merged map before validation. After merging, declared inputs get their
defaults applied and are validated against the node schema.
*/

use flow_core::{FlowError, NodeDefinition, NodeKind, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Read-only view of everything input resolution draws from
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Caller-supplied inputs to the execution
    pub execution_inputs: HashMap<String, Value>,

    /// Workflow variables
    pub variables: HashMap<String, Value>,

    /// Recorded outputs per node
    pub node_outputs: HashMap<String, HashMap<String, Value>>,

    /// Node ids in completion order, latest completer last
    pub completion_order: Vec<String>,
}

/// Resolve and validate the input map for a node.
///
/// `predecessors` are the node's direct predecessors. A merge node with
/// two or more predecessors sees their outputs namespaced as
/// `<predecessor-id>.<output-name>`; every other shape merges flat, with
/// collisions won by the latest completer.
///
/// Resolution is read-only: calling it twice at the same point in time
/// yields equal maps.
pub fn resolve_inputs(
    node: &NodeDefinition,
    predecessors: &[String],
    ctx: &ResolveContext,
) -> Result<HashMap<String, Value>> {
    let mut merged: HashMap<String, Value> = HashMap::new();

    // Lowest precedence first; later inserts overwrite earlier ones.
    for (key, value) in &ctx.execution_inputs {
        merged.insert(key.clone(), value.clone());
    }
    for (key, value) in &ctx.variables {
        merged.insert(key.clone(), value.clone());
    }
    merge_predecessor_outputs(node, predecessors, ctx, &mut merged);
    for (key, value) in &node.config {
        merged.insert(key.clone(), value.clone());
    }

    substitute_references(&mut merged);
    apply_defaults(node, &mut merged);
    validate(node, &merged)?;

    // Nodes with a declared schema receive exactly their declared fields;
    // schemaless nodes (merge, fan-out, start) pass the whole map through.
    if node.inputs.is_empty() {
        Ok(merged)
    } else {
        Ok(node
            .inputs
            .iter()
            .filter_map(|spec| merged.get(&spec.name).map(|v| (spec.name.clone(), v.clone())))
            .collect())
    }
}

fn merge_predecessor_outputs(
    node: &NodeDefinition,
    predecessors: &[String],
    ctx: &ResolveContext,
    merged: &mut HashMap<String, Value>,
) {
    let with_outputs: Vec<&String> = predecessors
        .iter()
        .filter(|p| ctx.node_outputs.get(*p).is_some_and(|o| !o.is_empty()))
        .collect();

    if node.kind == NodeKind::Merge && with_outputs.len() >= 2 {
        for pred in with_outputs {
            if let Some(outputs) = ctx.node_outputs.get(pred) {
                for (name, value) in outputs {
                    merged.insert(format!("{}.{}", pred, name), value.clone());
                }
            }
        }
        return;
    }

    // Flat merge in completion order so the latest completer wins
    // collisions; predecessors that never completed contribute nothing.
    for completed in &ctx.completion_order {
        if !predecessors.iter().any(|p| p == completed) {
            continue;
        }
        if let Some(outputs) = ctx.node_outputs.get(completed) {
            for (name, value) in outputs {
                merged.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Replace `${dotted.path}` string values with the value at that path in
/// the merged map. Unresolvable references stay literal.
fn substitute_references(merged: &mut HashMap<String, Value>) {
    let snapshot = merged.clone();
    for value in merged.values_mut() {
        if let Some(path) = reference_path(value) {
            if let Some(resolved) = lookup_path(&snapshot, &path) {
                *value = resolved;
            }
        }
    }
}

fn reference_path(value: &Value) -> Option<String> {
    let s = value.as_str()?;
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() {
        return None;
    }
    Some(inner.to_string())
}

fn lookup_path(map: &HashMap<String, Value>, path: &str) -> Option<Value> {
    // Longest key match first: merge namespacing produces keys that
    // themselves contain dots ("a.result").
    if let Some(value) = map.get(path) {
        return Some(value.clone());
    }

    let (head, rest) = path.split_once('.')?;
    let mut current = map.get(head)?;
    for segment in rest.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn apply_defaults(node: &NodeDefinition, merged: &mut HashMap<String, Value>) {
    for spec in &node.inputs {
        if !merged.contains_key(&spec.name) {
            if let Some(ref default) = spec.default {
                merged.insert(spec.name.clone(), default.clone());
            }
        }
    }
}

fn validate(node: &NodeDefinition, merged: &HashMap<String, Value>) -> Result<()> {
    for spec in &node.inputs {
        match merged.get(&spec.name) {
            None => {
                if spec.required {
                    return Err(FlowError::schema_violation(
                        &spec.name,
                        "required input is missing",
                    ));
                }
            }
            Some(value) => {
                spec.check(value)
                    .map_err(|msg| FlowError::schema_violation(&spec.name, msg))?;
            }
        }
    }
    Ok(())
}
