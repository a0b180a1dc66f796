//! Dotted-path helpers over attribute trees.
//!
//! Attributes are plain JSON objects. A leaf is any non-object value; arrays
//! are atomic. Leaves are addressed by dotted paths such as
//! `user.address.city`, and a tree can be rebuilt from `(path, value,
//! eventstamp)` triples with last-writer-wins resolution of structural
//! conflicts.

use serde_json::Value;

use crate::eventstamp::Eventstamp;

/// The attribute tree of a resource.
pub type Attributes = serde_json::Map<String, Value>;

/// Collect the dotted paths of every leaf reachable in `root`.
///
/// Empty object subtrees contain no leaves and therefore contribute nothing.
pub fn leaf_paths(root: &Attributes) -> Vec<String> {
    let mut paths = Vec::new();
    for (key, value) in root {
        collect(key.clone(), value, &mut paths);
    }
    paths
}

fn collect(path: String, value: &Value, paths: &mut Vec<String>) {
    match value {
        Value::Object(children) => {
            for (key, child) in children {
                collect(format!("{path}.{key}"), child, paths);
            }
        }
        _ => paths.push(path),
    }
}

/// Look up the value at a dotted path, descending through nested objects.
pub fn value_at<'a>(root: &'a Attributes, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => root.get(path),
        Some((head, rest)) => value_at(root.get(head)?.as_object()?, rest),
    }
}

/// Rebuild an attribute tree from stamped leaf entries.
///
/// Entries are applied in ascending `(eventstamp, path)` order, so when two
/// paths conflict structurally (a leaf at `a.b` versus a subtree rooted at
/// `a.b`) the newer write shadows the older one. An entry without a value is
/// the ghost of a write whose bytes were shadowed away on some replica; it
/// still removes whatever an older entry put at its path, which keeps the
/// rebuild convergent across merge orders.
pub fn materialize(mut entries: Vec<(String, Option<Value>, Eventstamp)>) -> Attributes {
    entries.sort_by(|a, b| (&a.2, &a.0).cmp(&(&b.2, &b.0)));
    let mut root = Attributes::new();
    for (path, value, _) in entries {
        match value {
            Some(value) => insert(&mut root, &path, value),
            None => remove(&mut root, &path),
        }
    }
    prune(&mut root);
    root
}

/// Drop empty object residue left behind by ghost removals, so a rebuilt
/// tree never differs from rebuilding its own visible leaves.
fn prune(node: &mut Attributes) {
    let mut empty = Vec::new();
    for (key, value) in node.iter_mut() {
        if let Value::Object(children) = value {
            prune(children);
            if children.is_empty() {
                empty.push(key.clone());
            }
        }
    }
    for key in empty {
        node.remove(&key);
    }
}

fn insert(node: &mut Attributes, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            node.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = node
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Attributes::new()));
            if !child.is_object() {
                *child = Value::Object(Attributes::new());
            }
            if let Value::Object(children) = child {
                insert(children, rest, value);
            }
        }
    }
}

fn remove(node: &mut Attributes, path: &str) {
    match path.split_once('.') {
        None => {
            node.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(children)) = node.get_mut(head) {
                remove(children, rest);
            }
        }
    }
}
