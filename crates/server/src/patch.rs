//! jsondiffpatch-compatible delta application.
//!
//! Deltas mirror the jsondiffpatch wire format: object deltas recurse per
//! key, leaf deltas are arrays (`[new]` add, `[old, new]` replace,
//! `[old, 0, 0]` delete), `{"_t": "a"}` marks an array delta. The numeric
//! rule `[current, delta, -8]` adds instead of replacing; it is checked
//! before any structural rule and short-circuits the node, so producers can
//! issue relative adjustments without knowing the current value.

use serde_json::{Map, Value};
use thiserror::Error;

/// Marker in a leaf delta's third slot selecting "add to current value".
pub const NUMERIC_DELTA_MARKER: i64 = -8;

/// Marker in an array delta's third slot denoting a move.
const MOVE_MARKER: i64 = 3;

/// Errors raised by a structurally inapplicable delta.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("delta is neither an object nor a leaf change")]
    InvalidDelta,

    #[error("cannot patch missing key {0:?}")]
    MissingKey(String),

    #[error("type mismatch: expected {0}")]
    TypeMismatch(&'static str),

    #[error("array index {0} out of bounds")]
    IndexOutOfBounds(usize),

    #[error("numeric delta applied to non-numeric value")]
    NumericDelta,

    #[error("invalid array delta entry {0:?}")]
    InvalidArrayEntry(String),
}

/// Apply `delta` to `target` in place.
///
/// On error the target keeps every mutation applied before the failing node;
/// the caller decides whether that partial state is broadcast (it is not).
pub fn apply_patch(target: &mut Value, delta: &Value) -> Result<(), PatchError> {
    patch_node(target, delta)
}

fn patch_node(target: &mut Value, delta: &Value) -> Result<(), PatchError> {
    match delta {
        Value::Object(map) => {
            if map.get("_t").and_then(Value::as_str) == Some("a") {
                let arr = target
                    .as_array_mut()
                    .ok_or(PatchError::TypeMismatch("array"))?;
                patch_array(arr, map)
            } else {
                let obj = target
                    .as_object_mut()
                    .ok_or(PatchError::TypeMismatch("object"))?;
                for (key, child) in map {
                    patch_member(obj, key, child)?;
                }
                Ok(())
            }
        }
        // leaf delta addressed at this node directly
        Value::Array(_) => apply_leaf(target, delta),
        _ => Err(PatchError::InvalidDelta),
    }
}

fn patch_member(
    obj: &mut Map<String, Value>,
    key: &str,
    delta: &Value,
) -> Result<(), PatchError> {
    match delta {
        Value::Array(items) => match items.as_slice() {
            // numeric rule first, it must win over structural interpretation
            [_, d, m] if m.as_i64() == Some(NUMERIC_DELTA_MARKER) => {
                let slot = obj
                    .get_mut(key)
                    .ok_or_else(|| PatchError::MissingKey(key.to_string()))?;
                *slot = add_numeric(slot, d)?;
                Ok(())
            }
            [_, z, m] if z.as_i64() == Some(0) && m.as_i64() == Some(0) => {
                obj.remove(key);
                Ok(())
            }
            [new] => {
                obj.insert(key.to_string(), new.clone());
                Ok(())
            }
            [_, new] => {
                obj.insert(key.to_string(), new.clone());
                Ok(())
            }
            _ => Err(PatchError::InvalidDelta),
        },
        Value::Object(_) => {
            let slot = obj
                .get_mut(key)
                .ok_or_else(|| PatchError::MissingKey(key.to_string()))?;
            patch_node(slot, delta)
        }
        _ => Err(PatchError::InvalidDelta),
    }
}

/// Leaf rules against a value slot that already exists.
fn apply_leaf(slot: &mut Value, delta: &Value) -> Result<(), PatchError> {
    let Value::Array(items) = delta else {
        return Err(PatchError::InvalidDelta);
    };
    match items.as_slice() {
        [_, d, m] if m.as_i64() == Some(NUMERIC_DELTA_MARKER) => {
            *slot = add_numeric(slot, d)?;
            Ok(())
        }
        [_, z, m] if z.as_i64() == Some(0) && m.as_i64() == Some(0) => {
            *slot = Value::Null;
            Ok(())
        }
        [new] => {
            *slot = new.clone();
            Ok(())
        }
        [_, new] => {
            *slot = new.clone();
            Ok(())
        }
        _ => Err(PatchError::InvalidDelta),
    }
}

fn add_numeric(current: &Value, delta: &Value) -> Result<Value, PatchError> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let (Some(a), Some(b)) = (current.as_f64(), delta.as_f64()) else {
        return Err(PatchError::NumericDelta);
    };
    serde_json::Number::from_f64(a + b)
        .map(Value::Number)
        .ok_or(PatchError::NumericDelta)
}

fn patch_array(arr: &mut Vec<Value>, delta: &Map<String, Value>) -> Result<(), PatchError> {
    // removals and moves come from underscore keys; process the highest
    // source index first so earlier indices stay valid
    let mut removals: Vec<(usize, Option<usize>)> = Vec::new();
    for (key, child) in delta {
        let Some(index) = key.strip_prefix('_') else {
            continue;
        };
        if index == "t" {
            continue;
        }
        let from: usize = index
            .parse()
            .map_err(|_| PatchError::InvalidArrayEntry(key.to_string()))?;
        let Value::Array(items) = child else {
            return Err(PatchError::InvalidArrayEntry(key.to_string()));
        };
        match items.as_slice() {
            [_, z, m] if z.as_i64() == Some(0) && m.as_i64() == Some(0) => {
                removals.push((from, None));
            }
            [_, to, m] if m.as_i64() == Some(MOVE_MARKER) => {
                let to = to
                    .as_u64()
                    .ok_or_else(|| PatchError::InvalidArrayEntry(key.to_string()))?;
                removals.push((from, Some(to as usize)));
            }
            _ => return Err(PatchError::InvalidArrayEntry(key.to_string())),
        }
    }
    removals.sort_by(|a, b| b.0.cmp(&a.0));

    let mut inserts: Vec<(usize, Value)> = Vec::new();
    for (from, move_to) in removals {
        if from >= arr.len() {
            return Err(PatchError::IndexOutOfBounds(from));
        }
        let value = arr.remove(from);
        if let Some(to) = move_to {
            inserts.push((to, value));
        }
    }

    for (key, child) in delta {
        if key == "_t" || key.starts_with('_') {
            continue;
        }
        if let Value::Array(items) = child {
            if let [new] = items.as_slice() {
                let index: usize = key
                    .parse()
                    .map_err(|_| PatchError::InvalidArrayEntry(key.to_string()))?;
                inserts.push((index, new.clone()));
            }
        }
    }
    inserts.sort_by_key(|(index, _)| *index);
    for (index, value) in inserts {
        if index > arr.len() {
            return Err(PatchError::IndexOutOfBounds(index));
        }
        arr.insert(index, value);
    }

    // nested modifications address final positions
    for (key, child) in delta {
        if key == "_t" || key.starts_with('_') {
            continue;
        }
        if matches!(child, Value::Array(items) if items.len() == 1) {
            continue; // insertion, already handled
        }
        let index: usize = key
            .parse()
            .map_err(|_| PatchError::InvalidArrayEntry(key.to_string()))?;
        let slot = arr
            .get_mut(index)
            .ok_or(PatchError::IndexOutOfBounds(index))?;
        match child {
            Value::Object(_) => patch_node(slot, child)?,
            _ => apply_leaf(slot, child)?,
        }
    }
    Ok(())
}
