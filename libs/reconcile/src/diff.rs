//! Order-independent diffing between desired and observed state.
//!
//! Collection elements are compared by a fingerprint over their *full* field
//! set (identity key plus mutable attributes). Two elements differing only in
//! a mutable attribute are therefore "remove old identity, add new element",
//! never an in-place update: the remote APIs in this domain only expose
//! whole-element attach/detach, not element modification.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::kind::{FieldClass, KindSpec};
use crate::state::{DesiredState, Element, ElementId, Observation};

/// Stable fingerprint of an element, computed over canonical JSON of its
/// identity key and all attributes.
pub fn fingerprint(element: &Element) -> String {
    let mut canonical = String::new();
    write_canonical(&Value::String(element.id.as_str().to_string()), &mut canonical);
    canonical.push(':');
    write_canonical(&attrs_value(&element.attrs), &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(&digest[..16]))
}

fn attrs_value(attrs: &BTreeMap<String, Value>) -> Value {
    Value::Object(attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Serialize a JSON value with sorted object keys and no whitespace, so the
/// fingerprint is independent of attribute insertion order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => {
                        out.push_str(&format!("\\u{:04x}", c as u32));
                    }
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

/// Compute the additions and removals that turn `old` into `new`.
///
/// Returns `(to_remove, to_add)`: identity keys of elements present in `old`
/// but absent from `new`, and full elements present in `new` but absent from
/// `old`.
pub fn diff_elements(old: &[Element], new: &[Element]) -> (Vec<ElementId>, Vec<Element>) {
    if old.is_empty() {
        return (Vec::new(), new.to_vec());
    }
    if new.is_empty() {
        return (old.iter().map(|e| e.id.clone()).collect(), Vec::new());
    }

    let old_prints: BTreeSet<String> = old.iter().map(fingerprint).collect();
    let new_prints: BTreeSet<String> = new.iter().map(fingerprint).collect();

    let to_remove = old
        .iter()
        .filter(|e| !new_prints.contains(&fingerprint(e)))
        .map(|e| e.id.clone())
        .collect();
    let to_add = new
        .iter()
        .filter(|e| !old_prints.contains(&fingerprint(e)))
        .cloned()
        .collect();

    (to_remove, to_add)
}

/// A single scalar field that must change remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarChange {
    pub field: String,
    pub class: FieldClass,
    pub value: Value,
}

impl ScalarChange {
    /// Application phase within the update precedence order.
    ///
    /// Guard toggles being disabled go first so they cannot block the fields
    /// they protect; guard toggles being enabled go after plain fields;
    /// policy references go last among scalars.
    fn phase(&self) -> u8 {
        match self.class {
            FieldClass::GuardToggle if self.value == Value::Bool(false) => 0,
            FieldClass::Plain => 1,
            FieldClass::GuardToggle => 2,
            FieldClass::PolicyRef => 3,
        }
    }
}

/// The computed delta for one collection field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDelta {
    pub name: String,
    pub to_add: Vec<Element>,
    pub to_remove: Vec<ElementId>,
    /// Per-collection policy: swallow "inaccessible" removal rejections.
    pub ignore_inaccessible_removal: bool,
}

/// The full difference between desired and observed state for one pass.
///
/// Computed once per pass and consumed entirely; never persisted.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    scalars: Vec<ScalarChange>,
    pub collections: Vec<CollectionDelta>,
}

impl ChangeSet {
    /// Compare `desired` against `observed` under the kind's field table.
    pub fn compute(spec: &KindSpec, desired: &DesiredState, observed: &Observation) -> Self {
        let mut scalars = Vec::new();
        for (field, value) in &desired.scalars {
            if observed.scalars.get(field) != Some(value) {
                scalars.push(ScalarChange {
                    field: field.clone(),
                    class: spec.field_class(field),
                    value: value.clone(),
                });
            }
        }

        static NO_ELEMENTS: Vec<Element> = Vec::new();
        let mut collections = Vec::new();
        for (name, desired_elements) in &desired.collections {
            let observed_elements = observed.collections.get(name).unwrap_or(&NO_ELEMENTS);
            let (to_remove, to_add) = diff_elements(observed_elements, desired_elements);
            if to_remove.is_empty() && to_add.is_empty() {
                continue;
            }
            collections.push(CollectionDelta {
                name: name.clone(),
                to_add,
                to_remove,
                ignore_inaccessible_removal: spec
                    .collection(name)
                    .is_some_and(|c| c.ignore_inaccessible_removal),
            });
        }

        Self {
            scalars,
            collections,
        }
    }

    /// True when the observed state already matches the desired state.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.collections.is_empty()
    }

    /// Scalar changes in mutation precedence order: guard-disabling toggles,
    /// plain fields, guard-enabling toggles, then policy references.
    pub fn scalars_in_order(&self) -> Vec<&ScalarChange> {
        let mut ordered: Vec<&ScalarChange> = self.scalars.iter().collect();
        ordered.sort_by_key(|c| c.phase());
        ordered
    }
}
