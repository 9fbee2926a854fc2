//! Entry & Modification model (spec §3, §4.C). Attribute names are
//! case-insensitive; values are opaque bytes; value ordering within an
//! attribute is preserved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dn::Dn;

/// Lowercase-interned attribute name, the map key used throughout the
/// engine (spec §4.C: "Attribute names are compared case-insensitively").
pub fn canonical_attr_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// An in-memory directory entry: a DN paired with a multi-valued,
/// case-insensitive-named attribute map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: Dn,
    attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .get(&canonical_attr_name(name))
            .map(Vec::as_slice)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&canonical_attr_name(name))
    }

    pub fn get_strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|values| {
                values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_first_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|values| values.first())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Replaces the attribute's entire value list. Setting an empty list
    /// removes the attribute (an attribute is never stored with zero
    /// values, per spec §3's "non-empty ordered sequence" invariant).
    pub fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
        let key = canonical_attr_name(name);
        if values.is_empty() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, values);
        }
    }

    pub fn set_strings(&mut self, name: &str, values: Vec<String>) {
        self.set(name, values.into_iter().map(String::into_bytes).collect());
    }

    /// Appends one value, preserving existing order and not deduplicating
    /// (LDAP `add` semantics are enforced one level up, in the Operation
    /// Layer / modification application, not here).
    pub fn add(&mut self, name: &str, value: Vec<u8>) {
        self.attributes
            .entry(canonical_attr_name(name))
            .or_default()
            .push(value);
    }

    /// Removes the whole attribute.
    pub fn delete(&mut self, name: &str) {
        self.attributes.remove(&canonical_attr_name(name));
    }

    /// Removes a single value; the attribute disappears entirely once its
    /// last value is gone (spec §4.C, §8 boundary behavior).
    pub fn delete_value(&mut self, name: &str, value: &[u8]) {
        let key = canonical_attr_name(name);
        if let Some(values) = self.attributes.get_mut(&key) {
            values.retain(|v| v != value);
            if values.is_empty() {
                self.attributes.remove(&key);
            }
        }
    }

    pub fn object_classes(&self) -> Vec<String> {
        self.get_strings("objectclass")
    }
}

/// Tagged modification operation (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    pub fn add(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            op: ModOp::Add,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn delete(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            op: ModOp::Delete,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn replace(attribute: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            op: ModOp::Replace,
            attribute: attribute.into(),
            values,
        }
    }
}

/// Applies one modification in place, per spec §3:
/// - `add`: appends the given values.
/// - `delete` with empty values: removes the attribute entirely; with
///   values given: removes just those values.
/// - `replace` with empty values: equivalent to `delete`; otherwise
///   overwrites the attribute's value list.
pub fn apply_modification(entry: &mut Entry, modification: &Modification) {
    match modification.op {
        ModOp::Add => {
            for value in &modification.values {
                entry.add(&modification.attribute, value.clone());
            }
        }
        ModOp::Delete => {
            if modification.values.is_empty() {
                entry.delete(&modification.attribute);
            } else {
                for value in &modification.values {
                    entry.delete_value(&modification.attribute, value);
                }
            }
        }
        ModOp::Replace => {
            if modification.values.is_empty() {
                entry.delete(&modification.attribute);
            } else {
                entry.set(&modification.attribute, modification.values.clone());
            }
        }
    }
}
