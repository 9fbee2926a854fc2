//! Schema Registry (spec §4.B): loads attribute types and object classes,
//! resolves inheritance (effective MUST/MAY, effective syntax/matching
//! rules), and validates entries against the resolved schema.

use std::collections::{BTreeMap, BTreeSet};

use crate::entry::{canonical_attr_name, Entry};
use crate::error::{
    inheritance_cycle, invalid_entry, missing_required_attribute, object_class_required,
    object_class_violation, single_value_violation, undefined_attribute_type, Result,
};
use crate::schema::grammar::{
    self, AttributeUsage, ObjectClassKind, RawAttributeType, RawObjectClass,
};

#[derive(Debug, Clone)]
pub struct AttributeType {
    pub oid: String,
    pub names: Vec<String>,
    pub sup: Option<String>,
    pub equality: Option<String>,
    pub ordering: Option<String>,
    pub substr: Option<String>,
    pub syntax: Option<String>,
    pub single_value: bool,
    pub collective: bool,
    pub no_user_modification: bool,
    pub usage: AttributeUsage,
}

impl AttributeType {
    pub fn canonical_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectClass {
    pub oid: String,
    pub names: Vec<String>,
    pub sup: Option<String>,
    pub kind: ObjectClassKind,
    pub must: Vec<String>,
    pub may: Vec<String>,
    /// MUST attributes aggregated over the whole superior chain.
    pub effective_must: BTreeSet<String>,
    /// MAY attributes aggregated over the whole superior chain.
    pub effective_may: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    attribute_types: BTreeMap<String, AttributeType>,
    object_classes: BTreeMap<String, ObjectClass>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attribute_types.get(&canonical_attr_name(name))
    }

    pub fn lookup_object_class(&self, name: &str) -> Option<&ObjectClass> {
        self.object_classes.get(&canonical_attr_name(name))
    }

    pub fn is_single_valued(&self, name: &str) -> bool {
        self.lookup_attribute(name)
            .map(|at| at.single_value)
            .unwrap_or(false)
    }

    pub fn is_no_user_modification(&self, name: &str) -> bool {
        self.lookup_attribute(name)
            .map(|at| at.no_user_modification)
            .unwrap_or(false)
    }

    /// Parses the textual grammar from spec §4.B (one `( ... )` definition
    /// per call) and registers it under every alias name. Call
    /// `resolve_inheritance` once all definitions are loaded.
    pub fn load_attribute_type_def(&mut self, def: &str) -> Result<()> {
        let raw = grammar::parse_attribute_type(def)?;
        self.register_attribute_type(raw);
        Ok(())
    }

    pub fn load_object_class_def(&mut self, def: &str) -> Result<()> {
        let raw = grammar::parse_object_class(def)?;
        self.register_object_class(raw);
        Ok(())
    }

    fn register_attribute_type(&mut self, raw: RawAttributeType) {
        let at = AttributeType {
            oid: raw.oid,
            names: raw.names.clone(),
            sup: raw.sup,
            equality: raw.equality,
            ordering: raw.ordering,
            substr: raw.substr,
            syntax: raw.syntax,
            single_value: raw.single_value,
            collective: raw.collective,
            no_user_modification: raw.no_user_modification,
            usage: raw.usage,
        };
        for name in &raw.names {
            self.attribute_types
                .insert(canonical_attr_name(name), at.clone());
        }
    }

    fn register_object_class(&mut self, raw: RawObjectClass) {
        let oc = ObjectClass {
            oid: raw.oid,
            names: raw.names.clone(),
            sup: raw.sup,
            kind: raw.kind,
            must: raw.must,
            may: raw.may,
            effective_must: BTreeSet::new(),
            effective_may: BTreeSet::new(),
        };
        for name in &raw.names {
            self.object_classes
                .insert(canonical_attr_name(name), oc.clone());
        }
    }

    /// Resolves attribute type inheritance (missing syntax/equality/
    /// ordering/substr are inherited from the superior) and object class
    /// inheritance (effective MUST/MAY aggregate the superior chain).
    /// Detects cycles and fails with `InheritanceCycle`.
    pub fn resolve_inheritance(&mut self) -> Result<()> {
        let at_names: Vec<String> = self.attribute_types.keys().cloned().collect();
        for name in &at_names {
            let mut visited = BTreeSet::new();
            let resolved = self.resolve_attribute_type(name, &mut visited)?;
            self.attribute_types.insert(name.clone(), resolved);
        }

        let oc_names: Vec<String> = self.object_classes.keys().cloned().collect();
        for name in &oc_names {
            let mut visited = BTreeSet::new();
            let (must, may) = self.resolve_object_class_effective(name, &mut visited)?;
            if let Some(oc) = self.object_classes.get_mut(name) {
                oc.effective_must = must;
                oc.effective_may = may;
            }
        }
        Ok(())
    }

    fn resolve_attribute_type(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
    ) -> Result<AttributeType> {
        let at = self
            .attribute_types
            .get(name)
            .ok_or_else(|| undefined_attribute_type(name))?
            .clone();
        let Some(sup) = &at.sup else {
            return Ok(at);
        };
        let sup_key = canonical_attr_name(sup);
        if !visited.insert(sup_key.clone()) {
            return Err(inheritance_cycle(format!(
                "attribute type inheritance cycle at '{name}'"
            )));
        }
        let sup_resolved = self.resolve_attribute_type(&sup_key, visited)?;
        Ok(AttributeType {
            oid: at.oid,
            names: at.names,
            sup: at.sup,
            equality: at.equality.or(sup_resolved.equality),
            ordering: at.ordering.or(sup_resolved.ordering),
            substr: at.substr.or(sup_resolved.substr),
            syntax: at.syntax.or(sup_resolved.syntax),
            single_value: at.single_value,
            collective: at.collective,
            no_user_modification: at.no_user_modification,
            usage: at.usage,
        })
    }

    fn resolve_object_class_effective(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let oc = self
            .object_classes
            .get(name)
            .ok_or_else(|| object_class_violation(format!("unknown object class '{name}'")))?;
        let mut must: BTreeSet<String> = oc.must.iter().map(|s| canonical_attr_name(s)).collect();
        let mut may: BTreeSet<String> = oc.may.iter().map(|s| canonical_attr_name(s)).collect();
        if let Some(sup) = &oc.sup {
            let sup_key = canonical_attr_name(sup);
            if !visited.insert(sup_key.clone()) {
                return Err(inheritance_cycle(format!(
                    "object class inheritance cycle at '{name}'"
                )));
            }
            let (sup_must, sup_may) = self.resolve_object_class_effective(&sup_key, visited)?;
            must.extend(sup_must);
            may.extend(sup_may);
        }
        Ok((must, may))
    }

    /// Aggregates effective MUST/MAY across every named object class,
    /// matching spec §3's "for each structural object class chain ...".
    pub fn effective_must_may(&self, object_classes: &[String]) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut must = BTreeSet::new();
        let mut may = BTreeSet::new();
        for oc_name in object_classes {
            if let Some(oc) = self.lookup_object_class(oc_name) {
                must.extend(oc.effective_must.iter().cloned());
                may.extend(oc.effective_may.iter().cloned());
            }
        }
        (must, may)
    }

    /// Validates an entry's attributes against the resolved schema (spec
    /// §3 invariants 1, and the Schema error kinds of §7):
    /// - at least one `objectClass` value;
    /// - every MUST attribute from the effective object-class chain present;
    /// - single-valued attributes carry exactly one value;
    /// - every attribute name resolves to a known attribute type.
    pub fn validate_entry(&self, entry: &Entry) -> Result<()> {
        let object_classes = entry.object_classes();
        if object_classes.is_empty() {
            return Err(object_class_required(
                "entry must have at least one objectClass value",
            ));
        }

        let (must, _may) = self.effective_must_may(&object_classes);
        for attr in &must {
            if !entry.has_attribute(attr) {
                return Err(missing_required_attribute(format!(
                    "missing required attribute '{attr}'"
                )));
            }
        }

        for name in entry.attribute_names() {
            if name == "objectclass" {
                continue;
            }
            let Some(at) = self.lookup_attribute(name) else {
                return Err(undefined_attribute_type(format!(
                    "attribute '{name}' is not defined in the schema"
                )));
            };
            if at.single_value {
                let count = entry.get(name).map(<[_]>::len).unwrap_or(0);
                if count > 1 {
                    return Err(single_value_violation(format!(
                        "attribute '{name}' is single-valued but has {count} values"
                    )));
                }
            }
        }
        Ok(())
    }

    /// True if any named object class (or an ancestor) is a recognized
    /// "user" structural class (spec §3 placement rule).
    pub fn is_user_class(&self, object_classes: &[String]) -> bool {
        self.class_chain_contains(object_classes, &["person", "organizationalperson", "inetorgperson", "posixaccount"])
    }

    pub fn is_group_class(&self, object_classes: &[String]) -> bool {
        self.class_chain_contains(object_classes, &["groupofnames", "groupofuniquenames", "posixgroup"])
    }

    fn class_chain_contains(&self, object_classes: &[String], candidates: &[&str]) -> bool {
        for oc_name in object_classes {
            let mut current = Some(canonical_attr_name(oc_name));
            while let Some(name) = current {
                if candidates.contains(&name.as_str()) {
                    return true;
                }
                current = self
                    .object_classes
                    .get(&name)
                    .and_then(|oc| oc.sup.as_ref())
                    .map(|s| canonical_attr_name(s));
            }
        }
        false
    }
}

pub fn reject_if_empty(object_classes: &[String]) -> Result<()> {
    if object_classes.is_empty() {
        Err(invalid_entry("objectClass must not be empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::normalize;

    fn build_registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.load_object_class_def("( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )")
            .unwrap();
        reg.load_object_class_def(
            "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) MAY ( userPassword ) )",
        )
        .unwrap();
        reg.load_object_class_def(
            "( 2.16.840.1.113730.3.2.2 NAME 'inetOrgPerson' SUP person STRUCTURAL MAY ( mail $ uid ) )",
        )
        .unwrap();
        reg.load_attribute_type_def("( 2.5.4.0 NAME 'objectClass' NO-USER-MODIFICATION )")
            .unwrap();
        reg.load_attribute_type_def("( 2.5.4.3 NAME 'cn' )").unwrap();
        reg.load_attribute_type_def("( 2.5.4.4 NAME 'sn' )").unwrap();
        reg.load_attribute_type_def("( 2.5.4.35 NAME 'userPassword' )")
            .unwrap();
        reg.load_attribute_type_def("( 0.9.2342.19200300.100.1.3 NAME 'mail' )")
            .unwrap();
        reg.load_attribute_type_def("( 0.9.2342.19200300.100.1.1 NAME 'uid' SINGLE-VALUE )")
            .unwrap();
        reg.resolve_inheritance().unwrap();
        reg
    }

    #[test]
    fn effective_must_may_walks_superior_chain() {
        let reg = build_registry();
        let (must, may) = reg.effective_must_may(&["inetOrgPerson".to_string()]);
        assert!(must.contains("cn"));
        assert!(must.contains("sn"));
        assert!(must.contains("objectclass"));
        assert!(may.contains("mail"));
        assert!(may.contains("userpassword"));
    }

    #[test]
    fn validate_entry_requires_must_attributes() {
        let reg = build_registry();
        let mut e = Entry::new(normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings("objectclass", vec!["inetOrgPerson".to_string(), "person".to_string(), "top".to_string()]);
        e.set_strings("uid", vec!["alice".to_string()]);
        let err = reg.validate_entry(&e).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MissingRequiredAttribute);

        e.set_strings("cn", vec!["Alice".to_string()]);
        e.set_strings("sn", vec!["Smith".to_string()]);
        reg.validate_entry(&e).unwrap();
    }

    #[test]
    fn validate_entry_rejects_undefined_attribute() {
        let reg = build_registry();
        let mut e = Entry::new(normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings("objectclass", vec!["person".to_string(), "top".to_string()]);
        e.set_strings("cn", vec!["Alice".to_string()]);
        e.set_strings("sn", vec!["Smith".to_string()]);
        e.set_strings("nonexistentattr", vec!["x".to_string()]);
        let err = reg.validate_entry(&e).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UndefinedAttributeType);
    }

    #[test]
    fn single_value_violation_triggers_on_two_values() {
        let reg = build_registry();
        let mut e = Entry::new(normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings(
            "objectclass",
            vec!["inetOrgPerson".to_string(), "person".to_string(), "top".to_string()],
        );
        e.set_strings("cn", vec!["Alice".to_string()]);
        e.set_strings("sn", vec!["Smith".to_string()]);
        e.set_strings("uid", vec!["alice".to_string(), "alice2".to_string()]);
        let err = reg.validate_entry(&e).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SingleValueViolation);
    }

    #[test]
    fn inheritance_cycle_detected() {
        let mut reg = SchemaRegistry::new();
        reg.load_object_class_def("( 1.1 NAME 'a' SUP b STRUCTURAL )")
            .unwrap();
        reg.load_object_class_def("( 1.2 NAME 'b' SUP a STRUCTURAL )")
            .unwrap();
        let err = reg.resolve_inheritance().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InheritanceCycle);
    }

    #[test]
    fn placement_class_detection() {
        let reg = build_registry();
        assert!(reg.is_user_class(&["inetOrgPerson".to_string()]));
        assert!(!reg.is_group_class(&["inetOrgPerson".to_string()]));
    }
}
