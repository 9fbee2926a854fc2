//! Built-in bootstrap schema (SPEC_FULL §4.B): the object classes and
//! attribute types an engine needs before any external schema file is
//! loaded, grounded on the class/attribute set `loom-ldapbrowser`'s test
//! fixtures exercise and the classes named in spec §8 scenarios S1/S2.

use crate::error::Result;
use crate::schema::registry::SchemaRegistry;

const OBJECT_CLASSES: &[&str] = &[
    "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
    "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) MAY ( userPassword $ telephoneNumber $ description ) )",
    "( 2.5.6.7 NAME 'organizationalPerson' SUP person STRUCTURAL MAY ( title $ ou ) )",
    "( 2.16.840.1.113730.3.2.2 NAME 'inetOrgPerson' SUP organizationalPerson STRUCTURAL MAY ( mail $ uid $ obaDisabled ) )",
    "( 1.3.6.1.1.1.2.0 NAME 'posixAccount' SUP top AUXILIARY MUST ( uid $ uidNumber $ gidNumber $ homeDirectory ) MAY ( userPassword $ gecos $ loginShell ) )",
    "( 2.5.6.9 NAME 'groupOfNames' SUP top STRUCTURAL MUST ( cn $ member ) MAY description )",
    "( 2.5.6.5 NAME 'organizationalUnit' SUP top STRUCTURAL MUST ou MAY description )",
    "( 0.9.2342.19200300.100.4.13 NAME 'domain' SUP top STRUCTURAL MUST dc MAY description )",
    "( 1.3.6.1.4.1.1466.101.120.111 NAME 'extensibleObject' SUP top AUXILIARY )",
];

const ATTRIBUTE_TYPES: &[&str] = &[
    "( 2.5.4.0 NAME 'objectClass' NO-USER-MODIFICATION )",
    "( 2.5.4.3 NAME 'cn' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.4 NAME ( 'sn' 'surname' ) EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.35 NAME 'userPassword' SYNTAX 1.3.6.1.4.1.1466.115.121.1.40 )",
    "( 2.5.4.20 NAME 'telephoneNumber' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.50 )",
    "( 2.5.4.13 NAME 'description' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.12 NAME 'title' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.11 NAME 'ou' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 0.9.2342.19200300.100.1.3 NAME 'mail' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 0.9.2342.19200300.100.1.1 NAME 'uid' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.1.1.1 NAME 'obaDisabled' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.7 )",
    "( 1.3.6.1.1.1.1.0 NAME 'uidNumber' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 )",
    "( 1.3.6.1.1.1.1.1 NAME 'gidNumber' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 )",
    "( 1.3.6.1.1.1.1.3 NAME 'homeDirectory' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 1.3.6.1.1.1.1.2 NAME 'gecos' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 1.3.6.1.1.1.1.4 NAME 'loginShell' SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.31 NAME 'member' EQUALITY distinguishedNameMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 )",
    "( 0.9.2342.19200300.100.1.25 NAME 'dc' EQUALITY caseIgnoreMatch SINGLE-VALUE SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    // Operational attributes (spec §3), all NO-USER-MODIFICATION.
    "( 2.5.18.1 NAME 'createTimestamp' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 USAGE directoryOperation )",
    "( 2.5.18.2 NAME 'modifyTimestamp' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 USAGE directoryOperation )",
    "( 2.5.18.3 NAME 'creatorsName' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 USAGE directoryOperation )",
    "( 2.5.18.4 NAME 'modifiersName' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 USAGE directoryOperation )",
    "( 1.3.6.1.1.16.4 NAME 'entryUUID' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 USAGE directoryOperation )",
    "( 1.3.6.1.1.20 NAME 'entryDN' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 USAGE directoryOperation )",
    "( 2.5.18.9 NAME 'hasSubordinates' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.7 USAGE directoryOperation )",
    "( 1.1.1.2 NAME 'numSubordinates' SINGLE-VALUE NO-USER-MODIFICATION SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 USAGE directoryOperation )",
];

/// Loads the built-in bootstrap schema and resolves inheritance.
pub fn builtin_registry() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    for def in ATTRIBUTE_TYPES {
        registry.load_attribute_type_def(def)?;
    }
    for def in OBJECT_CLASSES {
        registry.load_object_class_def(def)?;
    }
    registry.resolve_inheritance()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads_without_error() {
        let reg = builtin_registry().unwrap();
        assert!(reg.lookup_object_class("inetOrgPerson").is_some());
        assert!(reg.lookup_attribute("entryUUID").is_some());
        assert!(reg.is_no_user_modification("entryUUID"));
    }

    #[test]
    fn inet_org_person_inherits_person_and_top_must() {
        let reg = builtin_registry().unwrap();
        let (must, may) = reg.effective_must_may(&["inetOrgPerson".to_string()]);
        assert!(must.contains("cn"));
        assert!(must.contains("sn"));
        assert!(must.contains("objectclass"));
        assert!(may.contains("mail"));
        assert!(may.contains("obadisabled"));
    }
}
