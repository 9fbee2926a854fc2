//! Parser for the RFC 4512-style parenthesized schema grammar described in
//! spec §4.B: `( OID NAME 'name' DESC 'desc' SUP x EQUALITY eq ... )`.
//! Grounded on the loom-ldapbrowser `attributeTypes`/`objectClasses`
//! line-parsing approach (keyword scanning over a flattened `( ... )` body)
//! but extended to cover the full keyword set spec §3/§4.B names.

use crate::error::{invalid_attribute_syntax, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClassKind {
    Abstract,
    Structural,
    Auxiliary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUsage {
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    DsaOperation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttributeType {
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObjectClass {
    pub oid: String,
    pub names: Vec<String>,
    pub sup: Option<String>,
    pub kind: ObjectClassKind,
    pub must: Vec<String>,
    pub may: Vec<String>,
}

/// Strips a single `( ... )` wrapper and returns the trimmed interior.
fn unwrap_parens(def: &str) -> Result<&str> {
    let def = def.trim();
    let inner = def
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| invalid_attribute_syntax(format!("definition not parenthesized: {def}")))?;
    Ok(inner.trim())
}

fn parse_names(s: &str) -> Vec<String> {
    let Some(pos) = s.find("NAME") else {
        return Vec::new();
    };
    let rest = s[pos + 4..].trim_start();
    if let Some(rest) = rest.strip_prefix('(') {
        if let Some(end) = rest.find(')') {
            return rest[..end]
                .split('\'')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    } else if let Some(rest) = rest.strip_prefix('\'') {
        if let Some(end) = rest.find('\'') {
            return vec![rest[..end].to_string()];
        }
    }
    Vec::new()
}

fn parse_quoted_field(s: &str, keyword: &str) -> Option<String> {
    let pattern = format!("{keyword} '");
    let pos = s.find(&pattern)?;
    let rest = &s[pos + pattern.len()..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn parse_unquoted_field(s: &str, keyword: &str) -> Option<String> {
    let pattern = format!("{keyword} ");
    let pos = s.find(&pattern)?;
    let rest = s[pos + pattern.len()..].trim_start();
    let token = rest.split(|c: char| c == ' ' || c == ')').next()?;
    // strip a trailing `{n}` length constraint, keep the base OID/name
    let val = token.split('{').next().unwrap_or(token);
    if val.is_empty() {
        None
    } else {
        Some(val.to_string())
    }
}

fn parse_attr_list(s: &str, keyword: &str) -> Vec<String> {
    let pattern = format!("{keyword} ");
    let Some(pos) = s.find(&pattern) else {
        return Vec::new();
    };
    let rest = s[pos + pattern.len()..].trim_start();
    if let Some(rest) = rest.strip_prefix('(') {
        if let Some(end) = rest.find(')') {
            return rest[..end]
                .split('$')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
    match rest.split(|c: char| c == ' ' || c == ')').next() {
        Some(v) if !v.is_empty() => vec![v.to_string()],
        _ => Vec::new(),
    }
}

fn has_keyword(s: &str, keyword: &str) -> bool {
    s.split_whitespace().any(|tok| tok == keyword)
}

pub fn parse_attribute_type(def: &str) -> Result<RawAttributeType> {
    let inner = unwrap_parens(def)?;
    let oid = inner
        .split_whitespace()
        .next()
        .ok_or_else(|| invalid_attribute_syntax("missing OID"))?
        .to_string();
    let names = parse_names(inner);
    if names.is_empty() {
        return Err(invalid_attribute_syntax(format!(
            "attribute type {oid} has no NAME"
        )));
    }
    let usage = if inner.contains("USAGE directoryOperation") {
        AttributeUsage::DirectoryOperation
    } else if inner.contains("USAGE distributedOperation") {
        AttributeUsage::DistributedOperation
    } else if inner.contains("USAGE dSAOperation") {
        AttributeUsage::DsaOperation
    } else {
        AttributeUsage::UserApplications
    };
    Ok(RawAttributeType {
        oid,
        names,
        sup: parse_unquoted_field(inner, "SUP"),
        equality: parse_unquoted_field(inner, "EQUALITY"),
        ordering: parse_unquoted_field(inner, "ORDERING"),
        substr: parse_unquoted_field(inner, "SUBSTR"),
        syntax: parse_unquoted_field(inner, "SYNTAX"),
        single_value: has_keyword(inner, "SINGLE-VALUE"),
        collective: has_keyword(inner, "COLLECTIVE"),
        no_user_modification: has_keyword(inner, "NO-USER-MODIFICATION"),
        usage,
    })
}

pub fn parse_object_class(def: &str) -> Result<RawObjectClass> {
    let inner = unwrap_parens(def)?;
    let oid = inner
        .split_whitespace()
        .next()
        .ok_or_else(|| invalid_attribute_syntax("missing OID"))?
        .to_string();
    let names = parse_names(inner);
    if names.is_empty() {
        return Err(invalid_attribute_syntax(format!(
            "object class {oid} has no NAME"
        )));
    }
    let kind = if has_keyword(inner, "ABSTRACT") {
        ObjectClassKind::Abstract
    } else if has_keyword(inner, "AUXILIARY") {
        ObjectClassKind::Auxiliary
    } else {
        ObjectClassKind::Structural
    };
    Ok(RawObjectClass {
        oid,
        names,
        sup: parse_unquoted_field(inner, "SUP"),
        kind,
        must: parse_attr_list(inner, "MUST"),
        may: parse_attr_list(inner, "MAY"),
    })
}

/// Re-emits a parenthesized attribute type definition. Used by the
/// parse/serialize/parse round-trip test (spec §8 round-trip b).
pub fn serialize_attribute_type(at: &RawAttributeType) -> String {
    let mut s = format!("( {}", at.oid);
    s.push_str(&format!(" NAME {}", serialize_names(&at.names)));
    if let Some(sup) = &at.sup {
        s.push_str(&format!(" SUP {sup}"));
    }
    if let Some(eq) = &at.equality {
        s.push_str(&format!(" EQUALITY {eq}"));
    }
    if let Some(ord) = &at.ordering {
        s.push_str(&format!(" ORDERING {ord}"));
    }
    if let Some(sub) = &at.substr {
        s.push_str(&format!(" SUBSTR {sub}"));
    }
    if let Some(syn) = &at.syntax {
        s.push_str(&format!(" SYNTAX {syn}"));
    }
    if at.single_value {
        s.push_str(" SINGLE-VALUE");
    }
    if at.collective {
        s.push_str(" COLLECTIVE");
    }
    if at.no_user_modification {
        s.push_str(" NO-USER-MODIFICATION");
    }
    match at.usage {
        AttributeUsage::UserApplications => {}
        AttributeUsage::DirectoryOperation => s.push_str(" USAGE directoryOperation"),
        AttributeUsage::DistributedOperation => s.push_str(" USAGE distributedOperation"),
        AttributeUsage::DsaOperation => s.push_str(" USAGE dSAOperation"),
    }
    s.push_str(" )");
    s
}

pub fn serialize_object_class(oc: &RawObjectClass) -> String {
    let mut s = format!("( {}", oc.oid);
    s.push_str(&format!(" NAME {}", serialize_names(&oc.names)));
    if let Some(sup) = &oc.sup {
        s.push_str(&format!(" SUP {sup}"));
    }
    match oc.kind {
        ObjectClassKind::Abstract => s.push_str(" ABSTRACT"),
        ObjectClassKind::Structural => s.push_str(" STRUCTURAL"),
        ObjectClassKind::Auxiliary => s.push_str(" AUXILIARY"),
    }
    if !oc.must.is_empty() {
        s.push_str(&format!(" MUST {}", serialize_list(&oc.must)));
    }
    if !oc.may.is_empty() {
        s.push_str(&format!(" MAY {}", serialize_list(&oc.may)));
    }
    s.push_str(" )");
    s
}

fn serialize_names(names: &[String]) -> String {
    if names.len() == 1 {
        format!("'{}'", names[0])
    } else {
        let joined = names
            .iter()
            .map(|n| format!("'{n}'"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("( {joined} )")
    }
}

fn serialize_list(items: &[String]) -> String {
    if items.len() == 1 {
        items[0].clone()
    } else {
        format!("( {} )", items.join(" $ "))
    }
}
