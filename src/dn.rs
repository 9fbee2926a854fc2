//! DN normalization (spec §4.A). Canonical form: lowercase attribute types,
//! trimmed whitespace around `=` and `,`, lowercased values. Multi-valued
//! RDNs (`a=1+b=2`) are parsed but only the leading pair participates in
//! canonical comparison, per SPEC_FULL §3.

use serde::{Deserialize, Serialize};

use crate::error::{invalid_dn, Result};

/// One `attrType=attrValue` pair within an RDN. `extra` holds any further
/// `+`-joined pairs of a multi-valued RDN, kept verbatim for round-tripping
/// but not used in comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attr_type: String,
    pub attr_value: String,
    pub extra: Vec<(String, String)>,
}

impl Rdn {
    fn canonical(&self) -> String {
        let mut s = format!("{}={}", self.attr_type, self.attr_value);
        for (k, v) in &self.extra {
            s.push('+');
            s.push_str(k);
            s.push('=');
            s.push_str(v);
        }
        s
    }
}

/// A canonical, lowercase-folded DN string. Equality is byte equality on the
/// canonical form (spec §3: "compares DNs by canonical string equality").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dn(String);

impl Dn {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn root() -> Self {
        Dn(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Wraps an already-canonical DN string without re-validating it. Used
    /// where the value was canonical when it was written out (WAL replay,
    /// snapshot load) and re-running `normalize` would be redundant.
    pub(crate) fn from_canonical(s: String) -> Self {
        Dn(s)
    }
}

impl std::fmt::Display for Dn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Dn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Splits `s` on unescaped occurrences of `sep`, honoring a leading `\` as
/// the LDAP DN escape character (RFC 4514 §2.4, simplified: any
/// backslash-escaped byte is kept literally and does not act as a
/// separator).
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn parse_rdn_str(raw: &str) -> Result<Rdn> {
    let pairs = split_unescaped(raw, '+');
    let mut parsed = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let eq = pair
            .find('=')
            .ok_or_else(|| invalid_dn(format!("RDN component missing '=': {pair}")))?;
        let attr_type = pair[..eq].trim().to_ascii_lowercase();
        let attr_value = pair[eq + 1..].trim().to_ascii_lowercase();
        if attr_type.is_empty() {
            return Err(invalid_dn(format!("RDN component missing attribute type: {pair}")));
        }
        parsed.push((attr_type, attr_value));
    }
    let (attr_type, attr_value) = parsed.remove(0);
    Ok(Rdn {
        attr_type,
        attr_value,
        extra: parsed,
    })
}

/// Parses a `attrType=attrValue[+attrType=attrValue...]` RDN string.
pub fn parse_rdn(rdn: &str) -> Result<(String, String)> {
    let parsed = parse_rdn_str(rdn)?;
    Ok((parsed.attr_type, parsed.attr_value))
}

/// Parses a DN string into its canonical, normalized form. Fails with
/// `InvalidDN` when a component lacks `=`. An empty string normalizes to the
/// root DN.
pub fn normalize(dn: &str) -> Result<Dn> {
    let trimmed = dn.trim();
    if trimmed.is_empty() {
        return Ok(Dn::root());
    }
    let rdn_strs = split_unescaped(trimmed, ',');
    let mut rdns = Vec::with_capacity(rdn_strs.len());
    for raw in &rdn_strs {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid_dn("empty RDN component between commas"));
        }
        rdns.push(parse_rdn_str(raw)?);
    }
    let canonical = rdns
        .iter()
        .map(Rdn::canonical)
        .collect::<Vec<_>>()
        .join(",");
    Ok(Dn(canonical))
}

/// Returns the parent DN by dropping the leftmost RDN. The root DN has no
/// parent and returns itself (empty string), per spec §3.
pub fn parent(dn: &Dn) -> Dn {
    if dn.is_root() {
        return Dn::root();
    }
    match split_top_level_comma(dn.as_str()) {
        Some(rest) => Dn(rest.to_string()),
        None => Dn::root(),
    }
}

/// Returns the leftmost RDN of a canonical DN.
pub fn rdn(dn: &Dn) -> String {
    if dn.is_root() {
        return String::new();
    }
    let parts = split_unescaped(dn.as_str(), ',');
    parts.into_iter().next().unwrap_or_default()
}

/// Finds the first unescaped `,` in an already-canonical DN and returns
/// everything after it (the parent), or `None` if there is no comma (the DN
/// is a single RDN, i.e. its parent is root).
fn split_top_level_comma(s: &str) -> Option<&str> {
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == ',' {
            return Some(&s[i + 1..]);
        }
    }
    None
}

/// True iff `descendant` is `ancestor` or lies anywhere below it in the DIT.
pub fn is_descendant_or_equal(descendant: &Dn, ancestor: &Dn) -> bool {
    if ancestor.is_root() {
        return true;
    }
    if descendant == ancestor {
        return true;
    }
    descendant
        .as_str()
        .ends_with(&format!(",{}", ancestor.as_str()))
}

/// True iff `child`'s parent is exactly `candidate_parent`.
pub fn is_immediate_child(child: &Dn, candidate_parent: &Dn) -> bool {
    parent(child) == *candidate_parent
}

/// Rewrites a descendant DN so that its suffix `old_base` is replaced by
/// `new_base`. Used by subtree rename (spec §4.I) to compute new DNs for
/// every entry below a renamed subtree root.
pub fn rebase(descendant: &Dn, old_base: &Dn, new_base: &Dn) -> Dn {
    if descendant == old_base {
        return new_base.clone();
    }
    let suffix = &descendant.as_str()[old_base.as_str().len()..];
    Dn(format!("{}{}", new_base.as_str(), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let dn = normalize(" CN = Alice , OU=Users , DC=Example,DC=COM ").unwrap();
        assert_eq!(dn.as_str(), "cn=alice,ou=users,dc=example,dc=com");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("CN=Alice,OU=Users,DC=Example,DC=Com").unwrap();
        let twice = normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_dn_is_root() {
        let dn = normalize("").unwrap();
        assert!(dn.is_root());
        assert_eq!(parent(&dn), Dn::root());
    }

    #[test]
    fn rejects_missing_equals() {
        let err = normalize("cn,dc=example,dc=com").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidDn);
    }

    #[test]
    fn parent_drops_leftmost_rdn() {
        let dn = normalize("uid=alice,ou=users,dc=example,dc=com").unwrap();
        let p = parent(&dn);
        assert_eq!(p.as_str(), "ou=users,dc=example,dc=com");
    }

    #[test]
    fn parent_of_single_rdn_is_root() {
        let dn = normalize("dc=com").unwrap();
        assert_eq!(parent(&dn), Dn::root());
    }

    #[test]
    fn rdn_returns_leftmost_component() {
        let dn = normalize("uid=alice,ou=users,dc=example,dc=com").unwrap();
        assert_eq!(rdn(&dn), "uid=alice");
    }

    #[test]
    fn parse_rdn_splits_attr_value() {
        let (attr, value) = parse_rdn("CN=Alice").unwrap();
        assert_eq!(attr, "cn");
        assert_eq!(value, "alice");
    }

    #[test]
    fn multivalued_rdn_keeps_extras_but_compares_on_first() {
        let dn = normalize("cn=alice+uid=alice,dc=example,dc=com").unwrap();
        assert_eq!(dn.as_str(), "cn=alice+uid=alice,dc=example,dc=com");
        let (attr, value) = parse_rdn(&rdn(&dn)).unwrap();
        assert_eq!((attr.as_str(), value.as_str()), ("cn", "alice"));
    }

    #[test]
    fn is_descendant_or_equal_handles_root_and_suffix() {
        let base = normalize("dc=example,dc=com").unwrap();
        let child = normalize("uid=alice,ou=users,dc=example,dc=com").unwrap();
        assert!(is_descendant_or_equal(&child, &base));
        assert!(is_descendant_or_equal(&base, &Dn::root()));
        assert!(!is_descendant_or_equal(&base, &child));
    }

    #[test]
    fn rebase_rewrites_suffix() {
        let old_base = normalize("ou=team,ou=users,dc=example,dc=com").unwrap();
        let new_base = normalize("ou=squad,ou=users,dc=example,dc=com").unwrap();
        let child = normalize("uid=carol,ou=team,ou=users,dc=example,dc=com").unwrap();
        let rebased = rebase(&child, &old_base, &new_base);
        assert_eq!(
            rebased.as_str(),
            "uid=carol,ou=squad,ou=users,dc=example,dc=com"
        );
    }

    proptest::proptest! {
        #[test]
        fn normalize_idempotent_prop(s in "[a-z]{1,5}=[a-z]{1,5}(,[a-z]{1,5}=[a-z]{1,5}){0,3}") {
            if let Ok(once) = normalize(&s) {
                let twice = normalize(once.as_str()).unwrap();
                proptest::prop_assert_eq!(once, twice);
            }
        }
    }
}
