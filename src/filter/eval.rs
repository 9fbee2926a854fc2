//! Filter Evaluator (spec §4.H): case-insensitive value matching and
//! boolean composition against a candidate entry.

use crate::entry::Entry;
use crate::filter::ast::Filter;

fn lower(bytes: &[u8]) -> Vec<u8> {
    String::from_utf8_lossy(bytes)
        .to_lowercase()
        .into_bytes()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Evaluates `filter` against `entry`. A `None` entry (no candidate) or a
/// `None` filter evaluates to false, per spec §4.H.
pub fn evaluate(filter: Option<&Filter>, entry: Option<&Entry>) -> bool {
    let (Some(filter), Some(entry)) = (filter, entry) else {
        return false;
    };
    eval_inner(filter, entry)
}

fn eval_inner(filter: &Filter, entry: &Entry) -> bool {
    match filter {
        Filter::And(children) => children.iter().all(|c| eval_inner(c, entry)),
        Filter::Or(children) => children.iter().any(|c| eval_inner(c, entry)),
        Filter::Not(inner) => !eval_inner(inner, entry),
        Filter::Equality { attr, value } => {
            let target = lower(value);
            entry
                .get(attr)
                .map(|values| values.iter().any(|v| lower(v) == target))
                .unwrap_or(false)
        }
        Filter::Present { attr } => entry.get(attr).map(|v| !v.is_empty()).unwrap_or(false),
        Filter::GreaterOrEqual { attr, value } => {
            let target = lower(value);
            entry
                .get(attr)
                .map(|values| values.iter().any(|v| lower(v) >= target))
                .unwrap_or(false)
        }
        Filter::LessOrEqual { attr, value } => {
            let target = lower(value);
            entry
                .get(attr)
                .map(|values| values.iter().any(|v| lower(v) <= target))
                .unwrap_or(false)
        }
        Filter::ApproxMatch { attr, value } => {
            let target = collapse_whitespace(&String::from_utf8_lossy(value).to_lowercase());
            entry
                .get(attr)
                .map(|values| {
                    values.iter().any(|v| {
                        collapse_whitespace(&String::from_utf8_lossy(v).to_lowercase()) == target
                    })
                })
                .unwrap_or(false)
        }
        Filter::Substring {
            attr,
            initial,
            any,
            r#final,
        } => entry
            .get(attr)
            .map(|values| values.iter().any(|v| match_substring(v, initial, any, r#final)))
            .unwrap_or(false),
    }
}

fn match_substring(
    value: &[u8],
    initial: &Option<Vec<u8>>,
    any: &[Vec<u8>],
    r#final: &Option<Vec<u8>>,
) -> bool {
    let value = lower(value);
    let mut cursor = 0usize;

    if let Some(initial) = initial {
        let initial = lower(initial);
        if !value[cursor..].starts_with(initial.as_slice()) {
            return false;
        }
        cursor += initial.len();
    }

    for component in any {
        if component.is_empty() {
            continue;
        }
        let component = lower(component);
        match find_subslice(&value[cursor..], &component) {
            Some(offset) => cursor += offset + component.len(),
            None => return false,
        }
    }

    if let Some(r#final) = r#final {
        let r#final = lower(r#final);
        if !value[cursor..].ends_with(r#final.as_slice()) {
            return false;
        }
    }

    true
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::normalize;
    use crate::filter::parser::parse_filter;

    fn alice() -> Entry {
        let mut e = Entry::new(normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings("uid", vec!["alice".to_string()]);
        e.set_strings("cn", vec!["Alice Smith".to_string()]);
        e.set_strings("uidnumber", vec!["1000".to_string()]);
        e
    }

    #[test]
    fn equality_is_case_insensitive() {
        let f = parse_filter("(uid=ALICE)").unwrap();
        assert!(evaluate(Some(&f), Some(&alice())));
    }

    #[test]
    fn boolean_composition() {
        assert!(eval_inner_test("(&(uid=alice)(cn=Alice Smith))", &alice()));
        assert!(!eval_inner_test("(&(uid=alice)(cn=Nobody))", &alice()));
        assert!(eval_inner_test("(|(uid=bob)(uid=alice))", &alice()));
        assert!(eval_inner_test("(!(uid=bob))", &alice()));
    }

    fn eval_inner_test(text: &str, entry: &Entry) -> bool {
        let f = parse_filter(text).unwrap();
        evaluate(Some(&f), Some(entry))
    }

    #[test]
    fn empty_and_is_true_empty_or_is_false() {
        assert!(eval_inner(&Filter::And(vec![]), &alice()));
        assert!(!eval_inner(&Filter::Or(vec![]), &alice()));
    }

    #[test]
    fn nil_filter_or_entry_is_false() {
        assert!(!evaluate(None, Some(&alice())));
        let f = Filter::present("uid");
        assert!(!evaluate(Some(&f), None));
    }

    #[test]
    fn ordering_is_lexicographic_not_numeric() {
        // spec §9: "1000" < "500" lexicographically, so >= is false here.
        assert!(!eval_inner_test("(uidnumber>=500)", &alice()));
        assert!(eval_inner_test("(uidnumber<=500)", &alice()));
    }

    #[test]
    fn substring_matches_initial_any_final() {
        assert!(eval_inner_test("(cn=Ali*Smi*th)", &alice()));
        assert!(!eval_inner_test("(cn=Bob*)", &alice()));
    }

    #[test]
    fn approx_match_normalizes_whitespace_and_case() {
        assert!(eval_inner_test("(cn~=alice   smith)", &alice()));
    }

    #[test]
    fn present_requires_at_least_one_value() {
        assert!(eval_inner_test("(cn=*)", &alice()));
        assert!(!eval_inner_test("(description=*)", &alice()));
    }
}
