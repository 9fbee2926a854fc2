//! RFC 4515-style filter parser and serializer (spec §4.E). Accepts
//! `(&(...)(...))`, `(|(...))`, `(!(...))`, `(attr=value)`,
//! `(attr=init*any*final)`, `(attr=*)`, `(attr>=value)`, `(attr<=value)`,
//! `(attr~=value)`.

use crate::error::{invalid_entry, Result};
use crate::filter::ast::Filter;

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(invalid_entry(format!(
                "expected '{}' at position {}",
                c as char, self.pos
            )))
        }
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                let inner = self.parse_filter()?;
                Filter::Not(Box::new(inner))
            }
            _ => self.parse_item()?,
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.parse_filter()?);
        }
        Ok(filters)
    }

    /// Parses `attr OP value` up to the closing `)`.
    fn parse_item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while !matches!(self.peek(), Some(b'=') | Some(b'>') | Some(b'<') | Some(b'~') | None) {
            self.pos += 1;
        }
        let attr = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| invalid_entry("non-utf8 attribute name"))?
            .to_string();
        if attr.is_empty() {
            return Err(invalid_entry("missing attribute name in filter"));
        }

        let op_start = self.pos;
        let (op, eq_at) = if self.bytes.get(self.pos) == Some(&b'>')
            && self.bytes.get(self.pos + 1) == Some(&b'=')
        {
            (">=", self.pos + 1)
        } else if self.bytes.get(self.pos) == Some(&b'<')
            && self.bytes.get(self.pos + 1) == Some(&b'=')
        {
            ("<=", self.pos + 1)
        } else if self.bytes.get(self.pos) == Some(&b'~')
            && self.bytes.get(self.pos + 1) == Some(&b'=')
        {
            ("~=", self.pos + 1)
        } else if self.bytes.get(self.pos) == Some(&b'=') {
            ("=", self.pos)
        } else {
            return Err(invalid_entry(format!(
                "unsupported filter operator at position {op_start}"
            )));
        };
        self.pos = eq_at + 1;

        let value_start = self.pos;
        while self.peek() != Some(b')') && self.peek().is_some() {
            self.pos += 1;
        }
        let raw_value = &self.bytes[value_start..self.pos];
        let value = unescape(raw_value)?;

        Ok(match op {
            "=" => {
                if raw_value == b"*" {
                    Filter::Present { attr }
                } else if raw_value.contains(&b'*') {
                    parse_substring(attr, raw_value)?
                } else {
                    Filter::Equality { attr, value }
                }
            }
            ">=" => Filter::GreaterOrEqual { attr, value },
            "<=" => Filter::LessOrEqual { attr, value },
            "~=" => Filter::ApproxMatch { attr, value },
            _ => unreachable!(),
        })
    }
}

fn parse_substring(attr: String, raw: &[u8]) -> Result<Filter> {
    let parts: Vec<&[u8]> = split_unescaped_star(raw);
    let initial = parts
        .first()
        .filter(|p| !p.is_empty())
        .map(|p| unescape(p))
        .transpose()?;
    let r#final = parts
        .last()
        .filter(|p| !p.is_empty())
        .map(|p| unescape(p))
        .transpose()?;
    let any_slice = if parts.len() >= 2 {
        &parts[1..parts.len() - 1]
    } else {
        &[][..]
    };
    let mut any = Vec::new();
    for p in any_slice {
        if !p.is_empty() {
            any.push(unescape(p)?);
        }
    }
    Ok(Filter::Substring {
        attr,
        initial,
        any,
        r#final,
    })
}

fn split_unescaped_star(raw: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            i += 2;
            continue;
        }
        if raw[i] == b'*' {
            parts.push(&raw[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&raw[start..]);
    parts
}

/// Decodes RFC 4515 `\XX` hex escapes.
fn unescape(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                .map_err(|_| invalid_entry("invalid filter escape"))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| invalid_entry("invalid filter escape"))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn escape(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value {
        match b {
            b'*' | b'(' | b')' | b'\\' | 0 => out.push_str(&format!("\\{b:02x}")),
            _ => out.push(b as char),
        }
    }
    out
}

pub fn parse_filter(input: &str) -> Result<Filter> {
    let mut parser = Parser::new(input.trim());
    let filter = parser.parse_filter()?;
    if parser.pos != parser.bytes.len() {
        return Err(invalid_entry("trailing characters after filter"));
    }
    Ok(filter)
}

/// Re-emits RFC 4515 text for a filter AST. Used for the parse-serialize
/// round-trip property (spec §8 round-trip a).
pub fn serialize_filter(filter: &Filter) -> String {
    match filter {
        Filter::And(children) => format!(
            "(&{})",
            children.iter().map(serialize_filter).collect::<String>()
        ),
        Filter::Or(children) => format!(
            "(|{})",
            children.iter().map(serialize_filter).collect::<String>()
        ),
        Filter::Not(inner) => format!("(!{})", serialize_filter(inner)),
        Filter::Equality { attr, value } => format!("({attr}={})", escape(value)),
        Filter::Substring {
            attr,
            initial,
            any,
            r#final,
        } => {
            let mut s = String::new();
            if let Some(i) = initial {
                s.push_str(&escape(i));
            }
            s.push('*');
            for a in any {
                s.push_str(&escape(a));
                s.push('*');
            }
            if let Some(f) = r#final {
                s.push_str(&escape(f));
            }
            format!("({attr}={s})")
        }
        Filter::GreaterOrEqual { attr, value } => format!("({attr}>={})", escape(value)),
        Filter::LessOrEqual { attr, value } => format!("({attr}<={})", escape(value)),
        Filter::Present { attr } => format!("({attr}=*)"),
        Filter::ApproxMatch { attr, value } => format!("({attr}~={})", escape(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_equality() {
        let f = parse_filter("(uid=alice)").unwrap();
        assert_eq!(f, Filter::equality("uid", b"alice".to_vec()));
    }

    #[test]
    fn parses_and_or_not() {
        let f = parse_filter("(&(uid=alice)(|(cn=Alice)(!(sn=Smith))))").unwrap();
        match f {
            Filter::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Filter::Or(_)));
            }
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn parses_present() {
        let f = parse_filter("(mail=*)").unwrap();
        assert_eq!(f, Filter::present("mail"));
    }

    #[test]
    fn parses_substring_all_components() {
        let f = parse_filter("(cn=al*ic*e)").unwrap();
        match f {
            Filter::Substring {
                initial,
                any,
                r#final,
                ..
            } => {
                assert_eq!(initial, Some(b"al".to_vec()));
                assert_eq!(any, vec![b"ic".to_vec()]);
                assert_eq!(r#final, Some(b"e".to_vec()));
            }
            _ => panic!("expected Substring"),
        }
    }

    #[test]
    fn parses_ordering_operators() {
        assert!(matches!(
            parse_filter("(uidNumber>=500)").unwrap(),
            Filter::GreaterOrEqual { .. }
        ));
        assert!(matches!(
            parse_filter("(uidNumber<=500)").unwrap(),
            Filter::LessOrEqual { .. }
        ));
        assert!(matches!(
            parse_filter("(cn~=Alice)").unwrap(),
            Filter::ApproxMatch { .. }
        ));
    }

    #[test]
    fn rejects_missing_operator() {
        assert!(parse_filter("(uid)").is_err());
    }

    #[test]
    fn round_trip_parse_serialize_parse() {
        let inputs = [
            "(uid=alice)",
            "(&(uid=alice)(cn=Alice))",
            "(|(uid=alice)(uid=bob))",
            "(!(uid=alice))",
            "(mail=*)",
            "(cn=al*ic*e)",
            "(uidNumber>=500)",
        ];
        for input in inputs {
            let parsed = parse_filter(input).unwrap();
            let serialized = serialize_filter(&parsed);
            let reparsed = parse_filter(&serialized).unwrap();
            assert_eq!(parsed, reparsed, "round trip failed for {input}");
        }
    }

    proptest::proptest! {
        #[test]
        fn equality_filter_round_trips(attr in "[a-zA-Z]{1,8}", value in "[a-zA-Z0-9 ]{0,12}") {
            let filter = Filter::equality(attr, value.into_bytes());
            let serialized = serialize_filter(&filter);
            let reparsed = parse_filter(&serialized).unwrap();
            proptest::prop_assert_eq!(filter, reparsed);
        }
    }
}
