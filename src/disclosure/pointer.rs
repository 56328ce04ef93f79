//! JSON Pointer (RFC 6901) parsing and evaluation over `serde_json`
//! documents.

use crate::disclosure::SelectionError;
use serde_json::Value;

/// One parsed path token: a member name or an array index. Names keep
/// their unescaped form; indices reject leading zeros per the RFC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerToken {
    Member(String),
    Index(usize),
}

/// A parsed JSON Pointer. The empty pointer denotes the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPointer {
    source: String,
    tokens: Vec<PointerToken>,
}

impl JsonPointer {
    pub fn root() -> Self {
        Self {
            source: String::new(),
            tokens: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, SelectionError> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        if !s.starts_with('/') {
            return Err(SelectionError::InvalidPointer(s.to_string()));
        }
        let mut tokens = Vec::new();
        for raw in s[1..].split('/') {
            let name = unescape(raw).ok_or_else(|| SelectionError::InvalidPointer(s.to_string()))?;
            tokens.push(classify(name));
        }
        Ok(Self {
            source: s.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[PointerToken] {
        &self.tokens
    }

    /// Descends from `doc` token by token. Any missing member or
    /// out-of-range index yields `None`; the empty pointer yields `doc`.
    pub fn try_evaluate<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for token in &self.tokens {
            current = match (token, current) {
                (PointerToken::Member(name), Value::Object(map)) => map.get(name)?,
                (PointerToken::Index(i), Value::Array(items)) => items.get(*i)?,
                // A member token can still address an array: RFC 6901
                // allows no such thing, so the lookup just fails.
                _ => return None,
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// `~1` becomes `/`, `~0` becomes `~`; a trailing or malformed escape is
/// an error.
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return None,
        }
    }
    Some(out)
}

fn classify(name: String) -> PointerToken {
    // "0" is an index; "01" and "1a" are member names; so is "-", which
    // only addresses the past-the-end position and never resolves here.
    let is_index = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_digit())
        && (name == "0" || !name.starts_with('0'));
    if is_index {
        if let Ok(index) = name.parse() {
            return PointerToken::Index(index);
        }
    }
    PointerToken::Member(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "issuer": {"id": "did:example:issuer"},
            "credentialSubject": {
                "degrees": [
                    {"name": "BSc"},
                    {"name": "MSc"}
                ]
            },
            "a/b": 1,
            "m~n": 2,
            "": 3
        })
    }

    #[test]
    fn empty_pointer_is_the_root() {
        let doc = doc();
        let p = JsonPointer::parse("").unwrap();
        assert!(p.is_root());
        assert_eq!(p.try_evaluate(&doc), Some(&doc));
    }

    #[test]
    fn member_and_index_traversal() {
        let doc = doc();
        let p = JsonPointer::parse("/credentialSubject/degrees/1/name").unwrap();
        assert_eq!(p.try_evaluate(&doc), Some(&json!("MSc")));
    }

    #[test]
    fn rfc6901_escapes() {
        let doc = doc();
        assert_eq!(
            JsonPointer::parse("/a~1b").unwrap().try_evaluate(&doc),
            Some(&json!(1))
        );
        assert_eq!(
            JsonPointer::parse("/m~0n").unwrap().try_evaluate(&doc),
            Some(&json!(2))
        );
        assert_eq!(
            JsonPointer::parse("/").unwrap().try_evaluate(&doc),
            Some(&json!(3))
        );
    }

    #[test]
    fn missing_paths_yield_none() {
        let doc = doc();
        for s in [
            "/nope",
            "/issuer/name",
            "/credentialSubject/degrees/2",
            "/credentialSubject/degrees/-",
            "/credentialSubject/degrees/01",
            "/issuer/id/deeper",
        ] {
            assert_eq!(JsonPointer::parse(s).unwrap().try_evaluate(&doc), None, "{s}");
        }
    }

    #[test]
    fn malformed_pointers_are_rejected() {
        assert!(JsonPointer::parse("no-slash").is_err());
        assert!(JsonPointer::parse("/bad~2escape").is_err());
        assert!(JsonPointer::parse("/trailing~").is_err());
    }

    #[test]
    fn index_vs_member_classification() {
        let p = JsonPointer::parse("/0/01/-").unwrap();
        assert_eq!(
            p.tokens(),
            &[
                PointerToken::Index(0),
                PointerToken::Member("01".into()),
                PointerToken::Member("-".into()),
            ]
        );
    }
}
