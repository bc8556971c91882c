//! Document identifiers for relational documents.
//!
//! Every managed document is keyed by a single string that packs the
//! document type and the natural id together:
//!
//! ```text
//! <type>_<kind>_<natural id>
//! ```
//!
//! `kind` is `2` for string ids (the only kind this crate writes) and `1` for
//! numeric ids written by older clients. Underscores and percent signs inside
//! the type are escaped as `%5F` and `%25` so the first `_` always ends the
//! type. The natural id is stored verbatim.
//!
//! Parsing is strict: anything the encoder could not have produced (design
//! documents, keys from other namespaces, malformed escapes) yields `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind marker for string natural ids.
const KIND_STRING: char = '2';
/// Kind marker for numeric natural ids.
const KIND_NUMBER: char = '1';
/// Separator between the components of an encoded id.
const SEPARATOR: char = '_';

/// A decoded `(type, natural id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    /// Document (model) type, e.g. `post`.
    pub doc_type: String,
    /// Domain-level identifier of the entity.
    pub natural_id: String,
}

impl DocumentId {
    /// Creates a new document id.
    pub fn new(doc_type: impl Into<String>, natural_id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            natural_id: natural_id.into(),
        }
    }

    /// Encodes this id into its storage key.
    pub fn encode(&self) -> String {
        let mut out = type_prefix(&self.doc_type);
        out.push_str(&self.natural_id);
        out
    }

    /// Decodes a storage key.
    ///
    /// Returns `None` if the key is not a managed relational id, or if either
    /// component would be empty.
    pub fn parse(key: &str) -> Option<Self> {
        let (escaped_type, rest) = key.split_once(SEPARATOR)?;
        let doc_type = unescape_type(escaped_type)?;

        let mut chars = rest.chars();
        let kind = chars.next()?;
        if chars.next()? != SEPARATOR {
            return None;
        }
        let natural_id = chars.as_str();

        match kind {
            KIND_STRING => {}
            KIND_NUMBER if is_numeric(natural_id) => {}
            _ => return None,
        }

        if doc_type.is_empty() || natural_id.is_empty() {
            return None;
        }

        Some(Self {
            doc_type,
            natural_id: natural_id.to_string(),
        })
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Returns the key prefix shared by every document of `doc_type`.
///
/// Keys for the type sort contiguously after this prefix, which lets
/// ordered stores answer "all documents of a type" with a range scan.
pub fn type_prefix(doc_type: &str) -> String {
    let mut out = String::with_capacity(doc_type.len() + 3);
    for c in doc_type.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    out.push(SEPARATOR);
    out.push(KIND_STRING);
    out.push(SEPARATOR);
    out
}

fn unescape_type(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "5F" => out.push('_'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

fn is_numeric(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_simple() {
        let id = DocumentId::new("post", "abc");
        assert_eq!(id.encode(), "post_2_abc");
        assert_eq!(id.to_string(), "post_2_abc");
    }

    #[test]
    fn parse_simple() {
        let id = DocumentId::parse("post_2_abc").unwrap();
        assert_eq!(id.doc_type, "post");
        assert_eq!(id.natural_id, "abc");
    }

    #[test]
    fn natural_id_may_contain_separators() {
        let id = DocumentId::new("comment", "a_2_b");
        assert_eq!(DocumentId::parse(&id.encode()), Some(id));
    }

    #[test]
    fn type_with_underscore_is_escaped() {
        let id = DocumentId::new("blog_post", "1");
        assert_eq!(id.encode(), "blog%5Fpost_2_1");
        assert_eq!(DocumentId::parse(&id.encode()), Some(id));

        let id = DocumentId::new("100%", "x");
        assert_eq!(id.encode(), "100%25_2_x");
        assert_eq!(DocumentId::parse(&id.encode()), Some(id));
    }

    #[test]
    fn numeric_kind_is_accepted() {
        let id = DocumentId::parse("post_1_42").unwrap();
        assert_eq!(id.natural_id, "42");
        assert!(DocumentId::parse("post_1_-7").is_some());
        assert!(DocumentId::parse("post_1_abc").is_none());
    }

    #[test]
    fn foreign_keys_are_rejected() {
        assert!(DocumentId::parse("_design/relational").is_none());
        assert!(DocumentId::parse("_local/checkpoint").is_none());
        assert!(DocumentId::parse("").is_none());
        assert!(DocumentId::parse("post").is_none());
        assert!(DocumentId::parse("post_").is_none());
        assert!(DocumentId::parse("post_2").is_none());
        assert!(DocumentId::parse("post_2_").is_none());
        assert!(DocumentId::parse("post_3_abc").is_none());
        assert!(DocumentId::parse("post_22abc").is_none());
        assert!(DocumentId::parse("_2_abc").is_none());
        assert!(DocumentId::parse("po%zzst_2_abc").is_none());
        assert!(DocumentId::parse("post%_2_abc").is_none());
    }

    #[test]
    fn prefix_matches_encoded_keys() {
        let prefix = type_prefix("post");
        assert!(DocumentId::new("post", "1").encode().starts_with(&prefix));
        assert!(!DocumentId::new("posts", "1").encode().starts_with(&prefix));
    }

    proptest! {
        #[test]
        fn parse_inverts_encode(doc_type in "\\PC{1,24}", natural_id in "\\PC{1,48}") {
            let id = DocumentId::new(doc_type, natural_id);
            prop_assert_eq!(DocumentId::parse(&id.encode()), Some(id));
        }

        #[test]
        fn parse_never_panics(key in "\\PC{0,64}") {
            if let Some(id) = DocumentId::parse(&key) {
                prop_assert!(!id.doc_type.is_empty());
                prop_assert!(!id.natural_id.is_empty());
            }
        }
    }
}
