//! Relational schema entries pushed to the store.
//!
//! A schema entry tells the store how a document type is named in payloads
//! (singular and plural keys) and which fields reference other types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options attached to a relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationOptions {
    /// Related documents are fetched lazily instead of sideloaded.
    #[serde(rename = "async", default)]
    pub is_async: bool,
    /// Name of the inverse relationship on the related type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl RelationOptions {
    /// Marks the relationship as lazily loaded.
    pub fn lazy(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Sets the inverse relationship name.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// One relationship in a schema entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationDef {
    /// The field holds a single related id.
    BelongsTo {
        /// Related document type.
        #[serde(rename = "type")]
        doc_type: String,
        /// Relationship options.
        #[serde(default)]
        options: RelationOptions,
    },
    /// The field holds a list of related ids.
    HasMany {
        /// Related document type.
        #[serde(rename = "type")]
        doc_type: String,
        /// Relationship options.
        #[serde(default)]
        options: RelationOptions,
    },
}

impl RelationDef {
    /// Returns the related document type.
    pub fn doc_type(&self) -> &str {
        match self {
            RelationDef::BelongsTo { doc_type, .. } | RelationDef::HasMany { doc_type, .. } => {
                doc_type
            }
        }
    }

    /// Returns the relationship options.
    pub fn options(&self) -> &RelationOptions {
        match self {
            RelationDef::BelongsTo { options, .. } | RelationDef::HasMany { options, .. } => {
                options
            }
        }
    }
}

/// Schema entry for one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEntry {
    /// Singular payload key and type name.
    pub singular: String,
    /// Plural payload key.
    pub plural: String,
    /// Type under which documents are stored, when it differs from `singular`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Relationships keyed by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, RelationDef>,
}

impl SchemaEntry {
    /// Creates an entry with the default English plural.
    pub fn new(singular: impl Into<String>) -> Self {
        let singular = singular.into();
        let plural = pluralize(&singular);
        Self {
            singular,
            plural,
            document_type: None,
            relations: BTreeMap::new(),
        }
    }

    /// Overrides the plural key.
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Stores documents under a different type.
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    /// Adds a relationship.
    pub fn with_relation(mut self, field: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(field.into(), relation);
        self
    }

    /// Type under which documents of this entry are keyed.
    pub fn storage_type(&self) -> &str {
        self.document_type.as_deref().unwrap_or(&self.singular)
    }
}

/// Returns the English plural of a type name.
///
/// Covers the regular suffix rules; irregular nouns should set an explicit
/// plural on their schema entry.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u') | None) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

/// Converts a dasherized or underscored type name into a class-style name.
///
/// `blog-post` and `blog_post` both become `BlogPost`.
pub fn classify(name: &str) -> String {
    name.split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plural_rules() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("match"), "matches");
        assert_eq!(pluralize("blog-post"), "blog-posts");
        assert_eq!(pluralize(""), "");
    }

    #[test]
    fn classify_names() {
        assert_eq!(classify("post"), "Post");
        assert_eq!(classify("blog-post"), "BlogPost");
        assert_eq!(classify("blog_post"), "BlogPost");
        assert_eq!(classify("alreadyCamel"), "AlreadyCamel");
    }

    #[test]
    fn entry_serializes_like_relational_schema() {
        let entry = SchemaEntry::new("post")
            .with_relation(
                "author",
                RelationDef::BelongsTo {
                    doc_type: "author".into(),
                    options: RelationOptions::default(),
                },
            )
            .with_relation(
                "comments",
                RelationDef::HasMany {
                    doc_type: "comment".into(),
                    options: RelationOptions::default().lazy(),
                },
            );

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "singular": "post",
                "plural": "posts",
                "relations": {
                    "author": {"belongsTo": {"type": "author", "options": {"async": false}}},
                    "comments": {"hasMany": {"type": "comment", "options": {"async": true}}}
                }
            })
        );
    }

    #[test]
    fn storage_type_defaults_to_singular() {
        let entry = SchemaEntry::new("post");
        assert_eq!(entry.storage_type(), "post");
        let entry = entry.with_document_type("article");
        assert_eq!(entry.storage_type(), "article");
    }
}
