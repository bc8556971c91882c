//! Property-based test generators using proptest.

use proptest::prelude::*;
use relsync_core::{ChangeNotification, DocumentId};

/// Strategy for model type names, including the separators that need
/// escaping inside encoded ids.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_%-]{0,15}").expect("valid regex")
}

/// Strategy for natural ids: uuids, numbers and free-form strings.
pub fn natural_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[0-9A-F]{8}-[0-9A-F]{4}-4[0-9A-F]{3}-[0-9A-F]{4}-[0-9A-F]{12}")
            .expect("valid regex"),
        (0u64..1_000_000).prop_map(|n| n.to_string()),
        prop::string::string_regex("[A-Za-z0-9_./-]{1,24}").expect("valid regex"),
    ]
}

/// Strategy for document ids.
pub fn document_id_strategy() -> impl Strategy<Value = DocumentId> {
    (type_name_strategy(), natural_id_strategy())
        .prop_map(|(doc_type, natural_id)| DocumentId::new(doc_type, natural_id))
}

/// Strategy for keys outside the managed namespace.
pub fn foreign_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("_design/[a-z]{1,12}").expect("valid regex"),
        prop::string::string_regex("_local/[a-z0-9]{1,12}").expect("valid regex"),
        prop::string::string_regex("[A-Za-z0-9/.-]{0,20}").expect("valid regex"),
        prop::string::string_regex("[a-z]{1,8}_[03-9]_[a-z0-9]{1,8}").expect("valid regex"),
        prop::string::string_regex("[a-z]{1,8}_1_[a-z]{1,8}").expect("valid regex"),
    ]
}

/// Strategy for a notification about `id`, deleted or not.
pub fn notification_strategy(
    id: impl Strategy<Value = String>,
) -> impl Strategy<Value = ChangeNotification> {
    (id, any::<bool>(), 1u64..10_000).prop_map(|(id, deleted, seq)| {
        if deleted {
            ChangeNotification::deletion(id, seq)
        } else {
            ChangeNotification::update(id, seq)
        }
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone, Copy)]
pub struct PropertyTestConfig {
    /// Number of cases per property.
    pub cases: u32,
}

impl PropertyTestConfig {
    /// A small run for fast feedback.
    pub fn quick() -> Self {
        Self { cases: 32 }
    }

    /// A larger run.
    pub fn thorough() -> Self {
        Self { cases: 512 }
    }

    /// Converts to a proptest configuration.
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig::with_cases(self.cases)
    }
}

impl Default for PropertyTestConfig {
    fn default() -> Self {
        Self::quick()
    }
}
