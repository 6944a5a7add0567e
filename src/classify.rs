use std::collections::BTreeMap;

use serde::Deserialize;

use crate::chain::Action;

/// One display-category rule.
///
/// A rule matches an action whose account and name both equal the rule's and
/// whose `data` carries every `data_equals` field with exactly the given
/// value. The equality predicate is what distinguishes, say, one specific
/// broadcast message from the rest of an action class.
#[derive(Debug, Clone, Deserialize)]
pub struct Classifier {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub data_equals: BTreeMap<String, serde_json::Value>,
    pub category: String,
}

impl Classifier {
    fn matches(&self, action: &Action) -> bool {
        if self.account != action.account || self.name != action.name {
            return false;
        }
        self.data_equals
            .iter()
            .all(|(field, expected)| action.data.get(field) == Some(expected))
    }
}

/// Category table handed to the ingest engine at construction time.
/// Actions no rule matches keep their raw `account:name` signature.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Classifiers {
    entries: Vec<Classifier>,
}

impl Classifiers {
    pub fn new(entries: Vec<Classifier>) -> Self {
        Self { entries }
    }

    /// First matching rule wins.
    pub fn classify(&self, action: &Action) -> Option<&str> {
        self.entries
            .iter()
            .find(|rule| rule.matches(action))
            .map(|rule| rule.category.as_str())
    }
}
