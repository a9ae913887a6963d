use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Subject of a grant: "type:id" e.g. "user:9"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub object_type: String,
    pub object_id: String,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A single expanded grant tuple as it appears at the API boundary.
///
/// The cache only ever sees the canonical string form produced by `Display`:
/// `objectType:objectId#relation@subjectType:subjectId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warrant {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject: Subject,
}

impl Warrant {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Warrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.object_type, self.object_id, self.relation, self.subject
        )
    }
}

/// Canonical warrant string -> number of times the grant occurs.
///
/// Serves both as the full snapshot returned by `/expand` and as the payload of
/// incremental stream events. Absent keys count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarrantSet(HashMap<String, u32>);

impl WarrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>) {
        let count = self.0.entry(key.into()).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> u32 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, u32)> for WarrantSet {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a WarrantSet {
    type Item = (&'a String, &'a u32);
    type IntoIter = std::collections::hash_map::Iter<'a, String, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
