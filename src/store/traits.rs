//! `DocumentStore` trait — collection-oriented JSON document persistence.
//!
//! Writes are merge-updates against named field paths. No caller ever replaces
//! a whole document after it is created.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A partial write: dotted field paths and the values to set at them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeUpdate {
    fields: Vec<(String, Value)>,
    absent: Vec<String>,
}

impl MergeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` (e.g. `documents.identity`) to `value`.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    /// Only apply the update if `path` is currently missing or null.
    pub fn require_absent(mut self, path: impl Into<String>) -> Self {
        self.absent.push(path.into());
        self
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn preconditions(&self) -> &[String] {
        &self.absent
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Look up a dotted path inside a JSON document.
pub fn get_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |node, key| node.get(key))
}

/// Returns the first precondition of `update` that `body` violates.
pub fn violated_precondition<'a>(body: &Value, update: &'a MergeUpdate) -> Option<&'a str> {
    update
        .preconditions()
        .iter()
        .find(|path| get_path(body, path).is_some_and(|v| !v.is_null()))
        .map(String::as_str)
}

/// Apply `update` to `body` in place.
///
/// Intermediate objects are created as needed; a non-object sitting on the
/// path is replaced by an object. Sibling fields are never touched.
pub fn apply_merge(body: &mut Value, update: &MergeUpdate) {
    for (path, value) in update.fields() {
        set_path(body, path, value.clone());
    }
}

fn set_path(body: &mut Value, path: &str, value: Value) {
    let mut node = body;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let map = match node {
            Value::Object(map) => map,
            _ => unreachable!("node was just made an object"),
        };
        if keys.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Backend-agnostic document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, or `None` if it does not exist.
    async fn get_document(&self, collection: &str, id: &str)
    -> Result<Option<Value>, StoreError>;

    /// Create a new document. Fails with `AlreadyExists` if the id is taken.
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), StoreError>;

    /// Apply a merge-update to an existing document.
    ///
    /// The whole update lands at once or not at all. Fails with `NotFound`
    /// for a missing document and `PreconditionFailed` when a
    /// `require_absent` field is already set.
    async fn merge_update(
        &self,
        collection: &str,
        id: &str,
        update: &MergeUpdate,
    ) -> Result<(), StoreError>;
}
