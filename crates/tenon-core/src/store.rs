//! Generic append-only store (C3). No method named update, delete, upsert,
//! replace, clear, or truncate exists on this type — that is the entire
//! contract, enforced by the public interface rather than by convention.

use crate::error::TenonError;
use std::collections::BTreeMap;

pub trait Identified {
    fn id(&self) -> &str;
}

/// Append-only store keyed by a unique id, with optional secondary indices
/// built on append.
#[derive(Debug, Clone)]
pub struct AppendOnlyStore<T: Identified + Clone> {
    records: Vec<T>,
    by_id: BTreeMap<String, usize>,
    secondary: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
}

impl<T: Identified + Clone> Default for AppendOnlyStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identified + Clone> AppendOnlyStore<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            by_id: BTreeMap::new(),
            secondary: BTreeMap::new(),
        }
    }

    /// Register an index name computed by `key_fn`; maintained on every
    /// future `append`. Existing records are not retroactively indexed —
    /// register indices before appending.
    pub fn with_index(mut self, name: &str) -> Self {
        self.secondary.insert(name.to_string(), BTreeMap::new());
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: T) -> Result<(), TenonError> {
        if self.by_id.contains_key(record.id()) {
            return Err(TenonError::worm(record.id().to_string()));
        }
        let position = self.records.len();
        self.by_id.insert(record.id().to_string(), position);
        self.records.push(record);
        Ok(())
    }

    /// Append while populating a secondary index with `index_value` under
    /// `index_name`. `index_name` must have been registered via
    /// `with_index`.
    pub fn append_indexed(
        &mut self,
        record: T,
        index_name: &str,
        index_value: &str,
    ) -> Result<(), TenonError> {
        if self.by_id.contains_key(record.id()) {
            return Err(TenonError::worm(record.id().to_string()));
        }
        let position = self.records.len();
        self.by_id.insert(record.id().to_string(), position);
        self.records.push(record);
        if let Some(index) = self.secondary.get_mut(index_name) {
            index
                .entry(index_value.to_string())
                .or_default()
                .push(position);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id).map(|&pos| &self.records[pos])
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn list<F: Fn(&T) -> bool>(&self, filter: F) -> Vec<&T> {
        self.records.iter().filter(|r| filter(r)).collect()
    }

    pub fn iter_by(&self, index_name: &str, index_value: &str) -> Vec<&T> {
        self.secondary
            .get(index_name)
            .and_then(|index| index.get(index_value))
            .map(|positions| positions.iter().map(|&p| &self.records[p]).collect())
            .unwrap_or_default()
    }
}
