//! In-memory index over pre-fetched rows for one unit of work.

use std::collections::HashMap;

use calsync_domain::{extract_base_id, is_occurrence, SyncedEvent};
use chrono::NaiveDate;

/// Existing rows keyed two ways:
/// - `(collection, external id)` for exact matches,
/// - `(collection, base id, start date)` for rows stored under a bare base
///   id, so a single event later promoted to a series can be found from an
///   occurrence id.
#[derive(Debug, Default)]
pub struct ExistingIndex {
    exact: HashMap<(String, String), SyncedEvent>,
    by_base_date: HashMap<(String, String, NaiveDate), String>,
}

impl ExistingIndex {
    pub fn build(rows: Vec<SyncedEvent>) -> Self {
        let mut index = Self::default();
        for row in rows {
            index.insert(row);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    pub fn insert(&mut self, row: SyncedEvent) {
        if !is_occurrence(&row.external_id) {
            self.by_base_date.insert(
                (row.collection_id.clone(), row.external_id.clone(), row.start_date()),
                row.external_id.clone(),
            );
        }
        self.exact.insert((row.collection_id.clone(), row.external_id.clone()), row);
    }

    pub fn exact(&self, collection_id: &str, external_id: &str) -> Option<&SyncedEvent> {
        self.exact.get(&(collection_id.to_string(), external_id.to_string()))
    }

    /// Row stored under the bare `base_id` whose start date is `date`.
    pub fn promotable(
        &self,
        collection_id: &str,
        base_id: &str,
        date: NaiveDate,
    ) -> Option<&SyncedEvent> {
        let key = (collection_id.to_string(), base_id.to_string(), date);
        self.by_base_date.get(&key).and_then(|external_id| self.exact(collection_id, external_id))
    }

    /// Move a row to a new external id, as staged by an in-place rewrite.
    pub fn rekey(&mut self, collection_id: &str, from: &str, to: &str) {
        if let Some(mut row) = self.remove(collection_id, from) {
            row.external_id = to.to_string();
            self.insert(row);
        }
    }

    pub fn remove(&mut self, collection_id: &str, external_id: &str) -> Option<SyncedEvent> {
        let row = self.exact.remove(&(collection_id.to_string(), external_id.to_string()))?;
        self.by_base_date.remove(&(
            row.collection_id.clone(),
            row.external_id.clone(),
            row.start_date(),
        ));
        Some(row)
    }

    /// Remove `series_id` and every row whose external id has it as base.
    /// Returns the number of rows dropped from the index.
    pub fn remove_series(&mut self, collection_id: &str, series_id: &str) -> usize {
        let doomed: Vec<String> = self
            .exact
            .keys()
            .filter(|(collection, external_id)| {
                collection == collection_id
                    && (external_id == series_id || extract_base_id(external_id) == series_id)
            })
            .map(|(_, external_id)| external_id.clone())
            .collect();
        for external_id in &doomed {
            self.remove(collection_id, external_id);
        }
        doomed.len()
    }
}
