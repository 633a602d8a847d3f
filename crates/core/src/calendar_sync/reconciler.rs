//! Orphan reconciler: bounded-window sweep that removes rows the delta and
//! webhook channels failed to delete.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use calsync_domain::{
    extract_base_id, is_occurrence, Account, Collection, EventStatus, Result, SyncWindow,
    SyncedEvent,
};
use tracing::{debug, info, instrument, warn};

use super::ports::{CalendarProvider, SyncedEventRepository};

/// Why a row was selected for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// The provider reports the exact id as cancelled.
    Cancelled,
    /// The row is an occurrence of a series whose base id is cancelled.
    SeriesCancelled,
    /// A non-recurring row the provider no longer lists.
    Missing,
    /// An occurrence row whose series has no surviving id at all.
    SeriesGone,
}

/// Pick orphaned rows out of `rows`, given the provider's id to status map
/// for the same window.
///
/// An occurrence id that is merely absent is kept while any provider id
/// still shares its base: the instance was probably rescheduled and got a
/// new id.
pub fn select_orphans<'a>(
    rows: &'a [SyncedEvent],
    statuses: &HashMap<String, EventStatus>,
) -> Vec<(&'a SyncedEvent, OrphanReason)> {
    let provider_bases: HashSet<&str> = statuses.keys().map(|id| extract_base_id(id)).collect();
    let cancelled_series: HashSet<&str> = statuses
        .iter()
        .filter(|(id, status)| status.is_cancelled() && !is_occurrence(id))
        .map(|(id, _)| id.as_str())
        .collect();

    rows.iter()
        .filter_map(|row| {
            let id = row.external_id.as_str();
            let recurring = is_occurrence(id);
            let reason = match statuses.get(id) {
                Some(status) if status.is_cancelled() => Some(OrphanReason::Cancelled),
                Some(_) => None,
                None if recurring && cancelled_series.contains(extract_base_id(id)) => {
                    Some(OrphanReason::SeriesCancelled)
                }
                None if !recurring => Some(OrphanReason::Missing),
                None if !provider_bases.contains(extract_base_id(id)) => {
                    Some(OrphanReason::SeriesGone)
                }
                None => None,
            };
            reason.map(|r| (row, r))
        })
        .collect()
}

pub struct OrphanReconciler {
    provider: Arc<dyn CalendarProvider>,
    events: Arc<dyn SyncedEventRepository>,
}

impl OrphanReconciler {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        events: Arc<dyn SyncedEventRepository>,
    ) -> Self {
        Self { provider, events }
    }

    /// Delete orphaned rows of `collections` that start inside `window`.
    /// Returns the number of rows deleted.
    ///
    /// An empty provider listing is treated as a failed fetch and deletes
    /// nothing.
    #[instrument(skip(self, account, collections), fields(
        account_id = %account.id,
        collections = collections.len(),
        window_start = %window.start,
        window_end = %window.end
    ))]
    pub async fn reconcile(
        &self,
        account: &Account,
        collections: &[Collection],
        window: &SyncWindow,
    ) -> Result<usize> {
        if collections.is_empty() {
            return Ok(0);
        }

        let statuses = self.provider.list_event_statuses(account, window).await?;
        if statuses.is_empty() {
            warn!("provider returned no events for the window, skipping reconciliation");
            return Ok(0);
        }

        let collection_ids: Vec<String> = collections.iter().map(|c| c.id.clone()).collect();
        let rows = self.events.find_in_window(&collection_ids, window).await?;
        let orphans: Vec<(&SyncedEvent, OrphanReason)> = select_orphans(&rows, &statuses)
            .into_iter()
            .filter(|(row, _)| window.contains(row.fields.start_at))
            .collect();

        if orphans.is_empty() {
            info!(checked = rows.len(), provider_ids = statuses.len(), "no orphaned rows");
            return Ok(0);
        }

        for (row, reason) in &orphans {
            debug!(
                collection_id = %row.collection_id,
                external_id = %row.external_id,
                ?reason,
                "orphaned row"
            );
        }

        let row_ids: Vec<String> = orphans.iter().map(|(row, _)| row.id.clone()).collect();
        let deleted = self.events.delete_in_window(&row_ids, window).await?;
        info!(
            checked = rows.len(),
            provider_ids = statuses.len(),
            orphans = orphans.len(),
            deleted,
            "reconciliation completed"
        );
        Ok(deleted)
    }
}
