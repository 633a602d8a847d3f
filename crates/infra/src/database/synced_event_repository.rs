//! SQLite-backed implementation of the SyncedEventRepository port.
//!
//! Rows are keyed by `(collection_id, external_id)`; `base_id` and
//! `start_date` are derived on write so the promotion lookup can use the
//! `(collection_id, base_id, start_date)` index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::storage::{SqliteConnection, SqlitePool, SqliteTransaction};
use calsync_core::SyncedEventRepository;
use calsync_domain::{
    extract_base_id, CommitReport, DeleteScope, Deletion, EventFields, NewSyncedEvent, Result,
    RowFailure, RowUpdate, SourceUpsert, SyncWindow, SyncedEvent, WritePlan,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Row};
use tokio::task;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::{join_error, InfraError};

/// Upper bound on ids bound into one `IN (...)` list.
const IN_LIST_CHUNK: usize = 400;
/// Rows per bulk `CASE` update statement.
const BULK_UPDATE_CHUNK: usize = 50;

/// Source row for an external id, scoped to the owner of the row being
/// updated.
const SOURCE_ID_BY_EXTERNAL: &str =
    "(SELECT id FROM event_sources WHERE owner_id = synced_events.owner_id AND external_id = ?)";

const SELECT_COLUMNS: &str = "id, collection_id, owner_id, external_id, event_source_id, name, \
     start_at, end_at, location, link, description, guests, created_at, updated_at";

pub struct SqliteSyncedEventRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteSyncedEventRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Run `op` with a pooled connection on the blocking thread pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        task::spawn_blocking(move || -> Result<T> {
            let mut conn = pool.get_connection().map_err(InfraError::from)?;
            op(&mut conn)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl SyncedEventRepository for SqliteSyncedEventRepository {
    #[instrument(skip(self))]
    async fn has_events_for_account(&self, account_id: &str) -> Result<bool> {
        let account_id = account_id.to_string();
        self.with_connection(move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM synced_events WHERE owner_id = ?1)",
                    params![account_id],
                    |row| row.get(0),
                )
                .map_err(InfraError::from)?;
            Ok(exists)
        })
        .await
    }

    #[instrument(skip_all, fields(
        collections = collection_ids.len(),
        external_ids = external_ids.len(),
        base_ids = base_ids.len()
    ))]
    async fn find_matching(
        &self,
        collection_ids: &[String],
        external_ids: &[String],
        base_ids: &[String],
    ) -> Result<Vec<SyncedEvent>> {
        if collection_ids.is_empty() {
            return Ok(Vec::new());
        }

        let collection_ids = collection_ids.to_vec();
        let lookups = [("external_id", external_ids.to_vec()), ("base_id", base_ids.to_vec())];
        let found = self
            .with_connection(move |conn| {
                let mut found: HashMap<String, SyncedEvent> = HashMap::new();
                for (column, ids) in &lookups {
                    for chunk in ids.chunks(IN_LIST_CHUNK) {
                        let clause = format!(
                            "collection_id IN ({}) AND {column} IN ({})",
                            placeholders(collection_ids.len()),
                            placeholders(chunk.len())
                        );
                        let values =
                            text_values(&collection_ids).chain(text_values(chunk)).collect();
                        for row in select_where(conn, &clause, values)? {
                            found.entry(row.id.clone()).or_insert(row);
                        }
                    }
                }
                Ok(found)
            })
            .await?;

        debug!(matched = found.len(), "existing rows pre-fetched");
        Ok(found.into_values().collect())
    }

    #[instrument(skip_all, fields(
        sources = plan.sources.len(),
        deletions = plan.deletions.len(),
        updates = plan.updates.len(),
        inserts = plan.inserts.len()
    ))]
    async fn commit(&self, plan: WritePlan) -> Result<CommitReport> {
        let report = self.with_connection(move |conn| commit_plan(conn, &plan)).await?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            failures = report.failures.len(),
            "write plan committed"
        );
        Ok(report)
    }

    #[instrument(skip(self, collection_ids), fields(collections = collection_ids.len()))]
    async fn find_in_window(
        &self,
        collection_ids: &[String],
        window: &SyncWindow,
    ) -> Result<Vec<SyncedEvent>> {
        if collection_ids.is_empty() {
            return Ok(Vec::new());
        }
        let clause = format!(
            "collection_id IN ({}) AND start_at >= ? AND start_at < ? ORDER BY start_at",
            placeholders(collection_ids.len())
        );
        let values =
            text_values(collection_ids).chain(window_values(window)).collect::<Vec<Value>>();
        self.with_connection(move |conn| select_where(conn, &clause, values)).await
    }

    #[instrument(skip(self, row_ids), fields(rows = row_ids.len()))]
    async fn delete_in_window(&self, row_ids: &[String], window: &SyncWindow) -> Result<usize> {
        if row_ids.is_empty() {
            return Ok(0);
        }
        let requested = row_ids.len();
        let row_ids = row_ids.to_vec();
        let window = *window;
        let deleted = self
            .with_connection(move |conn| {
                let tx = conn.transaction().map_err(InfraError::from)?;
                let mut deleted = 0;
                for chunk in row_ids.chunks(IN_LIST_CHUNK) {
                    let sql = format!(
                        "DELETE FROM synced_events
                         WHERE id IN ({}) AND start_at >= ? AND start_at < ?",
                        placeholders(chunk.len())
                    );
                    let values: Vec<Value> =
                        text_values(chunk).chain(window_values(&window)).collect();
                    deleted +=
                        tx.execute(&sql, params_from_iter(values)).map_err(InfraError::from)?;
                }
                tx.commit().map_err(InfraError::from)?;
                Ok(deleted)
            })
            .await?;

        if deleted < requested {
            warn!(requested, deleted, "some rows were outside the window");
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn rows_missing_from_collection(
        &self,
        account_id: &str,
        collection_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<SyncedEvent>> {
        let clause = "owner_id = ? AND collection_id <> ? AND event_source_id IS NOT NULL \
             AND start_at >= ? AND start_at < ? \
             AND NOT EXISTS (SELECT 1 FROM synced_events t \
                 WHERE t.collection_id = ? AND t.external_id = synced_events.external_id) \
             ORDER BY start_at";
        let values = vec![
            Value::Text(account_id.to_string()),
            Value::Text(collection_id.to_string()),
            Value::Integer(window.start.timestamp()),
            Value::Integer(window.end.timestamp()),
            Value::Text(collection_id.to_string()),
        ];
        self.with_connection(move |conn| select_where(conn, clause, values)).await
    }
}

fn select_where(
    conn: &SqliteConnection,
    clause: &str,
    values: Vec<Value>,
) -> Result<Vec<SyncedEvent>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM synced_events WHERE {clause}");
    let mut stmt = conn.prepare(&sql).map_err(InfraError::from)?;
    let rows = stmt.query_map(params_from_iter(values), map_row).map_err(InfraError::from)?;
    Ok(rows)
}

/* -------------------------------------------------------------------------- */
/* Write steps                                                                */
/* -------------------------------------------------------------------------- */

/// Apply a whole plan in one transaction. Row-level failures land in the
/// report; anything else rolls the transaction back.
fn commit_plan(conn: &mut SqliteConnection, plan: &WritePlan) -> Result<CommitReport> {
    let tx = conn.transaction().map_err(InfraError::from)?;
    let now = Utc::now();
    let mut report = CommitReport::default();

    for source in &plan.sources {
        upsert_source(&tx, source)?;
    }
    for deletion in &plan.deletions {
        report.deleted += delete_rows(&tx, deletion)?;
    }
    for chunk in plan.updates.chunks(BULK_UPDATE_CHUNK) {
        apply_updates(&tx, chunk, now, &mut report);
    }
    for insert in &plan.inserts {
        match insert_row(&tx, insert, now) {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.updated += 1,
            Err(err) => report.failures.push(RowFailure {
                external_id: insert.external_id.clone(),
                message: err.to_string(),
            }),
        }
    }

    tx.commit().map_err(InfraError::from)?;
    Ok(report)
}

fn upsert_source(tx: &SqliteTransaction<'_>, source: &SourceUpsert) -> Result<()> {
    let payload = serde_json::to_string(&source.payload).map_err(InfraError::from)?;
    tx.execute(
        "INSERT INTO event_sources (id, owner_id, external_id, payload_history, last_synced_at)
         VALUES (?1, ?2, ?3, json_array(json(?4)), ?5)
         ON CONFLICT(owner_id, external_id) DO UPDATE SET
             payload_history = json_insert(event_sources.payload_history, '$[#]', json(?4)),
             last_synced_at = excluded.last_synced_at",
        params![
            Uuid::now_v7().to_string(),
            source.owner_id,
            source.external_id,
            payload,
            source.synced_at.timestamp()
        ],
    )
    .map_err(InfraError::from)?;
    Ok(())
}

fn delete_rows(tx: &SqliteTransaction<'_>, deletion: &Deletion) -> Result<usize> {
    let deleted = match deletion.scope {
        DeleteScope::Exact => tx.execute(
            "DELETE FROM synced_events WHERE collection_id = ?1 AND external_id = ?2",
            params![deletion.collection_id, deletion.external_id],
        ),
        // prefix match without LIKE so '_' in ids needs no escaping
        DeleteScope::Series => tx.execute(
            "DELETE FROM synced_events WHERE collection_id = ?1
               AND (external_id = ?2
                    OR substr(external_id, 1, length(?2) + 1) = ?2 || '_')",
            params![deletion.collection_id, deletion.external_id],
        ),
    }
    .map_err(InfraError::from)?;
    Ok(deleted)
}

/// One `UPDATE ... CASE id WHEN ...` per chunk; on failure every row is
/// retried on its own and row failures are reported.
fn apply_updates(
    tx: &SqliteTransaction<'_>,
    updates: &[RowUpdate],
    now: DateTime<Utc>,
    report: &mut CommitReport,
) {
    match bulk_update(tx, updates, now) {
        Ok(updated) => report.updated += updated,
        Err(err) => {
            warn!(rows = updates.len(), error = %err, "bulk update failed, falling back to rows");
            for update in updates {
                match bulk_update(tx, std::slice::from_ref(update), now) {
                    Ok(updated) => report.updated += updated,
                    Err(err) => report.failures.push(RowFailure {
                        external_id: update.external_id.clone(),
                        message: err.to_string(),
                    }),
                }
            }
        }
    }
}

fn bulk_update(
    tx: &SqliteTransaction<'_>,
    updates: &[RowUpdate],
    now: DateTime<Utc>,
) -> Result<usize> {
    if updates.is_empty() {
        return Ok(0);
    }

    // event_source_id follows the row's new external id, as on insert
    let columns: [(&str, &str, fn(&RowUpdate) -> Value); 11] = [
        ("external_id", "?", |u| Value::Text(u.external_id.clone())),
        ("base_id", "?", |u| Value::Text(extract_base_id(&u.external_id).to_string())),
        ("event_source_id", SOURCE_ID_BY_EXTERNAL, |u| Value::Text(u.external_id.clone())),
        ("name", "?", |u| Value::Text(u.fields.name.clone())),
        ("start_at", "?", |u| Value::Integer(u.fields.start_at.timestamp())),
        ("end_at", "?", |u| Value::Integer(u.fields.end_at.timestamp())),
        ("start_date", "?", |u| Value::Text(u.fields.start_date().to_string())),
        ("location", "?", |u| Value::Text(u.fields.location.clone())),
        ("link", "?", |u| optional_text(u.fields.link.as_deref())),
        ("description", "?", |u| optional_text(u.fields.description.as_deref())),
        ("guests", "?", |u| Value::Text(guests_json(&u.fields.guests))),
    ];

    let mut values: Vec<Value> = Vec::new();
    let mut assignments = Vec::with_capacity(columns.len() + 1);
    for (column, then, value_of) in &columns {
        let whens = format!(" WHEN ? THEN {then}").repeat(updates.len());
        assignments.push(format!("{column} = CASE id{whens} END"));
        for update in updates {
            values.push(Value::Text(update.row_id.clone()));
            values.push(value_of(update));
        }
    }
    assignments.push("updated_at = ?".to_string());
    values.push(Value::Integer(now.timestamp()));
    values.extend(updates.iter().map(|u| Value::Text(u.row_id.clone())));

    let sql = format!(
        "UPDATE synced_events SET {} WHERE id IN ({})",
        assignments.join(", "),
        placeholders(updates.len())
    );
    Ok(tx.execute(&sql, params_from_iter(values)).map_err(InfraError::from)?)
}

/// Insert a row, or refresh the existing one on a `(collection_id,
/// external_id)` conflict. Returns `true` when a new row was created.
fn insert_row(
    tx: &SqliteTransaction<'_>,
    insert: &NewSyncedEvent,
    now: DateTime<Utc>,
) -> Result<bool> {
    let fields = &insert.fields;
    let inserted = tx
        .execute(
            "INSERT INTO synced_events (
                 id, collection_id, owner_id, external_id, base_id, event_source_id,
                 name, start_at, end_at, start_date, location, link, description, guests,
                 created_at, updated_at
             ) VALUES (
                 ?1, ?2, ?3, ?4, ?5,
                 (SELECT id FROM event_sources WHERE owner_id = ?3 AND external_id = ?4),
                 ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14
             )
             ON CONFLICT(collection_id, external_id) DO NOTHING",
            params![
                Uuid::now_v7().to_string(),
                insert.collection_id,
                insert.owner_id,
                insert.external_id,
                extract_base_id(&insert.external_id),
                fields.name,
                fields.start_at.timestamp(),
                fields.end_at.timestamp(),
                fields.start_date().to_string(),
                fields.location,
                fields.link,
                fields.description,
                guests_json(&fields.guests),
                now.timestamp(),
            ],
        )
        .map_err(InfraError::from)?;
    if inserted == 1 {
        return Ok(true);
    }

    tx.execute(
        "UPDATE synced_events SET
             name = ?3, start_at = ?4, end_at = ?5, start_date = ?6, location = ?7,
             link = ?8, description = ?9, guests = ?10, updated_at = ?11
         WHERE collection_id = ?1 AND external_id = ?2",
        params![
            insert.collection_id,
            insert.external_id,
            fields.name,
            fields.start_at.timestamp(),
            fields.end_at.timestamp(),
            fields.start_date().to_string(),
            fields.location,
            fields.link,
            fields.description,
            guests_json(&fields.guests),
            now.timestamp(),
        ],
    )
    .map_err(InfraError::from)?;
    Ok(false)
}

/* -------------------------------------------------------------------------- */
/* Row mapping                                                                */
/* -------------------------------------------------------------------------- */

fn map_row(row: &Row<'_>) -> rusqlite::Result<SyncedEvent> {
    let guests: String = row.get(11)?;
    let guests = serde_json::from_str(&guests)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

    Ok(SyncedEvent {
        id: row.get(0)?,
        collection_id: row.get(1)?,
        owner_id: row.get(2)?,
        external_id: row.get(3)?,
        event_source_id: row.get(4)?,
        fields: EventFields {
            name: row.get(5)?,
            start_at: timestamp_column(row, 6)?,
            end_at: timestamp_column(row, 7)?,
            location: row.get(8)?,
            link: row.get(9)?,
            description: row.get(10)?,
            guests,
        },
        created_at: timestamp_column(row, 12)?,
        updated_at: timestamp_column(row, 13)?,
    })
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

fn guests_json(guests: &[String]) -> String {
    serde_json::to_string(guests).unwrap_or_else(|_| "[]".to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn text_values(ids: &[String]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Text(id.clone()))
}

fn window_values(window: &SyncWindow) -> impl Iterator<Item = Value> {
    [Value::Integer(window.start.timestamp()), Value::Integer(window.end.timestamp())].into_iter()
}
