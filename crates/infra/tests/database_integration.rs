//! Repository behaviour against a real migrated SQLite database.

mod support;

use std::time::Duration;

use calsync_core::{
    AccountRepository, CollectionRepository, SyncStateRepository, SyncedEventRepository,
};
use calsync_domain::{DeleteScope, Deletion, RowUpdate, SyncWindow, WatchChannel, WritePlan};
use calsync_infra::database::{
    SqliteAccountRepository, SqliteCollectionRepository, SqliteSyncStateRepository,
    SqliteSyncedEventRepository,
};
use chrono::{TimeZone, Utc};
use support::*;

fn events(db: &TestDatabase) -> SqliteSyncedEventRepository {
    SqliteSyncedEventRepository::new(db.manager.pool().clone())
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn commit_is_idempotent_and_appends_source_history() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    let plan = WritePlan {
        sources: vec![source("evt-1")],
        inserts: vec![new_row("c1", "evt-1", at(1))],
        ..WritePlan::default()
    };

    let first = repo.commit(plan.clone()).await.unwrap();
    let second = repo.commit(plan).await.unwrap();

    assert_eq!((first.inserted, first.updated), (1, 0));
    assert_eq!((second.inserted, second.updated), (0, 1));
    assert_eq!(db.count("SELECT COUNT(*) FROM synced_events"), 1);
    assert_eq!(
        db.count("SELECT json_array_length(payload_history) FROM event_sources"),
        2,
        "every upsert appends the raw payload"
    );

    let rows = repo.find_matching(&ids(&["c1"]), &ids(&["evt-1"]), &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].event_source_id.is_some(), "row links to its shared source");
    assert_eq!(rows[0].fields.guests, vec!["guest@example.com".to_string()]);
    assert!(repo.has_events_for_account(ACCOUNT).await.unwrap());
    assert!(!repo.has_events_for_account("someone-else").await.unwrap());
}

#[tokio::test]
async fn series_delete_removes_base_and_occurrences_only() {
    let db = TestDatabase::seeded(&["c1", "c2"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        inserts: vec![
            new_row("c1", "rec", at(0)),
            new_row("c1", "rec_20260302T090000Z", at(0)),
            new_row("c1", "rec_20260309T090000Z", at(7)),
            new_row("c1", "record", at(1)),
            new_row("c2", "rec_20260302T090000Z", at(0)),
        ],
        ..WritePlan::default()
    })
    .await
    .unwrap();

    let report = repo
        .commit(WritePlan {
            deletions: vec![Deletion {
                collection_id: "c1".into(),
                external_id: "rec".into(),
                scope: DeleteScope::Series,
            }],
            ..WritePlan::default()
        })
        .await
        .unwrap();

    assert_eq!(report.deleted, 3);
    let left = repo
        .find_matching(&ids(&["c1", "c2"]), &ids(&["record", "rec_20260302T090000Z"]), &[])
        .await
        .unwrap();
    let mut left: Vec<_> =
        left.into_iter().map(|r| format!("{}:{}", r.collection_id, r.external_id)).collect();
    left.sort();
    assert_eq!(left, vec!["c1:record", "c2:rec_20260302T090000Z"]);
}

#[tokio::test]
async fn exact_delete_leaves_siblings() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        inserts: vec![
            new_row("c1", "rec_20260302T090000Z", at(0)),
            new_row("c1", "rec_20260309T090000Z", at(7)),
        ],
        ..WritePlan::default()
    })
    .await
    .unwrap();

    let report = repo
        .commit(WritePlan {
            deletions: vec![Deletion {
                collection_id: "c1".into(),
                external_id: "rec_20260302T090000Z".into(),
                scope: DeleteScope::Exact,
            }],
            ..WritePlan::default()
        })
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(db.count("SELECT COUNT(*) FROM synced_events"), 1);
}

#[tokio::test]
async fn promotion_rekeys_row_in_place() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    repo.commit(WritePlan { inserts: vec![new_row("c1", "evt", at(0))], ..WritePlan::default() })
        .await
        .unwrap();
    let original = repo.find_matching(&ids(&["c1"]), &ids(&["evt"]), &[]).await.unwrap();

    let report = repo
        .commit(WritePlan {
            updates: vec![RowUpdate {
                row_id: original[0].id.clone(),
                external_id: "evt_20260302T090000Z".into(),
                fields: fields("Promoted", at(0)),
            }],
            ..WritePlan::default()
        })
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    let by_base = repo.find_matching(&ids(&["c1"]), &[], &ids(&["evt"])).await.unwrap();
    assert_eq!(by_base.len(), 1);
    assert_eq!(by_base[0].id, original[0].id, "row identity survives the rekey");
    assert_eq!(by_base[0].external_id, "evt_20260302T090000Z");
    assert_eq!(by_base[0].fields.name, "Promoted");
}

#[tokio::test]
async fn promotion_relinks_the_occurrence_source() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        sources: vec![source("evt")],
        inserts: vec![new_row("c1", "evt", at(0))],
        ..WritePlan::default()
    })
    .await
    .unwrap();
    let original = repo.find_matching(&ids(&["c1"]), &ids(&["evt"]), &[]).await.unwrap();

    repo.commit(WritePlan {
        sources: vec![source("evt_20260302T090000Z")],
        updates: vec![RowUpdate {
            row_id: original[0].id.clone(),
            external_id: "evt_20260302T090000Z".into(),
            fields: fields("Promoted", at(0)),
        }],
        ..WritePlan::default()
    })
    .await
    .unwrap();

    let linked = db.count(
        "SELECT COUNT(*) FROM synced_events e JOIN event_sources s ON s.id = e.event_source_id
         WHERE e.external_id = 'evt_20260302T090000Z' AND s.external_id = e.external_id",
    );
    assert_eq!(linked, 1, "promoted row points at the occurrence's source");
}

#[tokio::test]
async fn conflicting_update_falls_back_and_reports_the_row() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        inserts: vec![new_row("c1", "a", at(0)), new_row("c1", "b", at(1))],
        ..WritePlan::default()
    })
    .await
    .unwrap();
    let rows = repo.find_matching(&ids(&["c1"]), &ids(&["a", "b"]), &[]).await.unwrap();
    let row_a = rows.iter().find(|r| r.external_id == "a").unwrap();
    let row_b = rows.iter().find(|r| r.external_id == "b").unwrap();

    let report = repo
        .commit(WritePlan {
            updates: vec![
                RowUpdate {
                    row_id: row_a.id.clone(),
                    external_id: "a".into(),
                    fields: fields("Renamed", at(0)),
                },
                // collides with row "a" on (collection_id, external_id)
                RowUpdate {
                    row_id: row_b.id.clone(),
                    external_id: "a".into(),
                    fields: fields("Collides", at(1)),
                },
            ],
            ..WritePlan::default()
        })
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].external_id, "a");
    let renamed = repo.find_matching(&ids(&["c1"]), &ids(&["a"]), &[]).await.unwrap();
    assert_eq!(renamed[0].fields.name, "Renamed");
}

#[tokio::test]
async fn window_queries_and_deletes_respect_bounds() {
    let db = TestDatabase::seeded(&["c1"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        inserts: vec![
            new_row("c1", "before", at(-10)),
            new_row("c1", "inside", at(2)),
            new_row("c1", "after", at(40)),
        ],
        ..WritePlan::default()
    })
    .await
    .unwrap();
    let window = SyncWindow::new(at(0), at(30));

    let in_window = repo.find_in_window(&ids(&["c1"]), &window).await.unwrap();
    assert_eq!(in_window.len(), 1);
    assert_eq!(in_window[0].external_id, "inside");

    let all = repo
        .find_matching(&ids(&["c1"]), &ids(&["before", "inside", "after"]), &[])
        .await
        .unwrap();
    let all_ids: Vec<String> = all.into_iter().map(|r| r.id).collect();
    let deleted = repo.delete_in_window(&all_ids, &window).await.unwrap();

    assert_eq!(deleted, 1, "rows outside the window are never deleted");
    assert_eq!(db.count("SELECT COUNT(*) FROM synced_events"), 2);
}

#[tokio::test]
async fn rows_missing_from_collection_lists_sourced_rows_only() {
    let db = TestDatabase::seeded(&["c1", "c2"]);
    let repo = events(&db);
    repo.commit(WritePlan {
        sources: vec![source("shared"), source("copied")],
        inserts: vec![
            new_row("c1", "shared", at(1)),
            new_row("c1", "copied", at(2)),
            new_row("c2", "copied", at(2)),
            // no event source, so not a backfill candidate
            new_row("c1", "manual", at(3)),
        ],
        ..WritePlan::default()
    })
    .await
    .unwrap();
    let window = SyncWindow::new(at(0), at(30));

    let missing = repo.rows_missing_from_collection(ACCOUNT, "c2", &window).await.unwrap();

    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].external_id, "shared");
    assert_eq!(missing[0].collection_id, "c1");
}

#[tokio::test]
async fn sync_state_round_trip() {
    let db = TestDatabase::seeded(&[]);
    let states = SqliteSyncStateRepository::new(db.manager.pool().clone());

    let empty = states.get(ACCOUNT).await.unwrap();
    assert_eq!(empty.account_id, ACCOUNT);
    assert!(empty.sync_token.is_none() && empty.channel.is_none());

    let channel = WatchChannel {
        channel_id: "chan-1".into(),
        resource_id: "res-1".into(),
        expires_at: Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap(),
    };
    states.save_token(ACCOUNT, "token-1").await.unwrap();
    states.save_channel(ACCOUNT, &channel).await.unwrap();
    states.save_token(ACCOUNT, "token-2").await.unwrap();

    let stored = states.get(ACCOUNT).await.unwrap();
    assert_eq!(stored.sync_token.as_deref(), Some("token-2"));
    assert_eq!(stored.channel, Some(channel));

    states.clear_channel(ACCOUNT).await.unwrap();
    let cleared = states.get(ACCOUNT).await.unwrap();
    assert!(cleared.channel.is_none());
    assert_eq!(cleared.sync_token.as_deref(), Some("token-2"), "token survives channel clear");

    states.clear_token(ACCOUNT).await.unwrap();
    assert!(states.get(ACCOUNT).await.unwrap().sync_token.is_none());
}

#[tokio::test]
async fn only_active_accounts_are_listed() {
    let db = TestDatabase::seeded(&["c2", "c1"]);
    let accounts = SqliteAccountRepository::new(db.manager.pool().clone());
    let mut dormant = account();
    dormant.id = "acct-0".into();
    dormant.active = false;
    accounts.upsert(&dormant).unwrap();

    let active = accounts.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, ACCOUNT);
    assert_eq!(accounts.get("acct-0").await.unwrap().map(|a| a.active), Some(false));
    assert!(accounts.get("missing").await.unwrap().is_none());

    let collections = SqliteCollectionRepository::new(db.manager.pool().clone());
    let listed: Vec<String> =
        collections.list_for_account(ACCOUNT).await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec!["c1", "c2"]);
}

#[tokio::test(flavor = "current_thread")]
async fn waiting_for_a_connection_leaves_the_runtime_free() {
    let db = TestDatabase::with_pool_size(1);
    let repo = events(&db);
    let held = db.manager.get_connection().unwrap();

    let lookup = tokio::spawn(async move { repo.has_events_for_account(ACCOUNT).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!lookup.is_finished(), "lookup waits on the pool off the runtime thread");

    drop(held);
    assert!(!lookup.await.unwrap().unwrap());
}

#[test]
fn migrations_are_repeatable() {
    let db = TestDatabase::new();
    db.manager.run_migrations().unwrap();
    db.manager.health_check().unwrap();
    assert_eq!(db.count("SELECT COUNT(*) FROM schema_version"), 1);
}
