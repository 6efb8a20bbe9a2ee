use std::path::Path;

use whakoom_scrape::migrate;
use whakoom_scrape::model::{
    ListId, NewList, NewTitle, NewVolume, ScrapeStatus, TitleId, VolumeId,
};
use whakoom_scrape::store::{ListFilter, Store, StoreError};

async fn migrated_store() -> Store {
    let store = Store::in_memory().await.expect("open in-memory store");
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    migrate::apply_all(store.pool(), &migrations)
        .await
        .expect("apply migrations");
    store
}

fn list(list_id: i64) -> NewList {
    NewList {
        list_id: ListId(list_id),
        title: format!("list {list_id}"),
        url: format!("https://www.whakoom.com/deirdre/lists/l_{list_id}"),
        owner_profile: "deirdre".to_owned(),
    }
}

fn title(title_id: i64, name: &str) -> NewTitle {
    NewTitle {
        title_id: TitleId(title_id),
        display_name: name.to_owned(),
        url: format!("https://www.whakoom.com/ediciones/{title_id}/{name}"),
    }
}

fn volume(volume_id: &str, title_id: i64) -> NewVolume {
    NewVolume {
        volume_id: VolumeId(volume_id.to_owned()),
        title_id: TitleId(title_id),
        url: format!("https://www.whakoom.com/comics/{volume_id}/x/1"),
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let store = Store::in_memory().await.expect("open store");
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

    let first = migrate::apply_all(store.pool(), &migrations)
        .await
        .expect("first apply");
    assert!(first >= 1);

    let second = migrate::apply_all(store.pool(), &migrations)
        .await
        .expect("second apply");
    assert_eq!(second, 0);
}

#[tokio::test]
async fn title_dedup_is_first_write_wins_and_silent() {
    let store = migrated_store().await;

    let inserted = store
        .insert_title_if_absent(&title(673392, "rosen_blood"))
        .await
        .expect("first insert");
    assert!(inserted);

    // Same id, different display payload: no error, no second row, no update.
    let inserted = store
        .insert_title_if_absent(&title(673392, "rosen_blood_alt"))
        .await
        .expect("second insert");
    assert!(!inserted);

    let (count, name): (i64, String) =
        sqlx::query_as("SELECT COUNT(*), MAX(title) FROM titles WHERE title_id = 673392")
            .fetch_one(store.pool())
            .await
            .expect("count titles");
    assert_eq!(count, 1);
    assert_eq!(name, "rosen_blood");
}

#[tokio::test]
async fn membership_pair_is_unique_but_titles_link_to_many_lists() {
    let store = migrated_store().await;

    let l1 = store.upsert_list(&list(131178)).await.expect("upsert l1");
    let l2 = store.upsert_list(&list(999)).await.expect("upsert l2");
    store
        .insert_title_if_absent(&title(673392, "rosen_blood"))
        .await
        .expect("insert title");

    assert!(store
        .link_title_to_list(l1, TitleId(673392), None)
        .await
        .expect("link l1"));
    assert!(store
        .link_title_to_list(l2, TitleId(673392), None)
        .await
        .expect("link l2"));
    // Re-linking an existing pair is a no-op, not an error.
    assert!(!store
        .link_title_to_list(l1, TitleId(673392), None)
        .await
        .expect("re-link l1"));

    let memberships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lists_titles")
        .fetch_one(store.pool())
        .await
        .expect("count memberships");
    assert_eq!(memberships, 2);
}

#[tokio::test]
async fn duplicate_volume_with_different_payload_is_surfaced() {
    let store = migrated_store().await;
    store
        .insert_title_if_absent(&title(673392, "rosen_blood"))
        .await
        .expect("insert title");
    store
        .insert_title_if_absent(&title(1, "other"))
        .await
        .expect("insert other title");

    assert!(store
        .insert_volume(&volume("fxTr6", 673392))
        .await
        .expect("first insert"));
    // Identical repeat is a harmless no-op.
    assert!(!store
        .insert_volume(&volume("fxTr6", 673392))
        .await
        .expect("identical repeat"));

    let err = store
        .insert_volume(&volume("fxTr6", 1))
        .await
        .expect_err("conflicting payload");
    assert!(matches!(err, StoreError::DuplicateVolume { .. }));
}

#[tokio::test]
async fn volume_for_missing_title_is_an_integrity_violation() {
    let store = migrated_store().await;

    let err = store
        .insert_volume(&volume("fxTr6", 673392))
        .await
        .expect_err("missing parent title");
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn single_volume_flag_tracks_volume_count() {
    let store = migrated_store().await;
    store
        .insert_title_if_absent(&title(673392, "rosen_blood"))
        .await
        .expect("insert title");

    store
        .insert_volume(&volume("fxTr6", 673392))
        .await
        .expect("insert v1");
    store
        .refresh_single_volume_flag(TitleId(673392))
        .await
        .expect("refresh after v1");
    let flag: bool = sqlx::query_scalar("SELECT is_single_volume FROM titles WHERE title_id = ?")
        .bind(673392i64)
        .fetch_one(store.pool())
        .await
        .expect("read flag");
    assert!(flag);

    store
        .insert_volume(&volume("aB9c2", 673392))
        .await
        .expect("insert v2");
    store
        .refresh_single_volume_flag(TitleId(673392))
        .await
        .expect("refresh after v2");
    let flag: bool = sqlx::query_scalar("SELECT is_single_volume FROM titles WHERE title_id = ?")
        .bind(673392i64)
        .fetch_one(store.pool())
        .await
        .expect("read flag");
    assert!(!flag);
}

#[tokio::test]
async fn upsert_list_preserves_status_and_refreshes_display_data() {
    let store = migrated_store().await;

    let key = store.upsert_list(&list(131178)).await.expect("insert");
    store
        .set_list_status(key, ScrapeStatus::InProgress)
        .await
        .expect("start");
    store
        .set_list_status(key, ScrapeStatus::Completed)
        .await
        .expect("complete");

    let mut renamed = list(131178);
    renamed.title = "renamed".to_owned();
    let key_again = store.upsert_list(&renamed).await.expect("upsert again");
    assert_eq!(key, key_again);

    let lists = store.get_lists(ListFilter::All).await.expect("get lists");
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].title, "renamed");
    assert_eq!(lists[0].status, ScrapeStatus::Completed);
    assert!(lists[0].last_scraped_at.is_some());
}

#[tokio::test]
async fn list_status_edges_are_enforced() {
    let store = migrated_store().await;
    let key = store.upsert_list(&list(131178)).await.expect("insert");

    // pending -> completed must pass through in_progress.
    let err = store
        .set_list_status(key, ScrapeStatus::Completed)
        .await
        .expect_err("no direct completion");
    assert!(matches!(err, StoreError::IllegalTransition { .. }));

    store
        .set_list_status(key, ScrapeStatus::InProgress)
        .await
        .expect("start");
    store
        .set_list_status(key, ScrapeStatus::Failed)
        .await
        .expect("fail");
    store
        .set_list_status(key, ScrapeStatus::Pending)
        .await
        .expect("explicit retry");

    let pending = store
        .get_lists(ListFilter::WithStatus(ScrapeStatus::Pending))
        .await
        .expect("get pending");
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn unrecognized_status_string_is_an_integrity_violation() {
    let store = migrated_store().await;
    let key = store.upsert_list(&list(131178)).await.expect("insert");

    // A corrupted row must surface, not silently re-enter the lifecycle.
    sqlx::query("UPDATE lists SET scrape_status = 'bogus' WHERE id = ?")
        .bind(key.0)
        .execute(store.pool())
        .await
        .expect("corrupt status");

    let err = store
        .get_lists(ListFilter::All)
        .await
        .expect_err("corrupted status surfaces on read");
    assert!(matches!(err, StoreError::Integrity(_)));

    let err = store
        .set_list_status(key, ScrapeStatus::InProgress)
        .await
        .expect_err("corrupted status blocks transitions");
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn status_updates_key_on_the_database_row_not_the_site_id() {
    let store = migrated_store().await;
    let key = store.upsert_list(&list(131178)).await.expect("insert");

    // The external list id is not a valid row key; using it must touch no row.
    let err = store
        .set_list_status(
            whakoom_scrape::model::ListKey(131178),
            ScrapeStatus::InProgress,
        )
        .await
        .expect_err("external id is not a row key");
    assert!(matches!(err, StoreError::Integrity(_)));

    store
        .set_list_status(key, ScrapeStatus::InProgress)
        .await
        .expect("real key works");
}
