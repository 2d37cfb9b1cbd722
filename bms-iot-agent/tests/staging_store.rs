mod common;

use chrono::{Duration as ChronoDuration, Utc};

use common::{sample_point, test_store};

#[tokio::test]
async fn rows_are_acked_before_the_cleaner_may_touch_them() {
    let (store, _dir) = test_store().await;

    store
        .bulk_insert_points(vec![sample_point(1), sample_point(2), sample_point(3)])
        .await
        .unwrap();

    let staged = store.points_to_upload().await.unwrap();
    assert_eq!(staged.len(), 3);
    assert!(staged.iter().all(|point| !point.is_uploaded));

    // Cleaner runs before anything was acknowledged: nothing may go away.
    assert_eq!(store.delete_uploaded_points().await.unwrap(), 0);
    assert_eq!(store.point_count().await.unwrap(), 3);

    let ids: Vec<i64> = staged.iter().filter_map(|point| point.id).collect();
    store.mark_points_uploaded(&ids).await.unwrap();

    for id in &ids {
        let point = store.point_by_id(*id).await.unwrap().unwrap();
        assert!(point.is_uploaded);
    }

    assert_eq!(store.delete_uploaded_points().await.unwrap(), 3);
    assert_eq!(store.point_count().await.unwrap(), 0);
}

#[tokio::test]
async fn cleaner_spares_rows_still_awaiting_upload() {
    let (store, _dir) = test_store().await;

    store
        .bulk_insert_points(vec![sample_point(1), sample_point(2)])
        .await
        .unwrap();

    let staged = store.points_to_upload().await.unwrap();
    let first_id = staged[0].id.unwrap();
    store.mark_points_uploaded(&[first_id]).await.unwrap();

    assert_eq!(store.delete_uploaded_points().await.unwrap(), 1);

    let survivors = store.points_to_upload().await.unwrap();
    assert_eq!(survivors.len(), 1);
    assert_ne!(survivors[0].id, Some(first_id));
}

#[tokio::test]
async fn id_zero_is_coerced_to_store_assigned() {
    let (store, _dir) = test_store().await;

    let mut point = sample_point(9);
    point.id = Some(0);
    store.bulk_insert_points(vec![point]).await.unwrap();

    let staged = store.points_to_upload().await.unwrap();
    assert_eq!(staged.len(), 1);
    let id = staged[0].id.unwrap();
    assert!(id > 0);

    let fetched = store.point_by_id(id).await.unwrap().unwrap();
    assert_eq!(fetched.point_id, 9);
}

#[tokio::test]
async fn single_insert_assigns_and_returns_the_id() {
    let (store, _dir) = test_store().await;

    let inserted = store.insert_point(sample_point(4)).await.unwrap();
    let id = inserted.id.unwrap();
    assert!(id > 0);

    let fetched = store.point_by_id(id).await.unwrap().unwrap();
    assert_eq!(fetched.iot_device_point_id, "pt-4");
    assert_eq!(fetched.present_value.as_deref(), Some("21.5"));
}

#[tokio::test]
async fn upload_batches_drain_oldest_first() {
    let (store, _dir) = test_store().await;

    let now = Utc::now();
    let mut newest = sample_point(30);
    newest.created_at = now;
    let mut middle = sample_point(20);
    middle.created_at = now - ChronoDuration::seconds(10);
    let mut oldest = sample_point(10);
    oldest.created_at = now - ChronoDuration::seconds(20);

    store
        .bulk_insert_points(vec![newest, oldest, middle])
        .await
        .unwrap();

    let staged = store.points_to_upload().await.unwrap();
    let order: Vec<i64> = staged.iter().map(|point| point.point_id).collect();
    assert_eq!(order, vec![10, 20, 30]);
}

#[tokio::test]
async fn marking_nothing_is_a_noop() {
    let (store, _dir) = test_store().await;
    store.mark_points_uploaded(&[]).await.unwrap();
    assert_eq!(store.point_count().await.unwrap(), 0);
}

#[tokio::test]
async fn store_computes_the_millisecond_timestamp() {
    let (store, _dir) = test_store().await;

    let inserted = store.insert_point(sample_point(1)).await.unwrap();
    let fetched = store
        .point_by_id(inserted.id.unwrap())
        .await
        .unwrap()
        .unwrap();

    let millis = fetched.created_at_millis.expect("computed column populated");
    assert_eq!(millis / 1000, fetched.created_at.timestamp());
}
