use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use course_core::model::{ChangeKind, EventFilter, Resource, UserId};
use serde_json::json;
use services::{RealtimeError, RealtimeListener, SubscriptionStatus};
use storage::table::{ChangeEvent, Filter, ResourceStore, Row};
use storage::InMemoryStore;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn collector() -> (
    impl FnMut(ChangeEvent) + Send + 'static,
    mpsc::UnboundedReceiver<ChangeEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event| {
            let _ = tx.send(event);
        },
        rx,
    )
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

fn setup() -> (InMemoryStore, RealtimeListener) {
    let store = InMemoryStore::new();
    let listener = RealtimeListener::new(Arc::new(store.clone()));
    (store, listener)
}

#[tokio::test]
async fn delivers_events_in_emission_order() {
    let (store, listener) = setup();
    let (handler, mut rx) = collector();
    let sub = listener
        .subscribe(Resource::test_results(), EventFilter::Any, None, handler)
        .await
        .unwrap();

    let res = Resource::test_results();
    store.insert(&res, row(json!({"score": 10}))).await.unwrap();
    store
        .update(&res, &Filter::new().eq("id", 1), row(json!({"score": 20})))
        .await
        .unwrap();
    store.delete(&res, &Filter::new()).await.unwrap();

    let kinds = [next(&mut rx).await, next(&mut rx).await, next(&mut rx).await]
        .map(|event| event.kind);
    assert_eq!(
        kinds,
        [ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted]
    );
    assert_eq!(sub.status(), SubscriptionStatus::Active);
}

#[tokio::test]
async fn scoped_subscription_only_sees_own_rows() {
    let (store, listener) = setup();
    let me = UserId::random();
    let (handler, mut rx) = collector();
    let _sub = listener
        .subscribe(Resource::enrollments(), EventFilter::Any, Some(me), handler)
        .await
        .unwrap();

    let res = Resource::enrollments();
    store
        .insert(&res, row(json!({"user_id": UserId::random().to_string(), "course_id": 1})))
        .await
        .unwrap();
    store
        .insert(&res, row(json!({"user_id": me.to_string(), "course_id": 2})))
        .await
        .unwrap();

    let event = next(&mut rx).await;
    assert_eq!(event.record["course_id"], json!(2));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn scope_is_ignored_for_shared_resources() {
    let (store, listener) = setup();
    let (handler, mut rx) = collector();
    let _sub = listener
        .subscribe(
            Resource::courses(),
            EventFilter::Any,
            Some(UserId::random()),
            handler,
        )
        .await
        .unwrap();

    store
        .insert(&Resource::courses(), row(json!({"title": "Async"})))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.record["title"], json!("Async"));
}

#[tokio::test]
async fn event_filter_narrows_kinds() {
    let (store, listener) = setup();
    let (handler, mut rx) = collector();
    let _sub = listener
        .subscribe(Resource::courses(), EventFilter::Deleted, None, handler)
        .await
        .unwrap();

    let res = Resource::courses();
    store.insert(&res, row(json!({"title": "A"}))).await.unwrap();
    store.delete(&res, &Filter::new()).await.unwrap();

    assert_eq!(next(&mut rx).await.kind, ChangeKind::Deleted);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn no_handler_calls_after_unsubscribe() {
    let (store, listener) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut seen) = mpsc::unbounded_channel();
    let counter = Arc::clone(&calls);
    let sub = listener
        .subscribe(Resource::courses(), EventFilter::Any, None, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .await
        .unwrap();

    let res = Resource::courses();
    store.insert(&res, row(json!({"title": "A"}))).await.unwrap();
    timeout(Duration::from_secs(2), seen.recv()).await.unwrap();

    sub.unsubscribe();
    sub.unsubscribe();
    assert_eq!(sub.status(), SubscriptionStatus::Closed);

    for title in ["B", "C"] {
        store.insert(&res, row(json!({"title": title}))).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_handle_unsubscribes() {
    let (store, listener) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = listener
        .subscribe(Resource::courses(), EventFilter::Any, None, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    drop(sub);

    store
        .insert(&Resource::courses(), row(json!({"title": "late"})))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closed_feed_refuses_new_subscriptions() {
    let (store, listener) = setup();
    store.changes().close();

    let err = listener
        .subscribe(Resource::courses(), EventFilter::Any, None, |_event| {})
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RealtimeError::Subscription { ref resource, .. } if *resource == Resource::courses()
    ));
}

#[tokio::test]
async fn feed_shutdown_marks_subscription_failed() {
    let (store, listener) = setup();
    let sub = listener
        .subscribe(Resource::courses(), EventFilter::Any, None, |_event| {})
        .await
        .unwrap();
    let mut status = sub.status_changes();

    store.changes().close();
    timeout(Duration::from_secs(2), status.changed())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(*status.borrow(), SubscriptionStatus::Failed(_)));
    assert!(!sub.is_active());
}
