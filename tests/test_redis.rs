//! Tests against a live Redis server.
//!
//! Ignored by default. Run with `cargo test -- --ignored`, with `REDIS_URL` pointing at a
//! disposable database (defaults to `redis://127.0.0.1:6379/15`). Each test uses its own key
//! namespace, and cleans up after itself.

use rqbroker::application::{Connector, Endpoint, RedisConnector};
use rqbroker::models::job::{JobCall, Status};
use rqbroker::models::{BrokerError, DateTime, FAILED_QUEUE_NAME};
use rqbroker::storage::Storage;
use std::sync::Arc;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_owned())
}

/// Storage under a namespace unique to this test, and a raw client for cleanup.
fn init(namespace: &str) -> (Arc<dyn Storage>, redis::Client) {
    let endpoint = Endpoint::Url { url: redis_url(), db: None };
    let storage = RedisConnector::new(format!("rqtest-{}", namespace))
        .connect(&endpoint)
        .unwrap();
    let client = redis::Client::open(redis_url()).unwrap();
    (storage, client)
}

fn cleanup(client: &redis::Client, namespace: &str) {
    let mut conn = client.get_connection().unwrap();
    let keys: Vec<String> = redis::cmd("KEYS")
        .arg(format!("rqtest-{}:*", namespace))
        .query(&mut conn)
        .unwrap();
    if !keys.is_empty() {
        let _: () = redis::cmd("DEL").arg(keys).query(&mut conn).unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn submit_and_list() {
    let (storage, client) = init("submit");
    storage.ping().await.unwrap();

    let a = storage.submit("default", &JobCall::new("tasks.a").arg(1), None).await.unwrap();
    let b = storage.submit("default", &JobCall::new("tasks.b").kwarg("x", "y"), None).await.unwrap();
    assert_eq!(storage.count("default").await.unwrap(), 2);

    let jobs = storage.list_jobs("default").await.unwrap();
    let ids: Vec<&str> = jobs.iter().map(|job| job.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);
    assert_eq!(jobs[0].status, Status::Queued);
    assert_eq!(jobs[1].kwargs["x"], "y");

    assert!(storage.delete_job("default", &a).await.unwrap());
    assert!(matches!(storage.fetch_job(&a).await, Err(BrokerError::NoSuchJob(_))));
    assert_eq!(storage.count("default").await.unwrap(), 1);

    cleanup(&client, "submit");
}

#[tokio::test]
#[ignore]
async fn inline_failure_and_requeue() {
    let (storage, client) = init("requeue");

    let id = storage
        .record_inline("reports", &JobCall::new("tasks.a"), Err("boom".to_owned()))
        .await
        .unwrap();
    assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 1);
    assert_eq!(storage.fetch_job(&id).await.unwrap().exc_info.as_deref(), Some("boom"));

    storage.requeue_job(&id).await.unwrap();
    assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 0);
    assert_eq!(storage.count("reports").await.unwrap(), 1);
    assert!(matches!(storage.requeue_job(&id).await, Err(BrokerError::BadRequest(_))));

    cleanup(&client, "requeue");
}

#[tokio::test]
#[ignore]
async fn scheduled_release() {
    let (storage, client) = init("schedule");
    let now = DateTime::now();

    let due = storage.schedule("default", &JobCall::new("tasks.a"), &now.plus_seconds(-1)).await.unwrap();
    storage.schedule("default", &JobCall::new("tasks.b"), &now.plus_seconds(3600)).await.unwrap();

    assert_eq!(storage.enqueue_scheduled(&now).await.unwrap(), vec![due]);
    assert!(storage.enqueue_scheduled(&now).await.unwrap().is_empty());
    assert_eq!(storage.count("default").await.unwrap(), 1);

    cleanup(&client, "schedule");
}

#[tokio::test]
#[ignore]
async fn worker_counts() {
    let (storage, client) = init("workers");
    {
        let mut conn = client.get_connection().unwrap();
        let _: () = redis::cmd("SET").arg("rqtest-workers:worker:high.host.1").arg(1).query(&mut conn).unwrap();
        let _: () = redis::cmd("SET").arg("rqtest-workers:worker:high.host.2").arg(1).query(&mut conn).unwrap();
    }

    let counts = storage.worker_queue_names().await.unwrap();
    assert_eq!(counts.get("high"), Some(&2));

    cleanup(&client, "workers");
}

#[tokio::test]
#[ignore]
async fn rejected_requeue_leaves_connection_unwatched() {
    let (storage, client) = init("unwatch");
    let id = storage.submit("default", &JobCall::new("tasks.a"), None).await.unwrap();
    assert!(matches!(storage.requeue_job(&id).await, Err(BrokerError::BadRequest(_))));

    // another client changes a key the requeue looked at
    {
        let mut conn = client.get_connection().unwrap();
        let _: () = redis::cmd("RPUSH")
            .arg("rqtest-unwatch:queue:failed")
            .arg("other")
            .query(&mut conn)
            .unwrap();
    }

    // the pool hands back the same connection, which must not discard this submission
    let next = storage.submit("default", &JobCall::new("tasks.b"), None).await.unwrap();
    assert_eq!(storage.count("default").await.unwrap(), 2);
    assert_eq!(storage.fetch_job(&next).await.unwrap().origin, "default");

    cleanup(&client, "unwatch");
}

#[tokio::test]
#[ignore]
async fn delete_only_through_own_queue() {
    let (storage, client) = init("delete");
    let id = storage.submit("emails", &JobCall::new("tasks.a"), None).await.unwrap();

    assert!(!storage.delete_job("other", &id).await.unwrap());
    assert!(!storage.delete_job(FAILED_QUEUE_NAME, &id).await.unwrap());
    assert_eq!(storage.count("emails").await.unwrap(), 1);

    assert!(storage.delete_job("emails", &id).await.unwrap());
    assert_eq!(storage.count("emails").await.unwrap(), 0);

    let failed = storage
        .record_inline("reports", &JobCall::new("tasks.b"), Err("boom".to_owned()))
        .await
        .unwrap();
    assert!(storage.delete_job(FAILED_QUEUE_NAME, &failed).await.unwrap());
    assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 0);

    cleanup(&client, "delete");
}
