//! Tests of the HTTP endpoints, run against in-memory storage.

use std::collections::HashMap;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use rqbroker::application::{CacheClients, ConnectionRegistry, MemoryConnector, QueueFactory};
use rqbroker::config::{CommitMode, Config, ConnectionConfig};
use rqbroker::handlers;
use rqbroker::models::ApplicationState;

fn state(commit_mode: CommitMode) -> web::Data<ApplicationState> {
    state_with_connector(commit_mode, &MemoryConnector::new())
}

/// State whose storage can be reached through `connector`.
fn state_with_connector(commit_mode: CommitMode, connector: &MemoryConnector) -> web::Data<ApplicationState> {
    let mut config = Config::default();
    config.rq.commit_mode = commit_mode;
    config.connections.insert(
        "secondary".to_owned(),
        ConnectionConfig {
            db: Some(1),
            ..Default::default()
        },
    );

    let registry =
        ConnectionRegistry::new(config.connections.clone(), &CacheClients::new(), connector).unwrap();
    let factory = QueueFactory::new(registry, &config.rq);
    web::Data::new(ApplicationState { factory, config })
}

macro_rules! init_app {
    (@state $state:expr) => {
        test::init_service(
            App::new()
                .app_data($state)
                .configure(|cfg| handlers::configure(cfg, None)),
        )
        .await
    };
    ($commit_mode:expr) => {
        init_app!(@state state($commit_mode))
    };
}

#[actix_web::test]
async fn enqueue_and_inspect() {
    let app = init_app!(CommitMode::Deferred);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails")
        .set_json(json!({"jobs": [{"func": "tasks.send", "args": ["a@example.com"]}, {"func": "tasks.send"}]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let job_ids = body["job_ids"].as_array().unwrap().clone();
    assert_eq!(job_ids.len(), 2);

    let req = test::TestRequest::get().uri("/queues/default/emails").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["jobs"][0]["id"], job_ids[0]);
    assert_eq!(body["jobs"][0]["description"], "tasks.send(\"a@example.com\")");

    let job_uri = format!("/queues/default/emails/{}", job_ids[1].as_str().unwrap());
    let req = test::TestRequest::get().uri(&job_uri).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["origin"], "emails");

    let req = test::TestRequest::delete().uri(&job_uri).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri(&job_uri).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    // other connections have their own storage
    let req = test::TestRequest::get().uri("/queues/secondary/emails").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 0);
}

#[actix_web::test]
async fn enqueue_errors() {
    let app = init_app!(CommitMode::Immediate);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails")
        .set_json(json!({"jobs": []}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/queues/missing/emails")
        .set_json(json!({"jobs": [{"func": "tasks.send"}]}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/queues/missing/emails").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn requeue_requires_failed_job() {
    let app = init_app!(CommitMode::Immediate);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails")
        .set_json(json!({"jobs": [{"func": "tasks.send"}]}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let job_id = body["job_ids"][0].as_str().unwrap().to_owned();

    let req = test::TestRequest::post()
        .uri(&format!("/queues/default/emails/{}/requeue", job_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails/no-such-job/requeue")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn incomplete_commit_reports_each_job() {
    let connector = MemoryConnector::new();
    let state = state_with_connector(CommitMode::Deferred, &connector);
    let endpoint = state.factory.registry().connection("default").unwrap().endpoint().clone();
    connector
        .storage_for(&endpoint)
        .unwrap()
        .reject_submissions_after("emails", 1)
        .await;
    let app = init_app!(@state state);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails")
        .set_json(json!({"jobs": [{"func": "tasks.a"}, {"func": "tasks.b"}, {"func": "tasks.c"}]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = test::read_body_json(resp).await;
    let submitted = body["submitted"].as_array().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["index"], 0);
    let failed: Vec<&Value> = body["failed"].as_array().unwrap().iter().map(|f| &f["index"]).collect();
    assert_eq!(failed, vec![&json!(1), &json!(2)]);
    assert_eq!(body["skipped"], json!([]));

    // the submitted job is visible under the ID that was reported
    let job_uri = format!("/queues/default/emails/{}", submitted[0]["job_id"].as_str().unwrap());
    let req = test::TestRequest::get().uri(&job_uri).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn jobs_only_found_through_their_own_queue() {
    let app = init_app!(CommitMode::Immediate);

    let req = test::TestRequest::post()
        .uri("/queues/default/emails")
        .set_json(json!({"jobs": [{"func": "tasks.send"}]}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let job_id = body["job_ids"][0].as_str().unwrap().to_owned();

    for uri in [
        format!("/queues/default/other/{}", job_id),
        format!("/queues/default/failed/{}", job_id),
    ] {
        let req = test::TestRequest::get().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::delete().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    let req = test::TestRequest::post()
        .uri(&format!("/queues/default/other/{}/requeue", job_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    // still queued where it was enqueued
    let req = test::TestRequest::get().uri("/queues/default/emails").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 1);
}

#[actix_web::test]
async fn queue_listing() {
    let app = init_app!(CommitMode::Immediate);

    let req = test::TestRequest::get().uri("/queues").to_request();
    let body: Vec<HashMap<String, Value>> = test::call_and_read_body_json(&app, req).await;

    // no workers, so only the failed queue of each connection
    let names: Vec<(&str, &str)> = body
        .iter()
        .map(|s| (s["connection"].as_str().unwrap(), s["name"].as_str().unwrap()))
        .collect();
    assert_eq!(names, vec![("default", "failed"), ("secondary", "failed")]);
    assert!(body[0]["workers"].is_null());
}

#[actix_web::test]
async fn info_and_health() {
    let app = init_app!(CommitMode::Deferred);

    let req = test::TestRequest::get().uri("/info").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["commit_mode"], "deferred");
    assert_eq!(body["connections"], json!(["default", "secondary"]));
    assert_eq!(body["scheduler_available"], cfg!(feature = "scheduler"));

    let req = test::TestRequest::get().uri("/info/version").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!(env!("CARGO_PKG_VERSION")));

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"status": "healthy"}));
}
