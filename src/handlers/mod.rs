//! Module containing HTTP handlers, and the routes mapping to them.

use actix_web::{web, HttpResponse};
use log::error;

use crate::models::BrokerError;

pub mod health;
pub mod info;
pub mod job;
pub mod queue;

/// Register every route. `max_body_size` limits the size of JSON request bodies, if set.
pub fn configure(cfg: &mut web::ServiceConfig, max_body_size: Option<usize>) {
    let mut json_config = web::JsonConfig::default();
    if let Some(size) = max_body_size {
        json_config = json_config.limit(size);
    }

    cfg.app_data(json_config)
        // get a summary of the broker as a whole
        .service(
            web::scope("/info")
                .route("", web::get().to(info::index))
                .route("/version", web::get().to(info::version)),
        )
        // run basic health check by pinging every connection
        .route("/health", web::get().to(health::index))
        .service(
            web::scope("/queues")
                // list every queue with workers, and each failed queue
                .route("", web::get().to(queue::index))
                .route("/{connection}/{queue}", web::get().to(queue::summary))
                .route("/{connection}/{queue}", web::post().to(queue::enqueue))
                .route("/{connection}/{queue}/{job_id}", web::get().to(job::index))
                .route("/{connection}/{queue}/{job_id}", web::delete().to(job::delete))
                .route("/{connection}/{queue}/{job_id}/requeue", web::post().to(job::requeue)),
        );
}

/// Map an error to a response, logging anything unexpected.
fn error_response(context: &str, err: BrokerError) -> HttpResponse {
    match err {
        BrokerError::NoSuchJob(_) | BrokerError::UnknownConnection(_) => {
            HttpResponse::NotFound().body(err.to_string())
        }
        BrokerError::BadRequest(_) | BrokerError::MixedConnections(_) | BrokerError::UnknownFunction(_) => {
            HttpResponse::BadRequest().body(err.to_string())
        }
        BrokerError::FeatureUnavailable(_) => HttpResponse::NotImplemented().body(err.to_string()),
        BrokerError::RedisConnection(_) => {
            error!("[{}] {}", context, err);
            HttpResponse::ServiceUnavailable().body(err.to_string())
        }
        BrokerError::Submission { ref source, .. } if matches!(**source, BrokerError::RedisConnection(_)) => {
            error!("[{}] {}", context, err);
            HttpResponse::ServiceUnavailable().body(err.to_string())
        }
        err => {
            error!("[{}] {}", context, err);
            HttpResponse::InternalServerError().body(err.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn error_statuses() {
        let cases = vec![
            (BrokerError::NoSuchJob("a".to_owned()), StatusCode::NOT_FOUND),
            (BrokerError::UnknownConnection("a".to_owned()), StatusCode::NOT_FOUND),
            (BrokerError::bad_request("a"), StatusCode::BAD_REQUEST),
            (BrokerError::UnknownFunction("a".to_owned()), StatusCode::BAD_REQUEST),
            (BrokerError::FeatureUnavailable("a".to_owned()), StatusCode::NOT_IMPLEMENTED),
            (BrokerError::RedisConnection("a".to_owned()), StatusCode::SERVICE_UNAVAILABLE),
            (
                BrokerError::submission("q", BrokerError::RedisConnection("a".to_owned())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (BrokerError::submission("q", BrokerError::internal("a")), StatusCode::INTERNAL_SERVER_ERROR),
            (BrokerError::internal("a"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(error_response("test", err).status(), status);
        }
    }
}
