//! Defines handlers for health check HTTP endpoints.

use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::Serialize;

use crate::models::ApplicationState;

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
struct Health {
    status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Health {
    fn new_healthy() -> Self {
        Health {
            status: HealthStatus::Healthy,
            error: None,
        }
    }

    fn new_from_error<S: Into<String>>(err: S) -> Self {
        Health {
            status: HealthStatus::Unhealthy,
            error: Some(err.into()),
        }
    }
}

/// Handles `GET /health` requests, pinging every connection.
///
/// Always responds with 200, the body saying whether every connection is reachable.
pub async fn index(data: web::Data<ApplicationState>) -> impl Responder {
    let registry = data.factory.registry();
    let mut errors = Vec::new();

    for name in registry.names() {
        let result = match registry.connection(name) {
            Ok(connection) => connection.storage().ping().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("[{}] health check failed: {}", name, err);
            errors.push(format!("{}: {}", name, err));
        }
    }

    if errors.is_empty() {
        HttpResponse::Ok().json(Health::new_healthy())
    } else {
        HttpResponse::Ok().json(Health::new_from_error(errors.join("; ")))
    }
}
