//! Handlers for getting general information about the broker as a whole.

use actix_web::{web, HttpResponse, Responder};

use crate::models::{ApplicationState, BrokerInfo};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Handles `GET /info` requests.
///
/// # Returns
///
/// * 200 - JSON containing summary of broker configuration
pub async fn index(data: web::Data<ApplicationState>) -> impl Responder {
    let factory = &data.factory;
    let rq = &data.config.rq;

    HttpResponse::Ok().json(BrokerInfo {
        version: VERSION,
        connections: factory.registry().names().into_iter().map(str::to_owned).collect(),
        commit_mode: rq.commit_mode.as_str(),
        scheduler_available: factory.scheduler_available(),
        show_admin_link: rq.show_admin_link,
        worker_name: rq.name.clone(),
        burst: rq.burst,
    })
}

/// Handles `GET /info/version` requests.
pub async fn version() -> impl Responder {
    HttpResponse::Ok().json(VERSION)
}
