//! HTTP handlers for `/queues/{connection}/{queue}/{job_id}` endpoints.
//!
//! Jobs are only found through the queue they belong to: the queue they were enqueued on, or
//! `failed` while they're listed in the failed queue.

use actix_web::{web, HttpResponse, Responder};

use super::error_response;
use crate::application::QueueOptions;
use crate::models::job::JobRecord;
use crate::models::{ApplicationState, BrokerResult, FAILED_QUEUE_NAME};

/// Handles `GET /queues/{connection}/{queue}/{job_id}` requests.
///
/// # Returns
///
/// * 200 - JSON response containing all data about a job
/// * 404 - no such connection, or no job with given `job_id` in this queue
/// * 503 - Redis connection unavailable
pub async fn index(path: web::Path<(String, String, String)>, data: web::Data<ApplicationState>) -> impl Responder {
    let (connection_name, queue_name, job_id) = path.into_inner();
    let context = format!("{}/{}] [{}", connection_name, queue_name, job_id);

    let result: BrokerResult<JobRecord> = async {
        if queue_name == FAILED_QUEUE_NAME {
            data.factory.get_failed_queue(&connection_name)?.fetch_job(&job_id).await
        } else {
            data.factory
                .get_queue(&queue_name, &connection_name, &QueueOptions::default())?
                .fetch_job(&job_id)
                .await
        }
    }
    .await;

    match result {
        Ok(job) => HttpResponse::Ok().json(job),
        Err(err) => error_response(&context, err),
    }
}

/// Handles `DELETE /queues/{connection}/{queue}/{job_id}` requests.
///
/// # Returns
///
/// * 204 - job was removed from its queues and deleted
/// * 404 - no such connection, or no job with given `job_id` in this queue
/// * 503 - Redis connection unavailable
pub async fn delete(path: web::Path<(String, String, String)>, data: web::Data<ApplicationState>) -> impl Responder {
    let (connection_name, queue_name, job_id) = path.into_inner();
    let context = format!("{}/{}] [{}", connection_name, queue_name, job_id);

    let result: BrokerResult<()> = async {
        if queue_name == FAILED_QUEUE_NAME {
            data.factory.get_failed_queue(&connection_name)?.delete_job(&job_id).await
        } else {
            data.factory
                .get_queue(&queue_name, &connection_name, &QueueOptions::default())?
                .delete_job(&job_id)
                .await
        }
    }
    .await;

    match result {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => error_response(&context, err),
    }
}

/// Handles `POST /queues/{connection}/{queue}/{job_id}/requeue` requests.
///
/// `{queue}` is either the queue the job came from, or `failed`.
///
/// # Returns
///
/// * 204 - failed job was moved back onto the queue it came from
/// * 400 - job isn't in the failed queue
/// * 404 - no such connection, or no job with given `job_id` in this queue
/// * 503 - Redis connection unavailable
pub async fn requeue(path: web::Path<(String, String, String)>, data: web::Data<ApplicationState>) -> impl Responder {
    let (connection_name, queue_name, job_id) = path.into_inner();
    let context = format!("{}/{}] [{}", connection_name, queue_name, job_id);

    let result: BrokerResult<()> = async {
        if queue_name == FAILED_QUEUE_NAME {
            data.factory.get_failed_queue(&connection_name)?.requeue(&job_id).await
        } else {
            data.factory
                .get_queue(&queue_name, &connection_name, &QueueOptions::default())?
                .requeue_job(&job_id)
                .await
        }
    }
    .await;

    match result {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => error_response(&context, err),
    }
}
