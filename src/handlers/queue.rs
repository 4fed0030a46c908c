//! HTTP handlers for the `/queues` endpoints.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::error_response;
use crate::application::{queue_stats, Enqueued, FlushReport, QueueOptions};
use crate::models::job::{JobCall, JobId, JobRecord};
use crate::models::{ApplicationState, BrokerError, BrokerResult, Duration};

/// Body of `POST /queues/{connection}/{queue}`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    jobs: Vec<JobCall>,

    /// Overrides the configured commit mode for this request.
    #[serde(default)]
    autocommit: Option<bool>,

    /// Timeout for jobs that don't set their own.
    #[serde(default)]
    timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_ids: Vec<JobId>,
}

/// Body returned when some deferred jobs could not be submitted at commit. Indexes refer to
/// positions in the request's `jobs`.
#[derive(Debug, Serialize)]
struct CommitFailure {
    submitted: Vec<SubmittedJob>,
    failed: Vec<FailedJob>,
    skipped: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct SubmittedJob {
    index: usize,
    job_id: JobId,
}

#[derive(Debug, Serialize)]
struct FailedJob {
    index: usize,
    error: String,
}

#[derive(Debug, Serialize)]
struct QueueSummary {
    connection: String,
    name: String,
    count: u64,
    jobs: Vec<JobRecord>,
}

/// Handles `GET /queues` requests.
///
/// # Returns
///
/// * 200 - JSON list of every queue with active workers, plus each connection's failed queue
/// * 503 - Redis connection unavailable
pub async fn index(data: web::Data<ApplicationState>) -> impl Responder {
    match queue_stats(&data.factory).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(err) => error_response("queues", err),
    }
}

/// Handles `GET /queues/{connection}/{queue}` requests.
///
/// # Returns
///
/// * 200 - JSON summary of the queue, including every job waiting in it
/// * 404 - no connection with the given name
pub async fn summary(path: web::Path<(String, String)>, data: web::Data<ApplicationState>) -> impl Responder {
    let (connection_name, queue_name) = path.into_inner();
    let context = format!("{}/{}", connection_name, queue_name);

    let result: BrokerResult<QueueSummary> = async {
        let queue = data
            .factory
            .get_queue(&queue_name, &connection_name, &QueueOptions::default())?;
        let jobs = queue.jobs().await?;
        Ok(QueueSummary {
            connection: connection_name.clone(),
            name: queue_name.clone(),
            count: jobs.len() as u64,
            jobs,
        })
    }
    .await;

    match result {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(err) => error_response(&context, err),
    }
}

/// Handles `POST /queues/{connection}/{queue}` requests, enqueueing a batch of jobs.
///
/// The batch is one unit of work: on a deferred queue either every job is submitted once the
/// whole request has been accepted, or (if any job is rejected up front) none are.
///
/// # Returns
///
/// * 201 - JSON containing the IDs of the submitted jobs, in request order
/// * 400 - empty batch, invalid queue name, or unknown inline function
/// * 404 - no connection with the given name
/// * 500 - a job could not be submitted. If that happened at commit, the JSON body lists the
///   jobs that were submitted, the ones that failed, and any that were skipped
/// * 503 - Redis connection unavailable
pub async fn enqueue(
    path: web::Path<(String, String)>,
    json: web::Json<EnqueueRequest>,
    data: web::Data<ApplicationState>,
) -> impl Responder {
    let (connection_name, queue_name) = path.into_inner();
    let request = json.into_inner();
    let context = format!("{}/{}", connection_name, queue_name);

    if request.jobs.is_empty() {
        return HttpResponse::BadRequest().body("At least one job is required");
    }

    let options = QueueOptions {
        default_timeout: request.timeout,
        autocommit: request.autocommit,
        ..Default::default()
    };
    let queue = match data.factory.get_queue(&queue_name, &connection_name, &options) {
        Ok(queue) => queue,
        Err(err) => return error_response(&context, err),
    };

    let mut ctx = data.factory.unit_of_work();
    let mut enqueued = Vec::with_capacity(request.jobs.len());
    for call in request.jobs {
        match queue.enqueue(&mut ctx, call).await {
            Ok(result) => enqueued.push(result),
            Err(err) => {
                ctx.abort();
                return error_response(&context, err);
            }
        }
    }

    let report = ctx.commit().await;
    if !report.is_success() {
        return commit_failure(&context, &enqueued, report);
    }
    let deferred_ids = match report.into_result() {
        Ok(job_ids) => job_ids,
        Err(err) => return error_response(&context, err),
    };
    debug!("[{}] {} jobs submitted at commit", context, deferred_ids.len());

    match merge_job_ids(enqueued, deferred_ids) {
        Ok(job_ids) => {
            info!("[{}] enqueued {} jobs", context, job_ids.len());
            HttpResponse::Created().json(EnqueueResponse { job_ids })
        }
        Err(err) => error_response(&context, err),
    }
}

/// Response for a commit where not every deferred job was submitted.
///
/// The status is the one the first failure maps to.
fn commit_failure(context: &str, enqueued: &[Enqueued], report: FlushReport) -> HttpResponse {
    // report indexes count deferred jobs only
    let deferred_positions: Vec<usize> = enqueued
        .iter()
        .enumerate()
        .filter(|(_, result)| result.is_deferred())
        .map(|(position, _)| position)
        .collect();
    let position = |index: usize| deferred_positions.get(index).copied().unwrap_or(index);

    let mut submitted: Vec<SubmittedJob> = enqueued
        .iter()
        .enumerate()
        .filter_map(|(index, result)| {
            result.job_id().map(|job_id| SubmittedJob {
                index,
                job_id: job_id.to_owned(),
            })
        })
        .collect();
    submitted.extend(report.submitted.into_iter().map(|(index, job_id)| SubmittedJob {
        index: position(index),
        job_id,
    }));
    submitted.sort_by_key(|job| job.index);

    let mut status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut failed = Vec::with_capacity(report.failed.len());
    for (n, (index, err)) in report.failed.into_iter().enumerate() {
        failed.push(FailedJob {
            index: position(index),
            error: err.to_string(),
        });
        if n == 0 {
            status = error_response(context, err).status();
        }
    }

    let skipped: Vec<usize> = report.skipped.into_iter().map(position).collect();
    warn!(
        "[{}] commit incomplete: {} submitted, {} failed, {} skipped",
        context,
        submitted.len(),
        failed.len(),
        skipped.len()
    );

    HttpResponse::build(status).json(CommitFailure {
        submitted,
        failed,
        skipped,
    })
}

/// Fill in the IDs of deferred jobs, which are only known once the unit of work commits.
fn merge_job_ids(enqueued: Vec<Enqueued>, deferred_ids: Vec<JobId>) -> BrokerResult<Vec<JobId>> {
    let mut deferred_ids = deferred_ids.into_iter();
    let mut job_ids = Vec::with_capacity(enqueued.len());
    for result in enqueued {
        match result {
            Enqueued::Submitted(job_id) => job_ids.push(job_id),
            Enqueued::Deferred => match deferred_ids.next() {
                Some(job_id) => job_ids.push(job_id),
                None => return Err(BrokerError::internal("fewer deferred jobs submitted than enqueued")),
            },
        }
    }
    Ok(job_ids)
}
