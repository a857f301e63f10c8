use log::{error, info};
use rocket::serde::json::{self, Json};
use rocket::{Route, State, get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::{AppError, AppResult};
use crate::background::queue::Job;
use crate::background::registry::JobRecord;
use crate::common::DEFAULT_FILE_TYPE;
use crate::context::ServiceContext;

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
}

/// Queues a conversion and answers right away; the work happens on the worker.
#[post("/convert", data = "<body>")]
pub fn convert(
    context: &State<ServiceContext>,
    body: Result<Json<ConvertRequest>, json::Error<'_>>,
) -> AppResult<Json<Value>> {
    let request = match body {
        Ok(request) => request.into_inner(),
        Err(err) => {
            error!("Rejected conversion request: {:?}", err);
            return Err(AppError::bad_request("Missing or invalid JSON request body"));
        }
    };

    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
    let (bucket, key) = match (non_empty(request.bucket), non_empty(request.key)) {
        (Some(bucket), Some(key)) => (bucket, key),
        _ => {
            return Err(AppError::bad_request(
                "Missing required parameters: bucket and key",
            ));
        }
    };
    let file_type = non_empty(request.file_type).unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());

    info!("Received conversion request: {} (type: {})", key, file_type);

    let job = Job::new(bucket, key, file_type);
    let job_id = job.id;
    let message = format!("Request {} has been queued for processing", job.key);

    context.registry.insert_queued(&job);
    if let Err(err) = context.queue.submit(job) {
        context.registry.remove(&job_id);
        return Err(err.into());
    }

    Ok(Json(json!({
        "status": "queued",
        "message": message,
        "job_id": job_id,
    })))
}

#[get("/jobs/<job_id>")]
pub fn job_status(context: &State<ServiceContext>, job_id: &str) -> AppResult<Json<JobRecord>> {
    let id = Uuid::parse_str(job_id)
        .map_err(|_| AppError::not_found(format!("Unknown job id: {}", job_id)))?;
    context
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Unknown job id: {}", job_id)))
}

pub fn generate_convert_routes() -> Vec<Route> {
    routes![convert, job_status]
}
