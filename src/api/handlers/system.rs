use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Route, State, get};
use serde_json::{Value, json};

use crate::common::{SERVICE_NAME, SERVICE_VERSION};
use crate::context::ServiceContext;

#[get("/")]
pub fn index(context: &State<ServiceContext>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "endpoints": {
            "convert": "/convert (POST)",
            "health": "/health (GET)",
            "jobs": "/jobs/<job_id> (GET)",
        },
        "queue_size": context.queue.len(),
        "system_info": &*context.environment,
    }))
}

#[get("/health")]
pub fn health(context: &State<ServiceContext>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Service is running normally",
        "system_info": &*context.environment,
    }))
}

#[get("/favicon.ico")]
pub fn favicon() -> Status {
    Status::NoContent
}

pub fn generate_system_routes() -> Vec<Route> {
    routes![index, health, favicon]
}
