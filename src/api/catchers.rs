use rocket::Catcher;
use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::Json;
use serde_json::{Value, json};

fn error_body(message: &str, req: &Request<'_>, status: Status) -> Json<Value> {
    Json(json!({
        "status": "error",
        "message": message,
        "error": format!("{} {}: {}", req.method(), req.uri(), status),
    }))
}

#[catch(404)]
pub fn not_found(req: &Request<'_>) -> Json<Value> {
    error_body("The requested resource does not exist", req, Status::NotFound)
}

#[catch(400)]
pub fn bad_request(req: &Request<'_>) -> Json<Value> {
    error_body("Invalid request", req, Status::BadRequest)
}

#[catch(500)]
pub fn internal_error(req: &Request<'_>) -> Json<Value> {
    error_body("Internal server error", req, Status::InternalServerError)
}

#[catch(default)]
pub fn default_catcher(status: Status, req: &Request<'_>) -> (Status, Json<Value>) {
    (status, error_body(status.reason_lossy(), req, status))
}

pub fn generate_catchers() -> Vec<Catcher> {
    catchers![not_found, bad_request, internal_error, default_catcher]
}
