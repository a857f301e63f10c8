pub mod catchers;
pub mod handlers;

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::{Build, Rocket};
use serde_json::json;
use std::io::Cursor;

use crate::context::ServiceContext;
use catchers::generate_catchers;
use handlers::convert::generate_convert_routes;
use handlers::system::generate_system_routes;

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: Status, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, anyhow::anyhow!(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, anyhow::anyhow!(message.into()))
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "status": "error",
            "message": outer_msg,
            "error": self.status.to_string(),
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: anyhow::Error::from(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Assembles the HTTP front door around an already constructed context.
pub fn build_rocket(context: ServiceContext) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", context.config.host.clone()))
        .merge(("port", context.config.port))
        .merge(("shutdown.ctrlc", false));

    rocket::custom(figment)
        .manage(context)
        .mount("/", generate_system_routes())
        .mount("/", generate_convert_routes())
        .register("/", generate_catchers())
}
