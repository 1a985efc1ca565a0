pub mod conversations;
pub mod health;
pub mod messages;
pub mod stream;

use actix_web::HttpResponse;
use pagetalk_core::ChatError;

/// Map domain errors onto status codes: missing things are 404, refused
/// writes are 412, corrupted pointers are 500, provider trouble is 502.
pub fn error_response(error: &ChatError) -> HttpResponse {
    let body = serde_json::json!({ "error": error.to_string() });
    match error {
        ChatError::NotFound(_) => HttpResponse::NotFound().json(body),
        ChatError::PreconditionFailed(_) => HttpResponse::PreconditionFailed().json(body),
        ChatError::DataIntegrity(_) => HttpResponse::InternalServerError().json(body),
        ChatError::Upstream(_) => HttpResponse::BadGateway().json(body),
    }
}
