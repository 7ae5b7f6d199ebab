use actix_web::{web, HttpResponse, Scope};
use sastgate_core::error::CoreError;

pub mod scans;

pub fn create_api_router() -> Scope {
    web::scope("/api").service(sast_routes())
}

fn sast_routes() -> Scope {
    web::scope("/sast").configure(scans::configure_sast_routes)
}

/// Maps an engine error onto a status code with a JSON body.
pub fn error_response(e: &CoreError) -> HttpResponse {
    let body = serde_json::json!({
        "error": e.to_string(),
        "kind": e.kind(),
    });
    match e {
        CoreError::Validation(_) => HttpResponse::BadRequest().json(body),
        CoreError::NotFound(_) => HttpResponse::NotFound().json(body),
        CoreError::JobNotReady { .. } => HttpResponse::Conflict().json(body),
        CoreError::NotImplemented(_) => HttpResponse::NotImplemented().json(body),
        _ => {
            tracing::error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}
