use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use futures_util::TryStreamExt;
use sastgate_core::error::{CoreError, ValidationError};
use sastgate_core::{JobFilter, JobId, JobState, ReportFormat, ScanRequest};
use serde::Deserialize;
use std::str::FromStr;

use super::error_response;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;
// language / owner / project_name form fields
const TEXT_FIELD_LIMIT: usize = 1024;

#[derive(Deserialize)]
pub struct RepositoryScanRequest {
    pub repository_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub project_name: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

pub fn configure_sast_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/scan/upload", web::post().to(upload_scan))            // POST /api/sast/scan/upload
        .route("/scan/repository", web::post().to(repository_scan))    // POST /api/sast/scan/repository
        .route("/scans", web::get().to(list_scans))                    // GET /api/sast/scans
        .route("/scans/{id}", web::get().to(get_scan))                 // GET /api/sast/scans/{id}
        .route("/scans/{id}", web::delete().to(delete_scan))           // DELETE /api/sast/scans/{id}
        .route("/scans/{id}/report", web::get().to(export_report))     // GET /api/sast/scans/{id}/report
        .route("/languages", web::get().to(supported_languages))       // GET /api/sast/languages
        .route("/stats/summary", web::get().to(stats_summary));        // GET /api/sast/stats/summary
}

fn parse_job_id(raw: &str) -> Result<JobId, CoreError> {
    JobId::from_str(raw).map_err(|_| CoreError::NotFound(raw.to_string()))
}

fn accepted(job_id: JobId) -> HttpResponse {
    HttpResponse::Accepted().json(serde_json::json!({
        "scan_id": job_id,
        "status": JobState::Pending,
    }))
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": message.into(),
        "kind": "ValidationError",
    }))
}

async fn upload_scan(state: web::Data<AppState>, mut payload: Multipart) -> impl Responder {
    let max_archive = state.manager.config().max_archive_bytes;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut language: Option<String> = None;
    let mut owner: Option<String> = None;
    let mut project_name: Option<String> = None;

    // 解析 multipart 表单
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read multipart field: {}", e);
                return bad_request(format!("Invalid multipart payload: {}", e));
            }
        };
        let field_name = field.name().unwrap_or("").to_string();
        tracing::debug!("Processing field: {}", field_name);

        match field_name.as_str() {
            "file" => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("upload.zip")
                    .to_string();
                let limit = usize::try_from(max_archive).unwrap_or(usize::MAX);
                match field.bytes(limit).await {
                    Ok(Ok(data)) => {
                        tracing::info!("Received {} ({} bytes)", file_name, data.len());
                        file = Some((file_name, data.to_vec()));
                    }
                    Ok(Err(e)) => return bad_request(format!("Failed to read file: {}", e)),
                    Err(_) => {
                        let err = CoreError::Validation(ValidationError::ArchiveTooLarge {
                            size: max_archive.saturating_add(1),
                            limit: max_archive,
                        });
                        return error_response(&err);
                    }
                }
            }
            "language" | "owner" | "project_name" => {
                let value = match field.bytes(TEXT_FIELD_LIMIT).await {
                    Ok(Ok(data)) => String::from_utf8_lossy(&data).trim().to_string(),
                    _ => return bad_request(format!("Invalid {} field", field_name)),
                };
                match field_name.as_str() {
                    "language" => language = Some(value),
                    "owner" => owner = Some(value).filter(|v| !v.is_empty()),
                    _ => project_name = Some(value).filter(|v| !v.is_empty()),
                }
            }
            _ => {
                // drain unknown fields
                while let Ok(Some(_)) = field.try_next().await {}
            }
        }
    }

    let Some((file_name, bytes)) = file else {
        return bad_request("Missing 'file' field");
    };

    let request = ScanRequest::Archive {
        file_name,
        bytes,
        language,
        owner,
        project_name,
    };
    match state.manager.submit(request).await {
        Ok(job_id) => accepted(job_id),
        Err(e) => error_response(&e),
    }
}

async fn repository_scan(
    state: web::Data<AppState>,
    req: web::Json<RepositoryScanRequest>,
) -> impl Responder {
    let req = req.into_inner();
    let request = ScanRequest::Repository {
        url: req.repository_url,
        branch: req.branch,
        language: req.language,
        owner: req.owner,
        project_name: req.project_name,
    };
    match state.manager.submit(request).await {
        Ok(job_id) => accepted(job_id),
        Err(e) => error_response(&e),
    }
}

async fn list_scans(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    let job_state = match query.state.as_deref().map(JobState::from_str).transpose() {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };
    let filter = JobFilter {
        state: job_state,
        project_name: query
            .project_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        limit: Some(query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)),
        offset: query.offset.unwrap_or(0),
    };

    let scans = match state.manager.list(&filter).await {
        Ok(scans) => scans,
        Err(e) => return error_response(&e),
    };
    let total = match state.manager.count(&filter).await {
        Ok(total) => total,
        Err(e) => return error_response(&e),
    };
    HttpResponse::Ok().json(serde_json::json!({
        "scans": scans,
        "total": total,
        "limit": filter.limit,
        "offset": filter.offset,
    }))
}

async fn get_scan(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let result = match parse_job_id(&path) {
        Ok(job_id) => state.manager.status(job_id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(&e),
    }
}

async fn delete_scan(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let result = match parse_job_id(&path) {
        Ok(job_id) => state.manager.delete(job_id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "deleted": path.as_str() })),
        Err(e) => error_response(&e),
    }
}

async fn export_report(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ReportQuery>,
) -> impl Responder {
    let format = match query.format.as_deref().map(ReportFormat::from_str).transpose() {
        Ok(format) => format.unwrap_or_default(),
        Err(e) => return error_response(&CoreError::Validation(e)),
    };
    let result = match parse_job_id(&path) {
        Ok(job_id) => state.manager.export(job_id, format).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(report) => HttpResponse::Ok()
            .content_type(report.content_type)
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report.filename),
            ))
            .body(report.body),
        Err(e) => error_response(&e),
    }
}

async fn supported_languages(state: web::Data<AppState>) -> impl Responder {
    let languages: Vec<_> = state
        .manager
        .language_tools()
        .into_iter()
        .map(|(language, tools)| {
            serde_json::json!({
                "language": language,
                "extensions": language.extensions(),
                "tools": tools,
            })
        })
        .collect();
    HttpResponse::Ok().json(serde_json::json!({ "languages": languages }))
}

async fn stats_summary(state: web::Data<AppState>) -> impl Responder {
    match state.manager.stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => error_response(&e),
    }
}
