use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{error, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::imaging;
use crate::models::*;
use crate::service::{FeedService, ServiceError, LATEST_COMMENTS_LIMIT};

/// Caption and user id fields are small; anything bigger is a bad request
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub service: Arc<FeedService>,
    pub config: Config,
}

impl AppState {
    pub fn new(service: Arc<FeedService>, config: Config) -> Self {
        Self { service, config }
    }
}

fn bad_request(msg: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg))
}

fn internal_error(msg: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(ApiResponse::<()>::error(msg))
}

/// Not-found kinds are the client's problem, anything else is ours
fn service_error_response(err: &ServiceError, fallback: &str) -> HttpResponse {
    match err {
        ServiceError::PostNotFound(_) => bad_request("Post not found"),
        ServiceError::ImageNotFound(_) => bad_request("Image not found"),
        ServiceError::CommentNotFound(_) => bad_request("Comment not found"),
        ServiceError::Unauthorized => {
            HttpResponse::Unauthorized().json(ApiResponse::<()>::error("Unauthorized"))
        }
        ServiceError::ImageSave(_) | ServiceError::PostSave(_) | ServiceError::Store(_) => {
            log::error!("{}: {}", fallback, err);
            internal_error(fallback)
        }
    }
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Upload Handling ====================

#[derive(Debug, Error)]
enum UploadError {
    #[error("field exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed multipart body: {0}")]
    Read(#[from] MultipartError),
    #[error("{0} field is not valid UTF-8")]
    NotUtf8(&'static str),
}

fn text_field(name: &'static str, data: Vec<u8>) -> Result<String, UploadError> {
    String::from_utf8(data).map_err(|_| UploadError::NotUtf8(name))
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, UploadError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if data.len() + chunk.len() > limit {
            return Err(UploadError::TooLarge(limit));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

#[derive(Default)]
struct PostUpload {
    caption: Option<String>,
    user_id: Option<String>,
    image: Option<Vec<u8>>,
}

async fn read_post_upload(
    payload: &mut Multipart,
    max_image_bytes: usize,
) -> Result<PostUpload, UploadError> {
    let mut upload = PostUpload::default();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field.name().unwrap_or_default().to_string();
        let limit = if name == "image" {
            max_image_bytes
        } else {
            MAX_TEXT_FIELD_BYTES
        };
        let data = read_field(&mut field, limit).await?;

        match name.as_str() {
            "caption" => upload.caption = Some(text_field("caption", data)?),
            "user_id" => upload.user_id = Some(text_field("user_id", data)?),
            "image" => upload.image = Some(data),
            other => log::debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(upload)
}

// ==================== Posts Endpoints ====================

pub async fn create_post(state: web::Data<AppState>, mut payload: Multipart) -> impl Responder {
    let upload = match read_post_upload(&mut payload, state.config.max_upload_bytes).await {
        Ok(u) => u,
        Err(UploadError::TooLarge(limit)) => {
            return bad_request(&format!("File size exceeds limit ({} bytes)", limit));
        }
        Err(UploadError::NotUtf8("caption")) => {
            return bad_request("Caption must be valid UTF-8");
        }
        Err(UploadError::NotUtf8(field)) => {
            return bad_request(&format!("{} must be valid UTF-8", field));
        }
        Err(e) => {
            log::warn!("Rejected post upload: {}", e);
            return bad_request("Malformed multipart body");
        }
    };

    let caption = match upload.caption {
        Some(c) if !c.trim().is_empty() => c,
        _ => return bad_request("Caption is required"),
    };
    let image_bytes = match upload.image {
        Some(data) if !data.is_empty() => data,
        _ => return bad_request("Image file is required"),
    };
    let author_id = upload
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| state.config.default_author_id.clone());

    let image = match web::block(move || imaging::decode_upload(image_bytes)).await {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            log::warn!("Rejected image upload: {}", e);
            return bad_request("Error processing image file");
        }
        Err(e) => {
            log::error!("Image decode task failed: {}", e);
            return internal_error("Error processing image file");
        }
    };

    match state.service.create_post(image, &caption, &author_id) {
        Ok(post_id) => HttpResponse::Created().json(serde_json::json!({ "post_Id": post_id })),
        Err(e) => service_error_response(&e, "Error creating post"),
    }
}

pub async fn get_post(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let image = match state.service.get_post_by_id(&id) {
        Ok((image, _)) => image,
        Err(e) => return service_error_response(&e, "Error getting post"),
    };

    match web::block(move || imaging::encode_png(&image)).await {
        Ok(Ok(png)) => HttpResponse::Ok().content_type("image/png").body(png),
        Ok(Err(e)) => {
            log::error!("Failed to encode image for post {}: {}", id, e);
            bad_request("Failed to encode image")
        }
        Err(e) => {
            log::error!("Image encode task failed: {}", e);
            internal_error("Failed to encode image")
        }
    }
}

pub async fn list_posts(state: web::Data<AppState>) -> impl Responder {
    match state.service.list_posts() {
        Ok(posts) => HttpResponse::Ok().json(serde_json::json!({ "posts": posts })),
        Err(e) => service_error_response(&e, "Failed to get posts"),
    }
}

// ==================== Comments Endpoints ====================

pub async fn list_post_comments(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListCommentsQuery>,
) -> impl Responder {
    let post_id = path.into_inner();
    let limit = query.limit.unwrap_or(LATEST_COMMENTS_LIMIT);

    match state.service.get_post_comments(&post_id, limit) {
        Ok(comments) => HttpResponse::Ok().json(serde_json::json!({ "comments": comments })),
        Err(e) => service_error_response(&e, "Failed to get comments"),
    }
}

pub async fn create_comment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateCommentRequest>,
) -> impl Responder {
    let post_id = path.into_inner();
    if body.comment.trim().is_empty() || body.user_id.trim().is_empty() {
        return bad_request("Check input parameters again");
    }

    match state
        .service
        .comment_on_post(&post_id, &body.comment, &body.user_id)
    {
        Ok(comment_id) => {
            HttpResponse::Created().json(serde_json::json!({ "comment_id": comment_id }))
        }
        Err(e) => service_error_response(&e, "Error creating comment"),
    }
}

pub async fn delete_comment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<DeleteCommentRequest>,
) -> impl Responder {
    let id = path.into_inner();
    if body.author_id.trim().is_empty() {
        return bad_request("author_id is required");
    }

    match state.service.delete_comment(&id, &body.author_id) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "comment_deleted": id
        }))),
        Err(e) => service_error_response(&e, "Error deleting comment"),
    }
}

// ==================== Route Configuration ====================

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        log::debug!("Rejected JSON body: {}", err);
        let response = bad_request("Invalid JSON body");
        error::InternalError::from_response(err, response).into()
    })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req: &HttpRequest| {
        log::debug!("Rejected query string: {}", err);
        let response = bad_request("Invalid query string");
        error::InternalError::from_response(err, response).into()
    })
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        // Health check
        .route("/health", web::get().to(health))

        // Posts
        .route("/api/posts", web::get().to(list_posts))
        .route("/api/posts", web::post().to(create_post))
        .route("/api/posts/{id}", web::get().to(get_post))

        // Comments
        .route("/api/posts/{id}/comments", web::get().to(list_post_comments))
        .route("/api/posts/{id}/comments", web::post().to(create_comment))
        .route("/api/comments/{id}", web::delete().to(delete_comment));
}
