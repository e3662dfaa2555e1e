//! CV2Profile - turns uploaded résumés into branded candidate profiles.

mod cache;
mod config;
mod document;
mod error;
mod extractor;
mod llm_client;
mod ocr;
mod processor;
mod render;
mod schema;
mod session;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use cache::ProfileCache;
use config::{Settings, SettingsStore};
use document::{DocumentExtractor, DocumentKind};
use error::AppError;
use extractor::ProfileExtractor;
use llm_client::{ChatModel, LlmClient};
use ocr::tesseract::TesseractProvider;
use ocr::OcrProvider;
use processor::ProfileProcessor;
use render::{download_filename, OutputFormat, ProfileRenderer, TemplateKind};
use schema::ProfileData;
use serde::Deserialize;
use session::{RenderedDocument, SessionStore, SessionView, WizardStep};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const REDACTED: &str = "********";
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Where the LLM and OCR backends come from.
#[derive(Clone)]
enum Backends {
    /// Built per request from the current settings.
    FromSettings { http: reqwest::Client },
    #[cfg_attr(not(test), allow(dead_code))]
    Fixed {
        model: Arc<dyn ChatModel>,
        ocr: Arc<dyn OcrProvider>,
    },
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: SettingsStore,
    sessions: SessionStore,
    cache: ProfileCache,
    backends: Backends,
}

impl AppState {
    fn processor(&self, settings: &Settings) -> ProfileProcessor {
        let (model, ocr): (Arc<dyn ChatModel>, Arc<dyn OcrProvider>) = match &self.backends {
            Backends::FromSettings { http } => {
                let api_key = self.settings.api_key().unwrap_or_default();
                let client = LlmClient::new(api_key, &settings.api_base_url, &settings.model)
                    .with_temperature(settings.temperature);
                let ocr = ocr::provider_from_settings(
                    &settings.ocr_provider,
                    &settings.ocr_language,
                    http.clone(),
                );
                (Arc::new(client), ocr)
            }
            Backends::Fixed { model, ocr } => (model.clone(), ocr.clone()),
        };

        ProfileProcessor::new(
            DocumentExtractor::new(ocr),
            ProfileExtractor::new(model, settings.branding.default_contact.clone()),
            self.cache.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cv2profile=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = SettingsStore::load_default()?;
    let current = settings.get();
    if settings.api_key().is_none() {
        warn!("No OpenAI API key configured, extraction will return the placeholder profile");
    }
    if current.ocr_provider == "tesseract" && !TesseractProvider::is_available().await {
        warn!("tesseract/pdftoppm not available, scanned documents will yield no text");
    }

    let cache = ProfileCache::new(current.cache_root());
    info!("Extraction cache at {:?}", cache.root());

    let state = AppState {
        settings,
        sessions: SessionStore::new(),
        cache,
        backends: Backends::FromSettings {
            http: reqwest::Client::new(),
        },
    };
    let sessions = state.sessions.clone();
    let idle_ttl = current.session_idle_ttl();
    sessions.spawn_expiry(idle_ttl, SESSION_SWEEP_INTERVAL);
    info!("Sessions expire after {:?} idle", idle_ttl);

    let listener = tokio::net::TcpListener::bind(&current.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", current.bind_addr))?;
    info!("Server listening on http://{}", current.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.purge().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down, removing session files");
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/templates", get(list_templates))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/settings/:key", put(update_setting))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(reset_session))
        .route("/sessions/:id/upload", post(upload_document))
        .route("/sessions/:id/profile", put(update_profile))
        .route("/sessions/:id/photo", post(upload_photo))
        .route("/sessions/:id/export", post(export_profile))
        .route("/sessions/:id/download", get(download))
        .route("/sessions/:id/back", post(step_back))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn health() -> &'static str {
    "ok"
}

async fn list_templates() -> Json<Vec<&'static str>> {
    Json(TemplateKind::ALL.iter().map(|t| t.name()).collect())
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get().redacted())
}

/// Merge a partial settings object. A redacted API key sent back unchanged is ignored.
async fn update_settings(
    State(state): State<AppState>,
    Json(mut patch): Json<serde_json::Value>,
) -> Result<Json<Settings>, AppError> {
    if let Some(obj) = patch.as_object_mut() {
        if obj.get("openai_api_key").and_then(|v| v.as_str()) == Some(REDACTED) {
            obj.remove("openai_api_key");
        }
    }
    let updated = state
        .settings
        .update(patch)
        .map_err(|e| AppError::BadRequest(format!("{:#}", e)))?;
    info!("Settings updated");
    Ok(Json(updated.redacted()))
}

async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<Settings>, AppError> {
    let updated = state
        .settings
        .update_setting(&key, value)
        .map_err(|e| AppError::BadRequest(format!("{:#}", e)))?;
    info!("Setting '{}' updated", key);
    Ok(Json(updated.redacted()))
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let settings = state.settings.get();
    let template = TemplateKind::parse(&settings.default_template).unwrap_or_else(|| {
        warn!(
            "Unknown default template '{}', using professional",
            settings.default_template
        );
        TemplateKind::Professional
    });

    let id = state
        .sessions
        .create(template, settings.anonymize_by_default)
        .await
        .context("Failed to create session directory")?;
    debug!("{} active sessions", state.sessions.len().await);
    let view = session_view(&state, id, settings.show_extracted_text).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn session_view(
    state: &AppState,
    id: Uuid,
    include_text: bool,
) -> Result<SessionView, AppError> {
    state
        .sessions
        .with_session(id, |s| s.view(include_text))
        .await
        .ok_or(AppError::SessionNotFound(id))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let include_text = state.settings.get().show_extracted_text;
    Ok(Json(session_view(&state, id, include_text).await?))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(id))
    }
}

/// First multipart field named `file`.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok((filename, data.to_vec()));
    }
    Err(AppError::BadRequest("Missing multipart field 'file'".to_string()))
}

/// `.ext` of a filename, or the whole name when it has none.
fn dotted_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_else(|| filename.to_string())
}

async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, AppError> {
    let (filename, data) = read_file_field(&mut multipart).await?;
    let extension = dotted_extension(&filename);
    DocumentKind::from_extension(&extension)?;

    let path = state
        .sessions
        .with_session(id, |s| match s.step {
            WizardStep::Export => Err(AppError::WrongStep(
                "Go back before uploading another document".to_string(),
            )),
            _ => Ok(s.temp_path("upload", &extension)),
        })
        .await
        .ok_or(AppError::SessionNotFound(id))??;
    tokio::fs::write(&path, &data)
        .await
        .context("Failed to store upload")?;
    info!("Session {}: processing {} ({} bytes)", id, filename, data.len());

    let settings = state.settings.get();
    let (text, profile) = state
        .processor(&settings)
        .process_and_extract(&path, &extension)
        .await?;

    let view = state
        .sessions
        .with_session(id, move |s| {
            s.source_filename = Some(filename);
            s.extracted_text = text;
            s.profile = Some(profile);
            s.photo = None;
            s.last_output = None;
            s.step = WizardStep::Review;
            s.view(settings.show_extracted_text)
        })
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    Ok(Json(view))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(profile): Json<ProfileData>,
) -> Result<Json<SessionView>, AppError> {
    let include_text = state.settings.get().show_extracted_text;
    let view = state
        .sessions
        .with_session(id, |s| {
            if s.step != WizardStep::Review {
                return Err(AppError::WrongStep(
                    "The profile can only be edited during review".to_string(),
                ));
            }
            s.profile = Some(profile);
            Ok(s.view(include_text))
        })
        .await
        .ok_or(AppError::SessionNotFound(id))??;
    Ok(Json(view))
}

async fn upload_photo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, AppError> {
    let (filename, data) = read_file_field(&mut multipart).await?;
    let extension = dotted_extension(&filename);
    if DocumentKind::from_extension(&extension)? != DocumentKind::Image {
        return Err(AppError::BadRequest(format!(
            "Profile photos must be JPG or PNG, got {}",
            extension
        )));
    }
    if let Err(e) = image::load_from_memory(&data) {
        return Err(AppError::BadRequest(format!("Unreadable image: {}", e)));
    }

    let path = state
        .sessions
        .with_session(id, |s| {
            if s.step != WizardStep::Review || s.profile.is_none() {
                return Err(AppError::WrongStep(
                    "Upload a résumé before adding a photo".to_string(),
                ));
            }
            Ok(s.temp_path("photo", &extension))
        })
        .await
        .ok_or(AppError::SessionNotFound(id))??;
    tokio::fs::write(&path, &data)
        .await
        .context("Failed to store photo")?;

    let include_text = state.settings.get().show_extracted_text;
    let view = state
        .sessions
        .with_session(id, |s| {
            s.photo = Some(path);
            s.view(include_text)
        })
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
struct ExportRequest {
    template: Option<String>,
    format: Option<String>,
    anonymize: Option<bool>,
}

async fn export_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<SessionView>, AppError> {
    let template = request
        .template
        .as_deref()
        .map(|t| TemplateKind::parse(t).ok_or_else(|| AppError::BadRequest(format!("Unknown template: {}", t))))
        .transpose()?;
    let format = request
        .format
        .as_deref()
        .map(|f| OutputFormat::parse(f).ok_or_else(|| AppError::BadRequest(format!("Unknown format: {}", f))))
        .transpose()?;

    let (profile, template, format, anonymize, output_path) = state
        .sessions
        .with_session(id, |s| {
            let anonymize = request.anonymize.unwrap_or(s.anonymize);
            let profile = match (&s.step, &s.profile) {
                (WizardStep::Review | WizardStep::Export, Some(profile)) => {
                    s.render_copy(profile, anonymize)
                }
                _ => {
                    return Err(AppError::WrongStep(
                        "Upload and review a résumé before exporting".to_string(),
                    ))
                }
            };
            let template = template.unwrap_or(s.template);
            let format = format.unwrap_or(s.format);
            let output_path = s.temp_path("profile", format.extension());
            Ok((profile, template, format, anonymize, output_path))
        })
        .await
        .ok_or(AppError::SessionNotFound(id))??;

    let filename = download_filename(&profile.persoenliche_daten.name, format);
    let renderer = ProfileRenderer::new(state.settings.get().branding);
    let path = tokio::task::spawn_blocking(move || {
        renderer.generate_profile(&profile, &output_path, template, format)
    })
    .await
    .context("Render task failed")??;

    let include_text = state.settings.get().show_extracted_text;
    let view = state
        .sessions
        .with_session(id, move |s| {
            s.template = template;
            s.format = format;
            s.anonymize = anonymize;
            s.last_output = Some(RenderedDocument {
                path,
                format,
                filename,
            });
            s.step = WizardStep::Export;
            s.view(include_text)
        })
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    Ok(Json(view))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let document = state
        .sessions
        .with_session(id, |s| match (&s.step, &s.last_output) {
            (WizardStep::Export, Some(document)) => Ok(document.clone()),
            _ => Err(AppError::WrongStep("No exported document yet".to_string())),
        })
        .await
        .ok_or(AppError::SessionNotFound(id))??;

    let bytes = tokio::fs::read(&document.path)
        .await
        .with_context(|| format!("Failed to read {:?}", document.path))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(document.format.mime_type()),
            ),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&document.filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn step_back(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let include_text = state.settings.get().show_extracted_text;
    let view = state
        .sessions
        .with_session(id, |s| {
            s.back();
            s.view(include_text)
        })
        .await
        .ok_or(AppError::SessionNotFound(id))?;
    Ok(Json(view))
}

/// `attachment` header with an ASCII fallback name and the UTF-8 name per RFC 5987.
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    let encoded: String = filename
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"._-".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii, encoded
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
