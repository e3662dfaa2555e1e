//! Remote OCR through the Mistral document API.
//!
//! Scanned PDFs are uploaded to the files endpoint first and referenced by id;
//! photographed résumés go inline as a data URL. The API answers with one
//! markdown document per page, which is flattened to plain lines before it
//! reaches the extraction prompt.

use super::{OcrInput, OcrProvider, OcrResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_MODEL: &str = "mistral-ocr-latest";
const PROVIDER_NAME: &str = "mistral_ocr";

pub struct MistralOcrProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl MistralOcrProvider {
    /// Requires `MISTRAL_API_KEY`; `MISTRAL_API_BASE` and `MISTRAL_OCR_MODEL`
    /// override the endpoint and model.
    pub fn from_env(client: reqwest::Client) -> anyhow::Result<Self> {
        let api_key = std::env::var("MISTRAL_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("MISTRAL_API_KEY not set"))?;
        let base_url = std::env::var("MISTRAL_API_BASE")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("MISTRAL_OCR_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }

    async fn upload_pdf(&self, filename: &str, data: &[u8]) -> anyhow::Result<String> {
        debug!("Uploading {} ({} bytes) for OCR", filename, data.len());
        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().text("purpose", "ocr").part("file", part);

        let resp = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadedFile = checked(resp, "files").await?.json().await?;
        Ok(uploaded.id)
    }
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentRef,
    include_image_base64: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentRef {
    File { file_id: String },
    ImageUrl { image_url: String },
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<PageMarkdown>,
}

#[derive(Deserialize)]
struct PageMarkdown {
    index: u32,
    markdown: String,
}

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        let document = match input {
            OcrInput::Pdf { filename, data } => DocumentRef::File {
                file_id: self.upload_pdf(filename, data).await?,
            },
            OcrInput::Image { filename, data } => DocumentRef::ImageUrl {
                image_url: data_url(filename, data),
            },
        };

        info!("Running {} on {}", self.model, input.filename());
        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OcrRequest {
                model: &self.model,
                document,
                include_image_base64: false,
            })
            .send()
            .await?;
        let response: OcrResponse = checked(resp, "ocr").await?.json().await?;

        Ok(page_texts(response))
    }
}

/// Fail with the response body when the API did not answer 2xx.
async fn checked(resp: reqwest::Response, endpoint: &str) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("Mistral {} endpoint returned {}: {}", endpoint, status, body)
}

/// Pages in index order, markdown reduced to text lines.
fn page_texts(mut response: OcrResponse) -> OcrResult {
    response.pages.sort_by_key(|p| p.index);
    let texts = response
        .pages
        .into_iter()
        .map(|p| plain_text(&p.markdown))
        .collect();
    OcrResult::from_pages(PROVIDER_NAME, texts)
}

/// Drop embedded image references and heading/emphasis markers; tables keep
/// their cells separated by ` | `.
fn plain_text(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|line| !line.trim_start().starts_with("!["))
        .map(|line| {
            let line = line.trim_start_matches('#').trim();
            if line.starts_with('|') {
                if line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ')) {
                    return String::new();
                }
                line.trim_matches('|')
                    .split('|')
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join(" | ")
            } else {
                line.replace("**", "")
            }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn data_url(filename: &str, data: &[u8]) -> String {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let mime = match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    };
    format!("data:{};base64,{}", mime, BASE64.encode(data))
}
