//! Local OCR through the `tesseract` CLI, with `pdftoppm` rendering scanned PDFs
//! to page images first.

use super::{default_workers, run_per_page, OcrInput, OcrProvider, OcrResult};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

const RENDER_DPI: u32 = 300;

pub struct TesseractProvider {
    language: String,
    max_workers: usize,
}

impl TesseractProvider {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            max_workers: default_workers(),
        }
    }

    /// Check whether both `tesseract` and `pdftoppm` can be spawned.
    pub async fn is_available() -> bool {
        let tesseract = Command::new("tesseract").arg("--version").output().await.is_ok();
        let pdftoppm = Command::new("pdftoppm").arg("-v").output().await.is_ok();
        if !tesseract {
            debug!("tesseract not found - install tesseract-ocr for OCR support");
        }
        if !pdftoppm {
            debug!("pdftoppm not found - install poppler-utils for scanned PDF support");
        }
        tesseract && pdftoppm
    }

    async fn ocr_pdf(&self, filename: &str, data: &[u8]) -> Result<OcrResult> {
        let work_dir = tempfile::tempdir().context("Failed to create OCR work dir")?;
        let pdf_path = work_dir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, data).await?;

        let images = render_pages(&pdf_path, work_dir.path()).await?;
        info!(
            "TesseractProvider: rendered {} pages of {}, running OCR with {} workers",
            images.len(),
            filename,
            self.max_workers
        );

        let language = self.language.clone();
        let texts = run_per_page(images, self.max_workers, move |_, image| {
            let language = language.clone();
            async move { run_tesseract(&image, &language).await }
        })
        .await;

        Ok(OcrResult::from_pages("tesseract", texts))
    }

    async fn ocr_image(&self, filename: &str, data: &[u8]) -> Result<OcrResult> {
        let work_dir = tempfile::tempdir().context("Failed to create OCR work dir")?;
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_lowercase();
        let raw_path = work_dir.path().join(format!("input.{}", extension));
        tokio::fs::write(&raw_path, data).await?;

        let prepared = work_dir.path().join("prepared.png");
        let source = raw_path.clone();
        let target = prepared.clone();
        let image_path = match tokio::task::spawn_blocking(move || preprocess_image(&source, &target))
            .await?
        {
            Ok(()) => prepared,
            Err(e) => {
                warn!("Image preprocessing failed, using original: {:#}", e);
                raw_path
            }
        };

        let text = run_tesseract(&image_path, &self.language).await?;
        Ok(OcrResult::from_pages("tesseract", vec![text]))
    }
}

#[async_trait::async_trait]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn process(&self, input: &OcrInput) -> Result<OcrResult> {
        match input {
            OcrInput::Pdf { filename, data } => self.ocr_pdf(filename, data).await,
            OcrInput::Image { filename, data } => self.ocr_image(filename, data).await,
        }
    }
}

/// Render every PDF page to a PNG and return the image paths in page order.
async fn render_pages(pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let prefix = out_dir.join("page");
    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(RENDER_DPI.to_string())
        .arg(pdf_path)
        .arg(&prefix)
        .output()
        .await
        .context("Failed to run pdftoppm")?;

    if !output.status.success() {
        anyhow::bail!("pdftoppm failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_page = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("page") && n.ends_with(".png"))
            .unwrap_or(false);
        if is_page {
            images.push(path);
        }
    }
    images.sort_by_key(|p| page_index(p));

    if images.is_empty() {
        anyhow::bail!("pdftoppm produced no images");
    }
    Ok(images)
}

/// Page number from a `page-N.png` / `page-0N.png` file name.
fn page_index(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

async fn run_tesseract(image: &Path, language: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(image)
        .arg("stdout")
        .arg("-l")
        .arg(language)
        .arg("--psm")
        .arg("1")
        .arg("--oem")
        .arg("3")
        .output()
        .await
        .with_context(|| format!("Failed to run tesseract on {:?}", image))?;

    if !output.status.success() {
        anyhow::bail!(
            "tesseract failed on {:?}: {}",
            image,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Grayscale conversion before OCR.
fn preprocess_image(source: &Path, target: &Path) -> Result<()> {
    let img = image::open(source).with_context(|| format!("Failed to decode {:?}", source))?;
    img.grayscale()
        .save(target)
        .with_context(|| format!("Failed to write {:?}", target))?;
    Ok(())
}
