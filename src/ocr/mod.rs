//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait and unified types so the local Tesseract
//! backend and the Mistral OCR API can be swapped via settings.

pub mod mistral;
pub mod tesseract;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Per-page OCR output (always 1-indexed).
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub page_num: u32,
    pub text: String,
}

/// Unified OCR result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    pub pages: Vec<OcrPage>,
    pub total_pages: u32,
    pub provider_name: String,
}

impl OcrResult {
    /// Build a result from page texts in page order.
    pub fn from_pages(provider_name: &str, texts: Vec<String>) -> Self {
        let text = texts.join("\n");
        let pages: Vec<OcrPage> = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| OcrPage {
                page_num: i as u32 + 1,
                text,
            })
            .collect();

        Self {
            text,
            total_pages: pages.len() as u32,
            pages,
            provider_name: provider_name.to_string(),
        }
    }

    /// 1-indexed numbers of pages that produced no text.
    pub fn blank_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.text.trim().is_empty())
            .map(|p| p.page_num)
            .collect()
    }
}

/// Input to an OCR provider: a scanned PDF or a single image.
pub enum OcrInput {
    Pdf { filename: String, data: Vec<u8> },
    Image { filename: String, data: Vec<u8> },
}

impl OcrInput {
    pub fn filename(&self) -> &str {
        match self {
            Self::Pdf { filename, .. } | Self::Image { filename, .. } => filename,
        }
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult>;
}

/// Known provider identifiers used for settings lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    Tesseract,
    MistralOcr,
}

impl OcrProviderKind {
    /// Parse a settings string into a provider kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tesseract" => Some(Self::Tesseract),
            "mistral_ocr" => Some(Self::MistralOcr),
            _ => None,
        }
    }
}

/// Build the provider named in settings, falling back to Tesseract when the
/// remote provider is not configured.
pub fn provider_from_settings(
    kind: &str,
    language: &str,
    client: reqwest::Client,
) -> Arc<dyn OcrProvider> {
    match OcrProviderKind::from_str(kind) {
        Some(OcrProviderKind::MistralOcr) => match mistral::MistralOcrProvider::from_env(client) {
            Ok(provider) => return Arc::new(provider),
            Err(e) => warn!("Mistral OCR unavailable ({}), using tesseract", e),
        },
        Some(OcrProviderKind::Tesseract) => {}
        None => warn!("Unknown OCR provider '{}', using tesseract", kind),
    }
    Arc::new(tesseract::TesseractProvider::new(language))
}

/// Run one task per page with at most `max_workers` in flight.
///
/// Results land in a pre-sized vector by page index; a failed or panicked page
/// yields an empty string.
pub async fn run_per_page<T, F, Fut>(items: Vec<T>, max_workers: usize, f: F) -> Vec<String>
where
    T: Send + 'static,
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    let mut results = vec![String::new(); items.len()];
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let fut = f(idx, item);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (idx, fut.await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(text))) => results[idx] = text,
            Ok((idx, Err(e))) => warn!("OCR failed for page {}: {:#}", idx + 1, e),
            Err(e) => warn!("OCR task aborted: {}", e),
        }
    }

    results
}

/// Worker count for page-parallel OCR.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_per_page_keeps_page_order() {
        let pages = vec![30u64, 10, 20];
        let texts = run_per_page(pages, 2, |idx, delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("page {}", idx + 1))
        })
        .await;
        assert_eq!(texts, vec!["page 1", "page 2", "page 3"]);
    }

    #[tokio::test]
    async fn test_run_per_page_skips_failures() {
        let texts = run_per_page(vec![1, 2, 3], 4, |_, n| async move {
            if n == 2 {
                anyhow::bail!("unreadable");
            }
            Ok(n.to_string())
        })
        .await;
        assert_eq!(texts, vec!["1", "", "3"]);
    }

    #[test]
    fn test_result_from_pages() {
        let result = OcrResult::from_pages("tesseract", vec!["a".into(), "b".into()]);
        assert_eq!(result.text, "a\nb");
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.pages[1].page_num, 2);
    }

    #[test]
    fn test_blank_pages() {
        let result = OcrResult::from_pages(
            "tesseract",
            vec!["Lebenslauf".into(), " \n".into(), "Zeugnisse".into(), String::new()],
        );
        assert_eq!(result.blank_pages(), vec![2, 4]);
        assert!(OcrResult::from_pages("tesseract", vec!["a".into()])
            .blank_pages()
            .is_empty());
    }

    #[test]
    fn test_provider_kind() {
        assert_eq!(OcrProviderKind::from_str("tesseract"), Some(OcrProviderKind::Tesseract));
        assert_eq!(OcrProviderKind::from_str("mistral_ocr"), Some(OcrProviderKind::MistralOcr));
        assert_eq!(OcrProviderKind::from_str("docling"), None);
    }
}
