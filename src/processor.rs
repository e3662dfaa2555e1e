//! Two-stage pipeline (raw text, then structured profile) behind the file-hash cache.

use crate::cache::{cache_key, CacheEntry, ProfileCache};
use crate::document::{DocumentExtractor, DocumentKind, ExtractError};
use crate::extractor::ProfileExtractor;
use crate::schema::ProfileData;
use std::path::Path;
use tracing::{info, warn};

pub struct ProfileProcessor {
    documents: DocumentExtractor,
    extractor: ProfileExtractor,
    cache: ProfileCache,
}

impl ProfileProcessor {
    pub fn new(documents: DocumentExtractor, extractor: ProfileExtractor, cache: ProfileCache) -> Self {
        Self {
            documents,
            extractor,
            cache,
        }
    }

    /// Raw text and structured profile for the file at `path`.
    ///
    /// A cached entry for identical bytes is returned verbatim. Placeholder
    /// profiles are not cached, so a later upload of the same file gets
    /// another extraction attempt.
    pub async fn process_and_extract(
        &self,
        path: &Path,
        extension: &str,
    ) -> Result<(String, ProfileData), ExtractError> {
        DocumentKind::from_extension(extension)?;
        let data = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let key = cache_key(&data);
        drop(data);

        let _guard = self.cache.lock_key(&key).await;
        if let Some(entry) = self.cache.load(&key).await {
            info!("Using cached extraction for {}", key);
            return Ok((entry.extracted_text, entry.profile_data));
        }

        let text = self.documents.extract(path, extension).await?;
        let document_type = extension.trim_start_matches('.').to_lowercase();
        let profile = self.extractor.extract_profile_data(&text, &document_type).await;

        if profile.is_placeholder() {
            warn!("Not caching placeholder profile for {}", key);
        } else {
            let entry = CacheEntry {
                extracted_text: text,
                profile_data: profile,
            };
            if let Err(e) = self.cache.store(&key, &entry).await {
                warn!("Cache write failed: {:#}", e);
            }
            return Ok((entry.extracted_text, entry.profile_data));
        }

        Ok((text, profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::FixedOcr;
    use crate::extractor::tests::{ScriptedModel, VALID_REPLY};
    use crate::schema::Contact;
    use docx_rs::{Docx, Paragraph, Run};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn docx_bytes(text: &str) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)))
            .build()
            .pack(&mut cursor)
            .unwrap();
        cursor.into_inner()
    }

    fn processor(model: Arc<ScriptedModel>, cache_dir: &Path) -> ProfileProcessor {
        ProfileProcessor::new(
            DocumentExtractor::new(Arc::new(FixedOcr::new(""))),
            ProfileExtractor::new(model, Contact::default()),
            ProfileCache::new(cache_dir),
        )
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.docx");
        std::fs::write(&path, docx_bytes("Erika Musterfrau, Köln")).unwrap();

        let model = Arc::new(ScriptedModel::always(VALID_REPLY));
        let processor = processor(model.clone(), &dir.path().join("cache"));

        let (text, profile) = processor.process_and_extract(&path, ".docx").await.unwrap();
        assert_eq!(text, "Erika Musterfrau, Köln");
        assert_eq!(profile.persoenliche_daten.name, "Erika Musterfrau");

        let (text2, profile2) = processor.process_and_extract(&path, ".docx").await.unwrap();
        assert_eq!(text2, text);
        assert_eq!(profile2.persoenliche_daten.name, "Erika Musterfrau");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_extract_once() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = docx_bytes("Erika Musterfrau, Köln");
        let first_path = dir.path().join("a.docx");
        let second_path = dir.path().join("b.docx");
        std::fs::write(&first_path, &bytes).unwrap();
        std::fs::write(&second_path, &bytes).unwrap();

        let model = Arc::new(ScriptedModel::always(VALID_REPLY));
        let processor = processor(model.clone(), &dir.path().join("cache"));

        let (first, second) = tokio::join!(
            processor.process_and_extract(&first_path, "docx"),
            processor.process_and_extract(&second_path, "docx"),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second);
        assert_eq!(first.1.persoenliche_daten.name, "Erika Musterfrau");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_file_misses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.docx");
        let model = Arc::new(ScriptedModel::always(VALID_REPLY));
        let processor = processor(model.clone(), &dir.path().join("cache"));

        std::fs::write(&path, docx_bytes("Version 1")).unwrap();
        processor.process_and_extract(&path, "docx").await.unwrap();
        std::fs::write(&path, docx_bytes("Version 2")).unwrap();
        let (text, _) = processor.process_and_extract(&path, "docx").await.unwrap();

        assert_eq!(text, "Version 2");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_placeholder_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.docx");
        std::fs::write(&path, docx_bytes("unlesbar")).unwrap();

        let model = Arc::new(ScriptedModel::always("kein JSON"));
        let processor = processor(model.clone(), &dir.path().join("cache"));

        let (_, first) = processor.process_and_extract(&path, "docx").await.unwrap();
        assert!(first.is_placeholder());
        processor.process_and_extract(&path, "docx").await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.odt");
        std::fs::write(&path, b"x").unwrap();

        let model = Arc::new(ScriptedModel::always(VALID_REPLY));
        let err = processor(model.clone(), dir.path())
            .process_and_extract(&path, ".odt")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedExtension(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
