//! Per-session wizard state.
//!
//! Each browser session owns a [`SessionContext`] with its own scratch
//! directory. Uploads, photos and rendered documents are written there and
//! tracked; dropping the context (reset, idle expiry or shutdown) deletes them.

use crate::render::{OutputFormat, TemplateKind};
use crate::schema::{check_missing_profile_data, ProfileData};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Upload,
    Review,
    Export,
}

impl WizardStep {
    pub fn previous(&self) -> Self {
        match self {
            Self::Upload | Self::Review => Self::Upload,
            Self::Export => Self::Review,
        }
    }
}

/// The most recent export of a session.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Name offered to the browser, derived from the rendered profile.
    pub filename: String,
}

pub struct SessionContext {
    pub id: Uuid,
    pub step: WizardStep,
    pub source_filename: Option<String>,
    pub extracted_text: String,
    pub profile: Option<ProfileData>,
    pub template: TemplateKind,
    pub format: OutputFormat,
    pub anonymize: bool,
    pub last_output: Option<RenderedDocument>,
    /// Uploaded profile photo. Only ever a path inside `workdir`.
    pub photo: Option<PathBuf>,
    last_seen: Instant,
    workdir: tempfile::TempDir,
    temp_files: Vec<PathBuf>,
}

impl SessionContext {
    pub fn new(template: TemplateKind, anonymize: bool) -> std::io::Result<Self> {
        let workdir = tempfile::Builder::new().prefix("cv2profile-").tempdir()?;
        Ok(Self {
            id: Uuid::new_v4(),
            step: WizardStep::Upload,
            source_filename: None,
            extracted_text: String::new(),
            profile: None,
            template,
            format: OutputFormat::Pdf,
            anonymize,
            last_output: None,
            photo: None,
            last_seen: Instant::now(),
            workdir,
            temp_files: Vec::new(),
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// A fresh path inside the session directory, tracked for cleanup.
    pub fn temp_path(&mut self, stem: &str, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        let name = format!("{}-{}.{}", stem, Uuid::new_v4().simple(), extension);
        let path = self.workdir.path().join(name);
        self.temp_files.push(path.clone());
        path
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Delete every tracked file. Missing files are ignored.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.temp_files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {:?}: {}", path, e),
            }
        }
        if removed > 0 {
            debug!("Session {}: removed {} temp files", self.id, removed);
        }
        removed
    }

    /// Profile as it should be rendered: the session photo attached and,
    /// when requested, identity fields masked.
    pub fn render_copy(&self, profile: &ProfileData, anonymize: bool) -> ProfileData {
        let mut copy = profile.clone();
        copy.persoenliche_daten.profile_image = self
            .photo
            .as_ref()
            .filter(|p| p.starts_with(self.workdir.path()))
            .map(|p| p.to_string_lossy().into_owned());
        if anonymize {
            copy.anonymized()
        } else {
            copy
        }
    }

    pub fn back(&mut self) -> WizardStep {
        self.step = self.step.previous();
        self.step
    }

    pub fn view(&self, include_text: bool) -> SessionView {
        let missing_fields = self
            .profile
            .as_ref()
            .map(|p| {
                check_missing_profile_data(p)
                    .into_iter()
                    .map(|f| f.label().to_string())
                    .collect()
            })
            .unwrap_or_default();

        SessionView {
            id: self.id,
            step: self.step,
            source_filename: self.source_filename.clone(),
            extracted_text: include_text.then(|| self.extracted_text.clone()),
            profile: self.profile.clone(),
            missing_fields,
            template: self.template,
            format: self.format,
            anonymize: self.anonymize,
            has_photo: self.photo.is_some(),
            download_filename: self.last_output.as_ref().map(|o| o.filename.clone()),
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// What the browser sees of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub step: WizardStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub profile: Option<ProfileData>,
    pub missing_fields: Vec<String>,
    pub template: TemplateKind,
    pub format: OutputFormat,
    pub anonymize: bool,
    pub has_photo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_filename: Option<String>,
}

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, SessionContext>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, template: TemplateKind, anonymize: bool) -> std::io::Result<Uuid> {
        let session = SessionContext::new(template, anonymize)?;
        let id = session.id;
        info!("Created session {} in {:?}", id, session.workdir());
        self.inner.write().await.insert(id, session);
        Ok(id)
    }

    /// Run `f` against the session, if it exists, and mark it as active.
    pub async fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SessionContext) -> R,
    ) -> Option<R> {
        let mut sessions = self.inner.write().await;
        sessions.get_mut(&id).map(|session| {
            session.last_seen = Instant::now();
            f(session)
        })
    }

    /// Drop sessions untouched for longer than `max_idle`.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<SessionContext> = {
            let mut sessions = self.inner.write().await;
            let stale: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| s.last_seen.elapsed() > max_idle)
                .map(|(id, _)| *id)
                .collect();
            stale.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = expired.len();
        for session in &expired {
            info!("Session {} expired after {:?} idle", session.id, max_idle);
        }
        count
    }

    /// Background sweep calling [`expire_idle`](Self::expire_idle) every `every`.
    pub fn spawn_expiry(&self, max_idle: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.expire_idle(max_idle).await;
            }
        })
    }

    /// Drop a session and its temp files.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.inner.write().await.remove(&id);
        match removed {
            Some(session) => {
                info!("Reset session {} ({} temp files)", id, session.temp_files().len());
                true
            }
            None => false,
        }
    }

    /// Drop every session. Used on shutdown.
    pub async fn purge(&self) -> usize {
        let drained: Vec<_> = self.inner.write().await.drain().collect();
        let count = drained.len();
        drop(drained);
        if count > 0 {
            info!("Purged {} sessions", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
