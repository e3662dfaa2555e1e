//! Runtime settings.
//!
//! Settings live in `~/.cv2profile/settings.json` (created with defaults on first
//! load). The API key may also come from a project-local `api_key.json` or the
//! `OPENAI_API_KEY` environment variable, which wins over both files.

use crate::schema::Contact;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const SETTINGS_DIR_NAME: &str = ".cv2profile";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const PROJECT_KEY_FILE: &str = "api_key.json";

/// User-editable settings, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai_api_key: String,
    pub default_template: String,
    pub show_extracted_text: bool,
    pub anonymize_by_default: bool,
    /// "tesseract" or "mistral_ocr"
    pub ocr_provider: String,
    /// Tesseract language code.
    pub ocr_language: String,
    pub model: String,
    pub api_base_url: String,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    pub bind_addr: String,
    /// Sessions untouched for this long are dropped with their files.
    pub session_idle_minutes: u64,
    pub branding: Branding,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            default_template: "professional".to_string(),
            show_extracted_text: false,
            anonymize_by_default: false,
            ocr_provider: "tesseract".to_string(),
            ocr_language: "deu".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.1,
            cache_dir: None,
            bind_addr: "0.0.0.0:8501".to_string(),
            session_idle_minutes: 120,
            branding: Branding::default(),
        }
    }
}

/// Company identity printed on every generated profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    pub company_name: String,
    pub tagline: String,
    pub footer_lines: Vec<String>,
    /// Recruiter contact used when a profile carries none.
    pub default_contact: Contact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_path: Option<PathBuf>,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            company_name: "GALDORA".to_string(),
            tagline: "Ich bin, was wir tun".to_string(),
            footer_lines: vec![
                "GALDORA Personalmanagement GmbH Co.KG".to_string(),
                "Volksgartenstr. 85-89, 41065 Mönchengladbach".to_string(),
                "E-Mail: info@galdora.de / Web: www.galdora.de".to_string(),
            ],
            default_contact: Contact {
                ansprechpartner: "Fischer".to_string(),
                telefon: "02161 62126-02".to_string(),
                email: "fischer@galdora.de".to_string(),
            },
            logo_path: None,
        }
    }
}

impl Settings {
    /// Apply environment overrides on top of file values.
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("CV2PROFILE_BIND") {
            self.bind_addr = addr;
        }
        if let Ok(model) = std::env::var("CV2PROFILE_MODEL") {
            self.model = model;
        }
        if let Ok(base) = std::env::var("CV2PROFILE_API_BASE") {
            self.api_base_url = base;
        }
        if let Ok(dir) = std::env::var("CV2PROFILE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// Copy safe to hand out over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.openai_api_key.is_empty() {
            copy.openai_api_key = "********".to_string();
        }
        copy
    }

    pub fn session_idle_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_idle_minutes.max(1) * 60)
    }

    /// Root of the extraction cache: `<tmp>/parser_cache` unless overridden.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("parser_cache"))
    }
}

#[derive(Debug, Deserialize)]
struct ProjectKeyFile {
    #[serde(default)]
    openai_api_key: String,
}

/// Settings plus the file locations they came from, behind a `RwLock` for
/// runtime updates.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
    settings_path: PathBuf,
    project_key_path: PathBuf,
}

impl SettingsStore {
    /// Load from the user's home directory and the current working directory.
    pub fn load_default() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let settings_path = home.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME);
        Self::load(settings_path, PathBuf::from(PROJECT_KEY_FILE))
    }

    /// Load from explicit paths. A missing settings file is created with defaults.
    pub fn load(settings_path: PathBuf, project_key_path: PathBuf) -> Result<Self> {
        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read settings: {:?}", settings_path))?;
            match serde_json::from_str::<Settings>(&content) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Ignoring unreadable settings {:?}: {}", settings_path, e);
                    Settings::default()
                }
            }
        } else {
            let defaults = Settings::default();
            write_settings(&settings_path, &defaults)?;
            info!("Created default settings at {:?}", settings_path);
            defaults
        };
        settings.apply_env();

        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            settings_path,
            project_key_path,
        })
    }

    /// Current settings (clone).
    pub fn get(&self) -> Settings {
        self.inner.read().unwrap().clone()
    }

    /// Resolve the API key: env var, then project key file, then settings.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        if self.project_key_path.exists() {
            match std::fs::read_to_string(&self.project_key_path)
                .map_err(anyhow::Error::from)
                .and_then(|c| serde_json::from_str::<ProjectKeyFile>(&c).map_err(Into::into))
            {
                Ok(file) if !file.openai_api_key.trim().is_empty() => {
                    return Some(file.openai_api_key)
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read {:?}: {}", self.project_key_path, e),
            }
        }

        let key = self.inner.read().unwrap().openai_api_key.clone();
        (!key.trim().is_empty()).then_some(key)
    }

    /// Merge a partial JSON object into the settings and persist them.
    pub fn update(&self, patch: serde_json::Value) -> Result<Settings> {
        let mut guard = self.inner.write().unwrap();
        let mut current = serde_json::to_value(&*guard)?;
        merge_json(&mut current, patch);
        let updated: Settings =
            serde_json::from_value(current).context("Invalid settings update")?;
        write_settings(&self.settings_path, &updated)?;
        *guard = updated.clone();
        Ok(updated)
    }

    /// Set a single top-level key.
    pub fn update_setting(&self, key: &str, value: serde_json::Value) -> Result<Settings> {
        let mut patch = serde_json::Map::new();
        patch.insert(key.to_string(), value);
        self.update(serde_json::Value::Object(patch))
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings dir: {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write settings: {:?}", path))
}

fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(target.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::load(
            dir.join("home").join(SETTINGS_FILE_NAME),
            dir.join(PROJECT_KEY_FILE),
        )
        .unwrap()
    }

    #[test]
    fn test_creates_defaults_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(dir.path().join("home").join(SETTINGS_FILE_NAME).exists());
        assert_eq!(store.get().default_template, "professional");
        assert_eq!(store.get().ocr_language, "deu");
    }

    #[test]
    fn test_update_persists_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .update(serde_json::json!({
                "default_template": "modern",
                "branding": {"company_name": "ACME"}
            }))
            .unwrap();

        let reloaded = store_in(dir.path());
        let settings = reloaded.get();
        assert_eq!(settings.default_template, "modern");
        assert_eq!(settings.branding.company_name, "ACME");
        assert_eq!(settings.branding.tagline, "Ich bin, was wir tun");
    }

    #[test]
    fn test_project_key_file_beats_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .update_setting("openai_api_key", serde_json::json!("from-settings"))
            .unwrap();
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        assert_eq!(store.api_key().as_deref(), Some("from-settings"));

        std::fs::write(
            dir.path().join(PROJECT_KEY_FILE),
            r#"{"openai_api_key": "from-project"}"#,
        )
        .unwrap();
        assert_eq!(store.api_key().as_deref(), Some("from-project"));
    }

    #[test]
    fn test_redacted_hides_key() {
        let settings = Settings {
            openai_api_key: "sk-secret".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.redacted().openai_api_key, "********");
        assert_eq!(Settings::default().redacted().openai_api_key, "");
    }

    #[test]
    fn test_cache_root_default() {
        let settings = Settings::default();
        assert!(settings.cache_root().ends_with("parser_cache"));
    }

    #[test]
    fn test_session_idle_ttl() {
        assert_eq!(Settings::default().session_idle_ttl().as_secs(), 120 * 60);
        let zero = Settings {
            session_idle_minutes: 0,
            ..Default::default()
        };
        assert_eq!(zero.session_idle_ttl().as_secs(), 60);
    }
}
