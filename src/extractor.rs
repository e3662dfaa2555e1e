//! Structured profile extraction from raw résumé text using an LLM.
//!
//! The model is asked for one JSON object in the [`ProfileData`] shape. Replies
//! are accepted in three stages: the whole reply (minus code fences), then the
//! span between the first `{` and the last `}`, then the placeholder profile.
//! Every stage must pass the shape check, so this never returns a partial object.

use crate::llm_client::{ChatModel, Message};
use crate::schema::{Contact, ProfileData};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "Du bist ein präziser Datenextraktions-Assistent für Lebensläufe.";

/// Upper bound on résumé text sent to the model.
const MAX_TEXT_CHARS: usize = 60_000;

/// Top-level keys every accepted reply must carry.
pub const REQUIRED_KEYS: [&str; 4] = [
    "persönliche_daten",
    "berufserfahrung",
    "ausbildung",
    "weiterbildungen",
];

/// How a profile was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Direct,
    Recovered,
    Fallback,
}

pub struct ProfileExtractor {
    model: Arc<dyn ChatModel>,
    fallback_contact: Contact,
}

impl ProfileExtractor {
    pub fn new(model: Arc<dyn ChatModel>, fallback_contact: Contact) -> Self {
        Self {
            model,
            fallback_contact,
        }
    }

    /// Extract a profile from résumé text. Never fails: API or parse errors
    /// yield the placeholder profile.
    pub async fn extract_profile_data(&self, text: &str, document_type: &str) -> ProfileData {
        self.extract_with_source(text, document_type).await.0
    }

    pub async fn extract_with_source(
        &self,
        text: &str,
        document_type: &str,
    ) -> (ProfileData, ExtractionSource) {
        info!(
            "Starting profile extraction ({} chars, type={}, model={})",
            text.chars().count(),
            document_type,
            self.model.model()
        );

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(build_prompt(text, document_type)),
        ];

        let response = match self.model.complete(messages).await {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM extraction failed, using placeholder profile: {}", e);
                return (self.placeholder(), ExtractionSource::Fallback);
            }
        };
        debug!("Raw LLM response length: {} chars", response.len());

        match parse_profile_response(&response) {
            Some((profile, source)) => {
                info!(
                    "Extraction complete ({:?}): {} jobs, {} education, {} trainings",
                    source,
                    profile.berufserfahrung.len(),
                    profile.ausbildung.len(),
                    profile.weiterbildungen.len()
                );
                (profile, source)
            }
            None => {
                warn!(
                    "LLM response is not a usable profile, using placeholder: {}",
                    response.chars().take(200).collect::<String>()
                );
                (self.placeholder(), ExtractionSource::Fallback)
            }
        }
    }

    fn placeholder(&self) -> ProfileData {
        ProfileData::placeholder(&self.fallback_contact)
    }
}

/// The fixed extraction prompt with the résumé text and target schema embedded.
pub fn build_prompt(text: &str, document_type: &str) -> String {
    let document_type = document_type.trim_start_matches('.').to_uppercase();
    format!(
        r#"Du bist ein Assistent für die Extraktion von Lebenslaufdaten. Analysiere den folgenden Text aus einem {document_type}-Dokument und extrahiere alle relevanten Informationen in das angegebene JSON-Format.

Der Text stammt aus einem Lebenslauf und enthält Informationen über eine Person, ihre Berufserfahrung, Ausbildung und Qualifikationen.

Extrahierter Text:
{text}

Liefere das Ergebnis ausschließlich im folgenden JSON-Format ohne zusätzlichen Text oder Erklärungen:
{{
  "persönliche_daten": {{
    "name": "",
    "wohnort": "",
    "jahrgang": "",
    "führerschein": "",
    "kontakt": {{
      "ansprechpartner": "",
      "telefon": "",
      "email": ""
    }}
  }},
  "berufserfahrung": [
    {{
      "zeitraum": "",
      "unternehmen": "",
      "position": "",
      "aufgaben": []
    }}
  ],
  "ausbildung": [
    {{
      "zeitraum": "",
      "institution": "",
      "schwerpunkte": "",
      "abschluss": "",
      "note": ""
    }}
  ],
  "weiterbildungen": [
    {{
      "zeitraum": "",
      "bezeichnung": "",
      "abschluss": ""
    }}
  ],
  "wunschgehalt": ""
}}

Hinweise:
- Verwende exakt dieses JSON-Format
- Fülle alle Felder aus, die sich aus dem Text ergeben
- Lasse Felder leer, wenn keine Information vorhanden ist
- Ordne die Berufserfahrung chronologisch (neueste zuerst)
- Bei Studiengängen auch die Studienschwerpunkte erfassen, falls angegeben
- Beim Führerschein angeben, ob ein PKW vorhanden ist, falls bekannt
- Ist der Zeitraum als "Seit MM/JJJJ" angegeben, nur den Zeitpunkt erfassen (z.B. "07/2020")
- Aufgaben als einzelne Punkte strukturieren, nicht als langen Fließtext
- Ein genanntes Wunschgehalt als Jahresgehalt in Euro angeben"#,
        document_type = document_type,
        text = truncate_for_context(text, MAX_TEXT_CHARS),
    )
}

/// Parse an LLM reply into a profile, trying the whole reply first and the
/// outermost brace span second.
pub fn parse_profile_response(response: &str) -> Option<(ProfileData, ExtractionSource)> {
    if let Some(profile) = accept(strip_code_fences(response)) {
        return Some((profile, ExtractionSource::Direct));
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    accept(&response[start..=end]).map(|p| (p, ExtractionSource::Recovered))
}

fn accept(candidate: &str) -> Option<ProfileData> {
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    if !has_profile_shape(&value) {
        debug!("JSON parsed but lacks the profile keys");
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Object with a `persönliche_daten` object and the three list keys as arrays.
pub fn has_profile_shape(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let personal_ok = obj.get(REQUIRED_KEYS[0]).map(|v| v.is_object()).unwrap_or(false);
    personal_ok
        && REQUIRED_KEYS[1..]
            .iter()
            .all(|key| obj.get(*key).map(|v| v.is_array()).unwrap_or(false))
}

fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

fn truncate_for_context(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
