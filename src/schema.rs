//! Candidate profile schema.
//!
//! The JSON keys are the German field names the extraction prompt asks the model
//! for and the cache files store. Decoding is lenient: every field defaults, nulls
//! become empty values and stray scalars are stringified, so any object the model
//! returns maps onto a complete [`ProfileData`].

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_AVAILABILITY: &str = "Sofort verfügbar";
pub const UNRECOGNIZED_NAME: &str = "Nicht erkannt";

/// Structured résumé data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileData {
    #[serde(rename = "persönliche_daten", deserialize_with = "null_as_default")]
    pub persoenliche_daten: PersonalData,
    #[serde(deserialize_with = "null_as_default")]
    pub berufserfahrung: Vec<WorkEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub ausbildung: Vec<EducationEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub weiterbildungen: Vec<TrainingEntry>,
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub wunschgehalt: String,
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub verfuegbarkeit_status: String,
    #[serde(skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub verfuegbarkeit_details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalData {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub wohnort: String,
    #[serde(deserialize_with = "lenient_string")]
    pub jahrgang: String,
    #[serde(rename = "führerschein", deserialize_with = "lenient_string")]
    pub fuehrerschein: String,
    #[serde(deserialize_with = "null_as_default")]
    pub kontakt: Contact,
    /// Server-side photo path, filled in only on the copy handed to the
    /// renderer. Never read from or written to JSON.
    #[serde(skip)]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    #[serde(deserialize_with = "lenient_string")]
    pub ansprechpartner: String,
    #[serde(deserialize_with = "lenient_string")]
    pub telefon: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub zeitraum: String,
    #[serde(deserialize_with = "lenient_string")]
    pub unternehmen: String,
    #[serde(deserialize_with = "lenient_string")]
    pub position: String,
    #[serde(deserialize_with = "lenient_string_list")]
    pub aufgaben: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub zeitraum: String,
    #[serde(deserialize_with = "lenient_string")]
    pub institution: String,
    #[serde(deserialize_with = "lenient_string")]
    pub schwerpunkte: String,
    #[serde(deserialize_with = "lenient_string")]
    pub abschluss: String,
    #[serde(deserialize_with = "lenient_string")]
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub zeitraum: String,
    #[serde(deserialize_with = "lenient_string")]
    pub bezeichnung: String,
    #[serde(deserialize_with = "lenient_string")]
    pub abschluss: String,
}

impl ProfileData {
    /// Profile used when extraction yields nothing usable.
    ///
    /// Carries the configured recruiter contact, so it looks complete on paper;
    /// callers should surface [`check_missing_profile_data`] to the user.
    pub fn placeholder(contact: &Contact) -> Self {
        Self {
            persoenliche_daten: PersonalData {
                name: UNRECOGNIZED_NAME.to_string(),
                fuehrerschein: "Klasse B".to_string(),
                kontakt: contact.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether this profile is the extraction fallback rather than real data.
    pub fn is_placeholder(&self) -> bool {
        self.persoenliche_daten.name == UNRECOGNIZED_NAME
            && self.berufserfahrung.is_empty()
            && self.ausbildung.is_empty()
            && self.weiterbildungen.is_empty()
    }

    /// Copy with identifying personal fields masked.
    pub fn anonymized(&self) -> Self {
        let mut copy = self.clone();
        let personal = &mut copy.persoenliche_daten;
        personal.name = "XXXXX XXXXX".to_string();
        personal.wohnort = "XXXXX XXXXX".to_string();
        personal.kontakt.email = "xxxxx@xxxxx.xx".to_string();
        personal.kontakt.telefon = "XXXX XXXXXXXX".to_string();
        personal.profile_image = None;
        copy
    }

    pub fn availability(&self) -> &str {
        if self.verfuegbarkeit_status.trim().is_empty() {
            DEFAULT_AVAILABILITY
        } else {
            &self.verfuegbarkeit_status
        }
    }
}

/// Required information that is absent from a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissingField {
    Name,
    Kontaktdaten,
    Wohnort,
    Jahrgang,
    Berufserfahrung,
    Ausbildung,
}

impl MissingField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Kontaktdaten => "Kontaktdaten (E-Mail oder Telefon)",
            Self::Wohnort => "Wohnort",
            Self::Jahrgang => "Jahrgang",
            Self::Berufserfahrung => "Berufserfahrung",
            Self::Ausbildung => "Ausbildung",
        }
    }
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lists the required fields that are empty. Advisory only; rendering proceeds
/// regardless.
pub fn check_missing_profile_data(profile: &ProfileData) -> Vec<MissingField> {
    let personal = &profile.persoenliche_daten;
    let blank = |s: &str| s.trim().is_empty();
    let mut missing = Vec::new();

    if blank(&personal.name) {
        missing.push(MissingField::Name);
    }
    if blank(&personal.kontakt.email) && blank(&personal.kontakt.telefon) {
        missing.push(MissingField::Kontaktdaten);
    }
    if blank(&personal.wohnort) {
        missing.push(MissingField::Wohnort);
    }
    if blank(&personal.jahrgang) {
        missing.push(MissingField::Jahrgang);
    }
    if profile.berufserfahrung.is_empty() {
        missing.push(MissingField::Berufserfahrung);
    }
    if profile.ausbildung.is_empty() {
        missing.push(MissingField::Ausbildung);
    }

    missing
}

// ============================================================================
// Lenient field decoders
// ============================================================================

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v).map_err(de::Error::custom),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(scalar_to_string).unwrap_or_default())
}

/// Accepts an array of scalars or a single multi-line string of bullet points.
fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(scalar_to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(serde_json::Value::String(s)) => split_bullets(&s),
        Some(other) => vec![scalar_to_string(other)],
    })
}

fn scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn split_bullets(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['•', '-', '*', '–'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
