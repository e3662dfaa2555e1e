//! Profile document rendering.
//!
//! A profile is first laid out as a flat list of [`Block`]s shared by both
//! output formats; `pdf` and `docx` then turn the blocks into bytes using the
//! cosmetics of the chosen [`TemplateKind`].

pub mod docx;
pub mod pdf;
pub mod style;

use crate::config::Branding;
use crate::schema::ProfileData;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub use style::TemplateStyle;

/// Work entries with more tasks than this are condensed into groups.
pub const MAX_TASKS: usize = 4;
const TASK_GROUPS: usize = 3;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid output path: {0:?}")]
    InvalidOutputPath(PathBuf),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("DOCX generation failed: {0}")]
    Docx(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Professional,
    Classic,
    Modern,
    Minimalist,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::Professional,
        TemplateKind::Classic,
        TemplateKind::Modern,
        TemplateKind::Minimalist,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Classic => "classic",
            Self::Modern => "modern",
            Self::Minimalist => "minimalist",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

/// Renders profiles with a fixed company branding.
#[derive(Debug, Clone)]
pub struct ProfileRenderer {
    branding: Branding,
}

impl ProfileRenderer {
    pub fn new(branding: Branding) -> Self {
        Self { branding }
    }

    /// Write `profile` to `output_path` and return that path.
    ///
    /// Empty fields are left out of the document. Fails only when the output
    /// path is unusable or the file cannot be written.
    pub fn generate_profile(
        &self,
        profile: &ProfileData,
        output_path: &Path,
        template: TemplateKind,
        format: OutputFormat,
    ) -> Result<PathBuf, RenderError> {
        validate_output_path(output_path)?;

        let style = TemplateStyle::for_template(template);
        let blocks = layout(profile, &self.branding);
        let bytes = match format {
            OutputFormat::Pdf => pdf::render(&blocks, &style, &self.branding)?,
            OutputFormat::Docx => docx::render(&blocks, &style, &self.branding)?,
        };

        std::fs::write(output_path, &bytes).map_err(|source| RenderError::Io {
            path: output_path.to_path_buf(),
            source,
        })?;

        info!(
            "Rendered {} profile ({}, {} bytes) to {:?}",
            template.name(),
            format.extension(),
            bytes.len(),
            output_path
        );
        Ok(output_path.to_path_buf())
    }
}

fn validate_output_path(path: &Path) -> Result<(), RenderError> {
    let invalid = || RenderError::InvalidOutputPath(path.to_path_buf());

    if path.as_os_str().is_empty() || path.file_name().is_none() || path.is_dir() {
        return Err(invalid());
    }
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        _ => Err(invalid()),
    }
}

/// Condense a task list for print: up to [`MAX_TASKS`] are kept as they are,
/// longer lists become three consecutive groups joined with `"; "`.
pub fn condense_tasks(tasks: &[String]) -> Vec<String> {
    let tasks: Vec<&str> = tasks
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if tasks.len() <= MAX_TASKS {
        return tasks.into_iter().map(str::to_string).collect();
    }

    let base = tasks.len() / TASK_GROUPS;
    let extra = tasks.len() % TASK_GROUPS;
    let mut groups = Vec::with_capacity(TASK_GROUPS);
    let mut start = 0;
    for i in 0..TASK_GROUPS {
        let len = base + usize::from(i < extra);
        groups.push(tasks[start..start + len].join("; "));
        start += len;
    }
    groups
}

/// `<name>_Profil.<ext>` with whitespace as `_` and anything outside
/// letters, digits, `-` and `_` dropped.
pub fn download_filename(name: &str, format: OutputFormat) -> String {
    let cleaned: String = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        format!("Profil.{}", format.extension())
    } else {
        format!("{}_Profil.{}", cleaned, format.extension())
    }
}

// ============================================================================
// Layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Emphasis {
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub text: String,
    pub emphasis: Emphasis,
    pub bullet: bool,
}

impl Line {
    fn new(text: impl Into<String>, emphasis: Emphasis) -> Self {
        Self {
            text: text.into(),
            emphasis,
            bullet: false,
        }
    }

    fn bullet(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emphasis: Emphasis::Regular,
            bullet: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Block {
    /// Logo (or company name) and tagline.
    Banner,
    Title(String),
    Name(String),
    Photo(PathBuf),
    Caption(String),
    Text(String),
    Field { label: String, value: String },
    Rule,
    Heading(String),
    Entry { left: Vec<Line>, right: Vec<Line> },
    PageBreak,
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

pub(crate) fn layout(profile: &ProfileData, branding: &Branding) -> Vec<Block> {
    let personal = &profile.persoenliche_daten;
    let fallback = &branding.default_contact;
    let mut blocks = vec![Block::Banner, Block::Title("Profil".to_string())];

    if let Some(name) = non_empty(&personal.name) {
        blocks.push(Block::Name(name.to_string()));
    }
    if let Some(image) = personal.profile_image.as_deref().and_then(non_empty) {
        blocks.push(Block::Photo(PathBuf::from(image)));
    }

    let contact = &personal.kontakt;
    blocks.push(Block::Caption("IHR ANSPRECHPARTNER".to_string()));
    let person = non_empty(&contact.ansprechpartner).or(non_empty(&fallback.ansprechpartner));
    if let Some(person) = person {
        blocks.push(Block::Text(person.to_string()));
    }
    if let Some(phone) = non_empty(&contact.telefon).or(non_empty(&fallback.telefon)) {
        blocks.push(Block::Text(format!("Telefon: {}", phone)));
    }
    if let Some(email) = non_empty(&contact.email).or(non_empty(&fallback.email)) {
        blocks.push(Block::Text(format!("E-Mail: {}", email)));
    }
    blocks.push(Block::Rule);

    let availability = match non_empty(&profile.verfuegbarkeit_details) {
        Some(details) => format!("{} ({})", profile.availability(), details),
        None => profile.availability().to_string(),
    };
    let fields = [
        ("Wohnort", personal.wohnort.as_str()),
        ("Jahrgang", personal.jahrgang.as_str()),
        ("Führerschein", personal.fuehrerschein.as_str()),
        ("Gehalt", profile.wunschgehalt.as_str()),
        ("Verfügbarkeit", availability.as_str()),
    ];
    for (label, value) in fields {
        if let Some(value) = non_empty(value) {
            blocks.push(Block::Field {
                label: label.to_string(),
                value: value.to_string(),
            });
        }
    }

    if !profile.berufserfahrung.is_empty() {
        blocks.push(Block::Heading("Beruflicher Werdegang".to_string()));
    }
    for job in &profile.berufserfahrung {
        let left = [
            (job.zeitraum.as_str(), Emphasis::Bold),
            (job.unternehmen.as_str(), Emphasis::Bold),
            (job.position.as_str(), Emphasis::Italic),
        ]
        .into_iter()
        .filter_map(|(text, emphasis)| non_empty(text).map(|t| Line::new(t, emphasis)))
        .collect();
        let right = condense_tasks(&job.aufgaben)
            .into_iter()
            .map(Line::bullet)
            .collect();
        blocks.push(Block::Entry { left, right });
    }

    if profile.ausbildung.is_empty() && profile.weiterbildungen.is_empty() {
        return blocks;
    }

    blocks.push(Block::PageBreak);
    blocks.push(Block::Banner);
    blocks.push(Block::Heading("Ausbildung/ Weiterbildung".to_string()));

    for education in &profile.ausbildung {
        let mut right = Vec::new();
        if let Some(institution) = non_empty(&education.institution) {
            right.push(Line::new(format!("Studium {}", institution), Emphasis::Bold));
        }
        if let Some(focus) = non_empty(&education.schwerpunkte) {
            right.push(Line::new(format!("Studienschwerpunkte: {}", focus), Emphasis::Regular));
        }
        if let Some(degree) = non_empty(&education.abschluss) {
            right.push(Line::new(format!("Abschluss: {}", degree), Emphasis::Regular));
        }
        if let Some(grade) = non_empty(&education.note) {
            right.push(Line::new(format!("Abschlussnote {}", grade), Emphasis::Regular));
        }
        blocks.push(Block::Entry {
            left: period(&education.zeitraum),
            right,
        });
    }

    for training in &profile.weiterbildungen {
        let mut right = Vec::new();
        if let Some(title) = non_empty(&training.bezeichnung) {
            let heading = if title.contains("Fortbildung") {
                title.to_string()
            } else {
                format!("Fortbildung {}", title)
            };
            right.push(Line::new(heading, Emphasis::Bold));
        }
        if let Some(degree) = non_empty(&training.abschluss) {
            right.push(Line::new(format!("Abschluss: {}", degree), Emphasis::Regular));
        }
        blocks.push(Block::Entry {
            left: period(&training.zeitraum),
            right,
        });
    }

    blocks
}

fn period(zeitraum: &str) -> Vec<Line> {
    non_empty(zeitraum)
        .map(|z| vec![Line::new(z, Emphasis::Bold)])
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{Contact, EducationEntry, PersonalData, TrainingEntry, WorkEntry};

    pub(crate) fn sample_profile() -> ProfileData {
        ProfileData {
            persoenliche_daten: PersonalData {
                name: "Jürgen Müller-Lüdenscheidt".to_string(),
                wohnort: "Mönchengladbach".to_string(),
                jahrgang: "1979".to_string(),
                fuehrerschein: "Klasse B, PKW vorhanden".to_string(),
                kontakt: Contact {
                    ansprechpartner: "Fischer".to_string(),
                    telefon: "02161 62126-02".to_string(),
                    email: "fischer@example.de".to_string(),
                },
                profile_image: None,
            },
            berufserfahrung: vec![WorkEntry {
                zeitraum: "07/2020".to_string(),
                unternehmen: "Muster Automation GmbH".to_string(),
                position: "Projektleiter".to_string(),
                aufgaben: (1..=7).map(|i| format!("Aufgabe {}", i)).collect(),
            }],
            ausbildung: vec![EducationEntry {
                zeitraum: "1999-2004".to_string(),
                institution: "RWTH Aachen".to_string(),
                schwerpunkte: "Regelungstechnik".to_string(),
                abschluss: "Dipl.-Ing.".to_string(),
                note: "1,7".to_string(),
            }],
            weiterbildungen: vec![TrainingEntry {
                zeitraum: "2015".to_string(),
                bezeichnung: "Scrum Master".to_string(),
                abschluss: "Zertifikat".to_string(),
            }],
            wunschgehalt: "65.000 €".to_string(),
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_condense_keeps_short_lists() {
        let tasks = strings(&["a", "b", "c", "d"]);
        assert_eq!(condense_tasks(&tasks), tasks);
    }

    #[test]
    fn test_condense_groups_long_lists() {
        let tasks = strings(&["a", "b", "c", "d", "e"]);
        assert_eq!(condense_tasks(&tasks), strings(&["a; b", "c; d", "e"]));

        let tasks: Vec<String> = (1..=9).map(|i| i.to_string()).collect();
        assert_eq!(condense_tasks(&tasks), strings(&["1; 2; 3", "4; 5; 6", "7; 8; 9"]));
    }

    #[test]
    fn test_condense_drops_blank_tasks() {
        let tasks = strings(&["a", " ", "", "b"]);
        assert_eq!(condense_tasks(&tasks), strings(&["a", "b"]));
    }

    #[test]
    fn test_download_filename() {
        assert_eq!(
            download_filename("Erika Musterfrau", OutputFormat::Pdf),
            "Erika_Musterfrau_Profil.pdf"
        );
        assert_eq!(
            download_filename("Jürgen ../Müller", OutputFormat::Docx),
            "Jürgen_Müller_Profil.docx"
        );
        assert_eq!(download_filename("   ", OutputFormat::Pdf), "Profil.pdf");
    }

    #[test]
    fn test_template_and_format_parsing() {
        assert_eq!(TemplateKind::parse("Modern"), Some(TemplateKind::Modern));
        assert_eq!(TemplateKind::parse("fancy"), None);
        assert_eq!(OutputFormat::parse(".DOCX"), Some(OutputFormat::Docx));
        assert_eq!(OutputFormat::parse("odt"), None);
    }

    #[test]
    fn test_layout_headings() {
        let blocks = layout(&sample_profile(), &Branding::default());
        assert!(blocks.contains(&Block::Heading("Beruflicher Werdegang".to_string())));

        let page_break = blocks.iter().position(|b| *b == Block::PageBreak).unwrap();
        let education = blocks
            .iter()
            .position(|b| matches!(b, Block::Entry { right, .. }
                if right.first().map(|l| l.text.as_str()) == Some("Studium RWTH Aachen")))
            .unwrap();
        assert!(education > page_break);

        let training = blocks.iter().any(|b| matches!(b, Block::Entry { right, .. }
            if right.first().map(|l| l.text.as_str()) == Some("Fortbildung Scrum Master")));
        assert!(training);
    }

    #[test]
    fn test_layout_keeps_existing_fortbildung_prefix() {
        let mut profile = sample_profile();
        profile.weiterbildungen[0].bezeichnung = "Fortbildung Arbeitsschutz".to_string();
        let blocks = layout(&profile, &Branding::default());
        assert!(blocks.iter().any(|b| matches!(b, Block::Entry { right, .. }
            if right.first().map(|l| l.text.as_str()) == Some("Fortbildung Arbeitsschutz"))));
    }

    #[test]
    fn test_layout_condenses_tasks() {
        let blocks = layout(&sample_profile(), &Branding::default());
        let Some(Block::Entry { right, .. }) = blocks
            .iter()
            .find(|b| matches!(b, Block::Entry { left, .. } if left.first().map(|l| l.text.as_str()) == Some("07/2020")))
        else {
            panic!("work entry missing");
        };
        assert_eq!(right.len(), 3);
        assert!(right.iter().all(|l| l.bullet));
    }

    #[test]
    fn test_layout_omits_empty_fields_and_second_page() {
        let blocks = layout(&ProfileData::default(), &Branding::default());
        assert!(!blocks.iter().any(|b| matches!(b, Block::Name(_) | Block::PageBreak)));
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, Block::Field { label, .. } if label == "Wohnort")));
        // Availability has a default and the recruiter contact falls back to branding.
        assert!(blocks
            .iter()
            .any(|b| matches!(b, Block::Field { value, .. } if value == "Sofort verfügbar")));
        assert!(blocks.contains(&Block::Text("Telefon: 02161 62126-02".to_string())));
    }

    #[test]
    fn test_invalid_output_paths() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ProfileRenderer::new(Branding::default());
        let profile = sample_profile();

        for path in [
            PathBuf::new(),
            dir.path().to_path_buf(),
            dir.path().join("missing").join("out.pdf"),
        ] {
            let err = renderer
                .generate_profile(&profile, &path, TemplateKind::Professional, OutputFormat::Pdf)
                .unwrap_err();
            assert!(matches!(err, RenderError::InvalidOutputPath(_)), "{:?}", path);
        }
    }
}
