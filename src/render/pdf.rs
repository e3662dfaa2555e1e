//! PDF backend: a small flow layout over lopdf content streams using the
//! built-in Helvetica faces (WinAnsi encoded).

use super::style::{text_width, wrap, Rgb, TemplateStyle};
use super::{Block, Emphasis, Line, RenderError};
use crate::config::Branding;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};
use std::path::Path;
use tracing::warn;

const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;
/// 20 mm.
const MARGIN: f32 = 56.69;
const LEADING: f32 = 1.3;
const GUTTER: f32 = 10.0;
const BULLET_INDENT: f32 = 10.0;
const LOGO_WIDTH: f32 = 120.0;
const PHOTO_WIDTH: f32 = 90.0;
const RULE_GREY: Rgb = Rgb(0xC0, 0xC0, 0xC0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }

    fn base_font(&self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Italic => "Helvetica-Oblique",
        }
    }

    fn is_bold(&self) -> bool {
        *self == Font::Bold
    }
}

impl From<Emphasis> for Font {
    fn from(emphasis: Emphasis) -> Self {
        match emphasis {
            Emphasis::Regular => Font::Regular,
            Emphasis::Bold => Font::Bold,
            Emphasis::Italic => Font::Italic,
        }
    }
}

struct PdfImage {
    stream: Stream,
    width: u32,
    height: u32,
}

impl PdfImage {
    /// Decode any format `image` understands into an RGB XObject, downscaled
    /// to at most `max_px` on the long side.
    fn load(path: &Path, max_px: u32) -> Option<Self> {
        let decoded = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping image {:?}: {}", path, e);
                return None;
            }
        };
        let rgb = decoded.thumbnail(max_px, max_px).to_rgb8();
        let (width, height) = rgb.dimensions();
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb.into_raw(),
        );
        Some(Self {
            stream,
            width,
            height,
        })
    }

    fn scaled_height(&self, width: f32) -> f32 {
        width * self.height as f32 / self.width.max(1) as f32
    }
}

struct PdfBuilder<'a> {
    style: &'a TemplateStyle,
    branding: &'a Branding,
    pages: Vec<Vec<Operation>>,
    /// Page that drawing operations go to.
    current: usize,
    y: f32,
    images: Vec<PdfImage>,
    logo: Option<usize>,
    /// Photo floating at the right edge: its bottom edge and reserved width.
    float: Option<(f32, f32)>,
}

pub fn render(
    blocks: &[Block],
    style: &TemplateStyle,
    branding: &Branding,
) -> Result<Vec<u8>, RenderError> {
    let mut builder = PdfBuilder::new(style, branding);
    for block in blocks {
        builder.block(block);
    }
    builder.finish()
}

impl<'a> PdfBuilder<'a> {
    fn new(style: &'a TemplateStyle, branding: &'a Branding) -> Self {
        let mut images = Vec::new();
        let logo = branding
            .logo_path
            .as_deref()
            .and_then(|path| PdfImage::load(path, 600))
            .map(|image| {
                images.push(image);
                images.len() - 1
            });

        Self {
            style,
            branding,
            pages: vec![Vec::new()],
            current: 0,
            y: PAGE_HEIGHT - MARGIN,
            images,
            logo,
            float: None,
        }
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        &mut self.pages[self.current]
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.current = self.pages.len() - 1;
        self.y = PAGE_HEIGHT - MARGIN;
        self.float = None;
    }

    fn footer_top(&self) -> f32 {
        let lines = self.branding.footer_lines.len() as f32;
        MARGIN + lines * self.style.footer_size * LEADING + 8.0
    }

    fn bottom_limit(&self) -> f32 {
        self.footer_top() + 10.0
    }

    fn ensure_space(&mut self, height: f32) {
        if self.y - height < self.bottom_limit() {
            self.new_page();
        }
    }

    fn content_width(&self) -> f32 {
        let full = PAGE_WIDTH - 2.0 * MARGIN;
        match self.float {
            Some((bottom, width)) if self.y > bottom => full - width - GUTTER,
            _ => full,
        }
    }

    fn block(&mut self, block: &Block) {
        let style = self.style;
        match block {
            Block::Banner => self.banner(),
            Block::Title(text) => {
                self.y -= 8.0;
                self.line(text, Font::Bold, style.title_size, style.accent);
            }
            Block::Name(text) => {
                self.paragraph(text, Font::Regular, style.name_size, style.text);
                self.y -= 16.0;
            }
            Block::Photo(path) => self.photo(path),
            Block::Caption(text) => {
                self.y -= 4.0;
                self.line(text, Font::Bold, style.body_size, style.text);
            }
            Block::Text(text) => self.paragraph(text, Font::Regular, style.body_size, style.text),
            Block::Field { label, value } => self.field(label, value),
            Block::Rule => self.rule(),
            Block::Heading(text) => self.heading(text),
            Block::Entry { left, right } => self.entry(left, right),
            Block::PageBreak => self.new_page(),
        }
    }

    fn text_at(&mut self, x: f32, y: f32, font: Font, size: f32, color: Rgb, text: &str) {
        if text.is_empty() {
            return;
        }
        let [r, g, b] = color.unit();
        let ops = self.ops();
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.resource().into(), Object::Real(size)]));
        ops.push(Operation::new(
            "rg",
            vec![Object::Real(r), Object::Real(g), Object::Real(b)],
        ));
        ops.push(Operation::new("Td", vec![Object::Real(x), Object::Real(y)]));
        ops.push(Operation::new("Tj", vec![Object::String(win_ansi(text), StringFormat::Literal)]));
        ops.push(Operation::new("ET", vec![]));
    }

    fn stroke(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, width: f32, color: Rgb) {
        let [r, g, b] = color.unit();
        let ops = self.ops();
        ops.push(Operation::new("w", vec![Object::Real(width)]));
        ops.push(Operation::new(
            "RG",
            vec![Object::Real(r), Object::Real(g), Object::Real(b)],
        ));
        ops.push(Operation::new("m", vec![Object::Real(x1), Object::Real(y1)]));
        ops.push(Operation::new("l", vec![Object::Real(x2), Object::Real(y2)]));
        ops.push(Operation::new("S", vec![]));
    }

    fn draw_image(&mut self, index: usize, x: f32, y: f32, width: f32, height: f32) {
        let name = format!("Im{}", index + 1);
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                Object::Real(width),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(height),
                Object::Real(x),
                Object::Real(y),
            ],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
        ops.push(Operation::new("Q", vec![]));
    }

    /// One unwrapped line at the left margin.
    fn line(&mut self, text: &str, font: Font, size: f32, color: Rgb) {
        let height = size * LEADING;
        self.ensure_space(height);
        self.y -= height;
        self.text_at(MARGIN, self.y, font, size, color, text);
    }

    fn paragraph(&mut self, text: &str, font: Font, size: f32, color: Rgb) {
        for line in wrap(text, size, font.is_bold(), self.content_width()) {
            self.line(&line, font, size, color);
        }
    }

    fn banner(&mut self) {
        let style = self.style;
        match self.logo {
            Some(index) => {
                let height = self.images[index].scaled_height(LOGO_WIDTH);
                self.ensure_space(height);
                self.y -= height;
                self.draw_image(index, MARGIN, self.y, LOGO_WIDTH, height);
                self.y -= 4.0;
            }
            None => {
                let company = self.branding.company_name.clone();
                self.line(&company, Font::Bold, style.company_size, style.text);
            }
        }
        let tagline = self.branding.tagline.clone();
        self.line(&tagline, Font::Italic, style.tagline_size, style.text);
        self.y -= 24.0;
    }

    fn photo(&mut self, path: &Path) {
        let Some(image) = PdfImage::load(path, 400) else {
            return;
        };
        let height = image.scaled_height(PHOTO_WIDTH);
        self.images.push(image);
        let index = self.images.len() - 1;

        let x = PAGE_WIDTH - MARGIN - PHOTO_WIDTH;
        self.draw_image(index, x, self.y - height, PHOTO_WIDTH, height);
        self.float = Some((self.y - height, PHOTO_WIDTH));
    }

    fn field(&mut self, label: &str, value: &str) {
        let style = self.style;
        if !style.inline_labels {
            self.line(&format!("{}:", label), Font::Bold, style.body_size, style.text);
            self.paragraph(value, Font::Regular, style.body_size, style.text);
            self.y -= 4.0;
            return;
        }

        let label = format!("{}: ", label);
        let label_width = text_width(&label, style.body_size, true);
        let lines = wrap(value, style.body_size, false, self.content_width() - label_width);
        for (i, line) in lines.iter().enumerate() {
            let height = style.body_size * LEADING;
            self.ensure_space(height);
            self.y -= height;
            if i == 0 {
                self.text_at(MARGIN, self.y, Font::Bold, style.body_size, style.text, &label);
            }
            self.text_at(
                MARGIN + label_width,
                self.y,
                Font::Regular,
                style.body_size,
                style.text,
                line,
            );
        }
        self.y -= 2.0;
    }

    fn rule(&mut self) {
        if !self.style.rules {
            self.y -= 10.0;
            return;
        }
        self.ensure_space(20.0);
        self.y -= 14.0;
        self.stroke(MARGIN, self.y, PAGE_WIDTH - MARGIN, self.y, 1.0, RULE_GREY);
        self.y -= 6.0;
    }

    fn heading(&mut self, text: &str) {
        let style = self.style;
        let height = style.heading_size * LEADING;
        // Keep the heading with at least one following line.
        self.ensure_space(20.0 + height + style.body_size * LEADING * 2.0);
        self.y -= 20.0 + height;
        self.text_at(MARGIN, self.y, Font::Bold, style.heading_size, style.accent, text);
        if style.underline_headings {
            let width = text_width(text, style.heading_size, true);
            let y = self.y - 2.0;
            self.stroke(MARGIN, y, MARGIN + width, y, 0.8, style.accent);
        }
        self.y -= 8.0;
    }

    fn entry(&mut self, left: &[Line], right: &[Line]) {
        let style = self.style;
        let size = style.body_size;
        let width = PAGE_WIDTH - 2.0 * MARGIN;
        let left_width = width * style.left_column - GUTTER;
        let right_x = MARGIN + width * style.left_column;
        let right_width = width - width * style.left_column;

        let left_rows = column_rows(left, size, left_width);
        let right_rows = column_rows(right, size, right_width);
        let rows = left_rows.len().max(right_rows.len());
        if rows == 0 {
            return;
        }

        let height = size * LEADING;
        let full_page = PAGE_HEIGHT - MARGIN - self.bottom_limit();
        let total = rows as f32 * height;
        if total <= full_page {
            self.ensure_space(total);
        }

        for i in 0..rows {
            self.ensure_space(height);
            self.y -= height;
            if let Some(row) = left_rows.get(i) {
                self.text_at(MARGIN, self.y, row.font, size, style.text, &row.text);
            }
            if let Some(row) = right_rows.get(i) {
                if row.bullet {
                    self.text_at(right_x, self.y, Font::Regular, size, style.text, "•");
                }
                let x = right_x + if row.indented { BULLET_INDENT } else { 0.0 };
                self.text_at(x, self.y, row.font, size, style.text, &row.text);
            }
        }
        self.y -= 8.0;
    }

    fn footer(&mut self, page: usize) {
        let style = self.style;
        let size = style.footer_size;
        let top = self.footer_top();
        let lines = self.branding.footer_lines.clone();
        self.current = page;

        if style.rules {
            self.stroke(MARGIN, top, PAGE_WIDTH - MARGIN, top, 0.5, RULE_GREY);
        }
        let mut y = top - 4.0;
        for line in &lines {
            y -= size * LEADING;
            let x = (PAGE_WIDTH - text_width(line, size, false)) / 2.0;
            self.text_at(x.max(MARGIN), y, Font::Regular, size, style.muted, line);
        }
    }

    fn finish(mut self) -> Result<Vec<u8>, RenderError> {
        for page in 0..self.pages.len() {
            self.footer(page);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for font in [Font::Regular, Font::Bold, Font::Italic] {
            let id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource(), id);
        }

        let mut xobjects = Dictionary::new();
        for (i, image) in self.images.into_iter().enumerate() {
            let id = doc.add_object(image.stream);
            xobjects.set(format!("Im{}", i + 1), id);
        }

        let resources_id = doc.add_object(dictionary! {
            "Font" => fonts,
            "XObject" => xobjects,
        });

        let mut kids = Vec::with_capacity(self.pages.len());
        for operations in self.pages {
            let content = Content { operations }
                .encode()
                .map_err(|e| RenderError::Pdf(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(PAGE_WIDTH),
                    Object::Real(PAGE_HEIGHT),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut buf = Vec::new();
        doc.save_to(&mut buf)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        Ok(buf)
    }
}

struct Row {
    text: String,
    font: Font,
    bullet: bool,
    indented: bool,
}

/// Wrap column lines into rows; bullet continuation lines stay indented.
fn column_rows(lines: &[Line], size: f32, width: f32) -> Vec<Row> {
    let mut rows = Vec::new();
    for line in lines {
        let font = Font::from(line.emphasis);
        let available = if line.bullet { width - BULLET_INDENT } else { width };
        for (i, text) in wrap(&line.text, size, font.is_bold(), available)
            .into_iter()
            .enumerate()
        {
            rows.push(Row {
                text,
                font,
                bullet: line.bullet && i == 0,
                indented: line.bullet,
            });
        }
    }
    rows
}

/// Encode text for the standard fonts' WinAnsiEncoding; unmappable
/// characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::sample_profile;
    use crate::render::{layout, TemplateKind};
    use crate::schema::ProfileData;

    fn render_profile(profile: &ProfileData, template: TemplateKind) -> Vec<u8> {
        let branding = Branding::default();
        let style = TemplateStyle::for_template(template);
        render(&layout(profile, &branding), &style, &branding).unwrap()
    }

    #[test]
    fn test_win_ansi_umlauts() {
        assert_eq!(win_ansi("Müller"), vec![b'M', 0xFC, b'l', b'l', b'e', b'r']);
        assert_eq!(win_ansi("• 5 €"), vec![0x95, b' ', b'5', b' ', 0x80]);
        assert_eq!(win_ansi("漢"), vec![b'?']);
    }

    #[test]
    fn test_full_profile_has_two_pages() {
        for template in TemplateKind::ALL {
            let bytes = render_profile(&sample_profile(), template);
            let doc = Document::load_mem(&bytes).unwrap();
            assert_eq!(doc.get_pages().len(), 2, "{:?}", template);
        }
    }

    #[test]
    fn test_text_is_extractable() {
        let mut profile = sample_profile();
        profile.persoenliche_daten.name = "Erika Musterfrau".to_string();
        let bytes = render_profile(&profile, TemplateKind::Professional);
        let text = crate::document::pdf::extract_text(&bytes).unwrap();
        assert!(text.contains("Erika Musterfrau"));
        assert!(text.contains("Beruflicher Werdegang"));
    }

    #[test]
    fn test_empty_profile_renders_single_page() {
        let bytes = render_profile(&ProfileData::default(), TemplateKind::Minimalist);
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_long_history_breaks_pages() {
        let mut profile = sample_profile();
        let job = profile.berufserfahrung[0].clone();
        profile.berufserfahrung = vec![job; 40];
        let bytes = render_profile(&profile, TemplateKind::Professional);
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.get_pages().len() > 3);
    }

    #[test]
    fn test_missing_photo_is_skipped() {
        let mut profile = sample_profile();
        profile.persoenliche_daten.profile_image = Some("/nonexistent/photo.png".to_string());
        let bytes = render_profile(&profile, TemplateKind::Modern);
        assert!(Document::load_mem(&bytes).is_ok());
    }

    #[test]
    fn test_photo_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        image::RgbImage::from_pixel(40, 50, image::Rgb([200, 100, 50]))
            .save(&photo)
            .unwrap();

        let mut profile = sample_profile();
        profile.persoenliche_daten.profile_image = Some(photo.to_string_lossy().into_owned());
        let bytes = render_profile(&profile, TemplateKind::Professional);
        let doc = Document::load_mem(&bytes).unwrap();
        let images = doc
            .objects
            .values()
            .filter(|o| {
                o.as_stream()
                    .ok()
                    .and_then(|s| s.dict.get(b"Subtype").ok())
                    .and_then(|s| s.as_name().ok())
                    == Some(b"Image".as_slice())
            })
            .count();
        assert_eq!(images, 1);
    }
}
