//! Per-template cosmetics and approximate Helvetica metrics for line wrapping.

use super::TemplateKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    /// `RRGGBB` as used by WordprocessingML.
    pub fn hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }

    /// Components in 0.0..=1.0 as used by PDF colour operators.
    pub fn unit(&self) -> [f32; 3] {
        [
            self.0 as f32 / 255.0,
            self.1 as f32 / 255.0,
            self.2 as f32 / 255.0,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStyle {
    pub accent: Rgb,
    pub text: Rgb,
    pub muted: Rgb,
    pub company_size: f32,
    pub tagline_size: f32,
    pub title_size: f32,
    pub name_size: f32,
    pub heading_size: f32,
    pub body_size: f32,
    pub footer_size: f32,
    /// Share of the content width taken by the left column of entry tables.
    pub left_column: f32,
    /// `Label: value` on one line instead of the label above the value.
    pub inline_labels: bool,
    pub underline_headings: bool,
    pub rules: bool,
}

impl TemplateStyle {
    pub fn for_template(template: TemplateKind) -> Self {
        match template {
            TemplateKind::Professional => Self {
                accent: Rgb(0x19, 0x73, 0xB8),
                text: Rgb::BLACK,
                muted: Rgb(0x55, 0x55, 0x55),
                company_size: 36.0,
                tagline_size: 10.0,
                title_size: 18.0,
                name_size: 16.0,
                heading_size: 14.0,
                body_size: 10.0,
                footer_size: 8.0,
                left_column: 0.3,
                inline_labels: false,
                underline_headings: true,
                rules: true,
            },
            TemplateKind::Classic => Self {
                accent: Rgb(0x00, 0x00, 0x8B),
                text: Rgb::BLACK,
                muted: Rgb(0x40, 0x40, 0x40),
                company_size: 30.0,
                tagline_size: 10.0,
                title_size: 16.0,
                name_size: 14.0,
                heading_size: 12.0,
                body_size: 10.0,
                footer_size: 8.0,
                left_column: 0.25,
                inline_labels: true,
                underline_headings: false,
                rules: true,
            },
            TemplateKind::Modern => Self {
                accent: Rgb(0x2E, 0x8B, 0x57),
                text: Rgb(0x22, 0x22, 0x22),
                muted: Rgb(0x6B, 0x6B, 0x6B),
                company_size: 32.0,
                tagline_size: 11.0,
                title_size: 20.0,
                name_size: 18.0,
                heading_size: 15.0,
                body_size: 10.0,
                footer_size: 8.0,
                left_column: 0.32,
                inline_labels: false,
                underline_headings: false,
                rules: false,
            },
            TemplateKind::Minimalist => Self {
                accent: Rgb(0x33, 0x33, 0x33),
                text: Rgb::BLACK,
                muted: Rgb(0x80, 0x80, 0x80),
                company_size: 24.0,
                tagline_size: 9.0,
                title_size: 14.0,
                name_size: 14.0,
                heading_size: 11.0,
                body_size: 9.0,
                footer_size: 7.0,
                left_column: 0.25,
                inline_labels: true,
                underline_headings: false,
                rules: false,
            },
        }
    }
}

// Helvetica AFM widths (1/1000 em) for ASCII 0x20..=0x7E. Index = char - 32.
#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Width of one character in 1/1000 em. Latin-1 letters map to their base
/// letter; anything else gets the width of a digit.
fn char_width(c: char, bold: bool) -> u16 {
    let table = if bold { &HELVETICA_BOLD } else { &HELVETICA };
    let base = match c {
        ' '..='~' => c,
        'ä' | 'à' | 'á' | 'â' => 'a',
        'ö' | 'ò' | 'ó' | 'ô' => 'o',
        'ü' | 'ù' | 'ú' | 'û' => 'u',
        'é' | 'è' | 'ê' => 'e',
        'Ä' => 'A',
        'Ö' => 'O',
        'Ü' => 'U',
        'ß' => return 611,
        '•' => return 350,
        _ => return 556,
    };
    table[base as usize - 32]
}

/// Rendered width of `text` in points.
pub fn text_width(text: &str, size: f32, bold: bool) -> f32 {
    let units: u32 = text.chars().map(|c| char_width(c, bold) as u32).sum();
    units as f32 * size / 1000.0
}

/// Greedy word wrap to `max_width` points. Words longer than a line are split
/// by character. Always returns at least one line.
pub fn wrap(text: &str, size: f32, bold: bool, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if text_width(&candidate, size, bold) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if text_width(word, size, bold) <= max_width {
                current = word.to_string();
            } else {
                for c in word.chars() {
                    current.push(c);
                    if text_width(&current, size, bold) > max_width && current.chars().count() > 1 {
                        let last = current.pop().unwrap_or(c);
                        lines.push(std::mem::take(&mut current));
                        current.push(last);
                    }
                }
            }
        }
        lines.push(current);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_widths() {
        assert!((text_width("0", 10.0, false) - 5.56).abs() < 1e-4);
        assert!(text_width("W", 10.0, true) > text_width("i", 10.0, true));
        assert_eq!(text_width("ä", 10.0, false), text_width("a", 10.0, false));
    }

    #[test]
    fn test_wrap_respects_width() {
        let text = "Planung und Steuerung von Projekten im Bereich Automatisierung";
        let lines = wrap(text, 10.0, false, 120.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, 10.0, false) <= 120.0, "{} too wide", line);
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let lines = wrap(&"x".repeat(200), 10.0, false, 50.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat().len(), 200);
    }

    #[test]
    fn test_wrap_keeps_explicit_breaks_and_empty() {
        assert_eq!(wrap("a\nb", 10.0, false, 500.0), vec!["a", "b"]);
        assert_eq!(wrap("", 10.0, false, 500.0), vec![""]);
    }

    #[test]
    fn test_template_styles_differ() {
        let professional = TemplateStyle::for_template(TemplateKind::Professional);
        let minimalist = TemplateStyle::for_template(TemplateKind::Minimalist);
        assert_eq!(professional.accent.hex(), "1973B8");
        assert!(!professional.inline_labels);
        assert!(minimalist.inline_labels);
        assert!(minimalist.body_size < professional.body_size);
    }
}
