//! DOCX backend built on docx-rs.

use super::style::TemplateStyle;
use super::{Block, Emphasis, Line, RenderError};
use crate::config::Branding;
use docx_rs::{
    AlignmentType, BreakType, Docx, Footer, PageMargin, Paragraph, Pic, Run, Table, TableCell,
    TableRow, WidthType,
};
use std::io::Cursor;
use std::path::Path;
use tracing::warn;

/// 20 mm in twentieths of a point.
const MARGIN_TWIPS: i32 = 1134;
/// A4 width minus both margins.
const CONTENT_TWIPS: usize = 11906 - 2 * MARGIN_TWIPS as usize;
const EMU_PER_PT: f32 = 12700.0;
const LOGO_WIDTH_PT: f32 = 120.0;
const PHOTO_WIDTH_PT: f32 = 90.0;

pub fn render(
    blocks: &[Block],
    style: &TemplateStyle,
    branding: &Branding,
) -> Result<Vec<u8>, RenderError> {
    let logo = branding
        .logo_path
        .as_deref()
        .and_then(|path| picture(path, LOGO_WIDTH_PT));

    let mut docx = Docx::new().page_margin(
        PageMargin::new()
            .top(MARGIN_TWIPS)
            .bottom(MARGIN_TWIPS)
            .left(MARGIN_TWIPS)
            .right(MARGIN_TWIPS),
    );

    for block in blocks {
        docx = match block {
            Block::Banner => {
                let first = match &logo {
                    Some(pic) => Paragraph::new().add_run(Run::new().add_image(pic.clone())),
                    None => Paragraph::new().add_run(
                        styled(&branding.company_name, style.company_size, &style.text.hex()).bold(),
                    ),
                };
                docx.add_paragraph(first)
                    .add_paragraph(Paragraph::new().add_run(
                        styled(&branding.tagline, style.tagline_size, &style.text.hex()).italic(),
                    ))
                    .add_paragraph(Paragraph::new())
            }
            Block::Title(text) => docx.add_paragraph(
                Paragraph::new()
                    .add_run(styled(text, style.title_size, &style.accent.hex()).bold()),
            ),
            Block::Name(text) => docx
                .add_paragraph(
                    Paragraph::new().add_run(styled(text, style.name_size, &style.text.hex())),
                )
                .add_paragraph(Paragraph::new()),
            Block::Photo(path) => match picture(path, PHOTO_WIDTH_PT) {
                Some(pic) => docx.add_paragraph(
                    Paragraph::new()
                        .align(AlignmentType::Right)
                        .add_run(Run::new().add_image(pic)),
                ),
                None => docx,
            },
            Block::Caption(text) => docx.add_paragraph(
                Paragraph::new().add_run(styled(text, style.body_size, &style.text.hex()).bold()),
            ),
            Block::Text(text) => docx.add_paragraph(
                Paragraph::new().add_run(styled(text, style.body_size, &style.text.hex())),
            ),
            Block::Field { label, value } => {
                let color = style.text.hex();
                if style.inline_labels {
                    docx.add_paragraph(
                        Paragraph::new()
                            .add_run(styled(&format!("{}: ", label), style.body_size, &color).bold())
                            .add_run(styled(value, style.body_size, &color)),
                    )
                } else {
                    docx.add_paragraph(Paragraph::new().add_run(
                        styled(&format!("{}:", label), style.body_size, &color).bold(),
                    ))
                    .add_paragraph(Paragraph::new().add_run(styled(value, style.body_size, &color)))
                }
            }
            Block::Rule => docx.add_paragraph(Paragraph::new()),
            Block::Heading(text) => {
                let mut run = styled(text, style.heading_size, &style.accent.hex()).bold();
                if style.underline_headings {
                    run = run.underline("single");
                }
                docx.add_paragraph(Paragraph::new())
                    .add_paragraph(Paragraph::new().add_run(run))
            }
            Block::Entry { left, right } => docx.add_table(entry_table(left, right, style)),
            Block::PageBreak => {
                docx.add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)))
            }
        };
    }

    let mut footer = Footer::new();
    for line in &branding.footer_lines {
        footer = footer.add_paragraph(
            Paragraph::new()
                .align(AlignmentType::Center)
                .add_run(styled(line, style.footer_size, &style.muted.hex())),
        );
    }
    docx = docx.footer(footer);

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| RenderError::Docx(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Run with size in points and a `RRGGBB` colour.
fn styled(text: &str, size_pt: f32, color: &str) -> Run {
    Run::new()
        .add_text(text)
        .size((size_pt * 2.0).round() as usize)
        .color(color)
}

fn line_paragraph(line: &Line, style: &TemplateStyle) -> Paragraph {
    let text = if line.bullet {
        format!("• {}", line.text)
    } else {
        line.text.clone()
    };
    let run = styled(&text, style.body_size, &style.text.hex());
    let run = match line.emphasis {
        Emphasis::Regular => run,
        Emphasis::Bold => run.bold(),
        Emphasis::Italic => run.italic(),
    };
    Paragraph::new().add_run(run)
}

fn column_cell(lines: &[Line], width: usize, style: &TemplateStyle) -> TableCell {
    let mut cell = TableCell::new().width(width, WidthType::Dxa);
    if lines.is_empty() {
        return cell.add_paragraph(Paragraph::new());
    }
    for line in lines {
        cell = cell.add_paragraph(line_paragraph(line, style));
    }
    cell
}

fn entry_table(left: &[Line], right: &[Line], style: &TemplateStyle) -> Table {
    let left_width = (CONTENT_TWIPS as f32 * style.left_column).round() as usize;
    let right_width = CONTENT_TWIPS - left_width;
    Table::new(vec![TableRow::new(vec![
        column_cell(left, left_width, style),
        column_cell(right, right_width, style),
    ])])
    .set_grid(vec![left_width, right_width])
}

/// Image re-encoded as PNG and sized to `width_pt`, keeping its aspect ratio.
fn picture(path: &Path, width_pt: f32) -> Option<Pic> {
    let image = match image::open(path) {
        Ok(image) => image,
        Err(e) => {
            warn!("Skipping image {:?}: {}", path, e);
            return None;
        }
    };
    let (width, height) = (image.width().max(1), image.height());

    let mut png = Vec::new();
    if let Err(e) = image.write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png) {
        warn!("Failed to re-encode image {:?}: {}", path, e);
        return None;
    }

    let height_pt = width_pt * height as f32 / width as f32;
    Some(Pic::new(&png).size(
        (width_pt * EMU_PER_PT) as u32,
        (height_pt * EMU_PER_PT) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::docx::extract_text;
    use crate::render::tests::sample_profile;
    use crate::render::{layout, TemplateKind};
    use crate::schema::ProfileData;

    fn render_text(profile: &ProfileData, template: TemplateKind) -> String {
        let branding = Branding::default();
        let style = TemplateStyle::for_template(template);
        let bytes = render(&layout(profile, &branding), &style, &branding).unwrap();
        extract_text(&bytes).unwrap()
    }

    #[test]
    fn test_round_trip_personal_fields() {
        let profile = sample_profile();
        let personal = &profile.persoenliche_daten;

        for template in TemplateKind::ALL {
            let text = render_text(&profile, template);
            let lines: Vec<&str> = text.lines().collect();
            assert!(lines.contains(&personal.name.as_str()), "{:?}", template);

            let style = TemplateStyle::for_template(template);
            if style.inline_labels {
                assert!(lines.contains(&format!("Wohnort: {}", personal.wohnort).as_str()));
                assert!(lines.contains(&format!("Jahrgang: {}", personal.jahrgang).as_str()));
            } else {
                assert!(lines.contains(&personal.wohnort.as_str()));
                assert!(lines.contains(&personal.jahrgang.as_str()));
            }
        }
    }

    #[test]
    fn test_entries_and_headings() {
        let text = render_text(&sample_profile(), TemplateKind::Professional);
        assert!(text.contains("Beruflicher Werdegang"));
        assert!(text.contains("Muster Automation GmbH"));
        assert!(text.contains("• Aufgabe 1; Aufgabe 2; Aufgabe 3"));
        assert!(text.contains("Studium RWTH Aachen"));
        assert!(text.contains("Fortbildung Scrum Master"));
        assert!(text.contains("Gehalt"));
    }

    #[test]
    fn test_empty_profile_renders() {
        let text = render_text(&ProfileData::default(), TemplateKind::Classic);
        assert!(text.contains("Profil"));
        assert!(text.contains("IHR ANSPRECHPARTNER"));
    }

    #[test]
    fn test_photo_and_logo() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        image::RgbImage::from_pixel(30, 40, image::Rgb([10, 20, 30]))
            .save(&photo)
            .unwrap();

        let branding = Branding {
            logo_path: Some(photo.clone()),
            ..Branding::default()
        };
        let mut profile = sample_profile();
        profile.persoenliche_daten.profile_image = Some(photo.to_string_lossy().into_owned());

        let style = TemplateStyle::for_template(TemplateKind::Modern);
        let bytes = render(&layout(&profile, &branding), &style, &branding).unwrap();
        let text = extract_text(&bytes).unwrap();
        assert!(text.contains(&profile.persoenliche_daten.name));
    }
}
