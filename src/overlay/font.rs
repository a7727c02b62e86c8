use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use ttf_parser::name_id;
use ttf_parser::Face;
use usvg::fontdb;

use super::layout::TextMeasure;
use crate::paths;

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    ascender: i16,
    descender: i16,
    weight: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em.max(1) as f32
    }
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("weight", &self.weight)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// The overlay font: parsed metrics when a face was found, plus the font
/// database the rasterizer draws with.
pub struct OverlayFont {
    metrics: Option<FontMetrics>,
    fontdb: Arc<fontdb::Database>,
}

impl OverlayFont {
    pub fn metrics(&self) -> Option<&FontMetrics> {
        self.metrics.as_ref()
    }

    pub fn family(&self) -> Option<&str> {
        self.metrics.as_ref().and_then(|metrics| metrics.family())
    }

    pub fn weight(&self) -> u16 {
        self.metrics.as_ref().map(|m| m.weight()).unwrap_or(700)
    }

    pub fn fontdb(&self) -> Arc<fontdb::Database> {
        Arc::clone(&self.fontdb)
    }
}

impl TextMeasure for OverlayFont {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        measure_text_width_px(text, font_size, self.metrics.as_ref())
    }

    fn ascent(&self, font_size: f32) -> f32 {
        match &self.metrics {
            Some(metrics) => metrics.ascender as f32 * metrics.scale(font_size),
            None => font_size * 0.8,
        }
    }

    fn line_height(&self, font_size: f32) -> f32 {
        match &self.metrics {
            Some(metrics) => {
                (metrics.ascender as f32 - metrics.descender as f32) * metrics.scale(font_size)
            }
            None => font_size,
        }
    }
}

/// Ordered font candidates, resolved at most once.
pub struct FontCache {
    paths: Vec<String>,
    families: Vec<String>,
    resolved: OnceLock<OverlayFont>,
}

impl FontCache {
    pub fn new(paths: Vec<String>, families: Vec<String>) -> Self {
        Self {
            paths,
            families,
            resolved: OnceLock::new(),
        }
    }

    pub fn get(&self) -> &OverlayFont {
        self.resolved
            .get_or_init(|| resolve_overlay_font(&self.paths, &self.families))
    }
}

/// Tries font files first, then installed families, then any installed face.
/// Never fails: only a system without a single font ends up with estimated
/// metrics and no drawable face.
///
/// The generic `sans-serif` family is pointed at the resolved face, since
/// fontdb maps it to Arial by default.
pub fn resolve_overlay_font(paths: &[String], families: &[String]) -> OverlayFont {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    let mut metrics = None;
    for candidate in paths {
        let path = paths::expand_home(candidate);
        if !path.exists() {
            continue;
        }
        match load_font_metrics(&path) {
            Ok(found) => {
                info!("loaded overlay font: {}", path.display());
                db.load_font_data(found.data().to_vec());
                metrics = Some(found);
                break;
            }
            Err(err) => debug!("skipping font {}: {}", path.display(), err),
        }
    }

    if metrics.is_none() {
        for family in families {
            match load_font_metrics_from_family(&db, family) {
                Ok(found) => {
                    info!("loaded overlay font family: {}", family);
                    metrics = Some(found);
                    break;
                }
                Err(err) => debug!("skipping font family {}: {}", family, err),
            }
        }
    }

    if metrics.is_none() {
        match load_first_available_face(&db) {
            Ok(found) => {
                warn!(
                    "no configured overlay font found; falling back to {}",
                    found.family().unwrap_or("unnamed face")
                );
                metrics = Some(found);
            }
            Err(err) => warn!("no overlay font available ({}); text will not be drawn", err),
        }
    }

    if let Some(family) = metrics.as_ref().and_then(FontMetrics::family) {
        db.set_sans_serif_family(family.to_string());
    }

    OverlayFont {
        metrics,
        fontdb: Arc::new(db),
    }
}

pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, font.face_index) {
            let mut advance = 0u32;
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                if ch == ' ' {
                    advance = advance.saturating_add(font.space_advance as u32);
                    continue;
                }
                if let Some(glyph) = face.glyph_index(ch) {
                    let glyph_advance = face.glyph_hor_advance(glyph).unwrap_or(font.space_advance);
                    advance = advance.saturating_add(glyph_advance as u32);
                } else {
                    advance = advance.saturating_add(font.space_advance as u32);
                }
            }
            return advance as f32 * font.scale(font_size);
        }
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_uppercase() {
        0.68
    } else if ch.is_ascii_alphanumeric() {
        0.58
    } else if ch.is_ascii() {
        0.35
    } else if ch.is_alphabetic() {
        0.6
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

fn load_font_metrics_from_data(data: &[u8]) -> Result<FontMetrics> {
    let data = Arc::new(data.to_vec());
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    (0..count)
        .find_map(|index| metrics_for_face(&data, index))
        .ok_or_else(|| anyhow!("failed to parse font data"))
}

fn metrics_for_face(data: &Arc<Vec<u8>>, index: u32) -> Option<FontMetrics> {
    let face = Face::parse(data, index).ok()?;
    let units_per_em = face.units_per_em().max(1);
    let space_advance = face
        .glyph_index(' ')
        .and_then(|id| face.glyph_hor_advance(id))
        .unwrap_or(units_per_em / 2);
    Some(FontMetrics {
        data: Arc::clone(data),
        units_per_em,
        space_advance,
        ascender: face.ascender(),
        descender: face.descender(),
        weight: face.weight().to_number(),
        family: extract_family_name(&face),
        face_index: index,
    })
}

fn load_font_metrics_from_family(db: &fontdb::Database, family: &str) -> Result<FontMetrics> {
    let is_sans = family.eq_ignore_ascii_case("sans-serif");
    let families = if is_sans {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        weight: fontdb::Weight::BOLD,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, face_index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    metrics_for_face(&Arc::new(data), face_index)
        .ok_or_else(|| anyhow!("failed to parse font data: {}", family))
}

/// Any installed face, bold ones first. The family is taken from fontdb so
/// the SVG names it exactly as the rasterizer looks it up.
fn load_first_available_face(db: &fontdb::Database) -> Result<FontMetrics> {
    let face = db
        .faces()
        .find(|face| face.weight == fontdb::Weight::BOLD && face.style == fontdb::Style::Normal)
        .or_else(|| db.faces().next())
        .ok_or_else(|| anyhow!("font database is empty"))?;
    let family = face.families.first().map(|(name, _)| name.clone());
    let (data, face_index) = db
        .with_face_data(face.id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load fallback font data"))?;
    let mut metrics = metrics_for_face(&Arc::new(data), face_index)
        .ok_or_else(|| anyhow!("failed to parse fallback font"))?;
    if family.is_some() {
        metrics.family = family;
    }
    Ok(metrics)
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_width_scales_with_font_size() {
        let small = measure_text_width_px("Manchete", 10.0, None);
        let large = measure_text_width_px("Manchete", 20.0, None);
        assert!(small > 0.0);
        assert!((large - small * 2.0).abs() < 1e-3);
    }

    #[test]
    fn estimated_width_counts_accented_letters() {
        let plain = measure_text_width_px("saude", 65.0, None);
        let accented = measure_text_width_px("saúde", 65.0, None);
        assert!(accented > 0.0);
        assert!((accented - plain).abs() < 65.0 * 0.1);
    }

    #[test]
    fn missing_font_files_do_not_fail_resolution() {
        let font = resolve_overlay_font(
            &["/nonexistent/Montserrat-Bold.ttf".to_string()],
            &["No Such Family 123".to_string()],
        );
        assert!(font.width("abc", 65.0) > 0.0);
        assert!(font.ascent(65.0) > 0.0);
    }

    #[test]
    fn unresolved_candidates_fall_back_to_an_installed_face() {
        let font = resolve_overlay_font(&[], &["No Such Family 123".to_string()]);
        let family = font.family().expect("an installed fallback face");
        let db = font.fontdb();
        let query = fontdb::Query {
            families: &[fontdb::Family::SansSerif],
            ..Default::default()
        };
        let id = db.query(&query).expect("sans-serif resolves");
        let face = db.face(id).expect("face info");
        assert!(face.families.iter().any(|(name, _)| name == family));
    }
}
