use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use usvg::{Options, Tree, fontdb};

use super::font::{FontCache, OverlayFont};
use super::layout::{PlacedText, plan_content, plan_title};
use super::OverlayStyle;

const FALLBACK_FAMILY: &str = "sans-serif";

/// Draws card text onto generated images.
pub struct TextCompositor {
    style: OverlayStyle,
    fonts: FontCache,
}

impl TextCompositor {
    pub fn new(style: OverlayStyle, fonts: FontCache) -> Self {
        Self { style, fonts }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn font(&self) -> &OverlayFont {
        self.fonts.get()
    }

    /// Lays out `text` for a card at `position` (1 is the title card).
    pub fn plan(&self, text: &str, position: usize, width: u32, height: u32) -> Vec<PlacedText> {
        let text: String = text.nfc().collect();
        let font = self.fonts.get();
        if position == 1 {
            plan_title(&text, width, height, &self.style, font)
        } else {
            plan_content(&text, width, height, &self.style, font)
        }
    }

    /// Composites stroked text over `image` in place.
    ///
    /// Rendering problems are logged and leave the image untouched.
    pub fn overlay(&self, image: &mut RgbaImage, text: &str, position: usize) {
        if text.trim().is_empty() {
            return;
        }
        let (width, height) = image.dimensions();
        let placed = self.plan(text, position, width, height);
        if placed.is_empty() {
            return;
        }
        let font = self.fonts.get();
        let svg = build_overlay_svg(width, height, &placed, &self.style, font.family(), font.weight());
        debug!(
            position,
            lines = placed.len(),
            "compositing card text ({} bytes of svg)",
            svg.len()
        );
        match rasterize(&svg, font.fontdb(), width, height) {
            Ok(layer) => image::imageops::overlay(image, &layer, 0, 0),
            Err(err) => warn!("text overlay skipped for card {}: {}", position, err),
        }
    }
}

/// Builds a transparent SVG layer holding every placed line. Each line is
/// drawn once per stroke offset in the stroke color, then once in its fill.
pub fn build_overlay_svg(
    width: u32,
    height: u32,
    lines: &[PlacedText],
    style: &OverlayStyle,
    family: Option<&str>,
    weight: u16,
) -> String {
    let family = escape_xml(family.unwrap_or(FALLBACK_FAMILY));
    let radius = style.stroke_width as i32;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    for line in lines {
        let escaped = escape_xml(&line.text);
        svg.push_str(&format!(
            r#"<g font-family="{family}" font-weight="{weight}" font-size="{size}">"#,
            family = family,
            weight = weight,
            size = line.font_size
        ));
        if radius > 0 {
            svg.push_str(&format!(r#"<g fill="{}">"#, escape_xml(&style.stroke_color)));
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    svg.push_str(&format!(
                        r#"<text x="{x}" y="{y}">{text}</text>"#,
                        x = line.x + dx,
                        y = line.baseline + dy as f32,
                        text = escaped
                    ));
                }
            }
            svg.push_str("</g>");
        }
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" fill="{fill}">{text}</text>"#,
            x = line.x,
            y = line.baseline,
            fill = escape_xml(&line.fill),
            text = escaped
        ));
        svg.push_str("</g>");
    }
    svg.push_str("</svg>");
    svg
}

fn rasterize(
    svg: &str,
    fontdb: Arc<fontdb::Database>,
    width: u32,
    height: u32,
) -> Result<RgbaImage> {
    let options = Options {
        fontdb,
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;
    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| anyhow!("empty overlay size"))?;
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let mut raw = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        raw.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| anyhow!("failed to build overlay layer"))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode PNG")?;
    Ok(bytes)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::TextMeasure;
    use image::Rgba;

    fn compositor() -> TextCompositor {
        TextCompositor::new(
            OverlayStyle::default(),
            FontCache::new(Vec::new(), vec!["No Such Family 123".to_string()]),
        )
    }

    fn placed(text: &str, fill: &str) -> PlacedText {
        PlacedText {
            text: text.to_string(),
            x: 100,
            y: 200,
            baseline: 252.0,
            font_size: 65.0,
            fill: fill.to_string(),
        }
    }

    #[test]
    fn svg_draws_every_stroke_offset_plus_fill() {
        let style = OverlayStyle::default();
        let lines = [placed("um", "#ffffff"), placed("dois", "#ffffff")];
        let svg = build_overlay_svg(1080, 1920, &lines, &style, Some("Montserrat"), 700);
        // 11 x 11 offsets minus the center, plus the fill pass
        assert_eq!(svg.matches("<text ").count(), 2 * 121);
        assert!(svg.contains(r#"x="95" y="247">um<"#));
        assert!(svg.contains(r#"x="105" y="257">um<"#));
        assert!(svg.contains(r##"x="100" y="252" fill="#ffffff">um<"##));
        assert!(svg.contains(r#"font-family="Montserrat" font-weight="700""#));
    }

    #[test]
    fn svg_uses_source_color_only_for_source_fill() {
        let style = OverlayStyle::default();
        let lines = [placed("Manchete", "#ffffff"), placed("Fonte", "#ff7800")];
        let svg = build_overlay_svg(1080, 1920, &lines, &style, None, 700);
        assert_eq!(svg.matches("#ff7800").count(), 1);
        assert!(svg.contains(r#"font-family="sans-serif""#));
    }

    #[test]
    fn svg_escapes_markup_in_text() {
        let style = OverlayStyle::default();
        let svg = build_overlay_svg(10, 10, &[placed("A & B <c>", "#fff")], &style, None, 400);
        assert!(svg.contains("A &amp; B &lt;c&gt;"));
        assert!(!svg.contains("<c>"));
    }

    #[test]
    fn zero_stroke_width_draws_fill_only() {
        let style = OverlayStyle {
            stroke_width: 0,
            ..OverlayStyle::default()
        };
        let svg = build_overlay_svg(10, 10, &[placed("x", "#fff")], &style, None, 400);
        assert_eq!(svg.matches("<text ").count(), 1);
    }

    #[test]
    fn plan_picks_layout_by_position() {
        let compositor = compositor();
        let title = compositor.plan("Manchete curta\nFonte", 1, 1080, 1920);
        assert_eq!(title.last().map(|line| line.fill.as_str()), Some("#ff7800"));
        let content = compositor.plan("Manchete curta\nFonte", 2, 1080, 1920);
        assert!(content.iter().all(|line| line.fill == "#ffffff"));
        assert_eq!(content[0].y, 192);
    }

    #[test]
    fn overlay_keeps_dimensions_and_skips_blank_text() {
        let compositor = compositor();
        let blank = RgbaImage::from_pixel(108, 192, Rgba([10, 20, 30, 255]));

        let mut untouched = blank.clone();
        compositor.overlay(&mut untouched, "   ", 2);
        assert_eq!(untouched, blank);

        let mut image = blank.clone();
        compositor.overlay(&mut image, "Texto do cartão", 2);
        assert_eq!(image.dimensions(), (108, 192));
        assert!(image.pixels().all(|pixel| pixel[3] == 255));
    }

    const DEJAVU_BOLD: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

    fn gray(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
    }

    fn changed_pixels(before: &RgbaImage, after: &RgbaImage) -> usize {
        before
            .pixels()
            .zip(after.pixels())
            .filter(|(a, b)| a != b)
            .count()
    }

    fn close_to(pixel: &Rgba<u8>, rgb: [u8; 3]) -> bool {
        pixel
            .0
            .iter()
            .zip(rgb)
            .all(|(channel, want)| channel.abs_diff(want) <= 12)
    }

    /// Middle of the glyph run: half the advance across, a third of the
    /// font size above the baseline.
    fn glyph_center(compositor: &TextCompositor, line: &PlacedText) -> (u32, u32) {
        let width = compositor.font().width(&line.text, line.font_size);
        let x = line.x as f32 + width / 2.0;
        let y = line.baseline - line.font_size / 3.0;
        (x.round() as u32, y.round() as u32)
    }

    #[test]
    fn overlay_draws_text_without_any_configured_font() {
        let compositor =
            TextCompositor::new(OverlayStyle::default(), FontCache::new(Vec::new(), Vec::new()));
        let before = gray(1080, 1920);
        let mut image = before.clone();
        compositor.overlay(&mut image, "Governo confirma salário mínimo\nMinistério", 1);
        assert!(changed_pixels(&before, &image) > 1000);
    }

    #[test]
    fn overlay_with_unknown_family_still_draws() {
        let before = gray(1080, 1920);
        let mut image = before.clone();
        compositor().overlay(&mut image, "Texto do cartão", 2);
        assert!(changed_pixels(&before, &image) > 1000);
    }

    #[test]
    fn rasterized_title_has_white_fill_black_stroke_and_orange_source() {
        let compositor = TextCompositor::new(
            OverlayStyle::default(),
            FontCache::new(vec![DEJAVU_BOLD.to_string()], Vec::new()),
        );
        assert!(compositor.font().metrics().is_some(), "DejaVu Sans Bold not installed");

        let text = "I\nI";
        let mut image = gray(1080, 1920);
        let placed = compositor.plan(text, 1, 1080, 1920);
        assert_eq!(placed.len(), 2);
        compositor.overlay(&mut image, text, 1);

        let (x, y) = glyph_center(&compositor, &placed[0]);
        assert!(close_to(image.get_pixel(x, y), [255, 255, 255]));

        let edge = (0..x)
            .rev()
            .find(|&left| !close_to(image.get_pixel(left, y), [255, 255, 255]))
            .expect("glyph edge");
        let outside = image.get_pixel(edge - 2, y);
        assert!(close_to(outside, [0, 0, 0]), "expected stroke, got {:?}", outside);
        assert!(close_to(image.get_pixel(edge - 20, y), [128, 128, 128]));

        let (x, y) = glyph_center(&compositor, &placed[1]);
        assert!(close_to(image.get_pixel(x, y), [0xff, 0x78, 0x00]));
    }

    #[test]
    fn encode_png_writes_png_signature() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let bytes = encode_png(&image).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
