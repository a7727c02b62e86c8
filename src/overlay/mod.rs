mod font;
mod layout;
mod render;

pub use font::{FontCache, FontMetrics, OverlayFont, load_font_metrics, resolve_overlay_font};
pub use layout::{
    LayoutLine, PlacedText, TextMeasure, layout_lines, plan_content, plan_title, wrap_text,
};
pub use render::{TextCompositor, build_overlay_svg, encode_png};

/// Fixed layout and color rules for card text, in pixels unless noted.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub font_size: f32,
    /// Stroke radius; the outline is drawn at every offset within it.
    pub stroke_width: u32,
    pub text_color: String,
    pub stroke_color: String,
    pub source_color: String,
    /// Horizontal room subtracted from the image width before wrapping titles.
    pub title_margin: f32,
    pub content_margin: f32,
    pub title_line_spacing: f32,
    pub content_line_spacing: f32,
    pub source_gap: f32,
    /// Source line size as a fraction of `font_size`, floored.
    pub source_scale: f32,
    /// First content line, as a fraction of the image height.
    pub content_top_ratio: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_size: 65.0,
            stroke_width: 5,
            text_color: "#ffffff".to_string(),
            stroke_color: "#000000".to_string(),
            source_color: "#ff7800".to_string(),
            title_margin: 300.0,
            content_margin: 200.0,
            title_line_spacing: 20.0,
            content_line_spacing: 30.0,
            source_gap: 60.0,
            source_scale: 0.7,
            content_top_ratio: 0.10,
        }
    }
}
