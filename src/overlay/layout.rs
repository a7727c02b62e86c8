use crate::cards::split_title;

use super::OverlayStyle;

/// Font measurements the layout needs, in pixels for a given font size.
pub trait TextMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32;
    /// Distance from the top of a line box to its baseline.
    fn ascent(&self, font_size: f32) -> f32;
    fn line_height(&self, font_size: f32) -> f32;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    pub text: String,
    pub width: f32,
}

/// A string positioned on the image. `y` is the top of the line box and
/// `baseline` the y the glyphs sit on.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedText {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub baseline: f32,
    pub font_size: f32,
    pub fill: String,
}

/// Greedy word wrap.
///
/// A word that alone is wider than `max_width` still gets a line of its own;
/// words are never split.
pub fn wrap_text<F>(text: &str, measure: F, max_width: f32) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        current.push(word);
        if current.len() > 1 && measure(&current.join(" ")) > max_width {
            current.pop();
            lines.push(current.join(" "));
            current.clear();
            current.push(word);
        }
    }
    if !current.is_empty() {
        lines.push(current.join(" "));
    }
    lines
}

pub fn layout_lines<F>(text: &str, measure: F, max_width: f32) -> Vec<LayoutLine>
where
    F: Fn(&str) -> f32,
{
    wrap_text(text, &measure, max_width)
        .into_iter()
        .map(|line| {
            let width = measure(&line);
            LayoutLine { text: line, width }
        })
        .collect()
}

/// Title card: wrapped headline, a gap, then the source line, with the whole
/// block centered vertically.
pub fn plan_title<M: TextMeasure>(
    text: &str,
    width: u32,
    height: u32,
    style: &OverlayStyle,
    font: &M,
) -> Vec<PlacedText> {
    let (title, source) = split_title(text);
    let size = style.font_size;
    let source_size = (size * style.source_scale).floor();
    let line_step = size + style.title_line_spacing;

    let max_width = width as f32 - style.title_margin;
    let lines = layout_lines(title, |line| font.width(line, size), max_width);

    let mut total_height = lines.len() as f32 * line_step;
    if !source.is_empty() {
        total_height += style.source_gap + font.line_height(source_size);
    }

    let mut y = ((height as f32 - total_height) / 2.0).floor();
    let mut placed = Vec::with_capacity(lines.len() + 1);
    for line in lines {
        placed.push(place(line, width, y, size, &style.text_color, font));
        y += line_step;
    }
    if !source.is_empty() {
        y += style.source_gap;
        let line = LayoutLine {
            text: source.to_string(),
            width: font.width(source, source_size),
        };
        placed.push(place(line, width, y, source_size, &style.source_color, font));
    }
    placed
}

/// Content card: wrapped caption anchored near the top, clear of the UI
/// chrome short-video apps draw over the first rows.
pub fn plan_content<M: TextMeasure>(
    text: &str,
    width: u32,
    height: u32,
    style: &OverlayStyle,
    font: &M,
) -> Vec<PlacedText> {
    let size = style.font_size;
    let line_step = size + style.content_line_spacing;
    let max_width = width as f32 - style.content_margin;

    let mut y = (height as f32 * style.content_top_ratio).floor();
    let mut placed = Vec::new();
    for line in layout_lines(text, |line| font.width(line, size), max_width) {
        placed.push(place(line, width, y, size, &style.text_color, font));
        y += line_step;
    }
    placed
}

fn place<M: TextMeasure>(
    line: LayoutLine,
    image_width: u32,
    y: f32,
    font_size: f32,
    fill: &str,
    font: &M,
) -> PlacedText {
    let x = ((image_width as f32 - line.width.round()) / 2.0).floor() as i32;
    PlacedText {
        text: line.text,
        x,
        y: y as i32,
        baseline: y + font.ascent(font_size),
        font_size,
        fill: fill.to_string(),
    }
}
