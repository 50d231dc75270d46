use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    result::Result as StdResult,
    sync::Arc,
};

use anyrender::ImageRenderer;
use anyrender_vello_cpu::VelloCpuImageRenderer;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use blitz::{dom::DocumentConfig, html::HtmlDocument, paint};
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, Rgb, RgbaImage, codecs::png::PngEncoder,
};
use linebender_resource_handle::Blob;
use parley::FontContext;
use serde::Serialize;
use thiserror::Error;

mod wrap;

pub use wrap::{FontMeasure, TextMeasure, wrap_words};

/// Text drawn when a request carries no prompt.
pub const DEFAULT_PROMPT: &str = "No prompt provided";
pub const IMG_WIDTH: u32 = 512;
pub const IMG_HEIGHT: u32 = 512;
pub const BACKGROUND_COLOR: Rgb<u8> = Rgb([100, 100, 100]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const FONT_SIZE: u32 = 20;
pub const MARGIN: u32 = 10;
pub const LINE_SPACING: u32 = 5;

const TEMPLATE_NAME: &str = "placeholder.html";
const PLACEHOLDER_TEMPLATE: &str = include_str!("../templates/placeholder.html");
const FALLBACK_FAMILY: &str = "sans-serif";
const PAINT_SCALE: f64 = 1.0;
const ANIMATION_TIME: f64 = 0.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read font at {path}")]
    ReadFont { source: io::Error, path: PathBuf },
    #[error("no loadable fonts found at {path}")]
    RegisterFont { path: PathBuf },
    #[error("failed to register template")]
    RegisterTemplate {
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to load template from environment")]
    LoadTemplate {
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to render template")]
    RenderTemplate {
        #[source]
        source: minijinja::Error,
    },
    #[error("a {width}x{height} canvas does not fit in memory or does not match the rendered buffer")]
    CanvasSize { width: u32, height: u32 },
    #[error("failed to encode png")]
    EncodePng {
        #[source]
        source: image::ImageError,
    },
    #[error("failed to create output directory: {path}")]
    CreateOutputDir { source: io::Error, path: PathBuf },
    #[error("failed to write png: {path}")]
    WritePng { source: io::Error, path: PathBuf },
}

pub type Result<T> = StdResult<T, RenderError>;

/// Canvas geometry and colours of the placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderStyle {
    pub width: u32,
    pub height: u32,
    pub background: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub font_size: u32,
    /// Left and top inset of the text block; also trimmed from the wrap width on both sides.
    pub margin: u32,
    /// Extra vertical space between consecutive lines.
    pub line_spacing: u32,
}

impl Default for PlaceholderStyle {
    fn default() -> Self {
        Self {
            width: IMG_WIDTH,
            height: IMG_HEIGHT,
            background: BACKGROUND_COLOR,
            text_color: TEXT_COLOR,
            font_size: FONT_SIZE,
            margin: MARGIN,
            line_spacing: LINE_SPACING,
        }
    }
}

impl PlaceholderStyle {
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "canvas dimensions are far below the exact integer range of f32"
    )]
    pub fn wrap_width(&self) -> f32 {
        self.width.saturating_sub(self.margin.saturating_mul(2)) as f32
    }

    #[must_use]
    pub fn line_advance(&self) -> u32 {
        self.font_size.saturating_add(self.line_spacing)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "font sizes are small integers")]
    fn font_size_px(&self) -> f32 {
        self.font_size as f32
    }
}

/// Font handle loaded once and shared by every render.
///
/// Without a font file the system `sans-serif` family is used.
#[derive(Clone, Default)]
pub struct PlaceholderFont {
    blob: Option<Blob<u8>>,
    family: Option<String>,
}

impl fmt::Debug for PlaceholderFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderFont")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl PlaceholderFont {
    /// Load a font file and remember the family name it registers under.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or holds no usable font face.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|source| RenderError::ReadFont {
            source,
            path: path.to_path_buf(),
        })?;
        let blob = Blob::new(Arc::new(data));

        let mut font_ctx = FontContext::new();
        let registered = font_ctx.collection.register_fonts(blob.clone(), None);
        let family_id = registered.first().map(|(id, _)| *id);
        let family = family_id
            .and_then(|id| font_ctx.collection.family_name(id).map(str::to_owned))
            .ok_or_else(|| RenderError::RegisterFont {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            blob: Some(blob),
            family: Some(family),
        })
    }

    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    /// CSS font stack used for both measuring and painting.
    #[must_use]
    pub fn font_stack(&self) -> String {
        match &self.family {
            Some(family) => format!("\"{family}\", {FALLBACK_FAMILY}"),
            None => FALLBACK_FAMILY.to_owned(),
        }
    }

    fn font_context(&self) -> FontContext {
        let mut font_ctx = FontContext::new();
        if let Some(blob) = &self.blob {
            font_ctx.collection.register_fonts(blob.clone(), None);
        }
        font_ctx
    }
}

/// Renders prompts into placeholder PNGs.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer {
    style: PlaceholderStyle,
    font: PlaceholderFont,
}

#[derive(Serialize)]
struct LineBox<'a> {
    text: &'a str,
    top: u32,
}

#[derive(Serialize)]
struct PlaceholderContext<'a> {
    width: u32,
    height: u32,
    margin: u32,
    font_size: u32,
    font_stack: String,
    background: String,
    text_color: String,
    lines: Vec<LineBox<'a>>,
}

impl PlaceholderRenderer {
    #[must_use]
    pub fn new(style: PlaceholderStyle, font: PlaceholderFont) -> Self {
        Self { style, font }
    }

    #[must_use]
    pub fn style(&self) -> &PlaceholderStyle {
        &self.style
    }

    #[must_use]
    pub fn font(&self) -> &PlaceholderFont {
        &self.font
    }

    /// Split the prompt into the lines that will be drawn.
    #[must_use]
    pub fn wrap_prompt(&self, prompt: &str) -> Vec<String> {
        let mut measure = self.measure();
        wrap_words(prompt, self.style.wrap_width(), &mut measure)
    }

    /// Render the prompt onto the canvas and encode it as an RGB PNG.
    ///
    /// # Errors
    /// Returns an error if the canvas is too large to allocate, the page
    /// template fails or the PNG cannot be encoded.
    pub fn render_png(&self, prompt: &str) -> Result<Vec<u8>> {
        let width = self.style.width;
        let height = self.style.height;
        let buffer_len = rgba_len(width, height)?;

        let mut measure = self.measure();
        let lines = wrap_words(prompt, self.style.wrap_width(), &mut measure);
        let html = self.render_html(&lines)?;

        let rgba = render_html_to_rgba(
            &html,
            width,
            height,
            buffer_len,
            measure.into_font_context(),
        );
        encode_png(rgba, width, height)
    }

    /// Render the prompt and return the PNG as standard base64.
    ///
    /// # Errors
    /// Returns an error if rendering fails.
    pub fn render_base64(&self, prompt: &str) -> Result<String> {
        self.render_png(prompt).map(|png| STANDARD.encode(png))
    }

    /// Render the prompt to a PNG file, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if rendering fails or the file cannot be written.
    pub fn render_to_file(&self, prompt: &str, out_path: &Path) -> Result<()> {
        let png = self.render_png(prompt)?;

        if let Some(parent) = out_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| RenderError::CreateOutputDir {
                source,
                path: parent.to_path_buf(),
            })?;
        }

        fs::write(out_path, png).map_err(|source| RenderError::WritePng {
            source,
            path: out_path.to_path_buf(),
        })
    }

    fn measure(&self) -> FontMeasure {
        FontMeasure::new(
            self.font.font_context(),
            self.font.font_stack(),
            self.style.font_size_px(),
        )
    }

    fn render_html(&self, lines: &[String]) -> Result<String> {
        let advance = self.style.line_advance();
        let mut top = self.style.margin;
        let mut boxes = Vec::with_capacity(lines.len());
        for text in lines {
            boxes.push(LineBox { text, top });
            top = top.saturating_add(advance);
        }

        let context = PlaceholderContext {
            width: self.style.width,
            height: self.style.height,
            margin: self.style.margin,
            font_size: self.style.font_size,
            font_stack: self.font.font_stack(),
            background: css_rgb(self.style.background),
            text_color: css_rgb(self.style.text_color),
            lines: boxes,
        };
        render_template(PLACEHOLDER_TEMPLATE, &context)
    }
}

/// Render a `MiniJinja` template into HTML with HTML auto-escaping.
///
/// # Errors
/// Returns an error if the template cannot be registered or rendered.
pub fn render_template<T: Serialize>(template: &str, data: &T) -> Result<String> {
    let mut env = minijinja::Environment::new();

    // Prompts are user text; never let them become markup.
    env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);

    env.add_template(TEMPLATE_NAME, template)
        .map_err(|source| RenderError::RegisterTemplate { source })?;

    let html = env
        .get_template(TEMPLATE_NAME)
        .map_err(|source| RenderError::LoadTemplate { source })?
        .render(data)
        .map_err(|source| RenderError::RenderTemplate { source })?;

    Ok(html)
}

fn css_rgb(color: Rgb<u8>) -> String {
    let [red, green, blue] = color.0;
    format!("{red}, {green}, {blue}")
}

/// Byte length of an RGBA8 buffer for the canvas.
fn rgba_len(width: u32, height: u32) -> Result<usize> {
    let width_px = usize::try_from(width).ok();
    let height_px = usize::try_from(height).ok();
    width_px
        .zip(height_px)
        .and_then(|(columns, rows)| columns.checked_mul(rows))
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(RenderError::CanvasSize { width, height })
}

fn render_html_to_rgba(
    html: &str,
    width: u32,
    height: u32,
    buffer_len: usize,
    font_ctx: FontContext,
) -> Vec<u8> {
    let cfg = DocumentConfig {
        font_ctx: Some(font_ctx),
        ..Default::default()
    };

    let mut doc = HtmlDocument::from_html(html, cfg);
    doc.resolve(ANIMATION_TIME);
    doc.resolve_layout();

    let mut renderer = VelloCpuImageRenderer::new(width, height);
    let mut rgba = vec![0_u8; buffer_len];

    renderer.render(
        |scene| {
            paint::paint_scene(scene, &doc, PAINT_SCALE, width, height);
        },
        &mut rgba,
    );

    rgba
}

fn encode_png(rgba: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
    let canvas = RgbaImage::from_raw(width, height, rgba)
        .ok_or(RenderError::CanvasSize { width, height })?;
    let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();

    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|source| RenderError::EncodePng { source })?;
    Ok(buffer)
}
