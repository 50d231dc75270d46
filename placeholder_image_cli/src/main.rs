use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;

use placeholder_image::{DEFAULT_PROMPT, PlaceholderFont, PlaceholderRenderer, PlaceholderStyle};

#[derive(Parser, Debug)]
#[command(
    name = "placeholder-image",
    version,
    about = "Render a prompt onto a placeholder PNG, the same image the mock txt2img server returns."
)]
struct Cli {
    /// Prompt text to draw
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Output PNG file path (directories will be created)
    #[arg(short, long, default_value = "placeholder.png")]
    out: PathBuf,

    /// Font file to draw with; the system sans-serif family is used otherwise
    #[arg(long = "font-path", value_name = "PATH", env = "PLACEHOLDER_IMAGE_FONT")]
    font_path: Option<PathBuf>,

    /// Print the base64-encoded PNG to stdout instead of writing a file
    #[arg(long)]
    base64: bool,

    /// Print the wrapped lines instead of rendering
    #[arg(long, conflicts_with = "base64")]
    lines: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let font = match &cli.font_path {
        Some(path) => PlaceholderFont::load(path)
            .with_context(|| format!("failed to load font {}", path.display()))?,
        None => PlaceholderFont::system(),
    };
    let renderer = PlaceholderRenderer::new(PlaceholderStyle::default(), font);

    let mut stdout = io::stdout().lock();
    if cli.lines {
        for line in renderer.wrap_prompt(&cli.prompt) {
            writeln!(stdout, "{line}")?;
        }
        return Ok(());
    }

    if cli.base64 {
        let encoded = renderer
            .render_base64(&cli.prompt)
            .context("render failed")?;
        writeln!(stdout, "{encoded}")?;
        return Ok(());
    }

    renderer
        .render_to_file(&cli.prompt, &cli.out)
        .with_context(|| format!("render failed (out={})", cli.out.display()))?;

    writeln!(stdout, "Wrote {}", cli.out.display())?;
    Ok(())
}
