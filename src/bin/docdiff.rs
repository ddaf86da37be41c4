//! CLI binary for docdiff.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ComparisonConfig`, writes the composite and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use docdiff::{compare_files, CompareMode, ComparisonConfig, ComparisonResult};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Difference of two scans, lossless PNG
  docdiff original.png revised.png -o diff.png

  # Compare page 3 of one PDF with page 1 of another (0-based pages)
  docdiff contract_v1.pdf contract_v2.pdf --page1 2 --page2 0

  # Overlay mode with custom colours
  docdiff a.tif b.tif --mode overlay --color-overlay-file1 '#3B82F6'

  # Also write per-document highlight images, print JSON metadata
  docdiff a.jpg b.jpg --per-side out/ --json

COLOURS (defaults):
  diff-file1     #0000FF   only in the first document
  diff-file2     #FF0000   only in the second document
  diff-common    #000000   in both documents
  overlay-file1  #FFA500   first document (overlay mode)
  overlay-file2  #00FF00   second document (overlay mode)

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory) for PDF inputs
  RUST_LOG          Log filter, overrides -v / -q
"#;

/// Visual difference of two documents (images, PDFs, multi-page TIFFs).
#[derive(Parser, Debug)]
#[command(
    name = "docdiff",
    version,
    about = "Align two documents and highlight what changed",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// First (reference) document.
    file1: PathBuf,

    /// Second document, aligned onto the first.
    file2: PathBuf,

    /// Output image. `.jpg`/`.jpeg` writes the lossy preview, anything else PNG.
    #[arg(short, long, env = "DOCDIFF_OUTPUT", default_value = "comparison.png")]
    output: PathBuf,

    /// Visualisation mode.
    #[arg(long, env = "DOCDIFF_MODE", value_enum, default_value = "difference")]
    mode: ModeArg,

    /// Luminance difference (0–255) that counts as a change.
    #[arg(long, env = "DOCDIFF_DIFF_THRESHOLD", default_value_t = 30)]
    diff_threshold: u8,

    /// Luminance (0–255) at or below which a pixel counts as ink.
    #[arg(long, env = "DOCDIFF_BIN_THRESHOLD", default_value_t = 200)]
    bin_threshold: u8,

    /// Keypoint budget per document for alignment.
    #[arg(long = "features", env = "DOCDIFF_FEATURES", default_value_t = 4000,
          value_parser = clap::value_parser!(u64).range(1..))]
    features: u64,

    /// 0-based page of the first document (PDF/TIFF).
    #[arg(long, env = "DOCDIFF_PAGE1", default_value_t = 0)]
    page1: usize,

    /// 0-based page of the second document (PDF/TIFF).
    #[arg(long, env = "DOCDIFF_PAGE2", default_value_t = 0)]
    page2: usize,

    /// PDF rendering DPI (72–400).
    #[arg(long, env = "DOCDIFF_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest raster side before alignment.
    #[arg(long, env = "DOCDIFF_MAX_DIMENSION", default_value_t = 4000)]
    max_dimension: u32,

    /// Colour for content only in the first document (difference mode).
    #[arg(long, value_name = "HEX")]
    color_diff_file1: Option<String>,

    /// Colour for content only in the second document (difference mode).
    #[arg(long, value_name = "HEX")]
    color_diff_file2: Option<String>,

    /// Colour for shared content (difference mode).
    #[arg(long, value_name = "HEX")]
    color_diff_common: Option<String>,

    /// Colour of the first document (overlay mode).
    #[arg(long, value_name = "HEX")]
    color_overlay_file1: Option<String>,

    /// Colour of the second document (overlay mode).
    #[arg(long, value_name = "HEX")]
    color_overlay_file2: Option<String>,

    /// Also write per-document highlight JPEGs into this directory.
    #[arg(long, value_name = "DIR")]
    per_side: Option<PathBuf>,

    /// Print result metadata as JSON on stdout.
    #[arg(long, env = "DOCDIFF_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCDIFF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCDIFF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Difference,
    Overlay,
}

impl From<ModeArg> for CompareMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Difference => CompareMode::Difference,
            ModeArg::Overlay => CompareMode::Overlay,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_spinner = !cli.quiet && !cli.json && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_spinner {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    let spinner = show_spinner.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Comparing");
        bar.set_message(format!(
            "{} ↔ {}",
            cli.file1.display(),
            cli.file2.display()
        ));
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let outcome = compare_files(&cli.file1, &cli.file2, &config).await;
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }
    let result = outcome.context("Comparison failed")?;

    // ── Write outputs ────────────────────────────────────────────────────
    let lossy_output = cli
        .output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
    let composite = if lossy_output {
        &result.composite_lossy
    } else {
        &result.composite_lossless
    };
    write_atomic(&cli.output, &composite.bytes).await?;

    let per_side_paths = match &cli.per_side {
        Some(dir) => write_per_side(dir, &result).await?,
        None => Vec::new(),
    };

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&result.metadata)
            .context("Failed to serialise metadata")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&cli, &result, &per_side_paths);
    }

    Ok(())
}

/// Map CLI args to `ComparisonConfig`.
fn build_config(cli: &Cli) -> Result<ComparisonConfig> {
    let mut config = ComparisonConfig::builder()
        .mode(cli.mode.into())
        .diff_threshold(cli.diff_threshold)
        .bin_threshold(cli.bin_threshold)
        .feature_count(cli.features as usize)
        .page_a(cli.page1)
        .page_b(cli.page2)
        .dpi(cli.dpi)
        .max_dimension(cli.max_dimension)
        .build()
        .context("Invalid configuration")?;

    let overrides = [
        ("diff_file1", &cli.color_diff_file1),
        ("diff_file2", &cli.color_diff_file2),
        ("diff_common", &cli.color_diff_common),
        ("overlay_file1", &cli.color_overlay_file1),
        ("overlay_file2", &cli.color_overlay_file2),
    ];
    for (key, value) in overrides {
        if let Some(hex) = value {
            config
                .colors
                .set(key, hex)
                .with_context(|| format!("Invalid --color-{}", key.replace('_', "-")))?;
        }
    }
    Ok(config)
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}

async fn write_per_side(dir: &Path, result: &ComparisonResult) -> Result<Vec<PathBuf>> {
    let Some([a, b]) = &result.per_side_lossy else {
        tracing::warn!("--per-side ignored: per-side images exist only in difference mode");
        return Ok(Vec::new());
    };
    let paths = vec![dir.join("file1_highlighted.jpg"), dir.join("file2_highlighted.jpg")];
    write_atomic(&paths[0], &a.bytes).await?;
    write_atomic(&paths[1], &b.bytes).await?;
    Ok(paths)
}

fn print_summary(cli: &Cli, result: &ComparisonResult, per_side: &[PathBuf]) {
    let meta = &result.metadata;
    let (mark, alignment) = if meta.alignment_failed {
        (yellow("⚠"), yellow("fallback (centred fit)"))
    } else {
        (green("✔"), green("feature match"))
    };
    eprintln!(
        "{}  {} {}  {}ms  →  {}",
        mark,
        meta.mode,
        meta.result_size,
        meta.timings.total_ms,
        bold(&cli.output.display().to_string()),
    );
    eprintln!(
        "   alignment: {}  quality {:.2}  {}",
        alignment,
        meta.match_quality,
        dim(&format!(
            "{}/{} keypoints, {} matches, {} inliers",
            meta.alignment.keypoints[0],
            meta.alignment.keypoints[1],
            meta.alignment.matches,
            meta.alignment.inliers
        )),
    );
    eprintln!(
        "   pages: {} / {}",
        meta.page_counts[0], meta.page_counts[1]
    );
    for path in per_side {
        eprintln!("   {}", dim(&path.display().to_string()));
    }
}
