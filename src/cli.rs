// ============================================================================
// RestoreFE CLI - headless adjust + mask export via command-line arguments
// ============================================================================
//
// Usage examples:
//   restorefe -i photo.jpg --contrast 30 --saturation -20 -o adjusted.png
//   restorefe -i photo.jpg --strokes scratches.json --mask-out mask.png --payload-out mask.json
//   restorefe -i "scans/*.jpg" --brightness 10 --output-dir out/
//   restorefe -i session.rfs -o adjusted.png --mask-out mask.png
//
// Stroke files hold an array of strokes, each an array of {"x","y"} points in
// display-surface coordinates.  They are replayed through the same pointer
// path as interactive painting.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::StrokePoint;
use crate::components::tools::{MAX_BRUSH_SIZE, MIN_BRUSH_SIZE};
use crate::io::{DEFAULT_QUALITY, encode_and_write, load_image_sync, write_hole_mask};
use crate::ops::adjustments::AdjustmentParams;
use crate::project::{PointerEvent, Session};
use crate::settings::AppSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// RestoreFE headless photo pre-processor.
#[derive(Parser, Debug)]
#[command(
    name = "restorefe",
    about = "RestoreFE headless photo adjustment and damage-mask export",
    long_about = "Apply tonal adjustments to photos and rasterize damage masks from\n\
                  recorded brush strokes, without opening an editor.\n\
                  Supports JPEG, PNG, BMP, TIFF, WEBP and RestoreFE session (.rfs) files.\n\n\
                  Example:\n  \
                  restorefe -i photo.jpg --strokes strokes.json --contrast 20 -o out.png --mask-out mask.png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.jpg", "scans/*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Stroke JSON to replay onto the mask (display coordinates).
    #[arg(long, value_name = "FILE.json")]
    pub strokes: Option<PathBuf>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-100..100")]
    pub brightness: i32,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-100..100")]
    pub contrast: i32,

    /// Negative = cooler, positive = warmer.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-100..100")]
    pub temperature: i32,

    /// -100 = grayscale.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-100..100")]
    pub saturation: i32,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-100..100")]
    pub enhancement: i32,

    /// Brush diameter for replayed strokes (5-100). Defaults to the saved setting.
    #[arg(long, value_name = "PX")]
    pub brush_size: Option<u32>,

    /// Width of the display surface the strokes were recorded on.
    /// Defaults to the image width.
    #[arg(long, value_name = "W")]
    pub display_width: Option<u32>,

    /// Height of the display surface the strokes were recorded on.
    /// Defaults to the image height.
    #[arg(long, value_name = "H")]
    pub display_height: Option<u32>,

    /// Output file for the adjusted image. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing. Writes <stem>.png and, when
    /// strokes are given, <stem>_mask.png and <stem>_payload.json.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Full-resolution binary hole mask (PNG). Single-file input only.
    #[arg(long, value_name = "FILE.png")]
    pub mask_out: Option<PathBuf>,

    /// Serialized mask payload (JSON). Single-file input only.
    #[arg(long, value_name = "FILE.json")]
    pub payload_out: Option<PathBuf>,

    /// Save the resulting session (.rfs). Single-file input only.
    #[arg(long, value_name = "FILE.rfs")]
    pub session_out: Option<PathBuf>,

    /// JPEG quality (1-100).
    #[arg(short, long, default_value_t = DEFAULT_QUALITY, value_name = "1-100")]
    pub quality: u8,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Write the effective settings (including --brush-size) back to the
    /// settings file.
    #[arg(long)]
    pub save_settings: bool,

    /// Echo log lines and per-file timing to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    fn params(&self) -> AdjustmentParams {
        AdjustmentParams {
            brightness: self.brightness,
            contrast: self.contrast,
            temperature: self.temperature,
            saturation: self.saturation,
            enhancement: self.enhancement,
        }
    }

    fn single_file_outputs(&self) -> bool {
        self.output.is_some() || self.mask_out.is_some() || self.payload_out.is_some() || self.session_out.is_some()
    }
}

/// Where one input's results go.
#[derive(Debug, Default, Clone, PartialEq)]
struct OutputPaths {
    image: Option<PathBuf>,
    mask: Option<PathBuf>,
    payload: Option<PathBuf>,
    session: Option<PathBuf>,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.single_file_outputs() {
        eprintln!(
            "error: {} input files given but -o/--mask-out/--payload-out/--session-out accept a single file.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let mut settings = match &args.settings {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    if let Some(size) = args.brush_size {
        settings.brush_size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
    }
    if args.save_settings {
        match &args.settings {
            Some(path) => settings.save_to(path),
            None => settings.save(),
        }
        crate::log_info!("Settings written back");
    }

    let strokes = match &args.strokes {
        Some(path) => match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|src| parse_strokes(&src))
        {
            Ok(s) => Some(s),
            Err(e) => {
                eprintln!("error: could not read strokes '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();
        let outputs = build_output_paths(&args, input_path, strokes.is_some());

        match run_one(input_path, &outputs, strokes.as_deref(), &args, &settings) {
            Ok(summary) => {
                crate::log_info!("CLI processed {}: {}", input_path.display(), summary);
                if args.verbose || multi {
                    println!(
                        "  {} ({:.0}ms)",
                        summary,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                crate::log_err!("CLI failed on {}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(
    input: &Path,
    outputs: &OutputPaths,
    strokes: Option<&[Vec<StrokePoint>]>,
    args: &CliArgs,
    settings: &AppSettings,
) -> Result<String, String> {
    // -- Step 1: Load ----------------------------------------------------
    let is_session = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("rfs"));

    let mut session = if is_session {
        Session::load(input, settings).map_err(|e| format!("session load failed: {}", e))?
    } else {
        let original = load_image_sync(input, settings.max_image_dimension)
            .map_err(|e| format!("load failed: {}", e))?;
        let display = (
            args.display_width.unwrap_or(original.width()),
            args.display_height.unwrap_or(original.height()),
        );
        Session::new(original, display, settings).map_err(|e| format!("invalid display size: {}", e))?
    };

    session.enable_autosave(settings);

    // -- Step 2: Adjust --------------------------------------------------
    let params = args.params();
    if !params.is_neutral() || !is_session {
        session.set_params(params);
    }

    // -- Step 3: Replay strokes ------------------------------------------
    if let Some(size) = args.brush_size {
        session.set_brush_size(size);
    }
    if let Some(strokes) = strokes {
        replay_strokes(&mut session, strokes);
    }

    // -- Step 4: Write ---------------------------------------------------
    let mut written = Vec::new();
    if let Some(path) = &outputs.image {
        encode_and_write(session.displayed_buffer(), path, args.quality)
            .map_err(|e| format!("save failed: {}", e))?;
        written.push(path.display().to_string());
    }
    if let Some(path) = &outputs.mask {
        let mask = session.serialize_mask().rasterize_hole_mask();
        write_hole_mask(&mask, path).map_err(|e| format!("mask save failed: {}", e))?;
        written.push(path.display().to_string());
    }
    if let Some(path) = &outputs.payload {
        let json = session.serialize_mask().to_json()?;
        std::fs::write(path, json).map_err(|e| format!("payload save failed: {}", e))?;
        written.push(path.display().to_string());
    }
    if let Some(path) = &outputs.session {
        session.save(path).map_err(|e| format!("session save failed: {}", e))?;
        written.push(path.display().to_string());
    }

    Ok(format!(
        "{} stroke(s), {} -> {}",
        session.stroke_count(),
        describe_params(&session.params()),
        if written.is_empty() { "nothing written".to_string() } else { written.join(", ") }
    ))
}

/// Feed recorded strokes through the pointer handlers: press on the first
/// point, move through the rest, release on the last.
fn replay_strokes(session: &mut Session, strokes: &[Vec<StrokePoint>]) {
    for stroke in strokes {
        let Some(first) = stroke.first() else { continue };
        session.on_pointer_down(PointerEvent::new(first.x, first.y));
        for p in &stroke[1..] {
            session.on_pointer_move(PointerEvent::new(p.x, p.y));
        }
        let last = stroke.last().unwrap_or(first);
        session.on_pointer_up(PointerEvent::new(last.x, last.y));
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse `[[{"x":..,"y":..},..],..]`.  Non-finite points are dropped.
pub fn parse_strokes(src: &str) -> Result<Vec<Vec<StrokePoint>>, String> {
    let raw: Vec<Vec<StrokePoint>> = serde_json::from_str(src).map_err(|e| e.to_string())?;
    Ok(raw
        .into_iter()
        .map(|s| s.into_iter().filter(StrokePoint::is_finite).collect::<Vec<_>>())
        .filter(|s| !s.is_empty())
        .collect())
}

fn describe_params(p: &AdjustmentParams) -> String {
    if p.is_neutral() {
        return "neutral".to_string();
    }
    format!(
        "b{} c{} t{} s{} e{}",
        p.brightness, p.contrast, p.temperature, p.saturation, p.enhancement
    )
}

fn build_output_paths(args: &CliArgs, input: &Path, has_strokes: bool) -> OutputPaths {
    if let Some(dir) = &args.output_dir {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        return OutputPaths {
            image: Some(args.output.clone().unwrap_or_else(|| dir.join(format!("{}.png", stem)))),
            mask: args
                .mask_out
                .clone()
                .or_else(|| has_strokes.then(|| dir.join(format!("{}_mask.png", stem)))),
            payload: args
                .payload_out
                .clone()
                .or_else(|| has_strokes.then(|| dir.join(format!("{}_payload.json", stem)))),
            session: args.session_out.clone(),
        };
    }
    OutputPaths {
        image: args.output.clone(),
        mask: args.mask_out.clone(),
        payload: args.payload_out.clone(),
        session: args.session_out.clone(),
    }
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}
