//! MonDigits - handwritten Mon digit recognition
//!
//! Rasterizes ink, normalizes it into the MNIST-style tensor the digit model
//! was trained on and prints the model's ranked guesses.

mod app;
mod config;
mod shared;
mod storage;
mod surface;
mod vision;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::RecognizerApp;
use crate::config::AppConfig;
use crate::shared::RecognizerEvent;
use crate::storage::profiles::{self, ModelProfile};
use crate::surface::{InkSurface, SharedSurface, PAPER};
use crate::vision::{
    Classifier, DigitRecognizer, InkPipeline, ModelManager, OnnxClassifier, Prediction,
    RecognizeError,
};

/// How often the prediction loop checks on its worker
const WORKER_POLL: Duration = Duration::from_millis(100);

/// MonDigits - handwritten Mon digit recognizer
#[derive(Parser, Debug)]
#[command(name = "mon-digits")]
#[command(about = "Recognize handwritten Mon digits with an ONNX model")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize a digit drawn in an image file
    Predict {
        /// Image of dark ink on a light background
        image: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Replay recorded strokes onto a fresh surface and recognize them
    Replay {
        /// JSON file with a list of strokes, each a list of [x, y] points
        strokes: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run preprocessing only and save the model canvas
    Preprocess {
        /// Image input
        #[arg(long, conflicts_with = "strokes", required_unless_present = "strokes")]
        image: Option<PathBuf>,
        /// Stroke file input
        #[arg(long)]
        strokes: Option<PathBuf>,
        /// Where to write the canvas PNG
        #[arg(short, long)]
        output: PathBuf,
        /// Model profile with the preprocessing settings
        #[arg(long)]
        profile: Option<PathBuf>,
    },
    /// Draw with pointer commands read from stdin, one per line
    ///
    /// Commands: `down X Y`, `move X Y`, `up`, `clear`, `predict`, `wait`,
    /// `status`, `save PATH`, `quit`. Blank lines and `#` comments are skipped.
    Session {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Write a default config and the bundled model profile
    InitConfig {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ModelArgs {
    /// Model file, overriding the configured one
    #[arg(long)]
    model: Option<PathBuf>,
    /// Model profile, overriding the sidecar next to the model
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct OutputArgs {
    /// Save the model canvas as PNG
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Number of ranked guesses to print
    #[arg(long)]
    top_k: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };

    match args.command {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Predict { image, model, output } => {
            let config = load_or_create_config(&config_path);
            let surface = InkSurface::from_image(load_ink_image(&image)?, config.surface.stroke_width);
            run_prediction(config, surface, &model, &output)
        }
        Command::Replay { strokes, model, output } => {
            let config = load_or_create_config(&config_path);
            let mut surface = InkSurface::new(config.surface);
            let strokes = surface::load_strokes(&strokes)?;
            info!("Replaying {} strokes", strokes.len());
            surface.replay(&strokes);
            run_prediction(config, surface, &model, &output)
        }
        Command::Session { model, output } => {
            let config = load_or_create_config(&config_path);
            run_session(config, &model, &output)
        }
        Command::Preprocess {
            image,
            strokes,
            output,
            profile,
        } => {
            let config = load_or_create_config(&config_path);
            let surface = match (image, strokes) {
                (Some(image), _) => {
                    InkSurface::from_image(load_ink_image(&image)?, config.surface.stroke_width)
                }
                (None, Some(strokes)) => {
                    let mut surface = InkSurface::new(config.surface);
                    surface.replay(&surface::load_strokes(&strokes)?);
                    surface
                }
                (None, None) => anyhow::bail!("Either --image or --strokes is required"),
            };
            run_preprocess(&config, surface, profile, &output)
        }
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: &Path) -> AppConfig {
    if path.exists() {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => warn!("Ignoring unreadable config {:?}: {:#}", path, e),
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

/// Write the default config and the bundled profile sidecar
fn init_config(config_path: &Path, force: bool) -> Result<()> {
    let config = if config_path.exists() && !force {
        info!("Keeping existing config {:?}", config_path);
        config::load_config(config_path)?
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let config = AppConfig::default();
        config::save_config(&config, config_path)?;
        println!("Wrote {}", config_path.display());
        config
    };

    let manager = ModelManager::new()?;
    println!("Models directory: {}", manager.models_dir().display());
    let profile_path = profile_path(&config, &manager, None, None);
    if profile_path.exists() && !force {
        println!("Profile {} already exists", profile_path.display());
    } else {
        profiles::save_profile(&ModelProfile::mon_digit_cnn_v1(), &profile_path)?;
        println!("Wrote {}", profile_path.display());
    }

    Ok(())
}

/// Where the profile for the selected model lives
fn profile_path(
    config: &AppConfig,
    manager: &ModelManager,
    model_override: Option<&Path>,
    profile_override: Option<&Path>,
) -> PathBuf {
    if let Some(path) = profile_override.or(config.model.profile.as_deref()) {
        return path.to_path_buf();
    }
    let model_file = model_override.unwrap_or(&config.model.file);
    profiles::profile_path_for(&manager.model_path(model_file))
}

fn load_model_profile(path: &Path) -> Result<ModelProfile> {
    if !path.exists() {
        anyhow::bail!(
            "Model profile {:?} not found. Run `mon-digits init-config` to install the bundled profile",
            path
        );
    }
    let profile = profiles::load_profile(path)?;
    info!("Loaded profile '{}' from {:?}", profile.name, path);
    Ok(profile)
}

/// Load an image and flatten any transparency onto white paper
fn load_ink_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("Failed to open image {:?}", path))?;
    Ok(flatten_on_paper(image))
}

fn flatten_on_paper(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut flat = RgbImage::from_pixel(rgba.width(), rgba.height(), PAPER);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        flat.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    flat
}

fn save_preview(canvas: &GrayImage, path: &Path, scale: u32) -> Result<()> {
    let scale = scale.max(1);
    let (w, h) = canvas.dimensions();
    let upscaled = imageops::resize(canvas, w * scale, h * scale, FilterType::Nearest);
    upscaled
        .save(path)
        .with_context(|| format!("Failed to save preview to {:?}", path))?;
    info!("Saved preview to {:?}", path);
    Ok(())
}

fn run_preprocess(
    config: &AppConfig,
    surface: InkSurface,
    profile_override: Option<PathBuf>,
    output: &Path,
) -> Result<()> {
    let manager = ModelManager::new()?;
    let profile = load_model_profile(&profile_path(config, &manager, None, profile_override.as_deref()))?;
    let pipeline = InkPipeline::new(profile.preprocess)?;

    let result = pipeline.preprocess(&surface.snapshot());
    match result.bounds.map(|b| b.as_tuple()) {
        Some((x, y, w, h)) => println!("Ink bounds: x={} y={} w={} h={}", x, y, w, h),
        None => println!("Ink bounds: none (blank surface)"),
    }
    println!(
        "Scaled to {}x{} at ({}, {})",
        result.resized.0, result.resized.1, result.offset.0, result.offset.1
    );
    if let Some(c) = result.centroid {
        println!(
            "Centroid: ({:.2}, {:.2}), shift ({}, {})",
            c.x, c.y, result.shift.0, result.shift.1
        );
    }

    save_preview(&result.canvas, output, config.output.preview_scale)
}

/// Build a recognizer for the selected model; the model loads on first use
fn build_recognizer(config: &AppConfig, model: &ModelArgs) -> Result<DigitRecognizer> {
    let manager = ModelManager::new()?;
    let profile = load_model_profile(&profile_path(
        config,
        &manager,
        model.model.as_deref(),
        model.profile.as_deref(),
    ))?;

    let mut settings = config.model.clone();
    if let Some(file) = &model.model {
        settings.file = file.clone();
    }
    let input_name = profile.input_name.clone();
    let output_name = profile.output_name.clone();

    let loader = move || {
        let path = manager
            .ensure_model(&settings)
            .map_err(|e| RecognizeError::ModelUnavailable(format!("{:#}", e)))?;
        let classifier =
            OnnxClassifier::load(&path, &input_name, &output_name, settings.intra_threads)?;
        Ok(Arc::new(classifier) as Arc<dyn Classifier>)
    };

    Ok(DigitRecognizer::from_profile(&profile, loader)?)
}

fn print_ranked(prediction: &Prediction, ranked: &[Prediction], top_k: usize) {
    println!("Prediction: {}", prediction);
    for (rank, guess) in ranked.iter().take(top_k).enumerate() {
        println!("  {}. {}", rank + 1, guess);
    }
}

/// Print a non-failure event, saving the preview if one was requested
fn report_event(event: &RecognizerEvent, output: &OutputArgs, preview_scale: u32, top_k: usize) -> Result<()> {
    match event {
        RecognizerEvent::Started => debug!("Prediction started"),
        RecognizerEvent::Preview(canvas) => {
            if let Some(path) = &output.preview {
                save_preview(canvas, path, preview_scale)?;
            }
        }
        RecognizerEvent::Completed {
            prediction,
            ranked,
            inference_ms,
        } => {
            print_ranked(prediction, ranked, top_k);
            debug!("Inference took {}ms", inference_ms);
        }
        RecognizerEvent::Failed(e) => {
            println!("Prediction failed: {}", e);
            if e.is_fatal() {
                println!("The model cannot be used; fix the model or profile and restart");
            }
        }
    }
    Ok(())
}

fn run_prediction(
    config: AppConfig,
    surface: InkSurface,
    model: &ModelArgs,
    output: &OutputArgs,
) -> Result<()> {
    let recognizer = build_recognizer(&config, model)?;
    recognizer.warm_up()?;

    let top_k = output.top_k.unwrap_or(config.output.top_k).max(1);
    let preview_scale = config.output.preview_scale;
    let app = RecognizerApp::new(surface.into_shared(), Arc::new(recognizer));
    let events = app.events();
    let worker = app.request_prediction()?;

    loop {
        let event = match events.recv_timeout(WORKER_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                if worker.is_finished() && events.is_empty() {
                    anyhow::bail!("Prediction worker exited without a result");
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Prediction worker exited without a result")
            }
        };

        match event {
            RecognizerEvent::Failed(e) => {
                let _ = worker.join();
                return Err(e.into());
            }
            event => {
                report_event(&event, output, preview_scale, top_k)?;
                if event.is_terminal() {
                    return worker
                        .join()
                        .map_err(|_| anyhow::anyhow!("Prediction worker panicked"));
                }
            }
        }
    }
}

fn parse_point<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<(f32, f32)> {
    let mut coord = |name: &str| -> Result<f32> {
        let raw = parts.next().with_context(|| format!("missing {} coordinate", name))?;
        raw.parse::<f32>()
            .with_context(|| format!("invalid {} coordinate '{}'", name, raw))
    };
    let x = coord("x")?;
    let y = coord("y")?;
    Ok((x, y))
}

/// Wait for the running request, then print everything it reported
fn settle_worker(
    worker: &mut Option<JoinHandle<()>>,
    events: &Receiver<RecognizerEvent>,
    output: &OutputArgs,
    preview_scale: u32,
    top_k: usize,
) -> Result<()> {
    if let Some(handle) = worker.take() {
        if handle.join().is_err() {
            warn!("Prediction worker panicked");
        }
    }
    for event in events.try_iter() {
        report_event(&event, output, preview_scale, top_k)?;
    }
    Ok(())
}

fn print_status(app: &RecognizerApp, surface: &SharedSurface) {
    let state = app.runtime();
    {
        let surface = surface.read();
        let (width, height) = surface.dimensions();
        println!(
            "Surface {}x{}, {} strokes, {}",
            width,
            height,
            surface.strokes().len(),
            if app.is_busy() { "busy" } else { "idle" }
        );
    }
    println!("Requests served: {}", state.served);
    if let Some(prediction) = &state.last_prediction {
        println!("Last prediction: {}", prediction);
    }
    if let Some(error) = &state.last_error {
        println!("Last error: {}", error);
    }
}

/// Run one session command; returns false on `quit`
fn session_command(
    line: &str,
    app: &RecognizerApp,
    surface: &SharedSurface,
    worker: &mut Option<JoinHandle<()>>,
    settle: &mut dyn FnMut(&mut Option<JoinHandle<()>>) -> Result<()>,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    if command.starts_with('#') {
        return Ok(true);
    }

    match command {
        "down" => {
            let (x, y) = parse_point(parts)?;
            surface.write().pointer_down(x, y);
        }
        "move" => {
            let (x, y) = parse_point(parts)?;
            surface.write().pointer_move(x, y);
        }
        "up" => surface.write().pointer_up(),
        "clear" => {
            app.clear_surface();
            println!("Cleared");
        }
        "predict" => match app.request_prediction() {
            Ok(handle) => *worker = Some(handle),
            Err(e) => println!("{}", e),
        },
        "wait" => settle(worker)?,
        "status" => print_status(app, surface),
        "save" => {
            let path = parts.next().context("save needs a file path")?;
            crate::surface::save_strokes(surface.read().strokes(), Path::new(path))?;
            println!("Saved strokes to {}", path);
        }
        "quit" => return Ok(false),
        other => anyhow::bail!("unknown command '{}'", other),
    }
    Ok(true)
}

fn run_session(config: AppConfig, model: &ModelArgs, output: &OutputArgs) -> Result<()> {
    let recognizer = build_recognizer(&config, model)?;
    let top_k = output.top_k.unwrap_or(config.output.top_k).max(1);
    let preview_scale = config.output.preview_scale;

    let surface = InkSurface::new(config.surface).into_shared();
    let app = RecognizerApp::new(surface.clone(), Arc::new(recognizer));
    let events = app.events();
    let mut worker = None;
    let mut settle = |worker: &mut Option<JoinHandle<()>>| {
        settle_worker(worker, &events, output, preview_scale, top_k)
    };

    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read command")?;
        match session_command(&line, &app, &surface, &mut worker, &mut settle) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!("{:#}", e),
        }
        // Report whatever finished in the meantime
        if worker.as_ref().is_some_and(|w| w.is_finished()) {
            settle(&mut worker)?;
        }
    }

    settle(&mut worker)
}
