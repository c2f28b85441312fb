use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use gpuimage_blur::blur::weights::{DiagnosticsHook, WeightDiagnostics};
use gpuimage_blur::config::SelectiveConfig;
use gpuimage_blur::{BlurConfig, BlurVariant, headless, load_config_from_path};

const USAGE: &str = "usage: gpuimage-blur --input <image> --output <png> [--config <json>] \
[--variant fixed9|fixed21|dynamic15] [--blur-size <f32>] [--selective] [--dump-weights]";

#[derive(Debug, Default, Clone)]
struct Cli {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    variant: Option<BlurVariant>,
    blur_size: Option<f32>,
    selective: bool,
    dump_weights: bool,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --input"));
                };
                cli.input = Some(PathBuf::from(v));
                i += 2;
            }
            "--output" | "-o" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --output"));
                };
                cli.output = Some(PathBuf::from(v));
                i += 2;
            }
            "--config" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --config"));
                };
                cli.config = Some(PathBuf::from(v));
                i += 2;
            }
            "--variant" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --variant"));
                };
                cli.variant = Some(v.parse()?);
                i += 2;
            }
            "--blur-size" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --blur-size"));
                };
                let size: f32 = v
                    .parse()
                    .map_err(|e| anyhow!("invalid --blur-size '{v}': {e}"))?;
                cli.blur_size = Some(size);
                i += 2;
            }
            "--selective" => {
                cli.selective = true;
                i += 1;
            }
            "--dump-weights" => {
                cli.dump_weights = true;
                i += 1;
            }
            other => {
                return Err(anyhow!("unknown argument: {other}\n{USAGE}"));
            }
        }
    }
    Ok(cli)
}

fn resolve_config(cli: &Cli) -> Result<BlurConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => BlurConfig::default(),
    };
    if let Some(variant) = cli.variant {
        config.variant = variant;
    }
    if let Some(size) = cli.blur_size {
        config.blur_size = Some(size);
    }
    if cli.selective && config.selective.is_none() {
        config.selective = Some(SelectiveConfig::default());
    }
    config.normalize();
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    let input = cli
        .input
        .clone()
        .ok_or_else(|| anyhow!("--input is required\n{USAGE}"))?;
    let output = cli
        .output
        .clone()
        .ok_or_else(|| anyhow!("--output is required\n{USAGE}"))?;
    let config = resolve_config(&cli)?;

    let solves: Arc<Mutex<Vec<WeightDiagnostics>>> = Arc::default();
    let diagnostics = cli.dump_weights.then(|| {
        let sink = solves.clone();
        Arc::new(move |d: &WeightDiagnostics| {
            if let Ok(mut solves) = sink.lock() {
                solves.push(d.clone());
            }
        }) as DiagnosticsHook
    });

    headless::blur_file_to_png_with_diagnostics(&input, &output, &config, diagnostics)?;
    println!("[headless] saved: {}", output.display());

    if cli.dump_weights {
        let solves = solves.lock().map_err(|_| anyhow!("weight diagnostics lock poisoned"))?;
        println!("{}", serde_json::to_string_pretty(&*solves)?);
    }
    Ok(())
}
