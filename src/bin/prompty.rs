use clap::{Parser, Subcommand};
use prompty::{
    config::EngineConfig, value::to_data, Data, Engine, Error, ErrorStrategy, PromptyResult,
    RenderContext,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON file with the template data
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    /// Register an includable template, as name=path
    #[arg(short, long = "include", value_parser = parse_include, global = true)]
    includes: Vec<(String, PathBuf)>,

    /// Override the configured error strategy
    #[arg(short, long, global = true)]
    strategy: Option<ErrorStrategy>,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to stdout
    Render { template: PathBuf },
    /// Validate a template against the data and print the analysis as JSON
    DryRun { template: PathBuf },
    /// Render with variable tracing and print the trace as JSON
    Explain { template: PathBuf },
    /// Render and print the extracted chat messages as JSON
    Messages { template: PathBuf },
}

fn parse_include(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected name=path, got '{}'", arg)),
    }
}

fn read_file(path: &Path) -> PromptyResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::internal(format!("Failed to read {}: {}", path.display(), e)))
}

fn load_config(cli: &Cli) -> PromptyResult<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config = config.with_error_strategy(strategy);
    }
    Ok(config)
}

fn load_data(path: Option<&Path>) -> PromptyResult<Data> {
    let Some(path) = path else {
        return Ok(Data::new());
    };
    let content = read_file(path)?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| Error::internal(format!("Failed to parse data file: {}", e)))?;
    if !json.is_object() {
        return Err(Error::internal("data file must contain a JSON object"));
    }
    Ok(to_data(json))
}

fn print_json<T: Serialize>(value: &T) -> PromptyResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Returns whether the command succeeded.
fn run(cli: &Cli) -> PromptyResult<bool> {
    let config = load_config(cli)?;
    debug!("config: {:?}", config);

    let engine = Engine::new(config)?;
    for (name, path) in &cli.includes {
        engine.register_template(name, &read_file(path)?)?;
        debug!("registered include '{}' from {:?}", name, path);
    }

    let data = load_data(cli.data.as_deref())?;
    let template_path = match &cli.command {
        Commands::Render { template }
        | Commands::DryRun { template }
        | Commands::Explain { template }
        | Commands::Messages { template } => template,
    };
    let name = template_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let template = engine.parse_named(&name, &read_file(template_path)?)?;
    info!("template {:?} parsed.", template_path);

    let ctx = RenderContext::from_config(engine.config());
    match &cli.command {
        Commands::Render { .. } => {
            print!("{}", template.execute(&ctx, &data)?);
            Ok(true)
        }
        Commands::Messages { .. } => {
            print_json(&template.execute_messages(&ctx, &data)?)?;
            Ok(true)
        }
        Commands::DryRun { .. } => {
            let result = template.dry_run(&ctx, &data);
            print_json(&result)?;
            Ok(result.valid)
        }
        Commands::Explain { .. } => {
            let result = template.explain(&ctx, &data);
            print_json(&result)?;
            Ok(result.is_success())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
