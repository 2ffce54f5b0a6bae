//! Main module for the anime recommender CLI (`animerec`).
//!
//! Parses the command line, loads configuration, and runs the build or
//! recommendation flows. Any failure is printed as a readable message and turns
//! into a non-zero exit code.
//!
//! # Examples
//!
//! ```sh
//! animerec init
//! animerec build --raw data/anime_with_synopsis.csv
//! animerec recommend "heartwarming slice of life with cute characters"
//! animerec interactive --build-if-missing
//! ```

use anime_recommender::{
    Error, Result,
    commands::{Cli, Commands},
    config::{AppConfig, load_config},
    config_dir,
    embeddings::load_embedder,
    pipeline::{Pipeline, artifacts_present, build_pipeline},
    pretty::{print_error, print_pretty, print_status},
    recommender::MIN_QUERY_CHARS,
    template::PromptTemplate,
};
use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

const DEFAULT_TEMPLATE_NAME: &str = "recommender";

fn main() -> ExitCode {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .init();
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = print_error(&format!("failed to start runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };

    match cli.command {
        Commands::Init { force } => init(&config_path, force),
        Commands::Build { raw } => {
            let mut config = effective_config(&config_path, cli.model_dir)?;
            if let Some(raw) = raw {
                config.raw_catalog_path = raw;
            }
            let embedder = load_embedder(&config.embedding)?;
            let store = build_pipeline(&config, embedder)?;
            let _ = print_status(&format!(
                "Indexed {} chunks into {}",
                store.len(),
                config.index_dir.display()
            ));
            Ok(())
        }
        Commands::Recommend {
            query,
            build_if_missing,
        } => {
            let config = effective_config(&config_path, cli.model_dir)?;
            let pipeline = open_pipeline(&config, build_if_missing)?;
            let answer = pipeline.recommend(&query).await?;
            print_pretty(&answer);
            Ok(())
        }
        Commands::Interactive { build_if_missing } => {
            let config = effective_config(&config_path, cli.model_dir)?;
            let pipeline = open_pipeline(&config, build_if_missing)?;
            interactive(&pipeline).await
        }
    }
}

/// Config file (or defaults when absent) plus environment and CLI overrides.
fn effective_config(path: &Path, model_dir: Option<PathBuf>) -> Result<AppConfig> {
    let config = if path.is_file() {
        load_config(path)?
    } else {
        debug!("No config at {}, using defaults", path.display());
        AppConfig::default()
    };
    let mut config = config.with_env_overrides();
    if model_dir.is_some() {
        config.embedding.model_dir = model_dir;
    }
    config.validate()?;
    Ok(config)
}

fn open_pipeline(config: &AppConfig, build_if_missing: bool) -> Result<Pipeline> {
    let embedder = load_embedder(&config.embedding)?;
    if build_if_missing && !artifacts_present(config) {
        let _ = print_status("Setting up the anime database for the first time. This may take a few minutes.");
        build_pipeline(config, embedder.clone())?;
    }
    Pipeline::from_config(config, embedder)
}

async fn interactive(pipeline: &Pipeline) -> Result<()> {
    let stdin = io::stdin();
    let io_err = |e: io::Error| Error::Config(format!("terminal: {e}"));
    loop {
        print!("What anime universe calls to you? > ");
        io::stdout().flush().map_err(io_err)?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).map_err(io_err)? == 0 {
            return Ok(());
        }
        let query = line.trim();
        if matches!(query, "exit" | "quit") {
            return Ok(());
        }
        if query.chars().count() < MIN_QUERY_CHARS {
            let _ = print_error(&format!(
                "Please enter at least {MIN_QUERY_CHARS} characters for better recommendations."
            ));
            continue;
        }

        match pipeline.recommend(query).await {
            Ok(answer) => print_pretty(&answer),
            Err(e) => {
                let _ = print_error(&format!("Something went wrong: {e}"));
            }
        }
    }
}

/// Write a default `config.yaml` and prompt template.
fn init(config_path: &Path, force: bool) -> Result<()> {
    let io_err = |path: &Path, e: io::Error| Error::Config(format!("{}: {e}", path.display()));
    let yaml_err = |e: serde_yaml::Error| Error::Config(e.to_string());

    let templates_dir = config_dir()?.join("templates");
    info!("Creating template directory: {}", templates_dir.display());
    fs::create_dir_all(&templates_dir).map_err(|e| io_err(&templates_dir, e))?;

    let template_path = templates_dir.join(format!("{DEFAULT_TEMPLATE_NAME}.yaml"));
    if force || !template_path.exists() {
        info!("Creating template file: {}", template_path.display());
        let template_yaml = serde_yaml::to_string(&PromptTemplate::default()).map_err(yaml_err)?;
        fs::write(&template_path, template_yaml).map_err(|e| io_err(&template_path, e))?;
    }

    if config_path.exists() && !force {
        let _ = print_status(&format!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        ));
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    info!("Creating config file: {}", config_path.display());
    let config = AppConfig {
        api_key: "CHANGEME".to_string(),
        template: Some(DEFAULT_TEMPLATE_NAME.to_string()),
        ..AppConfig::default()
    };
    let config_yaml = serde_yaml::to_string(&config).map_err(yaml_err)?;
    fs::write(config_path, config_yaml).map_err(|e| io_err(config_path, e))?;
    let _ = print_status(&format!("Wrote {}", config_path.display()));
    Ok(())
}
