//! # documentos-loadtest CLI
//!
//! ```bash
//! # Sanity check with one virtual user
//! documentos-loadtest smoke --target https://documentos.universidad.localhost
//!
//! # Full ramp, reproducible sampling, Prometheus file next to the JSON summary
//! documentos-loadtest load --seed 42 --prometheus
//!
//! # Spike against a local instance with a settings file
//! documentos-loadtest spike --config docload.toml --target http://127.0.0.1:5000
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use documentos_loadtest::{LoadTestRunner, Profile, ReqwestClient, RunSettings};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "documentos-loadtest")]
#[command(version)]
#[command(about = "Smoke, load and spike tests for documentos-service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Target base URL (overrides the settings file)
    #[arg(short, long, global = true, env = "DOCLOAD_BASE_URL")]
    target: Option<String>,

    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the performance/results tree is written under
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Seed for subject/format sampling
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Verify TLS certificates instead of accepting self-signed ones
    #[arg(long, global = true)]
    verify_tls: bool,

    /// Also write a Prometheus text file next to the JSON summary
    #[arg(long, global = true)]
    prometheus: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// One virtual user, health/pdf/docx sequence for 30s
    Smoke,
    /// 0 → 10 → 30 → 50 → 30 → 0 virtual users over 9 minutes
    Load,
    /// 10 virtual users, sudden jump to 100, then drop
    Spike,
}

impl Commands {
    fn profile(&self) -> Profile {
        match self {
            Commands::Smoke => Profile::Smoke,
            Commands::Load => Profile::Load,
            Commands::Spike => Profile::Spike,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    // Logs go to stderr so stdout carries only the report
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let mut settings =
        RunSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(target) = cli.target {
        settings.base_url = target;
    }
    if let Some(results_dir) = cli.results_dir {
        settings.results_dir = results_dir;
    }
    if cli.seed.is_some() {
        settings.seed = cli.seed;
    }
    if cli.verify_tls {
        settings.insecure_skip_tls_verify = false;
    }

    let profile = cli.command.profile();
    info!("documentos-loadtest v{} ({})", env!("CARGO_PKG_VERSION"), profile);

    let client = Arc::new(ReqwestClient::new(&settings).context("Failed to create HTTP client")?);
    let runner = LoadTestRunner::new(profile, settings, client).context("Invalid settings")?;

    let report = runner.run().await.context("Load test run failed")?;
    print!("{}", report.text);

    runner
        .write_artifacts(&report, cli.prometheus)
        .context("Failed to write result artifacts")?;

    if report.snapshot.verdict.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
