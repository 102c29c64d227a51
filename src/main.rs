mod api;
mod config;
mod diagnostics;
mod dispatch;
mod form;
mod input;
mod logging;
mod platform;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, ValueEnum};
use log::{LevelFilter, info};

use crate::api::{ApiServer, ApiServerConfig, ApiSharedState};
use crate::config::{AppConfig, load_config};
use crate::form::FormState;
use crate::platform::{BackendKind, SelectedBackend, select_backend};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBackend {
    Auto,
    Simulated,
    TimedOutput,
}

impl From<CliBackend> for BackendKind {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Auto => BackendKind::Auto,
            CliBackend::Simulated => BackendKind::Simulated,
            CliBackend::TimedOutput => BackendKind::TimedOutput,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LevelFilter {
    fn from(value: CliLogLevel) -> Self {
        match value {
            CliLogLevel::Error => LevelFilter::Error,
            CliLogLevel::Warn => LevelFilter::Warn,
            CliLogLevel::Info => LevelFilter::Info,
            CliLogLevel::Debug => LevelFilter::Debug,
            CliLogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "vibectl",
    version,
    about = "Trigger the vibration motor for a duration or an on/off pattern"
)]
struct Cli {
    /// JSON settings file with form defaults and device selection.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vibration time in milliseconds. Ignored when a pattern is given.
    #[arg(long, allow_hyphen_values = true)]
    duration: Option<String>,

    /// Milliseconds separated by commas or spaces: wait, vibrate, wait, vibrate, ...
    #[arg(long, allow_hyphen_values = true)]
    pattern: Option<String>,

    /// Repeat the pattern until cancelled (or until --hold-ms elapses).
    #[arg(long)]
    repeat: bool,

    /// Stop any running vibration and exit.
    #[arg(long, conflicts_with_all = ["serve", "diagnostics"])]
    cancel: bool,

    #[arg(long, value_enum)]
    backend: Option<CliBackend>,

    #[arg(long)]
    timed_output_path: Option<PathBuf>,

    /// Cancel one-shot playback after this many milliseconds.
    #[arg(long)]
    hold_ms: Option<u64>,

    #[arg(long)]
    diagnostics: bool,

    /// Serve the form over the local HTTP API instead of vibrating once.
    #[arg(long, conflicts_with = "diagnostics")]
    serve: bool,

    #[arg(long, default_value = "0.0.0.0")]
    api_bind: String,

    #[arg(long, default_value_t = 8098)]
    api_port: u16,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    mdns_enabled: bool,

    #[arg(long, default_value = "vibectl")]
    mdns_instance: String,

    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn)]
    log_level: CliLogLevel,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.into());

    let config = match cli.config.as_deref() {
        Some(path) => {
            load_config(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        None => AppConfig::default(),
    };

    let form = FormState::new(
        cli.duration
            .as_deref()
            .unwrap_or(&config.form.duration_text),
        cli.pattern.as_deref().unwrap_or(&config.form.pattern_text),
        cli.repeat || config.form.repeat,
    );

    let backend_kind = cli
        .backend
        .map(BackendKind::from)
        .unwrap_or(config.device.backend);
    let timed_output_path = cli
        .timed_output_path
        .clone()
        .unwrap_or_else(|| config.device.timed_output_path.clone());
    let selected = select_backend(backend_kind, &timed_output_path)?;
    if let Some(reason) = selected.fallback_reason.as_deref() {
        info!("{reason}");
    }

    if cli.diagnostics {
        diagnostics::run_diagnostics(&selected, &form)?;
        return Ok(());
    }

    if cli.cancel {
        return run_cancel(form, selected);
    }

    if cli.serve {
        let server = ApiServer::start(
            ApiServerConfig {
                bind_addr: cli.api_bind.clone(),
                port: cli.api_port,
                mdns_enabled: cli.mdns_enabled,
                mdns_instance: cli.mdns_instance.clone(),
            },
            ApiSharedState::new(form, selected.vibrator),
        )
        .with_context(|| {
            format!(
                "failed to start local API at {}:{}",
                cli.api_bind, cli.api_port
            )
        })?;
        match server.local_addr {
            Some(addr) => println!("vibectl API listening on http://{addr}"),
            None => println!("vibectl API listening"),
        }
        server.wait();
        return Ok(());
    }

    run_once(form, selected, cli.hold_ms)
}

fn run_cancel(form: FormState, selected: SelectedBackend) -> Result<()> {
    let mut vibrator = selected.vibrator;
    form.press_cancel(vibrator.as_mut());
    println!("Cancel sent to {}", selected.label);
    Ok(())
}

fn run_once(mut form: FormState, selected: SelectedBackend, hold_ms: Option<u64>) -> Result<()> {
    let mut vibrator = selected.vibrator;
    let request = form
        .press_vibrate(vibrator.as_mut())
        .map_err(|err| anyhow!(err).context(form.error_message().to_string()))?;
    println!("Vibrating on {}: {request}", selected.label);

    if !vibrator.wait_idle(hold_ms.map(Duration::from_millis)) {
        form.press_cancel(vibrator.as_mut());
        println!("Stopped after {} ms", hold_ms.unwrap_or_default());
    }
    Ok(())
}
