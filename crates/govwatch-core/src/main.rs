//! govwatch CLI
//!
//! Command-line interface for governor limit monitoring and deployment correlation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{style, Style};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use govwatch::alerting::AlertDispatcher;
use govwatch::config::LoggingConfig;
use govwatch::deployment::{DeploymentCorrelator, DeploymentEvent, MonitoringUpdate};
use govwatch::models::{DeliveryOutcome, LimitRecord, LimitStatus, NotificationRecord};
use govwatch::monitor::{CheckResult, LimitsMonitor, MonitorEvent};
use govwatch::platform::{RestClient, SpawnSpec, TokioProcessLauncher};
use govwatch::Config;

/// govwatch - Governor limit monitoring and deployment correlation
#[derive(Parser)]
#[command(name = "govwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "GOVWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the governor limits once
    Status,

    /// Check the limits periodically and alert on breaches
    Monitor {
        /// Time between checks (e.g. "30s", "5m")
        #[arg(long)]
        interval: Option<humantime::Duration>,

        /// Warning threshold in percent
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Run a deployment command and correlate it with limit usage
    Deploy {
        /// Command and arguments, after `--`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Watch a deployment that is already running
    WatchDeploy {
        /// Deployment id (15 or 18 characters)
        deploy_id: String,
    },

    /// Alert channel tools
    Alerts {
        #[command(subcommand)]
        command: AlertsCommands,
    },

    /// Configuration tools
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum AlertsCommands {
    /// Send a sample alert through the configured channels
    Test {
        /// Only test channels of this kind (console, email, slack, webhook)
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _guard = match init_tracing(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Status => run_status(config, cli.format).await,
        Commands::Monitor {
            interval,
            threshold,
        } => run_monitor(config, interval.map(Into::into), threshold, cli.format).await,
        Commands::Deploy { command } => run_deploy(config, command).await,
        Commands::WatchDeploy { deploy_id } => run_watch_deploy(config, &deploy_id).await,
        Commands::Alerts { command } => run_alerts(config, command, cli.format).await,
        Commands::Config { command } => run_config(config, command),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let json = logging.format == "json";

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), PathBuf::from);
            let name = path.file_name().context("logging.file must name a file")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn rest_client(config: &Config) -> anyhow::Result<Arc<RestClient>> {
    let client = RestClient::new(&config.platform).context("cannot connect to the org")?;
    Ok(Arc::new(client))
}

fn dispatcher(config: &Config) -> anyhow::Result<Arc<AlertDispatcher>> {
    let dispatcher = AlertDispatcher::from_config(&config.alerting, config.platform.org.clone())?;
    Ok(Arc::new(dispatcher))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn status_style(status: LimitStatus) -> Style {
    match status {
        LimitStatus::Ok => Style::new().green(),
        LimitStatus::Warning => Style::new().yellow(),
        LimitStatus::Critical => Style::new().red().bold(),
    }
}

fn print_limits(limits: &[LimitRecord]) {
    println!(
        "{:<34} {:>14} {:>14} {:>8}  {}",
        style("Limit").bold(),
        style("Used").bold(),
        style("Max").bold(),
        style("Usage").bold(),
        style("Status").bold()
    );
    for limit in limits {
        println!(
            "{:<34} {:>14} {:>14} {:>7}%  {}",
            limit.display_name(),
            limit.used,
            limit.max,
            limit.percentage,
            status_style(limit.status).apply_to(limit.status)
        );
    }
}

fn print_check(result: &CheckResult, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print_limits(&result.limits);
    println!();
    if result.has_alerts {
        println!(
            "{} {} limit(s) above threshold",
            style("⚠").yellow(),
            result.alert_limits.len()
        );
    } else {
        println!("{} All limits within thresholds", style("✔").green());
    }
    Ok(())
}

async fn run_status(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let client = rest_client(&config)?;
    let monitor = LimitsMonitor::new(
        client,
        Arc::new(AlertDispatcher::from_config(&config.alerting, None)?.with_enabled(false)),
        config.thresholds,
    );

    let bar = spinner("Fetching governor limits...");
    let result = monitor.check_limits().await;
    bar.finish_and_clear();

    print_check(&result?, format)
}

async fn run_monitor(
    mut config: Config,
    interval: Option<Duration>,
    threshold: Option<f64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if let Some(warning) = threshold {
        config.thresholds.warning = warning;
        config.thresholds.validate()?;
    }
    let every = interval.unwrap_or(config.monitoring.interval);

    let monitor = LimitsMonitor::new(rest_client(&config)?, dispatcher(&config)?, config.thresholds)
        .with_jitter(config.monitoring.jitter);
    let mut events = monitor.subscribe();

    println!(
        "{} Monitoring limits every {} (warning {}%, critical {}%). Press Ctrl+C to stop.",
        style("▶").cyan(),
        humantime::format_duration(every),
        config.thresholds.warning,
        config.thresholds.critical
    );
    monitor.start_continuous(every);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(MonitorEvent::Checked(result)) => {
                    println!("\n{}", style(result.timestamp.to_rfc3339()).dim());
                    print_check(&result, format)?;
                }
                Ok(MonitorEvent::Error { message }) => {
                    eprintln!("{} {message}", style("Check failed:").red());
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.stop();
    println!("\nStopped.");
    Ok(())
}

fn print_update(update: &MonitoringUpdate) {
    let status = &update.status;
    println!(
        "{} {} components {}/{} tests {}/{}",
        style(format!("[{}]", status.state)).cyan(),
        update.deploy_id,
        status.number_components_deployed,
        status.number_components_total,
        status.number_tests_completed,
        status.number_tests_total
    );
    for (name, delta) in &update.deltas {
        let color = if delta.used_delta > 0 {
            Style::new().yellow()
        } else {
            Style::new().dim()
        };
        println!(
            "    {:<30} {} ({:+.2}%, {})",
            govwatch::monitor::format_limit_name(name),
            color.apply_to(format!("{:+}", delta.used_delta)),
            delta.percentage_delta,
            delta.trend
        );
    }
}

/// Print deployment events until the channel closes or monitoring stops
async fn print_deployment_events(
    mut events: tokio::sync::broadcast::Receiver<DeploymentEvent>,
    until_stopped: bool,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Output fell behind");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match event {
            DeploymentEvent::OperationStarted { command, args } => {
                println!("{} {} {}", style("▶").cyan(), command, args.join(" "));
            }
            DeploymentEvent::BaselineCaptured { baseline } => {
                println!(
                    "{} Baseline captured ({} metrics)",
                    style("✔").green(),
                    baseline.metrics.len()
                );
            }
            DeploymentEvent::Output { data, .. } => print!("{data}"),
            DeploymentEvent::MonitoringStarted { deploy_id } => {
                println!("{} Monitoring deployment {deploy_id}", style("◉").cyan());
            }
            DeploymentEvent::MonitoringUpdate(update) => print_update(&update),
            DeploymentEvent::MonitoringStopped { .. } => {
                println!("{} Monitoring stopped", style("◼").dim());
                if until_stopped {
                    return;
                }
            }
            DeploymentEvent::OperationCompleted(_) => {
                println!("{} Deployment completed", style("✔").green().bold());
            }
            DeploymentEvent::OperationFailed { code, .. } => {
                let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                println!("{} Deployment failed (exit code {code})", style("✘").red().bold());
            }
            DeploymentEvent::Error { kind, message } => {
                eprintln!("{} {kind:?}: {message}", style("warning:").yellow());
            }
        }
    }
}

fn correlator(config: &Config) -> anyhow::Result<DeploymentCorrelator> {
    let client = rest_client(config)?;
    Ok(DeploymentCorrelator::new(
        client.clone(),
        client,
        Arc::new(TokioProcessLauncher::new()),
        config.thresholds,
        config.deployment.polling_rate,
    ))
}

async fn run_deploy(config: Config, command: Vec<String>) -> anyhow::Result<()> {
    let mut parts = command.into_iter();
    let program = parts.next().context("no command given")?;
    let spec = SpawnSpec::new(program, parts);

    let correlator = correlator(&config)?;
    let printer = tokio::spawn(print_deployment_events(correlator.subscribe(), false));

    let result = tokio::select! {
        result = correlator.start(spec) => result.map(|outcome| {
            info!(deploy_id = ?outcome.deploy_id, "Deployment finished");
        }),
        _ = tokio::signal::ctrl_c() => {
            correlator.stop();
            anyhow::bail!("interrupted");
        }
    };

    correlator.stop();
    drop(correlator);
    let _ = printer.await;
    Ok(result?)
}

async fn run_watch_deploy(config: Config, deploy_id: &str) -> anyhow::Result<()> {
    let correlator = correlator(&config)?;
    let printer = tokio::spawn(print_deployment_events(correlator.subscribe(), true));

    correlator.monitor_existing(deploy_id).await?;

    tokio::select! {
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => correlator.stop(),
    }
    Ok(())
}

fn print_records(records: &[NotificationRecord], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    for record in records {
        match &record.outcome {
            DeliveryOutcome::Delivered => {
                println!("{} {}", style("✔").green(), record.channel);
            }
            DeliveryOutcome::Suppressed => {
                println!("{} {} (suppressed)", style("–").dim(), record.channel);
            }
            DeliveryOutcome::Failed(reason) => {
                println!("{} {}: {reason}", style("✘").red(), record.channel);
            }
        }
    }
    Ok(())
}

async fn run_alerts(
    config: Config,
    command: AlertsCommands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        AlertsCommands::Test { kind } => {
            let dispatcher = dispatcher(&config)?;
            if dispatcher.channel_names().is_empty() {
                println!("No alert channels configured.");
                return Ok(());
            }

            let records = dispatcher.test_channels(kind.as_deref()).await?;
            print_records(&records, format)?;

            if records.iter().any(|r| !r.is_delivered()) {
                anyhow::bail!("one or more channels failed");
            }
        }
    }
    Ok(())
}

fn run_config(mut config: Config, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            if !config.platform.access_token.is_empty() {
                config.platform.access_token = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = govwatch::config::default_config_path() {
                println!("\n{} {}", style("Default config file:").dim(), path.display());
            }
        }
    }
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "govwatch", &mut io::stdout());
}
