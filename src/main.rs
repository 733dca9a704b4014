//! Process entry point: CLI parsing, logging setup, startup bootstrap, and
//! handoff into the scheduler loop (§4.2, §6 "CLI").

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use omicron::alert::{AlertManager, LettreTransport, MailTransport};
use omicron::clock::{Clock, SystemClock};
use omicron::config::{Configuration, ConfigKey};
use omicron::crontab::Crontab;
use omicron::job::JobManager;
use omicron::proctree::{LinuxProcessTree, ProcessTree};
use omicron::scheduler::SchedulerLoop;

const DEFAULT_CONFIG_PATH: &str = "/etc/omicron/omicron.conf";

#[derive(Parser)]
#[command(name = "omicron", about = "A drop-in crond replacement with SLA alerting")]
struct Cli {
    /// Path to the omicron configuration file.
    config_path: Option<String>,
}

fn main() {
    // §6: "If the first argument contains '?', print usage and exit 0." This
    // is checked before clap parsing since `-h`/`--help` is not the same
    // usage convention the spec calls for.
    if let Some(first) = std::env::args().nth(1) {
        if first.contains('?') {
            print_usage();
            std::process::exit(0);
        }
    }

    let cli = Cli::parse();
    init_logging();

    let config_path = cli
        .config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    // §5 error model, item 1: a missing/unreadable config file falls back to
    // defaults at process start rather than aborting.
    let config = match Configuration::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, path = %config_path.display(), "falling back to default configuration");
            Configuration::defaults()
        }
    };

    let crontab_path = PathBuf::from(config.get_string(ConfigKey::CrontabPath));
    let now_millis = chrono::Utc::now().timestamp_millis();
    let crontab = match Crontab::load(&crontab_path, &config, now_millis) {
        Ok(crontab) => crontab,
        Err(e) => {
            error!(error = %e, path = %crontab_path.display(), "could not read crontab at startup, exiting");
            std::process::exit(1);
        }
    };

    // The runtime must exist, and be entered, before anything that calls
    // `tokio::spawn` (AlertManager's dispatcher worker among them) — a bare
    // `tokio::spawn` outside a runtime context panics.
    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let _guard = runtime.enter();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let process_tree: Arc<dyn ProcessTree> = Arc::new(LinuxProcessTree);
    let hostname = omicron::hostname::resolve();
    let transport: Arc<dyn MailTransport> = Arc::new(LettreTransport::new(
        config.get_string(ConfigKey::AlertEmailSmtpHost).to_string(),
        config.get_int(ConfigKey::AlertEmailSmtpPort) as u16,
    ));
    let alert_manager = AlertManager::new(Arc::clone(&clock), hostname, transport);

    let manager = Arc::new(JobManager::new(
        Arc::clone(&clock),
        Arc::clone(&process_tree),
        alert_manager,
    ));
    manager.update_configuration(&config, &crontab);

    let config_mtime = config.file_mtime();
    let crontab_mtime = crontab.file_mtime;
    let scheduler = SchedulerLoop::new(
        clock,
        manager,
        config_path,
        crontab_path,
        config_mtime,
        crontab_mtime,
    );

    info!("omicron starting");
    runtime.block_on(scheduler.run());
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("OMICRON_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

fn print_usage() {
    println!("usage: omicron [<config-path>]");
    println!("  <config-path>  path to the omicron configuration file");
    println!("                 (default: {DEFAULT_CONFIG_PATH})");
}
