use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::mpsc::{self, RecvTimeoutError},
};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use procward::{
    cli::{Cli, Commands, ScanMode, parse_args},
    config::{Config, load_config, parse_duration},
    monitor::{Monitor, SysinfoSampler},
    process::ManagedProcess,
    registry::{Registry, RegistrySettings},
    runtime::{self, RuntimeMode},
    scanner::Scanner,
    snapshot,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    let result = match args.command {
        Commands::Run { config } => run(Path::new(&config)),
        Commands::Scan {
            config,
            proc_root,
            mode,
        } => scan(config.as_deref(), proc_root, mode),
        Commands::Snapshot { config, path } => show_snapshot(config.as_deref(), path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so scan output on stdout stays machine readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    let settings = config.registry_settings()?;
    let snapshot_path = config.snapshot_path(RuntimeMode::detect());
    let monitor_interval = config.monitor_interval()?;
    let snapshot_interval = config.snapshot_interval()?;
    let base_dir = config
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    info!("Starting procward with config {config_path:?}");
    let registry = Registry::new(settings.clone());
    registry.load_snapshot(&snapshot_path)?;

    for definition in &config.processes {
        let key = registry.register(definition.key(), definition.to_spec(&base_dir)?)?;
        if definition.autostart
            && let Err(err) = registry.start_process(&key.namespace, &key.name)
        {
            error!("Failed to start '{key}': {err}");
        }
    }

    let monitor = Monitor::spawn(
        registry.clone(),
        SysinfoSampler::new(&settings.proc_root),
        monitor_interval,
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    loop {
        match rx.recv_timeout(snapshot_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(err) = registry.save_snapshot(&snapshot_path) {
                    error!("Periodic snapshot failed: {err}");
                }
            }
        }
    }

    info!("procward is shutting down");
    monitor.stop();
    // Saved before the stop so the recorded terminations predate the shutdown.
    if let Err(err) = registry.save_snapshot(&snapshot_path) {
        error!("Final snapshot failed: {err}");
    }
    registry.shutdown()?;
    Ok(())
}

fn scan_settings(
    config: Option<&Config>,
    proc_root: Option<String>,
) -> Result<RegistrySettings, Box<dyn Error>> {
    let mut settings = match config {
        Some(config) => config.registry_settings()?,
        None => RegistrySettings::default(),
    };
    if let Some(root) = proc_root {
        settings.proc_root = PathBuf::from(root);
    }
    Ok(settings)
}

fn scan(
    config_path: Option<&str>,
    proc_root: Option<String>,
    mode: ScanMode,
) -> Result<(), Box<dyn Error>> {
    let config = config_path.map(|path| load_config(Path::new(path))).transpose()?;
    let mut settings = scan_settings(config.as_ref(), proc_root)?;

    let found = match mode {
        ScanMode::Pattern { query } => {
            let scanner = Scanner::new(
                settings.proc_root,
                settings.discovery_namespace,
                settings.script_timeout,
            );
            scanner.scan_by_pattern(&query, &mut |_: &ManagedProcess| {})?
        }
        ScanMode::Script { script, timeout } => {
            if let Some(timeout) = timeout {
                settings.script_timeout = parse_duration(&timeout)?;
            }
            let scanner = Scanner::new(
                settings.proc_root,
                settings.discovery_namespace,
                settings.script_timeout,
            );
            scanner.scan_by_script(&script, &mut |line: &str, pid: Option<u32>| {
                if pid.is_none() && !line.trim().is_empty() {
                    warn!("Ignoring script output line: {line}");
                }
            })?
        }
    };

    print_records(&found)
}

fn show_snapshot(config_path: Option<&str>, path: Option<String>) -> Result<(), Box<dyn Error>> {
    let path = match (path, config_path) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(config_path)) => {
            load_config(Path::new(config_path))?.snapshot_path(RuntimeMode::detect())
        }
        (None, None) => runtime::default_snapshot_path(RuntimeMode::detect()),
    };

    match snapshot::read_snapshot(&path)? {
        Some(records) => print_records(&records),
        None => {
            warn!("No snapshot at {path:?}");
            Ok(())
        }
    }
}

fn print_records(records: &[ManagedProcess]) -> Result<(), Box<dyn Error>> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}
