use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use makeme::config::Config;
use makeme::error::{FatalError, MailError};
use makeme::mail::{MailSession, RemoteTransport};
use makeme::poll::{Scheduler, Shutdown};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let loaded = Config::resolve_path(std::env::args().nth(1))
        .and_then(|path| Config::load(&path).map(|config| (path, config)));

    let (path, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            init_tracing(None, "info");
            let fatal = FatalError::from(e);
            error!("{fatal}");
            std::process::exit(fatal.exit_code());
        }
    };

    let guard = init_tracing(config.log_file.as_deref(), &config.log_level);

    let code = match run(path, config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    };

    drop(guard);
    std::process::exit(code);
}

/// Log to `log_file` when set, stderr otherwise. `RUST_LOG` overrides
/// `level`.
fn init_tracing(log_file: Option<&Path>, level: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path.file_name().unwrap_or(OsStr::new("makeme.log"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn run(path: PathBuf, config: Config) -> Result<(), FatalError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        username = %config.username,
        scripts = config.scripts.len(),
        "makeme starting"
    );

    let session = MailSession::new(config.session_settings()?, Box::new(RemoteTransport::new()));

    // Fail fast on bad credentials for either link
    {
        let mut state = session.lock().await;
        state.login_inbound().await.map_err(startup_error)?;
        state.logout_inbound().await;
        state.login_outbound().await.map_err(startup_error)?;

        if config.send_welcome {
            match state.send_welcome_once(&config.welcome_marker).await {
                Ok(true) => info!(to = %state.contact_address(), "Welcome email sent"),
                Ok(false) => {}
                Err(e) => warn!("Could not send welcome email: {e}"),
            }
        }
    }

    let scheduler = Scheduler::new(Arc::clone(&session), config.reconnect_backoff);
    let signals = tokio::spawn(watch_signals(
        path,
        Arc::clone(&session),
        scheduler.shutdown_handle(),
    ));

    let result = scheduler.run().await;
    signals.abort();

    session.lock().await.logout_outbound().await;
    info!("makeme stopped");
    result
}

fn startup_error(e: MailError) -> FatalError {
    match e {
        MailError::Auth { link, reason } => FatalError::Auth { link, reason },
        other => FatalError::Unexpected(other.to_string()),
    }
}

/// SIGHUP reloads the config file; SIGINT and SIGTERM stop the scheduler.
#[cfg(unix)]
async fn watch_signals(path: PathBuf, session: Arc<MailSession>, shutdown: Arc<Shutdown>) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut hangup, mut terminate) =
        match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
            (Ok(hangup), Ok(terminate)) => (hangup, terminate),
            _ => {
                warn!("Could not install signal handlers, only Ctrl-C will stop makeme");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.trigger();
                return;
            }
        };

    loop {
        tokio::select! {
            _ = hangup.recv() => reload(&path, &session).await,
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }
    shutdown.trigger();
}

#[cfg(not(unix))]
async fn watch_signals(_path: PathBuf, _session: Arc<MailSession>, shutdown: Arc<Shutdown>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Interrupted, shutting down");
    shutdown.trigger();
}

#[cfg(unix)]
async fn reload(path: &Path, session: &MailSession) {
    info!(config = %path.display(), "Reloading configuration");
    let update = match Config::load(path).and_then(|config| config.reload()) {
        Ok(update) => update,
        Err(e) => {
            error!("Keeping current configuration: {e}");
            return;
        }
    };
    if let Err(e) = session.lock().await.reload(update).await {
        error!("Could not log in with reloaded credentials: {e}");
    }
}
