//! omnipcx-proxy: proxy between the OmniPCX Office Link Driver and the
//! Opera hotel system.
//!
//! The hotel system connects to this process as if it were the PBX. Each
//! connection is relayed to the real PBX while call detail records are
//! copied to a collector or a file.

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::watch;

use omnipcx_protocol::MessageKind;
use omnipcx_proxy::cdr_buffer::CdrBuffer;
use omnipcx_proxy::config::{self, Args, ConfigFile, Settings};
use omnipcx_proxy::logging;
use omnipcx_proxy::server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config file: explicit path > auto-detect > none
    let file_config = match config::config_path(&args) {
        Some(path) => match config::load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    let settings = Settings::resolve(args, file_config)?;
    let _log_guard = logging::init_logging(&settings.logging)?;

    info!(
        "Starting omnipcx-proxy {}: hotel port {}, PBX {}:{}, CDR {:?}",
        env!("CARGO_PKG_VERSION"),
        settings.server.hotel_port,
        settings.server.pbx_host,
        settings.server.pbx_port,
        settings.server.cdr
    );

    if !settings.server.session.password_fits(MessageKind::CheckIn) {
        warn!(
            "Default password {:?} is longer than the {} password field, blank passwords there stay blank",
            settings.server.session.default_password,
            MessageKind::CheckIn
        );
    }

    let mut buffer = CdrBuffer::new(&settings.buffer_db);
    if let Err(e) = buffer.load() {
        error!("Failed to load CDR buffer: {}", e);
        return Err(e.into());
    }
    let buffer = buffer.into_handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Stopped by signal, finishing current session");
        let _ = shutdown_tx.send(true);
    });

    let mut server = Server::new(settings.server, buffer.clone(), shutdown_rx);
    let served = server.run().await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    let saved = buffer.lock().await.save();
    match saved {
        Ok(count) => info!("Saved {} pending CDRs", count),
        Err(e) => {
            error!("Failed to save CDR buffer: {}", e);
            return Err(e.into());
        }
    }

    served?;
    info!("omnipcx-proxy stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
