//! Upload Agent - Main entry point

use tokio_util::sync::CancellationToken;
use upload_agent::{cli, supervisor, utils};

#[tokio::main]
async fn main() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    if let Err(e) = utils::logger::init(&log_level) {
        eprintln!("failed to initialize logging: {e}");
    }

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match cli::parse_args(&raw_args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{}", cli::usage());
            std::process::exit(1);
        }
    };

    tracing::info!("upload-agent v{} starting", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("received shutdown signal, cancelling");
        signal_cancel.cancel();
    });

    let exit_code = supervisor::dispatch(args, cancel).await;
    std::process::exit(exit_code);
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
