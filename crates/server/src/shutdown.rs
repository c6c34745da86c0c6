//! Process shutdown signal.

use std::io;

/// Completes when the process is asked to stop, returning the name of the
/// signal that fired.
///
/// Ctrl+C covers interactive runs; SIGTERM is what service managers and
/// container runtimes send. Handler installation is fallible rather than
/// fatal here — the caller decides whether a server that cannot be told
/// to stop should keep serving.
#[cfg(unix)]
pub async fn wait_for_shutdown() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Completes when the process is asked to stop, returning the name of the
/// signal that fired. Non-Unix targets only get Ctrl+C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "SIGINT")
}
