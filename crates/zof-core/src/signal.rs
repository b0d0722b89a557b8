use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::ExitSignal;
use crate::handlers::SignalEvent;

/// Spawns one `tokio::signal::unix` listener per configured exit signal and
/// forwards each delivery as an in-band [`SignalEvent`] on `tx`, so
/// signals are translated into an in-band shutdown event posted to the
/// dispatcher rather than handled from the OS signal handler directly.
///
/// Returns the `JoinHandle`s so the caller can fold them into the
/// controller's task group; listeners never resolve on their own, so they
/// are always aborted rather than joined during shutdown.
pub fn install(
    exit_signals: &[ExitSignal],
    tx: mpsc::UnboundedSender<SignalEvent>,
) -> Vec<tokio::task::JoinHandle<()>> {
    exit_signals
        .iter()
        .copied()
        .filter_map(|exit_signal| {
            let kind = unix_kind(exit_signal);
            match signal(kind) {
                Ok(mut stream) => {
                    let tx = tx.clone();
                    Some(tokio::task::spawn_local(async move {
                        while stream.recv().await.is_some() {
                            let event = SignalEvent {
                                signal: exit_signal,
                                exit: true,
                            };
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }))
                }
                Err(err) => {
                    warn!("failed to install handler for {exit_signal:?}: {err}");
                    None
                }
            }
        })
        .collect()
}

fn unix_kind(exit_signal: ExitSignal) -> SignalKind {
    match exit_signal {
        ExitSignal::Interrupt => SignalKind::interrupt(),
        ExitSignal::Terminate => SignalKind::terminate(),
    }
}
