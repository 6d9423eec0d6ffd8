use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Stop signal for the webhook listener.
///
/// Once the token is cancelled the listener stops accepting connections and
/// in-flight deliveries get `drain` to finish, so an alert that is mid-send
/// still gets its incident stamped.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    drain: Duration,
}

impl Shutdown {
    pub fn new(drain: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token on SIGTERM or Ctrl+C.
    pub fn listen_for_signals(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "stop requested, draining in-flight webhooks");
            token.cancel();
        });
    }

    /// Drive `serve` to completion, or give up `drain` after cancellation.
    ///
    /// Returns `None` when the drain deadline cut the server off.
    pub async fn run_until_drained<F, T>(&self, serve: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let deadline = async {
            self.token.cancelled().await;
            tokio::time::sleep(self.drain).await;
        };
        tokio::select! {
            out = serve => Some(out),
            () = deadline => {
                tracing::warn!(drain_secs = self.drain.as_secs(), "drain deadline elapsed, abandoning in-flight webhooks");
                None
            }
        }
    }
}

async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => return "SIGTERM",
                    _ = signal::ctrl_c() => return "SIGINT",
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot register SIGTERM handler, Ctrl+C only"),
        }
    }
    let _ = signal::ctrl_c().await;
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_server_is_returned() {
        let shutdown = Shutdown::new(Duration::from_secs(5));
        assert_eq!(shutdown.run_until_drained(async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_server_is_cut_off_after_drain() {
        let shutdown = Shutdown::new(Duration::from_secs(2));
        shutdown.token().cancel();
        let out = shutdown
            .run_until_drained(std::future::pending::<()>())
            .await;
        assert_eq!(out, None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_without_cancellation() {
        let shutdown = Shutdown::new(Duration::from_millis(1));
        let out = shutdown
            .run_until_drained(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "served"
            })
            .await;
        assert_eq!(out, Some("served"));
    }
}
