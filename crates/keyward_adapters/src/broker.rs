use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::Query, http::StatusCode, routing::get, Router};
use keyward_core::config::AuthSettings;
use keyward_core::entities::BrokerOutcome;
use keyward_core::ports::AuthorizationBroker;
use keyward_core::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

type Presenter = Arc<dyn Fn(&str) + Send + Sync>;

enum Callback {
    Code(String),
    Denied(String),
}

/// Receives the OAuth redirect on a loopback port. The authorize URL is
/// handed to a presenter (print it, open a browser) and the broker waits for
/// the provider to call back with a code.
pub struct LoopbackBroker {
    port: u16,
    wait: Duration,
    running: Arc<AtomicBool>,
    presenter: Presenter,
}

impl LoopbackBroker {
    pub fn new(port: u16, wait: Duration) -> Self {
        Self {
            port,
            wait,
            running: Arc::new(AtomicBool::new(false)),
            presenter: Arc::new(|url: &str| info!(%url, "open this URL to sign in")),
        }
    }

    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::new(auth.redirect_port, auth.login_wait())
    }

    pub fn on_authorize_url<F>(mut self, presenter: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.presenter = Arc::new(presenter);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the running flag however `authorize` exits
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn callback_router(tx: Arc<Mutex<Option<oneshot::Sender<Callback>>>>) -> Router {
    Router::new().route(
        "/callback",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let tx = tx.clone();
            async move {
                let (callback, reply) = match (params.get("code"), params.get("error")) {
                    (Some(code), _) if !code.is_empty() => (
                        Callback::Code(code.clone()),
                        (StatusCode::OK, "Signed in. You can close this window."),
                    ),
                    (_, Some(error)) => (
                        Callback::Denied(error.clone()),
                        (StatusCode::OK, "Sign-in was cancelled. You can close this window."),
                    ),
                    _ => return (StatusCode::BAD_REQUEST, "Missing authorization code."),
                };

                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(callback);
                }
                reply
            }
        }),
    )
}

#[async_trait]
impl AuthorizationBroker for LoopbackBroker {
    fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    async fn authorize(&self, authorize_url: &str) -> Result<BrokerOutcome, Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::LoginInProgress);
        }
        let _guard = RunningGuard(self.running.clone());

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        let (callback_tx, callback_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(Arc::new(Mutex::new(Some(callback_tx))));

        info!(port = self.port, "waiting for authorization callback");

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    debug!("callback listener shutting down");
                })
                .await
                .ok();
        });

        (self.presenter)(authorize_url);

        let outcome = tokio::select! {
            callback = callback_rx => match callback {
                Ok(Callback::Code(code)) => BrokerOutcome::Code(code),
                Ok(Callback::Denied(error)) => {
                    warn!(%error, "authorization denied");
                    BrokerOutcome::Cancelled
                }
                Err(_) => BrokerOutcome::Cancelled,
            },
            _ = tokio::time::sleep(self.wait) => {
                warn!(wait_secs = self.wait.as_secs(), "no authorization callback received");
                BrokerOutcome::Cancelled
            }
        };

        let _ = shutdown_tx.send(());
        let _ = server.await;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own port so they can run in parallel
    fn answering(port: u16, query: &'static str) -> LoopbackBroker {
        LoopbackBroker::new(port, Duration::from_secs(5)).on_authorize_url(move |_| {
            tokio::spawn(async move {
                let url = format!("http://127.0.0.1:{}/callback?{}", port, query);
                reqwest::get(url).await.ok();
            });
        })
    }

    #[test]
    fn test_redirect_uri() {
        let broker = LoopbackBroker::new(48123, Duration::from_secs(1));
        assert_eq!(broker.redirect_uri(), "http://127.0.0.1:48123/callback");
    }

    #[tokio::test]
    async fn test_code_is_delivered() {
        let broker = answering(48311, "code=abc123&state=x");

        let outcome = broker.authorize("https://auth.example/authorize").await.unwrap();

        assert_eq!(outcome, BrokerOutcome::Code("abc123".to_string()));
        assert!(!broker.is_running());
    }

    #[tokio::test]
    async fn test_denied_consent_is_cancelled() {
        let broker = answering(48312, "error=access_denied");

        let outcome = broker.authorize("https://auth.example/authorize").await.unwrap();
        assert_eq!(outcome, BrokerOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_times_out_without_callback() {
        let broker = LoopbackBroker::new(48313, Duration::from_millis(150));

        let outcome = broker.authorize("https://auth.example/authorize").await.unwrap();

        assert_eq!(outcome, BrokerOutcome::Cancelled);
        assert!(!broker.is_running());
    }

    #[tokio::test]
    async fn test_presenter_receives_authorize_url() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let broker = LoopbackBroker::new(48314, Duration::from_millis(100))
            .on_authorize_url(move |url| *seen_clone.lock().unwrap() = Some(url.to_string()));

        broker.authorize("https://auth.example/authorize?x=1").await.unwrap();

        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("https://auth.example/authorize?x=1")
        );
    }

    #[tokio::test]
    async fn test_cannot_start_twice() {
        let broker = Arc::new(LoopbackBroker::new(48315, Duration::from_millis(400)));

        let first = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.authorize("https://auth.example/a").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(broker.is_running());
        let second = broker.authorize("https://auth.example/b").await;
        assert!(matches!(second, Err(Error::LoginInProgress)));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first, BrokerOutcome::Cancelled);
        assert!(!broker.is_running());
    }

    #[tokio::test]
    async fn test_port_in_use_is_an_error() {
        let _taken = std::net::TcpListener::bind(("127.0.0.1", 48316)).unwrap();
        let broker = LoopbackBroker::new(48316, Duration::from_millis(100));

        let result = broker.authorize("https://auth.example/authorize").await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!broker.is_running());
    }
}
