//! The long-lived event channel.
//!
//! One WebSocket connection per client carries execution events for
//! every submission. A background actor owns the read side: it connects,
//! feeds each text frame to the demultiplexer synchronously, and on loss
//! reconnects with bounded exponential backoff
//! (`delay = min(base * 2^attempt, max)`). Once the retry budget is
//! exhausted the channel transitions to failed and in-flight submissions
//! are aborted; subsequent operations surface as unavailable.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{ComfyError, Result};
use crate::queue::SubmissionRegistry;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Tunable parameters for connection retry.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Delay before the second connection attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before the channel fails.
    pub max_retry: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retry: 5,
        }
    }
}

/// `min(base * 2^attempt, max)` with overflow clamped to `max`.
pub fn backoff_delay(attempt: u32, config: &WsConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay = Duration::from_millis(base_ms.saturating_mul(factor));
    delay.min(config.max_delay)
}

/// Connection lifecycle as observed by waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    /// Retry budget exhausted; the channel will not recover.
    Failed,
}

/// Handle to the event-channel actor.
pub(crate) struct EventChannel {
    state: watch::Receiver<ChannelState>,
    writer: Arc<Mutex<Option<WsSink>>>,
    cancel: CancellationToken,
}

impl EventChannel {
    /// Spawn the connection actor. The returned handle observes state
    /// transitions and can probe liveness.
    pub fn spawn(url: String, config: WsConfig, registry: Arc<SubmissionRegistry>) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let writer: Arc<Mutex<Option<WsSink>>> = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let actor_writer = Arc::clone(&writer);
        let actor_cancel = cancel.clone();
        tokio::spawn(async move {
            run_event_loop(url, config, registry, state_tx, actor_writer, actor_cancel).await;
        });

        Self {
            state: state_rx,
            writer,
            cancel,
        }
    }

    /// Block until the first successful connection, or fail when the
    /// retry budget runs out.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                ChannelState::Connected => return Ok(()),
                ChannelState::Failed => {
                    return Err(ComfyError::Unavailable(
                        "event channel failed after exhausting reconnect attempts".to_string(),
                    ))
                }
                ChannelState::Connecting => {}
            }
            if state.changed().await.is_err() {
                return Err(ComfyError::Unavailable(
                    "event channel actor terminated".to_string(),
                ));
            }
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Probe liveness by writing a keepalive frame. A failed write marks
    /// the connection down; the actor reconnects on its own.
    pub async fn ping(&self) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink.send(Message::Ping(Vec::new().into())).await.is_ok(),
            None => false,
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Core actor loop: connect, read frames into the demultiplexer,
/// reconnect with backoff, give up after `max_retry` failures.
async fn run_event_loop(
    url: String,
    config: WsConfig,
    registry: Arc<SubmissionRegistry>,
    state_tx: watch::Sender<ChannelState>,
    writer: Arc<Mutex<Option<WsSink>>>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let connecting = connect_async(url.as_str());
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connecting => result,
        };
        match stream {
            Ok((ws_stream, _response)) => {
                tracing::info!(url = %url, "event channel connected");
                attempt = 0;
                let (sink, mut reader) = ws_stream.split();
                *writer.lock().await = Some(sink);
                state_tx.send_replace(ChannelState::Connected);

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => return,
                        frame = reader.next() => frame,
                    };
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            registry.dispatch(text.as_str()).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "event channel closed by server");
                            break;
                        }
                        // binary frames carry preview images; pings and
                        // pongs are handled by the protocol layer
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "event channel read error");
                            break;
                        }
                        None => break,
                    }
                }

                *writer.lock().await = None;
                state_tx.send_replace(ChannelState::Connecting);
                if cancel.is_cancelled() {
                    return;
                }
                tracing::info!("event channel lost, reconnecting");
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event channel connect failed");
                if attempt >= config.max_retry {
                    tracing::error!(
                        attempts = attempt + 1,
                        "event channel giving up after exhausting retries"
                    );
                    state_tx.send_replace(ChannelState::Failed);
                    registry.abort_all().await;
                    return;
                }
                let delay = backoff_delay(attempt, &config);
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
