//! WebSocket transport over tokio-tungstenite.
//!
//! Protocol messages travel as JSON text frames. Each transport runs one
//! background task that dials, then pumps outbound frames and inbound
//! messages until either side closes.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::error::{TransportError, TransportResult};
use super::handle::{Transport, TransportFactory, TransportListener, TransportState};
use super::params::TransportParams;
use crate::core::{DISCONNECTED, ErrorInfo};
use crate::protocol::ProtocolMessage;

/// Factory for [`WebSocketTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(
        &self,
        params: TransportParams,
        listener: TransportListener,
    ) -> TransportResult<Box<dyn Transport>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;
        if params.host.is_empty() {
            return Err(TransportError::InvalidEndpoint("empty host".into()));
        }

        let url = params.url();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(TransportState::Connecting));

        tracing::debug!(host = %params.host, generation = listener.generation(), "opening websocket");
        listener.state_changed(TransportState::Connecting, None);
        let task = runtime.spawn(run(url, outgoing_rx, listener, state.clone()));

        Ok(Box::new(WebSocketTransport {
            outgoing: outgoing_tx,
            state,
            task,
        }))
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

/// A single WebSocket connection.
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    state: Arc<Mutex<TransportState>>,
    task: JoinHandle<()>,
}

impl Transport for WebSocketTransport {
    fn send(&self, message: &ProtocolMessage) -> TransportResult<()> {
        if self.state() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let frame = serde_json::to_string(message)?;
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&self) {
        match self.state() {
            TransportState::Initialized | TransportState::Connecting => {
                // Nothing to close politely yet.
                self.task.abort();
                set_state(&self.state, TransportState::Closed);
            }
            TransportState::Connected => {
                let _ = self.outgoing.send(Outgoing::Close);
            }
            TransportState::Closing | TransportState::Closed => {}
        }
    }

    fn state(&self) -> TransportState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(TransportState::Closed)
    }
}

fn set_state(state: &Mutex<TransportState>, next: TransportState) {
    if let Ok(mut current) = state.lock() {
        *current = next;
    }
}

fn decode(listener: &TransportListener, payload: &[u8]) {
    match serde_json::from_slice::<ProtocolMessage>(payload) {
        Ok(message) => listener.message(message),
        Err(e) => tracing::warn!(error = %e, "discarding undecodable frame"),
    }
}

async fn run(
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    listener: TransportListener,
    state: Arc<Mutex<TransportState>>,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            set_state(&state, TransportState::Closed);
            listener.state_changed(
                TransportState::Closed,
                Some(ErrorInfo::new(
                    DISCONNECTED,
                    503,
                    format!("websocket connect failed: {}", e),
                )),
            );
            return;
        }
    };

    set_state(&state, TransportState::Connected);
    listener.state_changed(TransportState::Connected, None);

    let (mut sink, mut source) = stream.split();
    let mut closing = false;
    let mut error = None;

    loop {
        tokio::select! {
            out = outgoing.recv(), if !closing => match out {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        error = Some(ErrorInfo::new(DISCONNECTED, 503, format!("websocket send failed: {}", e)));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    closing = true;
                    set_state(&state, TransportState::Closing);
                    listener.state_changed(TransportState::Closing, None);
                    if sink.send(Message::Close(None)).await.is_err() {
                        break;
                    }
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => decode(&listener, text.as_str().as_bytes()),
                Some(Ok(Message::Binary(bytes))) => decode(&listener, &bytes),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if !closing {
                        error = Some(ErrorInfo::new(DISCONNECTED, 503, format!("websocket error: {}", e)));
                    }
                    break;
                }
            },
        }
    }

    set_state(&state, TransportState::Closed);
    listener.state_changed(TransportState::Closed, error);
}
