//! WebSocket session lifecycle: one connection, one measurement session,
//! from upgrade through disconnect.
//!
//! Four tasks cooperate per connection:
//!
//! - the reader (this function) parses inbound messages, interrupts an
//!   in-flight estimate on `start`/`stop`, and forwards work in order
//! - the session task owns the [`SessionController`] and emits reports
//! - the writer drains reports and sends periodic pings
//! - the heartbeat monitor closes connections that stop answering

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use pulse_core::{ClientId, Command, ProtocolError, Report, SessionFatalError};
use pulse_session::SessionController;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::hub::SessionHub;
use super::registry::ConnectionSlot;
use crate::metrics::{
    PROTOCOL_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Inbound commands queued ahead of the session task.
const INPUT_QUEUE: usize = 64;

/// How long the writer gets to flush and close after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// What the reader makes of one transport message.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Command(Command),
    /// The run cannot continue; the session moves to `Errored`.
    Fault(SessionFatalError),
    /// Dropped without a reply.
    Ignored(ProtocolError),
    Keepalive,
    Close,
}

/// Classify a transport message. Text and UTF-8 binary are both accepted.
pub fn classify(message: Message, max_size: usize) -> Inbound {
    match message {
        Message::Text(text) => parse_text(text.as_str(), max_size),
        Message::Binary(bytes) => {
            if bytes.len() > max_size {
                return oversize(bytes.len(), max_size);
            }
            match std::str::from_utf8(&bytes) {
                Ok(text) => parse_text(text, max_size),
                Err(_) => Inbound::Fault(SessionFatalError::Transport(format!(
                    "binary message of {} bytes is not valid UTF-8",
                    bytes.len()
                ))),
            }
        }
        Message::Ping(_) | Message::Pong(_) => Inbound::Keepalive,
        Message::Close(_) => Inbound::Close,
    }
}

fn parse_text(text: &str, max_size: usize) -> Inbound {
    if text.len() > max_size {
        return oversize(text.len(), max_size);
    }
    match Command::parse(text) {
        Ok(command) => Inbound::Command(command),
        Err(e) => Inbound::Ignored(e),
    }
}

fn oversize(len: usize, max_size: usize) -> Inbound {
    Inbound::Fault(SessionFatalError::Transport(format!(
        "message of {len} bytes exceeds the {max_size} byte limit"
    )))
}

enum SessionInput {
    /// A command and the interrupt token current when it was read.
    Command(Command, CancellationToken),
    Fault(SessionFatalError),
}

enum ReadEnd {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    Shutdown,
    /// The session task finished first; carries its result when already polled.
    SessionEnded(Option<Result<(), JoinError>>),
}

impl ReadEnd {
    fn reason(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
            Self::SessionEnded(_) => "session_ended",
        }
    }
}

/// Run one connection to completion.
#[instrument(skip_all, fields(client_id = %client_id, session_id = tracing::field::Empty))]
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: ClientId,
    hub: Arc<SessionHub>,
    slot: ConnectionSlot,
    shutdown: CancellationToken,
) {
    let config = hub.config().clone();
    let (ws_tx, mut ws_rx) = ws.split();

    let controller = hub.new_controller();
    let interrupt = controller.interrupt_handle();
    let session_id = controller.id().clone();
    let _ = tracing::Span::current().record("session_id", session_id.as_str());

    let (send_tx, send_rx) = mpsc::channel::<String>(config.send_queue);
    let connection = Arc::new(ClientConnection::new(client_id, session_id, send_tx));
    hub.registry().add(Arc::clone(&connection));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let cancel = shutdown.child_token();

    let mut writer = tokio::spawn(
        write_loop(ws_tx, send_rx, config.heartbeat_interval, cancel.clone()).in_current_span(),
    );

    let heartbeat = tokio::spawn({
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        let (interval, timeout) = (config.heartbeat_interval, config.heartbeat_timeout);
        async move {
            if run_heartbeat(connection, interval, timeout, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!(?timeout, "client unresponsive, disconnecting");
                cancel.cancel();
            }
        }
        .in_current_span()
    });

    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
    let mut session_task = tokio::spawn(
        drive_session(controller, input_rx, Arc::clone(&connection)).in_current_span(),
    );

    let end = loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                break if shutdown.is_cancelled() { ReadEnd::Shutdown } else { ReadEnd::HeartbeatTimeout };
            }
            joined = &mut session_task => break ReadEnd::SessionEnded(Some(joined)),
            next = ws_rx.next() => match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break ReadEnd::TransportError;
                }
                None => break ReadEnd::ClientClosed,
            },
        };

        connection.mark_alive();
        let input = match classify(message, config.max_message_size) {
            Inbound::Command(command) => {
                if command.is_control() {
                    interrupt.interrupt();
                }
                SessionInput::Command(command, interrupt.current())
            }
            Inbound::Fault(fault) => {
                warn!(error = %fault, "unusable inbound message");
                SessionInput::Fault(fault)
            }
            Inbound::Ignored(e) => {
                counter!(PROTOCOL_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
                if e == ProtocolError::MissingFrame {
                    debug!("message without action or frame ignored");
                } else {
                    warn!(kind = e.error_kind(), error = %e, "unrecognized message ignored");
                }
                continue;
            }
            Inbound::Keepalive => continue,
            Inbound::Close => {
                info!("client sent close frame");
                break ReadEnd::ClientClosed;
            }
        };

        if input_tx.send(input).await.is_err() {
            break ReadEnd::SessionEnded(None);
        }
    };

    let reason = end.reason();
    drop(input_tx);
    match end {
        ReadEnd::SessionEnded(joined) => {
            let joined = match joined {
                Some(joined) => joined,
                None => session_task.await,
            };
            if let Err(e) = joined {
                let cause = failure_cause(e);
                error!(cause = %cause, "session task failed");
                let _ = connection.try_send_report(&Report::connection_error(&cause));
            }
        }
        _ => {
            interrupt.interrupt();
            session_task.abort();
        }
    }

    cancel.cancel();
    let _ = heartbeat.await;
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        debug!("writer did not flush in time");
        writer.abort();
    }

    let _ = hub.registry().remove(&connection.id);
    drop(slot);

    info!(
        reason,
        dropped = connection.drop_count(),
        duration_secs = connection_start.elapsed().as_secs(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Feed inputs through the controller one at a time, in arrival order.
async fn drive_session(
    mut controller: SessionController,
    mut inputs: mpsc::Receiver<SessionInput>,
    connection: Arc<ClientConnection>,
) {
    while let Some(input) = inputs.recv().await {
        let report = match input {
            SessionInput::Command(command, token) => {
                controller.handle_with(command, token).await
            }
            SessionInput::Fault(fault) => Some(controller.fail(fault)),
        };
        connection.set_active(controller.state().is_accumulating());

        if let Some(report) = report {
            if !connection.send_report(&report).await {
                debug!("write task gone, session stopping");
                break;
            }
        }
    }
    connection.set_active(false);
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(text) = message else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
            () = cancel.cancelled() => break,
        }
    }

    while let Ok(text) = outbound.try_recv() {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

fn failure_cause(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "session task panicked".into())
}
