//! # WebSocket Event Feed
//!
//! Pushes session events to UI clients. Clients connect to `/ws/events` and
//! receive every waveform chunk, prediction and state change as a JSON text frame.
//!
//! ## Protocol:
//! 1. **Connection**: the server sends a `hello` frame with the current session snapshot
//! 2. **Events**: `waveform`, `prediction` and `state_changed` frames as they happen
//! 3. **Heartbeat**: the server pings every 30 s and drops clients silent for 60 s
//!
//! Clients may send `{"type": "ping", "timestamp": ...}` and get a `pong` back.
//! Session control stays on the REST API.

use crate::audio::session::SessionSnapshot;
use crate::events::SessionEvent;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, trace, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames sent by the client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}

/// Frames sent by the server besides the session events themselves.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        session: SessionSnapshot,
        labels: Vec<String>,
    },
    Ping {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    /// The client fell behind and `skipped` events were not delivered
    Lagged {
        skipped: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// One connected UI client.
pub struct EventSocket {
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl EventSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send<T: Serialize>(&self, ctx: &mut ws::WebsocketContext<Self>, message: &T) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize WebSocket frame: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
        warn!("WebSocket error {}: {}", code, message);
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
            act.send(
                ctx,
                &ServerMessage::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
        });
    }
}

impl Actor for EventSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Event WebSocket connection started");
        self.heartbeat(ctx);

        ctx.add_stream(BroadcastStream::new(self.app_state.subscribe()));

        let state = self.app_state.clone();
        let labels = state.pipeline.labels().to_vec();
        let hello = async move { state.sessions.snapshot().await }
            .into_actor(self)
            .map(move |session, act, ctx| {
                act.send(ctx, &ServerMessage::Hello { session, labels });
            });
        ctx.spawn(hello);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Event WebSocket connection stopped");
    }
}

/// Session events from the broadcast channel.
impl StreamHandler<Result<SessionEvent, BroadcastStreamRecvError>> for EventSocket {
    fn handle(&mut self, item: Result<SessionEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match item {
            Ok(event) => {
                trace!(session_id = event.session_id(), "Forwarding session event");
                self.send(ctx, &event);
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "WebSocket client lagging, events skipped");
                self.send(ctx, &ServerMessage::Lagged { skipped });
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Event channel closed");
        ctx.stop();
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping { timestamp }) => {
                    self.last_heartbeat = Instant::now();
                    self.send(ctx, &ServerMessage::Pong { timestamp });
                }
                Ok(ClientMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Err(err) => {
                    self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported", "Binary frames are not accepted on the event feed");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the request and hands the connection to an `EventSocket` actor.
pub async fn event_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New event WebSocket connection from: {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(EventSocket::new(app_state), &req, stream)
}
