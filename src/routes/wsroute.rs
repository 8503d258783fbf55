//! WebSocket transport for the chat gateway.
//!
//! The handshake carries a bearer credential (query `token` or
//! `Authorization` header); a connection that fails verification is closed
//! with 401 before any event is processed. Each inbound text frame is one
//! client event, optionally carrying a `seq` the ack echoes back. Outbound
//! broadcasts arrive on the registry channel and are bridged into the actor
//! as a stream.

use crate::error::AppError;
use crate::gateway::ChatGateway;
use crate::protocol::{AckFrame, ClientEvent, ServerEvent};
use crate::rooms::ConnectionId;
use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// Serialized frame handed to the WebSocket actor for delivery
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Outbound(String);

struct WsSession {
    conn_id: ConnectionId,
    gateway: Arc<ChatGateway>,
    hb: Instant,
    rx: Option<UnboundedReceiver<ServerEvent>>,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(connection = %act.conn_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn dispatch(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.reject(None, format!("malformed frame: {e}"), ctx);
                return;
            }
        };
        let seq = value.get("seq").and_then(|v| v.as_u64());
        let event: ClientEvent = match serde_json::from_value(value) {
            Ok(evt) => evt,
            Err(e) => {
                self.reject(seq, format!("unrecognized event: {e}"), ctx);
                return;
            }
        };

        let gateway = self.gateway.clone();
        let conn_id = self.conn_id;
        let addr = ctx.address();
        actix::spawn(async move {
            let ack = gateway.handle_event(conn_id, event).await;
            let frame = ServerEvent::Ack(ack.into_frame(seq));
            match serde_json::to_string(&frame) {
                Ok(text) => addr.do_send(Outbound(text)),
                Err(e) => error!(error = %e, "failed to serialize ack"),
            }
        });
    }

    fn reject(&self, seq: Option<u64>, message: String, ctx: &mut ws::WebsocketContext<Self>) {
        let frame = ServerEvent::Ack(AckFrame::error(seq, &AppError::Validation(message)));
        if let Ok(text) = serde_json::to_string(&frame) {
            ctx.text(text);
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.conn_id, "websocket session started");
        self.hb(ctx);

        // Bridge the registry's broadcast channel into this actor.
        if let Some(rx) = self.rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Cleanup runs after the actor is gone, but the registry entry
        // survives until disconnect() removes it; broadcasts in that window
        // land on the dropped channel and are discarded, so no member can
        // observe a partially-cleaned connection.
        let gateway = self.gateway.clone();
        let conn_id = self.conn_id;
        actix::spawn(async move {
            gateway.disconnect(conn_id).await;
        });
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// Broadcasts from the room registry
impl StreamHandler<ServerEvent> for WsSession {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => error!(error = %e, "failed to serialize broadcast"),
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // Channel closes once the gateway has released the connection;
        // the websocket stream drives actor shutdown.
    }
}

// WebSocket protocol messages from the client
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.dispatch(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                let event = ServerEvent::Error {
                    code: "ValidationFailure".into(),
                    message: "binary frames are not supported".into(),
                };
                if let Ok(text) = serde_json::to_string(&event) {
                    ctx.text(text);
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.conn_id, ?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %self.conn_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

fn bearer_token(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    })
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();

    let Some(token) = bearer_token(&params, &req) else {
        warn!("websocket rejected: no credential provided");
        return Ok(HttpResponse::Unauthorized().finish());
    };

    let (conn_id, rx) = match state.gateway.connect(&token).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "websocket rejected: authentication failed");
            return Ok(HttpResponse::Unauthorized().finish());
        }
    };

    let session = WsSession {
        conn_id,
        gateway: state.gateway.clone(),
        hb: Instant::now(),
        rx: Some(rx),
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // The actor never started, so its stop hook will not run.
            let gateway = state.gateway.clone();
            tokio::spawn(async move {
                gateway.disconnect(conn_id).await;
            });
            Err(e)
        }
    }
}
