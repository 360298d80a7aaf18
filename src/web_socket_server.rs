use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpMessage, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::chat_server::{ChatServer, Connect, Disconnect, JoinRoom, SendMessage, ServerEvent, WsMessage};
use crate::models::ChatPayload;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames a realtime client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientEvent {
    JoinRoom { room: String },
    SendMessage(ChatPayload),
}

pub struct WebSocketConnection {
    /// Assigned by the broker once registered.
    conn: Option<Uuid>,
    /// Authenticated user, when the upgrade request carried a token.
    user_id: Option<String>,
    hb: Instant,
    server: Addr<ChatServer>,
}

impl WebSocketConnection {
    pub fn new(server: Addr<ChatServer>, user_id: Option<String>) -> Self {
        WebSocketConnection {
            conn: None,
            user_id,
            hb: Instant::now(),
            server,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket client {:?} heartbeat failed, disconnecting", act.conn);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn emit(ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!("Failed to encode frame: {}", e),
        }
    }

    fn fail(ctx: &mut ws::WebsocketContext<Self>, message: impl Into<String>) {
        Self::emit(ctx, &ServerEvent::Error { message: message.into() });
    }

    fn on_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(conn) = self.conn else {
            Self::fail(ctx, "connection is not registered yet");
            return;
        };
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Malformed frame from {}: {}", conn, e);
                Self::fail(ctx, format!("malformed frame: {e}"));
                return;
            }
        };

        match event {
            ClientEvent::JoinRoom { room } => {
                self.server
                    .send(JoinRoom { conn, room: room.clone() })
                    .into_actor(self)
                    .then(move |res, _act, ctx| {
                        match res {
                            Ok(Ok(())) => Self::emit(ctx, &ServerEvent::Joined { room }),
                            Ok(Err(e)) => Self::fail(ctx, e.to_string()),
                            Err(e) => {
                                warn!("Room broker unavailable: {}", e);
                                ctx.stop();
                            }
                        }
                        fut::ready(())
                    })
                    .wait(ctx);
            }
            ClientEvent::SendMessage(payload) => {
                self.server
                    .send(SendMessage { conn, payload })
                    .into_actor(self)
                    .then(|res, _act, ctx| {
                        match res {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => Self::fail(ctx, e.to_string()),
                            Err(e) => warn!("Room broker unavailable: {}", e),
                        }
                        fut::ready(())
                    })
                    .spawn(ctx);
            }
        }
    }
}

impl Actor for WebSocketConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.server
            .send(Connect { addr: addr.recipient() })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(conn) => {
                        info!("WebSocket {} opened for user {:?}", conn, act.user_id);
                        act.conn = Some(conn);
                    }
                    Err(_) => {
                        warn!("Failed to register with the room broker");
                        ctx.stop();
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        if let Some(conn) = self.conn {
            self.server.do_send(Disconnect { conn });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketConnection {
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
                self.on_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                Self::fail(ctx, "binary frames are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WebSocketConnection {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) {
        Self::emit(ctx, &msg.0);
    }
}

/// GET /ws
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = req.extensions().get::<String>().cloned();
    ws::start(
        WebSocketConnection::new(data.chat_server.clone(), user_id),
        &req,
        stream,
    )
}
