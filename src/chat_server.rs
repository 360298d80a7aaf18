use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use actix::prelude::*;
use log::{debug, error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::message_store::MessageStore;
use crate::models::ChatPayload;

/// Frames pushed from the server to a realtime client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(ChatPayload),
    Joined { room: String },
    Error { message: String },
}

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct WsMessage(pub ServerEvent);

/// Registers a connection. Replies with its id; the connection starts unjoined.
#[derive(Message)]
#[rtype(result = "Uuid")]
pub struct Connect {
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub conn: Uuid,
}

/// Moves a connection into `room`, leaving its previous room.
#[derive(Message)]
#[rtype(result = "Result<(), CoreError>")]
pub struct JoinRoom {
    pub conn: Uuid,
    pub room: String,
}

#[derive(Message)]
#[rtype(result = "Result<Delivery, CoreError>")]
pub struct SendMessage {
    pub conn: Uuid,
    pub payload: ChatPayload,
}

/// Outcome of a send: how many peers got the message and whether it reached
/// the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub recipients: usize,
    pub persisted: bool,
}

struct Session {
    addr: Recipient<WsMessage>,
    room: Option<String>,
}

/// Room broker. Owns the room registry; every membership change goes through
/// its mailbox.
pub struct ChatServer {
    sessions: HashMap<Uuid, Session>,
    rooms: HashMap<String, HashSet<Uuid>>,
    store: Arc<dyn MessageStore>,
}

impl ChatServer {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        ChatServer {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            store,
        }
    }

    fn leave_room(&mut self, conn: Uuid) {
        let Some(room) = self.sessions.get_mut(&conn).and_then(|s| s.room.take()) else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&room);
                debug!("Room {} is empty, dropped", room);
            }
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = MessageResult<Connect>;

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) -> Self::Result {
        let conn = Uuid::new_v4();
        self.sessions.insert(conn, Session { addr: msg.addr, room: None });
        info!("Connection {} registered ({} active)", conn, self.sessions.len());
        MessageResult(conn)
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        self.leave_room(msg.conn);
        if self.sessions.remove(&msg.conn).is_some() {
            info!("Connection {} closed", msg.conn);
        }
    }
}

impl Handler<JoinRoom> for ChatServer {
    type Result = Result<(), CoreError>;

    fn handle(&mut self, msg: JoinRoom, _: &mut Context<Self>) -> Self::Result {
        let room = msg.room.trim().to_string();
        if room.is_empty() {
            return Err(CoreError::InvalidInput("room is required".into()));
        }
        if !self.sessions.contains_key(&msg.conn) {
            return Err(CoreError::NotFound("connection".into()));
        }

        self.leave_room(msg.conn);
        self.rooms.entry(room.clone()).or_default().insert(msg.conn);
        if let Some(session) = self.sessions.get_mut(&msg.conn) {
            session.room = Some(room.clone());
        }
        info!("Connection {} joined room {}", msg.conn, room);
        Ok(())
    }
}

fn rejected(err: CoreError) -> ResponseFuture<Result<Delivery, CoreError>> {
    Box::pin(async move { Err(err) })
}

impl Handler<SendMessage> for ChatServer {
    type Result = ResponseFuture<Result<Delivery, CoreError>>;

    fn handle(&mut self, msg: SendMessage, _: &mut Context<Self>) -> Self::Result {
        if let Err(e) = msg.payload.validate() {
            return rejected(e);
        }
        let Some(session) = self.sessions.get(&msg.conn) else {
            return rejected(CoreError::NotFound("connection".into()));
        };
        if session.room.as_deref() != Some(msg.payload.room.as_str()) {
            return rejected(CoreError::InvalidInput(format!(
                "not a member of room {}",
                msg.payload.room
            )));
        }

        // Fan out right away so peers see messages in the order they were sent.
        let event = ServerEvent::ReceiveMessage(msg.payload.clone());
        let mut recipients = 0;
        if let Some(members) = self.rooms.get(&msg.payload.room) {
            for peer in members.iter().filter(|id| **id != msg.conn) {
                if let Some(peer) = self.sessions.get(peer) {
                    peer.addr.do_send(WsMessage(event.clone()));
                    recipients += 1;
                }
            }
        }

        let store = self.store.clone();
        let message = msg.payload.into_message();
        Box::pin(async move {
            let persisted = match store.append(&message).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to store message {} in room {}: {}", message.id, message.room, e);
                    false
                }
            };
            debug!(
                "Message {} in room {} delivered to {} peer(s)",
                message.id, message.room, recipients
            );
            Ok(Delivery { recipients, persisted })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::message_store::InMemoryMessageStore;
    use crate::models::Message;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<ServerEvent>,
    }

    impl Actor for Recorder {
        type Context = Context<Self>;
    }

    impl Handler<WsMessage> for Recorder {
        type Result = ();

        fn handle(&mut self, msg: WsMessage, _: &mut Context<Self>) {
            self.seen.push(msg.0);
        }
    }

    #[derive(Message)]
    #[rtype(result = "Vec<ServerEvent>")]
    struct Seen;

    impl Handler<Seen> for Recorder {
        type Result = MessageResult<Seen>;

        fn handle(&mut self, _: Seen, _: &mut Context<Self>) -> Self::Result {
            MessageResult(self.seen.clone())
        }
    }

    #[derive(Message)]
    #[rtype(result = "Option<usize>")]
    struct RoomSize(String);

    impl Handler<RoomSize> for ChatServer {
        type Result = MessageResult<RoomSize>;

        fn handle(&mut self, msg: RoomSize, _: &mut Context<Self>) -> Self::Result {
            MessageResult(self.rooms.get(&msg.0).map(HashSet::len))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _: &Message) -> Result<(), CoreError> {
            Err(CoreError::Storage("connection reset".into()))
        }

        async fn recent(&self, _: &str, _: usize) -> Result<Vec<Message>, CoreError> {
            Ok(vec![])
        }
    }

    async fn connect(server: &Addr<ChatServer>, room: Option<&str>) -> (Uuid, Addr<Recorder>) {
        let recorder = Recorder::default().start();
        let conn = server.send(Connect { addr: recorder.clone().recipient() }).await.unwrap();
        if let Some(room) = room {
            server
                .send(JoinRoom { conn, room: room.into() })
                .await
                .unwrap()
                .unwrap();
        }
        (conn, recorder)
    }

    fn payload(room: &str, sender: &str, message: &str) -> ChatPayload {
        ChatPayload {
            room: room.into(),
            sender: sender.into(),
            sender_name: sender.to_uppercase(),
            message: message.into(),
            time: "09:15".into(),
        }
    }

    async fn seen(recorder: &Addr<Recorder>) -> Vec<ServerEvent> {
        recorder.send(Seen).await.unwrap()
    }

    #[actix::test]
    async fn fan_out_skips_the_sender_and_other_rooms() {
        let store = Arc::new(InMemoryMessageStore::new());
        let server = ChatServer::new(store.clone()).start();
        let (a, client_a) = connect(&server, Some("r1")).await;
        let (_, client_b) = connect(&server, Some("r1")).await;
        let (_, client_c) = connect(&server, Some("r1")).await;
        let (_, client_d) = connect(&server, Some("r2")).await;

        let delivery = server
            .send(SendMessage { conn: a, payload: payload("r1", "ann", "hi all") })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery, Delivery { recipients: 2, persisted: true });

        let expected = vec![ServerEvent::ReceiveMessage(payload("r1", "ann", "hi all"))];
        assert_eq!(seen(&client_b).await, expected);
        assert_eq!(seen(&client_c).await, expected);
        assert!(seen(&client_a).await.is_empty());
        assert!(seen(&client_d).await.is_empty());
        assert_eq!(store.recent("r1", 50).await.unwrap().len(), 1);
    }

    #[actix::test]
    async fn hello_reaches_the_peer_and_history() {
        let store = Arc::new(InMemoryMessageStore::new());
        let server = ChatServer::new(store.clone()).start();
        let (a, _client_a) = connect(&server, Some("session-42")).await;
        let (_, client_b) = connect(&server, Some("session-42")).await;

        server
            .send(SendMessage { conn: a, payload: payload("session-42", "ann", "hello") })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            seen(&client_b).await,
            vec![ServerEvent::ReceiveMessage(payload("session-42", "ann", "hello"))]
        );
        let history = store.recent("session-42", 50).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "hello");
        assert_eq!(history[0].sender, "ann");
    }

    #[actix::test]
    async fn messages_arrive_in_send_order() {
        let server = ChatServer::new(Arc::new(InMemoryMessageStore::new())).start();
        let (a, _) = connect(&server, Some("r")).await;
        let (_, client_b) = connect(&server, Some("r")).await;
        for text in ["one", "two", "three"] {
            server
                .send(SendMessage { conn: a, payload: payload("r", "ann", text) })
                .await
                .unwrap()
                .unwrap();
        }
        let bodies: Vec<String> = seen(&client_b)
            .await
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage(p) => Some(p.message),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[actix::test]
    async fn joining_another_room_leaves_the_previous_one() {
        let server = ChatServer::new(Arc::new(InMemoryMessageStore::new())).start();
        let (a, client_a) = connect(&server, Some("r1")).await;
        let (b, _) = connect(&server, Some("r1")).await;
        server.send(JoinRoom { conn: a, room: "r2".into() }).await.unwrap().unwrap();

        assert_eq!(server.send(RoomSize("r1".into())).await.unwrap(), Some(1));
        assert_eq!(server.send(RoomSize("r2".into())).await.unwrap(), Some(1));

        let delivery = server
            .send(SendMessage { conn: b, payload: payload("r1", "bob", "anyone?") })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.recipients, 0);
        assert!(seen(&client_a).await.is_empty());
    }

    #[actix::test]
    async fn empty_rooms_are_dropped() {
        let server = ChatServer::new(Arc::new(InMemoryMessageStore::new())).start();
        let (a, _) = connect(&server, Some("r1")).await;
        let (b, _) = connect(&server, Some("r1")).await;

        server.send(Disconnect { conn: a }).await.unwrap();
        assert_eq!(server.send(RoomSize("r1".into())).await.unwrap(), Some(1));
        server.send(Disconnect { conn: b }).await.unwrap();
        assert_eq!(server.send(RoomSize("r1".into())).await.unwrap(), None);

        // Unknown connections are ignored.
        server.send(Disconnect { conn: Uuid::new_v4() }).await.unwrap();
    }

    #[actix::test]
    async fn store_failure_does_not_block_delivery() {
        let server = ChatServer::new(Arc::new(FailingStore)).start();
        let (a, _) = connect(&server, Some("r")).await;
        let (_, client_b) = connect(&server, Some("r")).await;

        let delivery = server
            .send(SendMessage { conn: a, payload: payload("r", "ann", "still here") })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery, Delivery { recipients: 1, persisted: false });
        assert_eq!(seen(&client_b).await.len(), 1);
    }

    #[actix::test]
    async fn rejects_sends_outside_the_current_room() {
        let server = ChatServer::new(Arc::new(InMemoryMessageStore::new())).start();
        let (unjoined, _) = connect(&server, None).await;
        let (a, _) = connect(&server, Some("r1")).await;

        let res = server
            .send(SendMessage { conn: unjoined, payload: payload("r1", "x", "hi") })
            .await
            .unwrap();
        assert!(matches!(res, Err(CoreError::InvalidInput(_))));

        let res = server
            .send(SendMessage { conn: a, payload: payload("r2", "ann", "hi") })
            .await
            .unwrap();
        assert!(matches!(res, Err(CoreError::InvalidInput(_))));

        let res = server
            .send(SendMessage { conn: a, payload: payload("r1", "ann", "  ") })
            .await
            .unwrap();
        assert!(matches!(res, Err(CoreError::InvalidInput(_))));

        let res = server.send(JoinRoom { conn: a, room: " ".into() }).await.unwrap();
        assert!(matches!(res, Err(CoreError::InvalidInput(_))));
        let res = server
            .send(JoinRoom { conn: Uuid::new_v4(), room: "r1".into() })
            .await
            .unwrap();
        assert!(matches!(res, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn server_events_are_tagged() {
        let json = serde_json::to_value(ServerEvent::ReceiveMessage(payload("r", "ann", "yo"))).unwrap();
        assert_eq!(json["type"], "receive_message");
        assert_eq!(json["senderName"], "ANN");
        assert_eq!(json["message"], "yo");

        let json = serde_json::to_value(ServerEvent::Joined { room: "r".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "joined", "room": "r" }));
    }
}
