//! # Chat Service
//!
//! One global room. A client connects with its player name, receives the
//! recent history, then every `Chat` it sends is broadcast to everyone
//! connected (itself included) under the name it connected with. The
//! `sender` field a client puts on the wire is ignored.
//!
//! A member whose outbound queue fills up is dropped from the room and its
//! connection is closed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::RealmConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, MessageType};
use crate::service::session::{spawn_writer, Outbox, Session};
use crate::service::Service;
use crate::utils::metrics::Metrics;
use crate::world::registry::MAX_NAME_LEN;

pub const CONNECTED: &str = "Connected to chat server";
pub const INVALID_NAME: &str = "Invalid player name";

/// Longest chat line relayed, in bytes.
pub const MAX_CHAT_LEN: usize = 256;

const IN_ROOM: &[MessageType] = &[MessageType::Chat, MessageType::Disconnect];

/// Player name as accepted by the chat and quest services.
pub fn is_valid_player_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=MAX_NAME_LEN).contains(&len) && !name.chars().any(char::is_control)
}

/// Who is in the room and what was said recently.
#[derive(Debug)]
pub struct ChatRoom {
    members: HashMap<u32, (String, Outbox)>,
    history: VecDeque<(String, String)>,
    history_len: usize,
}

impl ChatRoom {
    pub fn new(history_len: usize) -> Self {
        Self {
            members: HashMap::new(),
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn history(&self) -> impl Iterator<Item = &(String, String)> {
        self.history.iter()
    }

    /// Add a member, replaying the history to it first.
    pub fn join(&mut self, id: u32, name: String, outbox: Outbox) {
        for (sender, message) in &self.history {
            let line = Message::Chat {
                sender: sender.clone(),
                message: message.clone(),
            };
            if outbox.try_send(line).is_err() {
                break;
            }
        }
        info!(member = id, name = %name, members = self.members.len() + 1, "Joined chat");
        self.members.insert(id, (name, outbox));
    }

    pub fn leave(&mut self, id: u32) {
        if let Some((name, _)) = self.members.remove(&id) {
            debug!(member = id, name = %name, "Left chat");
        }
    }

    /// Relay a line from member `id`. Members that cannot keep up are
    /// dropped from the room.
    pub fn say(&mut self, id: u32, message: String) {
        let Some((sender, _)) = self.members.get(&id) else {
            return;
        };
        let sender = sender.clone();
        info!(sender = %sender, "[CHAT] {message}");

        if self.history_len > 0 {
            if self.history.len() == self.history_len {
                self.history.pop_front();
            }
            self.history.push_back((sender.clone(), message.clone()));
        }

        let line = Message::Chat { sender, message };
        let lagging: Vec<u32> = self
            .members
            .iter()
            .filter(|(_, (_, outbox))| outbox.try_send(line.clone()).is_err())
            .map(|(member, _)| *member)
            .collect();
        for member in lagging {
            debug!(member, "Chat member not keeping up, removed");
            self.members.remove(&member);
        }
    }
}

pub struct ChatService {
    room: Mutex<ChatRoom>,
    /// Deep enough to take the whole history replay at once.
    queue_depth: usize,
    metrics: Arc<Metrics>,
}

impl ChatService {
    pub fn new(config: &RealmConfig) -> Self {
        Self {
            room: Mutex::new(ChatRoom::new(config.chat.history_len)),
            queue_depth: config
                .server
                .outbound_queue
                .max(config.chat.history_len)
                .max(1),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.room.lock().await.len()
    }
}

impl Service for ChatService {
    const NAME: &'static str = "chat";

    #[instrument(skip_all, fields(session = session.id, peer = %session.peer))]
    async fn handle(self: Arc<Self>, mut session: Session) -> Result<()> {
        let Message::ConnectRequest { player_name, .. } = session
            .recv_expecting(&[MessageType::ConnectRequest])
            .await?
        else {
            return Err(ProtocolError::UnexpectedMessage);
        };
        if !is_valid_player_name(&player_name) {
            session
                .send(&Message::response(false, 0, INVALID_NAME))
                .await?;
            return Ok(());
        }
        session.authenticate(player_name.clone());
        self.metrics.session_authenticated();
        session
            .send(&Message::response(true, session.id, CONNECTED))
            .await?;

        let Session {
            id, mut reader, writer, ..
        } = session;
        let (outbox, queue) = mpsc::channel(self.queue_depth);
        let mut writer = spawn_writer(writer, queue);
        self.room.lock().await.join(id, player_name, outbox);

        let mut written = None;
        let outcome = loop {
            tokio::select! {
                received = reader.recv_expecting(IN_ROOM) => match received {
                    Ok(Message::Chat { mut message, .. }) => {
                        if message.len() > MAX_CHAT_LEN {
                            let mut end = MAX_CHAT_LEN;
                            while !message.is_char_boundary(end) {
                                end -= 1;
                            }
                            message.truncate(end);
                        }
                        self.room.lock().await.say(id, message);
                    }
                    Ok(Message::Disconnect) => break Ok(()),
                    Ok(_) => break Err(ProtocolError::UnexpectedMessage),
                    Err(e) => break Err(e),
                },
                finished = &mut writer => {
                    // A clean finish means the room let go of the outbox
                    if matches!(finished, Ok(Ok(()))) {
                        info!(member = id, "Dropped from chat for falling behind");
                    }
                    written = Some(finished);
                    break Err(ProtocolError::ConnectionClosed);
                }
            }
        };

        // Removing the member drops its outbox, which ends the writer
        self.room.lock().await.leave(id);
        let finished = match written {
            Some(finished) => finished,
            None => writer.await,
        };
        match finished {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(member = id, error = %e, "Chat writer stopped"),
            Err(e) => warn!(member = id, error = %e, "Chat writer task failed"),
        }
        outcome
    }

    fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::watch;

    use crate::service::session::SessionSettings;
    use crate::service::Client;
    use crate::utils::crypto::{cipher_pair, Role};

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_player_names() {
        assert!(is_valid_player_name("Hero"));
        assert!(is_valid_player_name("a"));
        assert!(!is_valid_player_name(""));
        assert!(!is_valid_player_name("seventeen_letters"));
        assert!(!is_valid_player_name("tab\there"));
    }

    #[tokio::test]
    async fn test_history_is_capped_and_replayed() {
        let mut room = ChatRoom::new(3);
        let (tx, _rx) = mpsc::channel(16);
        room.join(1, "Alice".into(), tx);
        for i in 0..5 {
            room.say(1, format!("line {i}"));
        }
        assert_eq!(room.history().count(), 3);

        let (tx, mut rx) = mpsc::channel(16);
        room.join(2, "Bob".into(), tx);
        let replay = drain(&mut rx);
        assert_eq!(replay.len(), 3);
        assert_eq!(
            replay[0],
            Message::Chat {
                sender: "Alice".into(),
                message: "line 2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_uses_member_name_and_drops_laggards() {
        let mut room = ChatRoom::new(0);
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, _rx_b) = mpsc::channel(1);
        room.join(1, "Alice".into(), tx_a);
        room.join(2, "Bob".into(), tx_b);

        room.say(2, "hi".into());
        assert_eq!(
            drain(&mut rx_a),
            vec![Message::Chat {
                sender: "Bob".into(),
                message: "hi".into()
            }]
        );
        assert_eq!(room.len(), 2);

        // Bob never reads; his one-slot queue is now full
        room.say(1, "again".into());
        assert_eq!(room.len(), 1);
        assert_eq!(room.history().count(), 0);

        room.say(99, "ghost".into());
        assert!(drain(&mut rx_a).iter().all(|m| !matches!(m, Message::Chat { message, .. } if message == "ghost")));
    }

    #[tokio::test]
    async fn test_member_dropped_from_room_is_disconnected() {
        let config = RealmConfig::default();
        let service = Arc::new(ChatService::new(&config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut client = Client::connect(&addr, &config.security).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let ciphers = cipher_pair(
            config.security.cipher,
            config.security.shared_secret.as_bytes(),
            Role::Server,
        )
        .unwrap();
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let session = Session::new(
            7,
            peer,
            stream,
            ciphers,
            SessionSettings::default(),
            Arc::new(Metrics::new()),
            shutdown_rx,
        );
        let handler = tokio::spawn(service.clone().handle(session));

        let reply = client
            .request(&Message::ConnectRequest {
                player_id: 0,
                player_name: "Bob".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, Message::ConnectResponse { accepted: true, .. }));
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.member_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // What `say` does to a member whose queue is full
        service.room.lock().await.leave(7);

        assert!(client.receive().await.is_err());
        let outcome = tokio::time::timeout(Duration::from_secs(2), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(ProtocolError::ConnectionClosed)));
        assert_eq!(service.member_count().await, 0);
    }
}
