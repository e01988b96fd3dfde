//! Message dispatch — one entry point per inbound frame.
//!
//! The connection loop holds the broker-wide dispatch lock for the duration
//! of each call in here, so a handler sees the registries frozen except for
//! its own mutations, and all of its fan-out writes complete before the next
//! frame on any connection is dispatched. Persistence failures are logged
//! and never abort a dispatch; the in-memory effect still applies.

use std::sync::Arc;

use bytes::Bytes;
use parley_core::frame::{FileMeta, Frame};
use parley_core::topic::{dm_peer, is_dm_topic};
use parley_core::wire::MsgType;
use parley_store::{NewMessage, Store, StoreError};

use crate::clients::{ClientConn, ClientRegistry};
use crate::topics::TopicRegistry;
use crate::transfers::TransferRegistry;

/// What the connection loop should do after a frame is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Session teardown already ran; close the socket without running it again.
    Disconnect,
}

/// Registry sizes, for the periodic snapshot log.
#[derive(Debug, Clone, Copy)]
pub struct BrokerStats {
    pub clients: usize,
    pub topics: usize,
    pub transfers: usize,
}

pub struct MessageHandler {
    clients: Arc<ClientRegistry>,
    topics: Arc<TopicRegistry>,
    transfers: Arc<TransferRegistry>,
    store: Arc<Store>,
    history_limit: usize,
}

impl MessageHandler {
    pub fn new(
        clients: Arc<ClientRegistry>,
        topics: Arc<TopicRegistry>,
        transfers: Arc<TransferRegistry>,
        store: Arc<Store>,
        history_limit: usize,
    ) -> Self {
        Self {
            clients,
            topics,
            transfers,
            store,
            history_limit,
        }
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            clients: self.clients.len(),
            topics: self.topics.len(),
            transfers: self.transfers.len(),
        }
    }

    /// Dispatch one inbound frame. Unknown message types are ignored without
    /// closing the connection; they are reserved for future use.
    pub async fn dispatch(&self, conn: &Arc<ClientConn>, frame: Frame) -> Disposition {
        match frame.kind() {
            Some(MsgType::Login) => self.on_login(conn, &frame).await,
            Some(MsgType::Logout) => {
                self.on_disconnect(conn.id()).await;
                return Disposition::Disconnect;
            }
            Some(MsgType::Subscribe) => self.on_subscribe(conn, &frame).await,
            Some(MsgType::Unsubscribe) => self.on_unsubscribe(conn, &frame).await,
            Some(MsgType::PublishText) => self.on_publish_text(conn, &frame).await,
            Some(MsgType::PublishFile) => self.on_publish_file(conn, &frame).await,
            Some(MsgType::FileData) => self.on_file_data(conn, &frame).await,
            Some(MsgType::RequestUserList) => self.on_request_user_list(conn).await,
            Some(MsgType::RequestHistory) => self.on_request_history(conn, &frame).await,
            Some(MsgType::Game) => self.on_game(&frame).await,
            Some(_) | None => {
                tracing::debug!(msg_type = frame.msg_type, "ignoring unexpected frame");
            }
        }
        Disposition::Continue
    }

    /// Session teardown. The connection loop guarantees this runs exactly
    /// once per connection, on LOGOUT or transport loss.
    pub async fn on_disconnect(&self, conn_id: u64) {
        let Some(username) = self.clients.remove(conn_id) else {
            return;
        };
        self.topics.remove_user_everywhere(&username);
        log_store_error(self.store.users.set_online(&username, false));

        let mut offline = Frame::new(MsgType::UserOffline);
        offline.payload = Bytes::copy_from_slice(username.as_bytes());
        self.broadcast(&offline, None).await;

        tracing::info!(user = %username, "user disconnected");
    }

    // ── Frame handlers ───────────────────────────────────────────────────────

    async fn on_login(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let username = frame.sender.clone();
        if username.is_empty() {
            self.send_error(conn, "Invalid username").await;
            return;
        }
        if !self.clients.add(&username, conn.clone()) {
            tracing::warn!(user = %username, "login refused, name in use");
            self.send_error(conn, "Username already taken").await;
            return;
        }

        log_store_error(self.store.users.login(&username));
        self.send_ack(conn, "Login successful").await;

        // Presence goes out after the ACK and before anything else addressed
        // to this client.
        let mut online = Frame::new(MsgType::UserOnline);
        online.sender = username.clone();
        online.payload = Bytes::copy_from_slice(username.as_bytes());
        self.broadcast(&online, Some(&username)).await;

        self.send_user_list(conn, &username).await;
        self.send_group_list_and_subscribe(conn, &username).await;

        tracing::info!(user = %username, peer = %conn.peer(), "user logged in");
    }

    async fn on_subscribe(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let Some(username) = self.clients.name_of(conn.id()) else {
            self.send_error(conn, "Not logged in").await;
            return;
        };
        let topic = frame.topic.clone();

        self.topics.subscribe(&topic, &username);

        if !is_dm_topic(&topic) {
            let is_new = self
                .store
                .groups
                .create(&topic, &username)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, group = %topic, "group create failed");
                    false
                });
            log_store_error(self.store.groups.add_member(&topic, &username).map(|_| ()));

            if is_new {
                let mut created = Frame::new(MsgType::GroupCreated);
                created.sender = username.clone();
                created.topic = topic.clone();
                created.payload = Bytes::copy_from_slice(topic.as_bytes());
                self.broadcast(&created, None).await;
                tracing::info!(group = %topic, creator = %username, "group created");
            }
        }

        self.send_ack(conn, &format!("Subscribed to {topic}")).await;
        tracing::debug!(user = %username, topic = %topic, "subscribed");
    }

    async fn on_unsubscribe(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let Some(username) = self.clients.name_of(conn.id()) else {
            self.send_error(conn, "Not logged in").await;
            return;
        };
        let topic = frame.topic.clone();

        self.topics.unsubscribe(&topic, &username);
        if !is_dm_topic(&topic) {
            log_store_error(self.store.groups.remove_member(&topic, &username).map(|_| ()));
        }

        self.send_ack(conn, &format!("Unsubscribed from {topic}")).await;
        tracing::debug!(user = %username, topic = %topic, "unsubscribed");
    }

    async fn on_publish_text(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let sender = frame.sender.clone();
        let topic = frame.topic.clone();
        let content = frame.text();

        if is_dm_topic(&topic) {
            if let Some(peer) = dm_peer(&topic, &sender) {
                log_store_error(
                    self.store
                        .messages
                        .append(NewMessage {
                            sender: &sender,
                            recipient: &peer,
                            content: &content,
                            is_group: false,
                            is_file: false,
                            filename: "",
                        })
                        .map(|_| ()),
                );
                self.forward_to_user(&peer, frame).await;
            }
        } else {
            log_store_error(
                self.store
                    .messages
                    .append(NewMessage {
                        sender: &sender,
                        recipient: &topic,
                        content: &content,
                        is_group: true,
                        is_file: false,
                        filename: "",
                    })
                    .map(|_| ()),
            );
            self.forward_to_subscribers(&topic, &sender, frame).await;
        }

        self.send_ack(conn, "Message published").await;
        tracing::debug!(user = %sender, topic = %topic, bytes = frame.payload.len(), "text published");
    }

    async fn on_publish_file(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let sender = frame.sender.clone();
        let topic = frame.topic.clone();

        let meta = match FileMeta::decode(&frame.payload) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(user = %sender, error = %e, "bad file announcement");
                self.send_error(conn, "Malformed file announcement").await;
                return;
            }
        };

        self.transfers
            .open(frame.message_id, &meta.filename, meta.size, &sender, &topic);

        let marker = format!("[FILE] {}", meta.filename);
        let recipient = if is_dm_topic(&topic) {
            dm_peer(&topic, &sender)
        } else {
            Some(topic.clone())
        };
        if let Some(recipient) = &recipient {
            log_store_error(
                self.store
                    .messages
                    .append(NewMessage {
                        sender: &sender,
                        recipient,
                        content: &marker,
                        is_group: !is_dm_topic(&topic),
                        is_file: true,
                        filename: &meta.filename,
                    })
                    .map(|_| ()),
            );
        }

        if is_dm_topic(&topic) {
            if let Some(peer) = dm_peer(&topic, &sender) {
                self.forward_to_user(&peer, frame).await;
            }
        } else {
            self.forward_to_subscribers(&topic, &sender, frame).await;
        }

        self.send_ack(conn, "Ready to receive file").await;
        tracing::info!(
            user = %sender,
            topic = %topic,
            file = %meta.filename,
            bytes = meta.size,
            message_id = frame.message_id,
            "file transfer opened"
        );
    }

    async fn on_file_data(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let message_id = frame.message_id;

        // Routing comes from the transfer opened by PUBLISH_FILE, not from
        // this frame's own topic field.
        let Some((sender, topic)) = self.transfers.route(message_id) else {
            self.send_error(conn, "No active file transfer").await;
            return;
        };

        let progress = self.transfers.append(message_id, frame.payload.len() as u32);

        if is_dm_topic(&topic) {
            if let Some(peer) = dm_peer(&topic, &sender) {
                self.forward_to_user(&peer, frame).await;
            }
        } else {
            self.forward_to_subscribers(&topic, &sender, frame).await;
        }

        match progress {
            Some(p) if p.complete => {
                self.transfers.remove(message_id);
                self.send_ack(conn, "File transfer complete").await;
                tracing::info!(message_id, bytes = p.size, "file transfer complete");
            }
            Some(p) => {
                tracing::debug!(message_id, received = p.received, total = p.size, "file chunk relayed");
            }
            None => {}
        }
    }

    async fn on_request_user_list(&self, conn: &Arc<ClientConn>) {
        let username = self.clients.name_of(conn.id()).unwrap_or_default();
        self.send_user_list(conn, &username).await;
    }

    async fn on_request_history(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        let Some(username) = self.clients.name_of(conn.id()) else {
            self.send_error(conn, "Not logged in").await;
            return;
        };
        let topic = frame.topic.clone();

        let rows = if is_dm_topic(&topic) {
            match dm_peer(&topic, &username) {
                Some(peer) => self.store.messages.dm_history(&username, &peer, self.history_limit),
                None => Ok(Vec::new()),
            }
        } else {
            self.store.messages.topic_history(&topic, self.history_limit)
        };

        let rows = rows.unwrap_or_else(|e| {
            tracing::warn!(error = %e, topic = %topic, "history read failed");
            Vec::new()
        });

        for msg in rows {
            let content = if msg.is_file {
                format!("[FILE] {}", msg.filename)
            } else {
                msg.content
            };
            let mut history = Frame::new(MsgType::HistoryData);
            history.timestamp = msg.timestamp;
            history.sender = msg.sender;
            history.topic = topic.clone();
            history.payload = Bytes::from(content.into_bytes());
            self.send_frame(conn, &history).await;
        }

        self.send_ack(conn, "History sent").await;
        tracing::debug!(user = %username, topic = %topic, "history sent");
    }

    async fn on_game(&self, frame: &Frame) {
        // The topic field carries the recipient username, not a topic.
        let recipient = frame.topic.clone();
        self.forward_to_user(&recipient, frame).await;
        tracing::debug!(from = %frame.sender, to = %recipient, "game frame relayed");
    }

    // ── Fan-out and replies ──────────────────────────────────────────────────

    /// Forward a frame verbatim to a single user, if connected.
    /// Missing peers are silently skipped; there is no queuing.
    async fn forward_to_user(&self, username: &str, frame: &Frame) {
        if let Some(peer) = self.clients.get(username) {
            if let Err(e) = peer.send(frame).await {
                tracing::warn!(user = %username, error = %e, "forward failed");
            }
        }
    }

    /// Forward a frame verbatim to every subscriber of a topic except the
    /// sender. A failed leg is logged; the others continue.
    async fn forward_to_subscribers(&self, topic: &str, sender: &str, frame: &Frame) {
        for subscriber in self.topics.subscribers(topic) {
            if subscriber == sender {
                continue;
            }
            self.forward_to_user(&subscriber, frame).await;
        }
    }

    /// Send a frame to every connected client, minus an optional exclusion.
    async fn broadcast(&self, frame: &Frame, exclude: Option<&str>) {
        for (username, peer) in self.clients.snapshot() {
            if exclude == Some(username.as_str()) {
                continue;
            }
            if let Err(e) = peer.send(frame).await {
                tracing::warn!(user = %username, error = %e, "broadcast leg failed");
            }
        }
    }

    /// Current online users, semicolon-separated, excluding the recipient.
    async fn send_user_list(&self, conn: &Arc<ClientConn>, recipient: &str) {
        let names: Vec<String> = self
            .clients
            .snapshot()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name != recipient)
            .collect();

        let mut list = Frame::new(MsgType::UserList);
        list.payload = Bytes::from(names.join(";").into_bytes());
        self.send_frame(conn, &list).await;
    }

    /// Send the group catalogue (`name:0|1;…`) and re-join the user to every
    /// group they are a persisted member of.
    async fn send_group_list_and_subscribe(&self, conn: &Arc<ClientConn>, username: &str) {
        let memberships = self.store.groups.memberships(username).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "group list read failed");
            Vec::new()
        });

        let mut entries = Vec::with_capacity(memberships.len());
        for (group, is_member) in memberships {
            if is_member {
                self.topics.subscribe(&group, username);
                tracing::debug!(user = %username, group = %group, "auto-subscribed");
            }
            entries.push(format!("{group}:{}", if is_member { "1" } else { "0" }));
        }

        let mut list = Frame::new(MsgType::GroupList);
        list.payload = Bytes::from(entries.join(";").into_bytes());
        self.send_frame(conn, &list).await;
    }

    async fn send_ack(&self, conn: &Arc<ClientConn>, text: &str) {
        self.send_control(conn, MsgType::Ack, text).await;
    }

    async fn send_error(&self, conn: &Arc<ClientConn>, text: &str) {
        self.send_control(conn, MsgType::Error, text).await;
    }

    async fn send_control(&self, conn: &Arc<ClientConn>, kind: MsgType, text: &str) {
        let mut frame = Frame::new(kind);
        frame.payload = Bytes::copy_from_slice(text.as_bytes());
        self.send_frame(conn, &frame).await;
    }

    async fn send_frame(&self, conn: &Arc<ClientConn>, frame: &Frame) {
        if let Err(e) = conn.send(frame).await {
            tracing::warn!(peer = %conn.peer(), error = %e, "reply send failed");
        }
    }
}

fn log_store_error(result: Result<(), StoreError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "persistence write failed; continuing");
    }
}
