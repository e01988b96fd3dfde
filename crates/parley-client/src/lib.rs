//! parley-client — the client side of the Parley protocol.
//!
//! One outbound TCP connection, one reader task, one event channel. Frame
//! emission is serialized by a sending mutex so a file upload can run
//! concurrently with chat without interleaving bytes on the wire.
//!
//! ```no_run
//! use parley_client::{ChatClient, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), parley_client::ClientError> {
//!     let (client, mut events) = ChatClient::connect("127.0.0.1:8080", "alice").await?;
//!     client.send_direct("bob", "hi").await?;
//!     while let Some(event) = events.recv().await {
//!         if let ClientEvent::Message { sender, text, .. } = event {
//!             println!("<{sender}> {text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use parley_core::frame::{FileMeta, Frame, FrameError};
use parley_core::topic::create_dm_topic;
use parley_core::wire::{MsgType, FILE_CHUNK_SIZE};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};

mod download;
mod events;

pub use events::{ClientEvent, GroupEntry};

use download::Downloads;

/// Capacity of the event channel between the reader task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pause between file chunks, to avoid flooding the broker's relay path.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(1);

/// A connected, logged-in Parley client.
///
/// Cheap to clone is not a goal here; share it behind an `Arc` if several
/// tasks need to send.
pub struct ChatClient {
    username: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    online: Arc<StdMutex<Vec<String>>>,
    connected: Arc<AtomicBool>,
}

impl ChatClient {
    /// Connect and log in. Downloads land in `./downloads`.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        username: &str,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        Self::connect_with(addr, username, PathBuf::from("downloads")).await
    }

    /// Connect and log in, with an explicit downloads directory.
    ///
    /// The LOGIN frame goes out before this returns; watch the event stream
    /// for the broker's ACK or `Username already taken` error.
    pub async fn connect_with(
        addr: impl ToSocketAddrs,
        username: &str,
        downloads_dir: PathBuf,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let writer = Arc::new(Mutex::new(write_half));
        let online = Arc::new(StdMutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let client = Self {
            username: username.to_owned(),
            writer,
            online: online.clone(),
            connected: connected.clone(),
        };

        let mut login = Frame::new(MsgType::Login);
        login.sender = client.username.clone();
        client.send_frame(&login).await?;

        tokio::spawn(receive_loop(
            read_half,
            event_tx,
            online,
            connected,
            downloads_dir,
        ));

        Ok((client, event_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// False once the reader has observed the connection closing.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Local cache of online users, maintained from presence frames.
    pub fn online_users(&self) -> Vec<String> {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Announce logout. The broker tears the session down and closes; the
    /// event stream ends with [`ClientEvent::Disconnected`].
    pub async fn logout(&self) -> Result<(), ClientError> {
        let mut frame = Frame::new(MsgType::Logout);
        frame.sender = self.username.clone();
        self.send_frame(&frame).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.send_topic_control(MsgType::Subscribe, topic).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.send_topic_control(MsgType::Unsubscribe, topic).await
    }

    /// Send a text message to one user over the canonical DM topic.
    pub async fn send_direct(&self, recipient: &str, text: &str) -> Result<(), ClientError> {
        let topic = create_dm_topic(&self.username, recipient);
        self.publish_text(&topic, text).await
    }

    /// Send a text message to a group topic.
    pub async fn send_group(&self, group: &str, text: &str) -> Result<(), ClientError> {
        self.publish_text(group, text).await
    }

    /// Stream a file to one user over the canonical DM topic.
    pub async fn send_file_to_user(&self, recipient: &str, path: &Path) -> Result<(), ClientError> {
        let topic = create_dm_topic(&self.username, recipient);
        self.send_file(&topic, path).await
    }

    /// Stream a file to a group topic.
    pub async fn send_file_to_group(&self, group: &str, path: &Path) -> Result<(), ClientError> {
        self.send_file(group, path).await
    }

    /// Relay an opaque game payload to one user. The topic field carries the
    /// recipient username; the broker forwards without inspecting.
    pub async fn send_game(&self, recipient: &str, payload: &str) -> Result<(), ClientError> {
        let mut frame = Frame::new(MsgType::Game);
        frame.message_id = next_message_id();
        frame.sender = self.username.clone();
        frame.topic = recipient.to_owned();
        frame.payload = Bytes::copy_from_slice(payload.as_bytes());
        self.send_frame(&frame).await
    }

    /// Ask for the online-user list; answered with [`ClientEvent::UserList`].
    pub async fn request_user_list(&self) -> Result<(), ClientError> {
        let mut frame = Frame::new(MsgType::RequestUserList);
        frame.sender = self.username.clone();
        self.send_frame(&frame).await
    }

    /// Ask for a conversation's history; answered with a stream of
    /// [`ClientEvent::History`] terminated by an ACK.
    pub async fn request_history(&self, topic: &str) -> Result<(), ClientError> {
        self.send_topic_control(MsgType::RequestHistory, topic).await
    }

    /// DM history convenience: builds the canonical topic for a peer.
    pub async fn request_direct_history(&self, peer: &str) -> Result<(), ClientError> {
        let topic = create_dm_topic(&self.username, peer);
        self.request_history(&topic).await
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn publish_text(&self, topic: &str, text: &str) -> Result<(), ClientError> {
        let mut frame = Frame::new(MsgType::PublishText);
        frame.message_id = next_message_id();
        frame.sender = self.username.clone();
        frame.topic = topic.to_owned();
        frame.payload = Bytes::copy_from_slice(text.as_bytes());
        self.send_frame(&frame).await
    }

    /// Announce the file, then stream it in fixed chunks under one message
    /// id, pacing chunks with a short sleep.
    async fn send_file(&self, topic: &str, path: &Path) -> Result<(), ClientError> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len() as u32;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let message_id = next_message_id();

        let mut announce = Frame::new(MsgType::PublishFile);
        announce.message_id = message_id;
        announce.sender = self.username.clone();
        announce.topic = topic.to_owned();
        announce.payload = FileMeta {
            filename: filename.clone(),
            size,
        }
        .encode();
        self.send_frame(&announce).await?;

        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut sent: u32 = 0;
        while sent < size {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            let mut chunk = Frame::new(MsgType::FileData);
            chunk.message_id = message_id;
            chunk.sender = self.username.clone();
            chunk.topic = topic.to_owned();
            chunk.payload = Bytes::copy_from_slice(&buf[..n]);
            self.send_frame(&chunk).await?;

            sent = sent.saturating_add(n as u32);
            tokio::time::sleep(INTER_CHUNK_DELAY).await;
        }

        tracing::debug!(file = %filename, bytes = sent, topic = %topic, "file sent");
        Ok(())
    }

    async fn send_topic_control(&self, kind: MsgType, topic: &str) -> Result<(), ClientError> {
        let mut frame = Frame::new(kind);
        frame.sender = self.username.clone();
        frame.topic = topic.to_owned();
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        frame.write_to(&mut *writer).await?;
        Ok(())
    }
}

/// Message ids: a process-unique monotonic counter XOR'd with a random
/// per-process nonce, so concurrent clients on one host do not collide the
/// way a bare unseeded generator would.
fn next_message_id() -> u32 {
    static SEQ: AtomicU32 = AtomicU32::new(1);
    static NONCE: OnceLock<u32> = OnceLock::new();
    SEQ.fetch_add(1, Ordering::Relaxed) ^ *NONCE.get_or_init(rand::random)
}

// ── Reader task ──────────────────────────────────────────────────────────────

async fn receive_loop(
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ClientEvent>,
    online: Arc<StdMutex<Vec<String>>>,
    connected: Arc<AtomicBool>,
    downloads_dir: PathBuf,
) {
    let mut downloads = Downloads::new(downloads_dir);

    loop {
        let frame = match Frame::read_from(&mut reader).await {
            Ok(frame) => frame,
            Err(FrameError::Closed) => {
                connected.store(false, Ordering::Relaxed);
                let _ = events.send(ClientEvent::Disconnected).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "receive failed");
                connected.store(false, Ordering::Relaxed);
                let _ = events.send(ClientEvent::Disconnected).await;
                return;
            }
        };

        let event = translate(frame, &mut downloads, &online).await;
        if let Some(event) = event {
            if events.send(event).await.is_err() {
                // Consumer dropped the receiver; nothing left to do.
                return;
            }
        }
    }
}

/// Turn one inbound frame into an event, updating local state on the way.
async fn translate(
    frame: Frame,
    downloads: &mut Downloads,
    online: &Arc<StdMutex<Vec<String>>>,
) -> Option<ClientEvent> {
    match frame.kind() {
        Some(MsgType::PublishText) => {
            let text = frame.text();
            Some(ClientEvent::Message {
                sender: frame.sender,
                topic: frame.topic,
                text,
            })
        }

        Some(MsgType::PublishFile) => {
            let meta = match FileMeta::decode(&frame.payload) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(error = %e, "bad file announcement, ignoring");
                    return None;
                }
            };
            match downloads.start(frame.message_id, frame.sender, meta).await {
                Ok(done) => done.map(finished_event),
                Err(e) => {
                    tracing::warn!(error = %e, "could not open download");
                    None
                }
            }
        }

        Some(MsgType::FileData) => match downloads.chunk(frame.message_id, &frame.payload).await {
            Ok(done) => done.map(finished_event),
            Err(e) => {
                tracing::warn!(error = %e, "could not write download chunk");
                None
            }
        },

        Some(MsgType::Ack) => Some(ClientEvent::Ack(frame.text())),
        Some(MsgType::Error) => Some(ClientEvent::Error(frame.text())),

        Some(MsgType::UserOnline) => {
            let username = frame.text();
            {
                let mut cache = online.lock().unwrap_or_else(PoisonError::into_inner);
                if !cache.contains(&username) {
                    cache.push(username.clone());
                }
            }
            Some(ClientEvent::UserStatus {
                username,
                online: true,
            })
        }

        Some(MsgType::UserOffline) => {
            let username = frame.text();
            online
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|u| u != &username);
            Some(ClientEvent::UserStatus {
                username,
                online: false,
            })
        }

        Some(MsgType::UserList) => {
            let users = parse_user_list(&frame.text());
            *online.lock().unwrap_or_else(PoisonError::into_inner) = users.clone();
            Some(ClientEvent::UserList(users))
        }

        Some(MsgType::HistoryData) => {
            let text = frame.text();
            Some(ClientEvent::History {
                sender: frame.sender,
                topic: frame.topic,
                text,
                timestamp: frame.timestamp,
            })
        }

        Some(MsgType::GroupCreated) => Some(ClientEvent::GroupCreated {
            name: frame.text(),
            creator: frame.sender,
        }),

        Some(MsgType::GroupList) => Some(ClientEvent::GroupList(parse_group_list(&frame.text()))),

        Some(MsgType::Game) => {
            let payload = frame.text();
            Some(ClientEvent::Game {
                from: frame.sender,
                payload,
            })
        }

        Some(_) | None => {
            tracing::debug!(msg_type = frame.msg_type, "ignoring unexpected frame");
            None
        }
    }
}

fn finished_event(done: download::FinishedFile) -> ClientEvent {
    ClientEvent::FileReceived {
        sender: done.sender,
        filename: done.filename,
        size: done.size,
        path: done.path,
    }
}

fn parse_user_list(payload: &str) -> Vec<String> {
    payload
        .split(';')
        .filter(|u| !u.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_group_list(payload: &str) -> Vec<GroupEntry> {
    payload
        .split(';')
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let (name, flag) = item.rsplit_once(':')?;
            Some(GroupEntry {
                name: name.to_owned(),
                is_member: flag == "1",
            })
        })
        .collect()
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_list_parsing_skips_empty_entries() {
        assert_eq!(parse_user_list("alice;bob"), vec!["alice", "bob"]);
        assert_eq!(parse_user_list(""), Vec::<String>::new());
        assert_eq!(parse_user_list("alice;;bob;"), vec!["alice", "bob"]);
    }

    #[test]
    fn group_list_parsing_reads_membership_flags() {
        let groups = parse_group_list("lunch:1;chess:0");
        assert_eq!(
            groups,
            vec![
                GroupEntry {
                    name: "lunch".into(),
                    is_member: true
                },
                GroupEntry {
                    name: "chess".into(),
                    is_member: false
                },
            ]
        );
    }

    #[test]
    fn group_list_parsing_tolerates_junk() {
        let groups = parse_group_list("noflag;ok:1;");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "ok");
    }

    #[test]
    fn message_ids_do_not_repeat() {
        let a = next_message_id();
        let b = next_message_id();
        let c = next_message_id();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
