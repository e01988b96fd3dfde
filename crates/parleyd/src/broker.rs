//! Acceptor and per-connection loops.
//!
//! The broker owns one TCP listener and spawns an independent reader task per
//! accepted connection. Readers parse frames and hand them to the dispatcher
//! under the broker-wide dispatch lock; holding the lock across registry
//! access, persistence, and fan-out writes gives a total order on logical
//! events at the cost of head-of-line blocking on slow peers — acceptable at
//! this broker's scale.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_core::config::BrokerConfig;
use parley_core::frame::{Frame, FrameError};
use parley_store::Store;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::clients::{ClientConn, ClientRegistry};
use crate::handler::{Disposition, MessageHandler};
use crate::topics::TopicRegistry;
use crate::transfers::TransferRegistry;

pub struct Broker {
    listener: TcpListener,
    handler: Arc<MessageHandler>,
    dispatch: Arc<Mutex<()>>,
}

impl Broker {
    /// Open the store, bind the listener, and wire up the dispatcher.
    pub async fn bind(config: &BrokerConfig) -> Result<Self> {
        let store = Store::open(&config.data_dir).with_context(|| {
            format!("failed to open data directory {}", config.data_dir.display())
        })?;

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .with_context(|| format!("failed to bind port {}", config.port))?;

        let handler = Arc::new(MessageHandler::new(
            Arc::new(ClientRegistry::new()),
            Arc::new(TopicRegistry::new()),
            Arc::new(TransferRegistry::new()),
            Arc::new(store),
            config.history_limit,
        ));

        Ok(Self {
            listener,
            handler,
            dispatch: Arc::new(Mutex::new(())),
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener fails fatally.
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "broker listening");

        // Registry snapshot log, for watching a live broker.
        let snapshot_handler = self.handler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                let stats = snapshot_handler.stats();
                tracing::debug!(
                    clients = stats.clients,
                    topics = stats.topics,
                    transfers = stats.transfers,
                    "broker snapshot"
                );
            }
        });

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let handler = self.handler.clone();
            let dispatch = self.dispatch.clone();
            tokio::spawn(async move {
                connection_loop(stream, peer, handler, dispatch).await;
            });
        }
    }
}

/// Read frames until EOF, error, or LOGOUT; teardown runs exactly once.
async fn connection_loop(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<MessageHandler>,
    dispatch: Arc<Mutex<()>>,
) {
    stream.set_nodelay(true).ok();
    let (mut read_half, write_half) = stream.into_split();
    let conn = ClientConn::new(peer, write_half);

    tracing::info!(%peer, conn_id = conn.id(), "client connected");

    loop {
        match Frame::read_from(&mut read_half).await {
            Ok(frame) => {
                let _guard = dispatch.lock().await;
                if handler.dispatch(&conn, frame).await == Disposition::Disconnect {
                    // LOGOUT path: teardown already ran inside dispatch.
                    return;
                }
            }
            Err(FrameError::Closed) => {
                tracing::debug!(%peer, "connection closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "connection error");
                break;
            }
        }
    }

    let _guard = dispatch.lock().await;
    handler.on_disconnect(conn.id()).await;
}
