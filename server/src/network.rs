//! WebSocket transport and the event loop that owns all chat state

use crate::client_manager::Outbound;
use crate::config::Config;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::ChatError;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Messages sent from connection tasks to the event loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        client_id: u64,
        address: String,
        sender: mpsc::UnboundedSender<Outbound>,
    },
    FrameReceived {
        client_id: u64,
        data: Vec<u8>,
    },
    Disconnected {
        client_id: u64,
    },
}

/// Chat server accepting WebSocket clients
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    x_forwarded_for: bool,

    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn new(config: &Config, dispatcher: Dispatcher) -> Result<Self, ChatError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Io {
                target: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            dispatcher,
            x_forwarded_for: config.x_forwarded_for,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections and handles their events until the process ends.
    pub async fn run(self) -> Result<(), ChatError> {
        let Server {
            listener,
            mut dispatcher,
            x_forwarded_for,
            event_tx,
            mut event_rx,
        } = self;

        tokio::spawn(accept_loop(listener, event_tx, x_forwarded_for));
        info!("Server started successfully");

        while let Some(event) = event_rx.recv().await {
            match event {
                ServerEvent::Connected {
                    client_id,
                    address,
                    sender,
                } => dispatcher.connect(client_id, address, sender),
                ServerEvent::FrameReceived { client_id, data } => {
                    if dispatcher.handle_frame(client_id, &data) == Dispatch::Violation {
                        debug!("Dropped client {} after protocol violation", client_id);
                    }
                }
                ServerEvent::Disconnected { client_id } => dispatcher.disconnect(client_id),
            }
        }

        info!("Server shutting down");
        Ok(())
    }
}

/// Spawns a task per accepted socket.
async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    x_forwarded_for: bool,
) {
    let mut next_client_id: u64 = 1;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let client_id = next_client_id;
                next_client_id += 1;
                let event_tx = event_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(client_id, stream, peer, event_tx, x_forwarded_for).await
                    {
                        warn!("Connection {} from {} failed: {}", client_id, peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Picks the address used as the client's rate-limit identity.
fn resolve_address(peer: SocketAddr, forwarded_for: Option<String>, x_forwarded_for: bool) -> String {
    if !x_forwarded_for {
        return peer.ip().to_string();
    }
    match forwarded_for {
        Some(address) => address,
        None => {
            warn!("Missing {} header from {}, using peer address", FORWARDED_FOR_HEADER, peer);
            peer.ip().to_string()
        }
    }
}

/// First address in an `X-Forwarded-For` list, which is the original client
fn first_forwarded_address(header: &str) -> Option<String> {
    header
        .split(',')
        .map(str::trim)
        .find(|address| !address.is_empty())
        .map(str::to_owned)
}

/// Runs one socket: handshake, then a writer task and a read loop.
async fn handle_connection(
    client_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    x_forwarded_for: bool,
) -> Result<(), ChatError> {
    let mut forwarded_for = None;
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            forwarded_for = request
                .headers()
                .get(FORWARDED_FOR_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(first_forwarded_address);
            Ok(response)
        },
    )
    .await?;

    let address = resolve_address(peer, forwarded_for, x_forwarded_for);
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    if event_tx
        .send(ServerEvent::Connected {
            client_id,
            address,
            sender: out_tx,
        })
        .is_err()
    {
        return Ok(());
    }

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.close().await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let data = match message {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Read error on client {}: {}", client_id, e);
                        break;
                    }
                };
                if event_tx.send(ServerEvent::FrameReceived { client_id, data }).is_err() {
                    break;
                }
            },

            // The event loop asked for a close, or the socket stopped taking writes
            _ = &mut writer => break,
        }
    }

    writer.abort();
    let _ = event_tx.send(ServerEvent::Disconnected { client_id });
    Ok(())
}
