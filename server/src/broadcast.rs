//! Best-effort delivery of server messages
//!
//! Messages are stamped with the current time and serialized once per call.
//! Sockets that are already closed are skipped and queueing failures are
//! ignored; there is no retry.

use crate::client_manager::{ClientManager, Connection, Outbound};
use crate::error::ChatError;
use crate::utils::get_timestamp;
use shared::ServerMessage;

fn encode(message: ServerMessage) -> Result<String, ChatError> {
    serde_json::to_string(&message.stamp(get_timestamp())).map_err(ChatError::Encode)
}

/// Sends a message to a single connection.
pub fn send(message: ServerMessage, connection: &Connection) -> Result<(), ChatError> {
    if !connection.is_open() {
        return Ok(());
    }
    connection.deliver(Outbound::Frame(encode(message)?));
    Ok(())
}

/// Sends a message to the connection registered under `id`.
pub fn send_to(message: ServerMessage, clients: &ClientManager, id: u64) -> Result<(), ChatError> {
    let connection = clients.get(id).ok_or(ChatError::UnknownClient(id))?;
    send(message, connection)
}

/// Sends a message to every member of `channel`, or to every joined
/// connection when no channel is given.
pub fn broadcast(
    message: ServerMessage,
    clients: &ClientManager,
    channel: Option<&str>,
) -> Result<(), ChatError> {
    let frame = encode(message)?;
    let recipients = clients
        .joined_connections()
        .filter(|c| channel.map_or(true, |channel| c.in_channel(channel)));

    for connection in recipients {
        connection.deliver(Outbound::Frame(frame.clone()));
    }
    Ok(())
}
