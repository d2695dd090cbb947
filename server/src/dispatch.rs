//! Per-frame command pipeline
//!
//! Every inbound frame goes through the same steps:
//! 1. Oversized frames are dropped silently
//! 2. The frame is parsed as a JSON object; anything else is a protocol
//!    violation and tears the connection down
//! 3. Unknown commands are ignored
//! 4. The command's penalty is evaluated, normalizing the arguments
//! 5. The sender's address is scored; a refusal runs the penalty response
//! 6. A failed precondition skips the command without a reply
//! 7. The handler runs; an error from it is treated like a protocol
//!    violation
//!
//! All state lives in [`ChatState`] and is only touched from the single
//! task that owns the [`Dispatcher`], so multi-step handlers such as join
//! run without interleaving.

use crate::broadcast::broadcast;
use crate::client_manager::{ClientManager, Outbound};
use crate::commands::{Args, CommandRegistry};
use crate::moderation::ModerationPolicy;
use crate::police::Police;
use log::{debug, warn};
use serde_json::Value;
use shared::{ServerMessage, MAX_FRAME_SIZE};
use tokio::sync::mpsc;

/// Mutable server state shared by every command handler
#[derive(Debug, Default)]
pub struct ChatState {
    pub clients: ClientManager,
    pub police: Police,
    pub policy: ModerationPolicy,
}

impl ChatState {
    pub fn new(police: Police, policy: ModerationPolicy) -> Self {
        Self {
            clients: ClientManager::new(),
            police,
            policy,
        }
    }
}

/// What happened to an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler ran
    Handled,
    /// The rate limiter refused the action
    Penalized,
    /// The precondition did not hold
    Skipped,
    /// Oversized frame, unknown command or unknown connection
    Ignored,
    /// The connection was torn down
    Violation,
}

pub struct Dispatcher {
    commands: CommandRegistry,
    state: ChatState,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(CommandRegistry::new(), ChatState::default())
    }
}

impl Dispatcher {
    pub fn new(commands: CommandRegistry, state: ChatState) -> Self {
        Self { commands, state }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ChatState {
        &mut self.state
    }

    /// Registers a socket accepted by the transport.
    pub fn connect(&mut self, id: u64, address: String, sender: mpsc::UnboundedSender<Outbound>) {
        self.state.clients.add_client(id, address, sender);
    }

    /// Removes a connection and announces it to its channel.
    ///
    /// Also asks the transport to close the socket, which is a no-op when
    /// the socket is already gone. Unknown ids are ignored.
    pub fn disconnect(&mut self, id: u64) {
        let Some(connection) = self.state.clients.remove_client(id) else {
            return;
        };
        connection.deliver(Outbound::Close);

        if let (Some(nick), Some(channel)) = (connection.nick, connection.channel.as_deref()) {
            let message = ServerMessage::OnlineRemove { nick };
            if let Err(e) = broadcast(message, &self.state.clients, Some(channel)) {
                warn!("Failed to announce departure of client {}: {}", id, e);
            }
        }
    }

    /// Runs one inbound frame through the pipeline.
    pub fn handle_frame(&mut self, id: u64, data: &[u8]) -> Dispatch {
        if data.len() > MAX_FRAME_SIZE {
            debug!("Ignoring {} byte frame from client {}", data.len(), id);
            return Dispatch::Ignored;
        }

        let Some(address) = self.state.clients.get(id).map(|c| c.address.clone()) else {
            return Dispatch::Ignored;
        };

        let args: Args = match serde_json::from_slice(data) {
            Ok(args) => args,
            Err(e) => {
                warn!("Malformed frame from client {} ({}): {}", id, address, e);
                self.disconnect(id);
                return Dispatch::Violation;
            }
        };

        let Some(command) = args
            .get("cmd")
            .and_then(Value::as_str)
            .and_then(|name| self.commands.get(name))
        else {
            debug!("Ignoring unknown command from client {}", id);
            return Dispatch::Ignored;
        };

        let Some(connection) = self.state.clients.get(id) else {
            return Dispatch::Ignored;
        };
        let (cost, args) = command.evaluate_penalty(connection, args);

        let result = if !self.state.police.check(&address, cost) {
            debug!("Rate limited {} from {} (cost {:.2})", command.name, address, cost);
            command
                .penalized(&mut self.state, id, &args)
                .map(|_| Dispatch::Penalized)
        } else {
            let Some(connection) = self.state.clients.get(id) else {
                return Dispatch::Ignored;
            };
            if !(command.verify)(&self.state, connection, &args) {
                return Dispatch::Skipped;
            }
            (command.run)(&mut self.state, id, &args).map(|_| Dispatch::Handled)
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} failed for client {} ({}): {}", command.name, id, address, e);
                self.disconnect(id);
                Dispatch::Violation
            }
        }
    }
}
