//! # Chat Relay Server Library
//!
//! This library implements a real-time, multi-channel chat relay. Clients
//! connect over WebSocket, join a named channel under a nickname, and
//! exchange text that is broadcast to everyone else in that channel.
//!
//! ## Core Responsibilities
//!
//! ### Abuse Rate Limiting
//! Every client action carries a cost that is scored against the sender's
//! address. Scores decay exponentially, so occasional bursts are forgiven
//! while sustained flooding is refused. Moderators can block an address
//! outright until it is pardoned.
//!
//! ### Command Pipeline
//! Inbound frames are JSON objects naming a command. Each frame is size
//! checked, parsed, scored, checked against the command's precondition and
//! only then handled. Malformed frames drop the connection.
//!
//! ### Channel Membership
//! Channels are implicit: a channel is the set of connections that joined
//! with the same label. Nicknames are unique per channel, ignoring case.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! Connection tasks never touch shared state. They forward socket events
//! over a channel to one event loop, which owns the connection registry,
//! the rate limiter and the moderation policy, and handles each event to
//! completion before the next. Handlers that read and then write (such as
//! the duplicate nickname check on join) are therefore atomic.
//!
//! ### Fire-and-Forget Delivery
//! Outgoing frames are queued on a per-connection channel drained by a
//! writer task. Frames for sockets that already closed are dropped.
//!
//! ## Module Organization
//!
//! - `police`: per-address decayed abuse score, arrest and pardon
//! - `commands`: the command table, preconditions, penalties and handlers
//! - `dispatch`: the per-frame pipeline and connection teardown
//! - `client_manager`: live connections and channel membership queries
//! - `broadcast`: stamping and delivering server messages
//! - `moderation`: admin and moderator rights, trip hashes, bans
//! - `network`: WebSocket accept loop and the event loop
//! - `config`: JSON configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::commands::CommandRegistry;
//! use server::config::Config;
//! use server::dispatch::{ChatState, Dispatcher};
//! use server::moderation::ModerationPolicy;
//! use server::network::Server;
//! use server::police::Police;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.json")?;
//!
//!     let mut police = Police::default();
//!     police.load_jail("jail.txt")?;
//!
//!     let state = ChatState::new(police, ModerationPolicy::new(&config));
//!     let dispatcher = Dispatcher::new(CommandRegistry::new(), state);
//!
//!     Server::new(&config, dispatcher).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client_manager;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod moderation;
pub mod network;
pub mod police;
pub mod utils;
