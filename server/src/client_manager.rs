//! Live connection tracking and channel membership
//!
//! This module owns every connected client for its whole lifetime:
//! - Connection records are created when the transport accepts a socket
//!   and destroyed when it closes
//! - Nickname, trip and channel are set together on join and never change
//! - Channels are not stored anywhere; membership is computed by grouping
//!   connections with an equal channel label
//!
//! The transport handle kept in each [`Connection`] is only a way to reach
//! the socket. Dropping a connection here does not close the socket; the
//! network layer does that when it sees [`Outbound::Close`].

use log::info;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::mpsc;

/// Work queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized JSON frame
    Frame(String),
    /// Close the socket and discard anything still queued
    Close,
}

/// Identity and chat state of one live socket
#[derive(Debug)]
pub struct Connection {
    /// Unique id assigned by the transport
    pub id: u64,
    /// Address used as the rate-limit identity
    pub address: String,
    pub nick: Option<String>,
    pub trip: Option<String>,
    pub channel: Option<String>,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(id: u64, address: String, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            address,
            nick: None,
            trip: None,
            channel: None,
            sender,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.channel.is_some() && self.nick.is_some()
    }

    pub fn in_channel(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }

    /// Sets channel, nickname and trip in one step.
    ///
    /// Returns false and leaves the connection untouched if it already
    /// joined a channel.
    #[must_use]
    pub fn join(&mut self, channel: String, nick: String, trip: Option<String>) -> bool {
        if self.is_joined() {
            return false;
        }
        self.channel = Some(channel);
        self.nick = Some(nick);
        self.trip = trip;
        true
    }

    /// Whether the writer side of the socket is still accepting frames
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queues work for the socket. Returns false if the socket is gone.
    pub fn deliver(&self, outbound: Outbound) -> bool {
        self.is_open() && self.sender.send(outbound).is_ok()
    }
}

/// Registry of every live connection
///
/// Connections are kept in id order, which is also the order they were
/// accepted in, so member lists come out oldest first.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: BTreeMap<u64, Connection>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted socket. Returns false if the id is taken.
    pub fn add_client(
        &mut self,
        id: u64,
        address: String,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> bool {
        if self.clients.contains_key(&id) {
            return false;
        }
        info!("Client {} connected from {}", id, address);
        self.clients.insert(id, Connection::new(id, address, sender));
        true
    }

    /// Removes a connection, handing it back so the caller can announce it.
    pub fn remove_client(&mut self, id: u64) -> Option<Connection> {
        let connection = self.clients.remove(&id)?;
        info!("Client {} disconnected", id);
        Some(connection)
    }

    pub fn get(&self, id: u64) -> Option<&Connection> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Connection> {
        self.clients.get_mut(&id)
    }

    pub fn all_connections(&self) -> impl Iterator<Item = &Connection> {
        self.clients.values()
    }

    /// Every connection that has joined some channel
    pub fn joined_connections(&self) -> impl Iterator<Item = &Connection> {
        self.clients.values().filter(|c| c.is_joined())
    }

    /// Members of `channel`, oldest first
    pub fn connections_in_channel<'a>(
        &'a self,
        channel: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.clients.values().filter(move |c| c.in_channel(channel))
    }

    /// Nicknames in a channel, oldest member first
    pub fn nicks_in_channel(&self, channel: &str) -> Vec<String> {
        self.connections_in_channel(channel)
            .filter_map(|c| c.nick.clone())
            .collect()
    }

    /// Case-insensitive nickname check within one channel
    pub fn is_nick_taken_in_channel(&self, channel: &str, nick: &str) -> bool {
        self.connections_in_channel(channel).any(|c| {
            c.nick
                .as_deref()
                .is_some_and(|taken| taken.eq_ignore_ascii_case(nick))
        })
    }

    /// Finds the member of `channel` with exactly this nickname
    pub fn find_in_channel(&self, channel: &str, nick: &str) -> Option<&Connection> {
        self.clients
            .values()
            .find(|c| c.in_channel(channel) && c.nick.as_deref() == Some(nick))
    }

    /// Distinct addresses and distinct channels among joined connections
    pub fn active_counts(&self) -> (usize, usize) {
        let mut addresses = HashSet::new();
        let mut channels = HashSet::new();
        for connection in self.joined_connections() {
            addresses.insert(connection.address.as_str());
            if let Some(channel) = connection.channel.as_deref() {
                channels.insert(channel);
            }
        }
        (addresses.len(), channels.len())
    }

    /// Members grouped by channel, channels in first-seen order
    pub fn channel_listing(&self) -> Vec<(String, Vec<String>)> {
        let mut listing: Vec<(String, Vec<String>)> = Vec::new();
        for connection in self.joined_connections() {
            let (Some(channel), Some(nick)) = (&connection.channel, &connection.nick) else {
                continue;
            };
            match listing.iter_mut().find(|(name, _)| name == channel) {
                Some((_, nicks)) => nicks.push(nick.clone()),
                None => listing.push((channel.clone(), vec![nick.clone()])),
            }
        }
        listing
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
