//! The fixed table of client commands
//!
//! Each [`Command`] bundles four pieces:
//! - a penalty, either constant or computed from the arguments, which is
//!   scored against the sender's address before anything else happens
//! - a response for when the limiter refuses the action
//! - a precondition; when it fails the command is silently skipped
//! - the handler itself
//!
//! A computed penalty may normalize the arguments. The normalized copy is
//! what the precondition and handler see.

use crate::broadcast::{broadcast, send_to};
use crate::client_manager::Connection;
use crate::dispatch::ChatState;
use crate::error::ChatError;
use crate::utils::generate_invite_token;
use log::info;
use serde_json::Value;
use shared::{nickname_valid, normalize_chat_text, ServerMessage, PASSWORD_DELIMITER};
use std::collections::BTreeMap;

/// Arguments of an inbound frame, including its `cmd` field
pub type Args = serde_json::Map<String, Value>;

/// Precondition over the sending connection and its arguments
pub type Verify = fn(&ChatState, &Connection, &Args) -> bool;

/// Runs a command for the connection with the given id
pub type Handler = fn(&mut ChatState, u64, &Args) -> Result<(), ChatError>;

/// Computes a cost and returns the arguments the handler should use
pub type PenaltyFn = fn(&Connection, Args) -> (f64, Args);

/// Warning sent when a command without its own penalty text is refused
pub const DEFAULT_PENALIZED_TEXT: &str = "You are doing stuff too much! Wait a bit!";

/// How much an invocation costs against the sender's score
pub enum Penalty {
    /// Same cost for every invocation
    Fixed(f64),
    /// Cost derived from the arguments, which may also be rewritten
    Computed(PenaltyFn),
}

/// What the sender gets when the limiter refuses a command
pub enum PenaltyResponse {
    /// Warn the sender with this text
    Warn(&'static str),
    /// Run a custom action instead
    Custom(Handler),
}

/// One entry of the command table
pub struct Command {
    /// Value of the `cmd` field that selects this command
    pub name: &'static str,
    pub verify: Verify,
    pub penalty: Penalty,
    pub on_penalized: PenaltyResponse,
    pub run: Handler,
}

impl Command {
    /// Creates a free command that answers refusals with
    /// [`DEFAULT_PENALIZED_TEXT`].
    pub fn new(name: &'static str, verify: Verify, run: Handler) -> Self {
        Self {
            name,
            verify,
            penalty: Penalty::Fixed(0.0),
            on_penalized: PenaltyResponse::Warn(DEFAULT_PENALIZED_TEXT),
            run,
        }
    }

    pub fn with_penalty(mut self, cost: f64) -> Self {
        self.penalty = Penalty::Fixed(cost);
        self
    }

    /// Charges whatever `penalty` computes from the arguments.
    ///
    /// The arguments it returns replace the originals for the rest of
    /// the invocation.
    pub fn with_computed_penalty(mut self, penalty: PenaltyFn) -> Self {
        self.penalty = Penalty::Computed(penalty);
        self
    }

    /// Warns with `text` instead of the default when refused.
    pub fn on_penalized(mut self, text: &'static str) -> Self {
        self.on_penalized = PenaltyResponse::Warn(text);
        self
    }

    /// Runs `handler` instead of warning when refused.
    pub fn on_penalized_with(mut self, handler: Handler) -> Self {
        self.on_penalized = PenaltyResponse::Custom(handler);
        self
    }

    /// Returns the cost of this invocation and the arguments to run it with.
    pub fn evaluate_penalty(&self, connection: &Connection, args: Args) -> (f64, Args) {
        match self.penalty {
            Penalty::Fixed(cost) => (cost, args),
            Penalty::Computed(penalty) => penalty(connection, args),
        }
    }

    /// Responds to a refused invocation.
    pub fn penalized(&self, state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
        match self.on_penalized {
            PenaltyResponse::Warn(text) => send_to(ServerMessage::warn(text), &state.clients, id),
            PenaltyResponse::Custom(handler) => handler(state, id, args),
        }
    }
}

/// Commands by name
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Command>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Creates a registry holding every built-in command.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: BTreeMap::new(),
        };
        for command in builtin_commands() {
            registry.insert(command);
        }
        registry
    }

    /// Adds a command, replacing any existing one with the same name.
    pub fn insert(&mut self, command: Command) {
        self.commands.insert(command.name, command);
    }

    /// Looks up a command by its `cmd` value.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }
}

/// The command table served to every client
fn builtin_commands() -> Vec<Command> {
    vec![
        Command::new("ping", always, noop).on_penalized_with(noop),
        Command::new("join", can_join, join)
            .with_penalty(3.0)
            .on_penalized("You are joining channels too fast. Wait a moment and try again."),
        Command::new("chat", can_chat, chat)
            .with_computed_penalty(chat_penalty)
            .on_penalized(
                "You are sending too much text. Wait a moment and try again.\n\
                 Press the up arrow key to restore your last message.",
            ),
        Command::new("invite", can_invite, invite)
            .with_penalty(2.0)
            .on_penalized("You are sending invites too fast. Wait a moment before trying again."),
        Command::new("stats", always, stats),
        Command::new("ban", can_ban, ban).with_penalty(0.1),
        Command::new("unban", can_unban, unban),
        Command::new("listUsers", is_admin, list_users),
        Command::new("broadcast", can_broadcast, server_broadcast),
    ]
}

/// Reads an argument as text. Numbers are accepted in their JSON form.
pub fn arg_text(args: &Args, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn has_text(args: &Args, key: &str) -> bool {
    arg_text(args, key).is_some_and(|text| !text.trim().is_empty())
}

fn connection(state: &ChatState, id: u64) -> Result<&Connection, ChatError> {
    state.clients.get(id).ok_or(ChatError::UnknownClient(id))
}

fn warn(state: &ChatState, id: u64, text: impl Into<String>) -> Result<(), ChatError> {
    send_to(ServerMessage::warn(text), &state.clients, id)
}

// Preconditions

fn always(_: &ChatState, _: &Connection, _: &Args) -> bool {
    true
}

fn can_join(_: &ChatState, connection: &Connection, args: &Args) -> bool {
    !connection.is_joined() && has_text(args, "channel") && has_text(args, "nick")
}

fn can_chat(_: &ChatState, connection: &Connection, args: &Args) -> bool {
    connection.is_joined() && has_text(args, "text")
}

fn can_invite(_: &ChatState, connection: &Connection, args: &Args) -> bool {
    connection.is_joined() && has_text(args, "nick")
}

fn can_ban(state: &ChatState, connection: &Connection, args: &Args) -> bool {
    state.policy.is_mod(connection) && connection.is_joined() && has_text(args, "nick")
}

fn can_unban(state: &ChatState, connection: &Connection, args: &Args) -> bool {
    state.policy.is_mod(connection) && connection.is_joined() && has_text(args, "ip")
}

fn is_admin(state: &ChatState, connection: &Connection, _: &Args) -> bool {
    state.policy.is_admin(connection)
}

fn can_broadcast(state: &ChatState, connection: &Connection, args: &Args) -> bool {
    has_text(args, "text") && state.policy.is_admin(connection)
}

// Penalties

/// Normalizes the chat text and charges in proportion to its length.
fn chat_penalty(_: &Connection, mut args: Args) -> (f64, Args) {
    let text = normalize_chat_text(&arg_text(&args, "text").unwrap_or_default());
    let cost = text.chars().count() as f64 / 83.0 / 4.0;
    args.insert("text".to_string(), Value::String(text));
    (cost, args)
}

// Handlers

fn noop(_: &mut ChatState, _: u64, _: &Args) -> Result<(), ChatError> {
    Ok(())
}

/// Puts the sender in a channel under a nickname.
///
/// The nick may carry a `#password` suffix that becomes the trip. Joining
/// under the admin name needs the admin password. On success the channel
/// hears `onlineAdd` and the joiner gets the full roster.
fn join(state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
    let channel = arg_text(args, "channel").unwrap_or_default();
    let channel = channel.trim();
    if channel.is_empty() {
        return Ok(());
    }

    let raw_nick = arg_text(args, "nick").unwrap_or_default();
    let mut parts = raw_nick.split(PASSWORD_DELIMITER);
    let nick = parts.next().unwrap_or_default().trim();
    let password = parts.next();

    if !nickname_valid(nick) {
        return warn(
            state,
            id,
            "Nickname must consist of up to 24 letters, numbers, and underscores",
        );
    }

    let trip = if state.policy.is_admin_name(nick) {
        if !state.policy.admin_password_matches(password) {
            return warn(state, id, "Cannot impersonate the admin");
        }
        None
    } else {
        password
            .filter(|password| !password.is_empty())
            .map(|password| state.policy.trip_hash(password))
    };

    if state.clients.is_nick_taken_in_channel(channel, nick) {
        return warn(state, id, "Nickname taken");
    }

    broadcast(
        ServerMessage::OnlineAdd {
            nick: nick.to_string(),
        },
        &state.clients,
        Some(channel),
    )?;

    let connection = state
        .clients
        .get_mut(id)
        .ok_or(ChatError::UnknownClient(id))?;
    let joined = connection.join(channel.to_string(), nick.to_string(), trip);
    debug_assert!(joined, "join ran on a connection that already joined");
    info!("{} joined ?{} from {}", nick, channel, connection.address);

    let nicks = state.clients.nicks_in_channel(channel);
    send_to(ServerMessage::OnlineSet { nicks }, &state.clients, id)
}

/// Relays a line to the sender's channel, annotated with rank and trip.
fn chat(state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
    let sender = connection(state, id)?;
    let (Some(nick), Some(channel)) = (sender.nick.clone(), sender.channel.as_deref()) else {
        return Ok(());
    };

    let admin = state.policy.is_admin(sender);
    let message = ServerMessage::Chat {
        nick,
        text: arg_text(args, "text").unwrap_or_default(),
        admin,
        moderator: !admin && state.policy.is_mod(sender),
        trip: sender.trip.clone(),
    };
    broadcast(message, &state.clients, Some(channel))
}

/// Sends the sender and a channel member a fresh private channel name.
fn invite(state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
    let sender = connection(state, id)?;
    let (Some(nick), Some(channel)) = (sender.nick.as_deref(), sender.channel.as_deref()) else {
        return Ok(());
    };
    let target_nick = arg_text(args, "nick").unwrap_or_default();

    let Some(friend) = state.clients.find_in_channel(channel, &target_nick) else {
        return warn(state, id, "Could not find user in channel");
    };
    if friend.id == id {
        return Ok(());
    }

    let token = generate_invite_token();
    send_to(
        ServerMessage::info(format!("You invited {} to ?{}", target_nick, token)),
        &state.clients,
        id,
    )?;
    send_to(
        ServerMessage::info(format!("{} invited you to ?{}", nick, token)),
        &state.clients,
        friend.id,
    )
}

fn stats(state: &mut ChatState, id: u64, _: &Args) -> Result<(), ChatError> {
    let (addresses, channels) = state.clients.active_counts();
    let text = format!("{} unique IPs in {} channels", addresses, channels);
    send_to(ServerMessage::info(text), &state.clients, id)
}

/// Arrests the address of a channel member.
///
/// Moderators cannot be banned. The channel is told who was banned.
fn ban(state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
    let moderator = state
        .clients
        .get(id)
        .ok_or(ChatError::UnknownClient(id))?;
    let Some(channel) = moderator.channel.clone() else {
        return Ok(());
    };
    let target_nick = arg_text(args, "nick").unwrap_or_default();

    let Some(target) = state.clients.find_in_channel(&channel, &target_nick) else {
        return warn(state, id, format!("Could not find {}", target_nick));
    };
    if !state.policy.ban(&mut state.police, target) {
        return warn(state, id, "Cannot ban moderator");
    }

    info!(
        "{} [{}] banned {} in {}",
        moderator.nick.as_deref().unwrap_or_default(),
        moderator.trip.as_deref().unwrap_or_default(),
        target_nick,
        channel
    );
    broadcast(
        ServerMessage::info(format!("Banned {}", target_nick)),
        &state.clients,
        Some(&channel),
    )
}

fn unban(state: &mut ChatState, id: u64, args: &Args) -> Result<(), ChatError> {
    let address = arg_text(args, "ip").unwrap_or_default();
    state.policy.unban(&mut state.police, &address);

    let moderator = connection(state, id)?;
    info!(
        "{} [{}] unbanned {} in {}",
        moderator.nick.as_deref().unwrap_or_default(),
        moderator.trip.as_deref().unwrap_or_default(),
        address,
        moderator.channel.as_deref().unwrap_or_default()
    );
    send_to(
        ServerMessage::info(format!("Unbanned {}", address)),
        &state.clients,
        id,
    )
}

fn list_users(state: &mut ChatState, id: u64, _: &Args) -> Result<(), ChatError> {
    let lines: Vec<String> = state
        .clients
        .channel_listing()
        .into_iter()
        .map(|(channel, nicks)| format!("?{} {}", channel, nicks.join(", ")))
        .collect();
    let text = format!("{} users online:\n\n{}", state.clients.len(), lines.join("\n"));
    send_to(ServerMessage::info(text), &state.clients, id)
}

fn server_broadcast(state: &mut ChatState, _: u64, args: &Args) -> Result<(), ChatError> {
    let text = arg_text(args, "text").unwrap_or_default();
    broadcast(
        ServerMessage::info(format!("Server broadcast: {}", text)),
        &state.clients,
        None,
    )
}
