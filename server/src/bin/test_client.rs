use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about = "Joins a channel, sends one line and prints replies")]
struct Args {
    /// WebSocket URL of the chat server
    #[arg(short, long, default_value = "ws://127.0.0.1:6060")]
    server: String,

    #[arg(short, long, default_value = "lobby")]
    channel: String,

    /// Nickname, optionally followed by #password for a trip
    #[arg(short, long, default_value = "tester")]
    nick: String,

    #[arg(short, long, default_value = "hello from test_client")]
    text: String,

    /// How long to keep printing frames, in seconds
    #[arg(short, long, default_value = "5")]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let (ws_stream, _) = connect_async(args.server.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let join = json!({ "cmd": "join", "channel": args.channel, "nick": args.nick });
    ws_tx.send(Message::Text(join.to_string())).await?;

    let chat = json!({ "cmd": "chat", "text": args.text });
    ws_tx.send(Message::Text(chat.to_string())).await?;

    let stats = json!({ "cmd": "stats" });
    ws_tx.send(Message::Text(stats.to_string())).await?;

    let deadline = Duration::from_secs(args.wait);
    while let Ok(Some(message)) = timeout(deadline, ws_rx.next()).await {
        match message? {
            Message::Text(text) => println!("Received: {}", text),
            Message::Close(_) => {
                println!("Server closed the connection");
                break;
            }
            _ => {}
        }
    }

    ws_tx.send(Message::Close(None)).await?;
    Ok(())
}
