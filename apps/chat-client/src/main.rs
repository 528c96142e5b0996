use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_client::config::Config;
use chat_client::ChatSession;
use sikboo_common::ChatMessage;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let group_buying_id: i64 = std::env::args()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .expect("usage: chat-client <group-buying-id>");

    let config = Config::from_env();
    if config.member_id.is_none() {
        tracing::warn!("MEMBER_ID not set; reading only, sends will be rejected");
    }

    let session = ChatSession::new(config);
    let mut room = session
        .join(group_buying_id)
        .await
        .expect("failed to open chat room");

    tracing::info!(group_buying_id, "room mounted");

    for message in room.messages() {
        print_message(&message);
    }

    let mut updates = room.updates().expect("updates receiver already taken");
    let printer = tokio::spawn(async move {
        while let Some(message) = updates.recv().await {
            print_message(&message);
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !room.send(&line) {
                        eprintln!("message not sent — check the connection and try again");
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(%err, "stdin read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    room.close();
    printer.abort();
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        message.member_name,
        message.message
    );
}
