//! Demo bot: posts a greeting, then answers mentions over Socket Mode.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use slackline::channel::{TlsConfig, Transport};
use slackline::slack::{Poll, SlackClient};

/// Pause between polls while connected and idle.
const IDLE_DELAY: Duration = Duration::from_millis(50);
/// Pause while the session is waiting out reconnect backoff.
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "slackline", about = "Slack Socket Mode demo bot")]
struct Cli {
    /// Bot token (xoxb-...), used for chat.postMessage.
    #[arg(long, env = "SLACK_BOT_TOKEN")]
    bot_token: String,

    /// App token (xapp-...), used to open the Socket Mode connection.
    #[arg(long, env = "SLACK_APP_TOKEN")]
    app_token: String,

    /// Channel the startup greeting is posted to.
    #[arg(long, env = "SLACK_CHANNEL", default_value = "general")]
    channel: String,

    /// Root certificate to pin, DER or PEM.
    #[arg(long, env = "SLACK_ROOT_CA")]
    root_ca: PathBuf,

    /// Capacity of the shared transfer buffer in bytes.
    #[arg(long, default_value_t = 8192)]
    buffer_size: usize,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let anchor = load_trust_anchor(&cli.root_ca).expect("failed to load root certificate");
    let tls = TlsConfig::new(&anchor).expect("root certificate rejected");

    let mut client = SlackClient::new(cli.bot_token, cli.app_token, &tls, cli.buffer_size);

    if let Err(error) = client.post_message("Hello Slack!", &cli.channel) {
        tracing::warn!(%error, "startup greeting failed");
    }

    loop {
        match client.poll() {
            Poll::Event(event) => handle_event(&mut client, &event, &cli.channel),
            Poll::Idle => thread::sleep(IDLE_DELAY),
            Poll::Reconnecting => thread::sleep(RECONNECT_DELAY),
        }
    }
}

fn handle_event<C: Transport>(client: &mut SlackClient<C>, event: &Value, home_channel: &str) {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "hello" => tracing::info!("socket mode session ready"),
        "disconnect" => {
            let reason = event.get("reason").and_then(Value::as_str).unwrap_or("unknown");
            tracing::info!(reason, "service asked us to reconnect");
        }
        "events_api" => {
            if let Some(envelope_id) = event.get("envelope_id").and_then(Value::as_str) {
                if let Err(error) = client.acknowledge_event(envelope_id, None) {
                    tracing::warn!(%error, envelope_id, "acknowledgement failed");
                }
            }
            handle_callback(client, event, home_channel);
        }
        other => tracing::debug!(event_type = other, "ignoring event"),
    }
}

fn handle_callback<C: Transport>(client: &mut SlackClient<C>, event: &Value, home_channel: &str) {
    let payload = event.get("payload");
    let payload_type = payload
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if payload_type != "event_callback" {
        return;
    }

    let Some(inner) = payload.and_then(|p| p.get("event")) else {
        return;
    };
    let inner_type = inner.get("type").and_then(Value::as_str).unwrap_or("");
    if inner_type != "app_mention" {
        return;
    }

    let text = inner.get("text").and_then(Value::as_str).unwrap_or("");
    let channel = inner
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or(home_channel);
    tracing::info!(channel, text, "mentioned");

    if text.to_ascii_lowercase().contains("ping") {
        if let Err(error) = client.post_message("pong", channel) {
            tracing::warn!(%error, "reply failed");
        }
    }
}

/// Accept either a raw DER certificate or the same certificate in PEM.
fn load_trust_anchor(path: &std::path::Path) -> std::io::Result<Vec<u8>> {
    let bytes = std::fs::read(path)?;
    if !bytes.starts_with(b"-----BEGIN") {
        return Ok(bytes);
    }
    let mut reader = &bytes[..];
    rustls_pemfile::certs(&mut reader)
        .next()
        .transpose()?
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no certificate in pem"))
}
