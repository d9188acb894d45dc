use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::{ClientError, MemoryIdentity, Session, SessionConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wire::{Envelope, Event, EventKind, Fault, MessageType, TransportKind};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed with status {0}")]
    Unhealthy(u16),
    #[error("input: {0}")]
    Io(#[from] io::Error),
    #[error("all transports failed")]
    Exhausted,
    #[error("relay rejected request ({status}): {message}")]
    Rejected { status: i64, message: String },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("session ended")]
    Ended,
}

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Realtime relay client")]
struct Cli {
    #[arg(long, env = "TETHER_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Transport to try first: duplex, push or poll.
    #[arg(long, env = "TETHER_START", default_value = "duplex")]
    start: TransportKind,

    /// Resume an identity issued by an earlier run.
    #[arg(long, env = "TETHER_IDENTITY")]
    identity: Option<String>,

    #[arg(long, env = "TETHER_RETRY_MS", default_value_t = 4000)]
    retry_ms: u64,

    #[arg(long, env = "TETHER_POLL_MS", default_value_t = 5000)]
    poll_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the relay is up.
    Ping,
    /// Join a channel and print everything received, one JSON envelope per line.
    Listen(ListenArgs),
    /// Join a channel and publish messages to it.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Channels to join. The first is named in the auth reply.
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,

    #[arg(long, help = "Exit after this many channel messages")]
    max_messages: Option<usize>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    channel: String,

    /// Messages to publish. JSON values are sent as JSON, anything else as text.
    messages: Vec<String>,

    #[arg(long, default_value = "-", help = "Input file path, or - for stdin; read when no messages are given")]
    input: String,

    #[arg(long, default_value_t = 15_000)]
    wait_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Ping => run_ping(&cli).await,
        Command::Listen(args) => run_listen(&cli, args).await,
        Command::Send(args) => run_send(&cli, args).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_ping(cli: &Cli) -> Result<(), CliError> {
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let status = reqwest::Client::new().get(url).send().await?.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

// =============================================================================
// SESSION PLUMBING
// =============================================================================

/// What the session reports back to a command.
enum Inbound {
    Envelope(Envelope),
    Exhausted,
}

fn session_config(cli: &Cli, channel: &str) -> Result<SessionConfig, CliError> {
    Ok(SessionConfig::from_base(&cli.base_url)?
        .with_start(cli.start)
        .with_retry_interval(Duration::from_millis(cli.retry_ms))
        .with_poll_interval(Duration::from_millis(cli.poll_ms))
        .with_auth_channel(channel))
}

fn open_session(cli: &Cli, channel: &str) -> Result<(Session, mpsc::UnboundedReceiver<Inbound>), CliError> {
    let identity = match &cli.identity {
        Some(id) => MemoryIdentity::with_id(id.clone()),
        None => MemoryIdentity::new(),
    };
    let session = Session::connect(session_config(cli, channel)?, Arc::new(identity))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let data_tx = tx.clone();
    session.on(
        EventKind::Data,
        Arc::new(move |event: &Event| {
            if let Some(envelope) = event.envelope() {
                let _ = data_tx.send(Inbound::Envelope(envelope.clone()));
            }
        }),
    );
    session.on(
        EventKind::Error,
        Arc::new(move |event: &Event| match event {
            Event::Error(Fault::Exhausted) => {
                let _ = tx.send(Inbound::Exhausted);
            }
            Event::Error(fault) => tracing::debug!(%fault, "tether: transport fault"),
            _ => {}
        }),
    );
    // A resumed, already authenticated session gets no auth request.
    if cli.identity.is_some() {
        session.subscribe(channel);
    }
    Ok((session, rx))
}

async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Result<Envelope, CliError> {
    match rx.recv().await {
        Some(Inbound::Envelope(envelope)) => Ok(envelope),
        Some(Inbound::Exhausted) => Err(CliError::Exhausted),
        None => Err(CliError::Ended),
    }
}

fn rejection(envelope: &Envelope) -> CliError {
    CliError::Rejected {
        status: envelope.status_code,
        message: envelope
            .value
            .as_ref()
            .map_or_else(String::new, |v| v.as_str().map_or_else(|| v.to_string(), ToOwned::to_owned)),
    }
}

/// Wait until the relay acknowledges the channel named in the auth reply.
async fn joined(rx: &mut mpsc::UnboundedReceiver<Inbound>, channel: &str) -> Result<(), CliError> {
    loop {
        let envelope = next_envelope(rx).await?;
        match envelope.kind {
            MessageType::Identity => {
                if let Some(id) = envelope.value.as_ref().and_then(Value::as_str) {
                    eprintln!("identity: {id}");
                }
            }
            MessageType::Success if envelope.channel.as_deref() == Some(channel) => return Ok(()),
            // The explicit subscribe of a resumed identity can beat the auth reply.
            MessageType::Error if envelope.status_code == 401 => {}
            MessageType::Error => return Err(rejection(&envelope)),
            _ => {}
        }
    }
}

/// Parse one message argument or input line.
fn parse_message(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_owned())))
}

fn print_envelope(out: &mut impl Write, envelope: &Envelope) -> Result<(), CliError> {
    writeln!(out, "{}", envelope.encode())?;
    out.flush()?;
    Ok(())
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_listen(cli: &Cli, args: &ListenArgs) -> Result<(), CliError> {
    let Some((first, rest)) = args.channels.split_first() else {
        return Ok(());
    };
    let (session, mut rx) = open_session(cli, first)?;
    joined(&mut rx, first).await?;
    for channel in rest {
        session.subscribe(channel);
        joined(&mut rx, channel).await?;
    }
    eprintln!("listening on {} via {}", args.channels.join(", "), session.kind());

    let mut stdout = io::stdout().lock();
    let mut received = 0_usize;
    loop {
        let envelope = tokio::select! {
            envelope = next_envelope(&mut rx) => envelope?,
            _ = tokio::signal::ctrl_c() => break,
        };
        if matches!(envelope.kind, MessageType::Heartbeat | MessageType::Pong | MessageType::AuthReq) {
            continue;
        }
        print_envelope(&mut stdout, &envelope)?;
        if envelope.kind == MessageType::Message {
            received = received.saturating_add(1);
            if args.max_messages.is_some_and(|limit| received >= limit) {
                break;
            }
        }
    }
    session.close();
    Ok(())
}

fn read_messages(args: &SendArgs) -> Result<Vec<Value>, CliError> {
    if !args.messages.is_empty() {
        return Ok(args.messages.iter().filter_map(|m| parse_message(m)).collect());
    }
    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(&args.input)?))
    };
    let mut messages = Vec::new();
    for line in reader.lines() {
        if let Some(value) = parse_message(&line?) {
            messages.push(value);
        }
    }
    Ok(messages)
}

async fn ponged(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Result<(), CliError> {
    loop {
        let envelope = next_envelope(rx).await?;
        match envelope.kind {
            MessageType::Pong => return Ok(()),
            MessageType::Error => return Err(rejection(&envelope)),
            _ => {}
        }
    }
}

async fn run_send(cli: &Cli, args: &SendArgs) -> Result<(), CliError> {
    let messages = read_messages(args)?;
    let (session, mut rx) = open_session(cli, &args.channel)?;
    let wait = Duration::from_millis(args.wait_ms);

    tokio::time::timeout(wait, joined(&mut rx, &args.channel))
        .await
        .map_err(|_| CliError::Timeout("channel join"))??;

    for message in &messages {
        session.publish(&args.channel, message.clone());
    }

    // Sends leave in order, so the pong proves every publish reached the relay.
    session.send(Envelope::ping());
    tokio::time::timeout(wait, ponged(&mut rx))
        .await
        .map_err(|_| CliError::Timeout("delivery"))??;

    eprintln!("sent {} message(s) to {} via {}", messages.len(), args.channel, session.kind());
    session.close();
    Ok(())
}
