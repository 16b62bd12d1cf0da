use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roleplay_voice::{
    Config, ConversationPhase, SessionController, SessionEvent, WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "roleplay-voice")]
#[command(about = "Real-time voice role-play sessions with an AI persona")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/roleplay-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a conversation
    Run {
        /// Conversation ID issued by the conversation manager
        #[arg(long)]
        conversation: String,

        #[arg(long)]
        scenario: String,

        #[arg(long)]
        persona: String,

        /// Replay a WAV file instead of using the microphone
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Discard AI audio instead of playing it
        #[arg(long)]
        no_speakers: bool,
    },

    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Roleplay Voice v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            conversation,
            scenario,
            persona,
            wav,
            no_speakers,
        } => {
            let replay = wav.is_some();
            let session_config = cfg.session_config(conversation, scenario, persona);
            let tokens = cfg.token_provider()?;
            let devices = Arc::new(cfg.system_audio(wav, !no_speakers));

            let mut session = SessionController::new(
                session_config,
                Arc::new(WebSocketConnector::new()),
                tokens,
                devices,
            );

            run(&mut session, replay).await
        }

        Command::Devices => list_devices(),
    }
}

async fn run(session: &mut SessionController, replay: bool) -> Result<()> {
    let mut events = session.subscribe();

    session.connect().await.context("Failed to connect")?;
    info!("Connected. Type to chat, /rec to talk, /send to finish a spoken turn, /stop to cut the AI off, /quit to leave");

    if replay {
        session.start_recording().await?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                break;
            }

            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/rec" => {
                        if let Err(e) = session.start_recording().await {
                            error!("Cannot record: {}", e);
                        }
                    }
                    "/send" => {
                        if let Err(e) = session.stop_recording().await {
                            error!("Cannot commit turn: {}", e);
                        }
                    }
                    "/stop" => {
                        if !session.interrupt() {
                            info!("Nothing to interrupt");
                        }
                    }
                    text => {
                        if let Err(e) = session.send_text(text) {
                            error!("Cannot send text: {}", e);
                        }
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !handle_event(session, event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    session.disconnect().await;

    let stats = session.stats();
    info!(
        "Session {} ended after {:.1}s: {} transcript segments, {} barge-ins",
        stats.session_id, stats.duration_secs, stats.transcript_segments_count, stats.barge_ins
    );

    Ok(())
}

/// Print one event; returns false once the session is over
async fn handle_event(session: &mut SessionController, event: SessionEvent) -> bool {
    match event {
        SessionEvent::UserTranscript(text) => println!("you: {}", text),

        SessionEvent::AiTranscriptDone(line) => match line.emotion {
            Some(emotion) => println!("ai [{}]: {}", emotion, line.text),
            None => println!("ai: {}", line.text),
        },

        SessionEvent::Warning {
            message,
            time_left_secs,
        } => match time_left_secs {
            Some(secs) => println!("! {} ({:.0}s left)", message, secs),
            None => println!("! {}", message),
        },

        SessionEvent::PhaseChanged {
            to: ConversationPhase::Interrupted,
            ..
        } => {
            warn!("Connection lost mid-conversation, reconnecting");
            if let Err(e) = session.reconnect().await {
                error!("Could not resume the conversation: {}", e);
                return false;
            }
        }

        SessionEvent::Terminated { reason } => {
            println!(
                "Session ended by the server: {}",
                reason.as_deref().unwrap_or("no reason given")
            );
            return false;
        }

        SessionEvent::PhaseChanged {
            to: ConversationPhase::Idle,
            from: ConversationPhase::Active,
        } => {
            println!("Connection closed before the conversation started");
            return false;
        }

        SessionEvent::Error(message) => error!("{}", message),

        _ => {}
    }

    true
}

#[cfg(feature = "devices")]
fn list_devices() -> Result<()> {
    let (inputs, outputs) = roleplay_voice::audio::device::list_devices()?;

    println!("Input devices:");
    for name in inputs {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in outputs {
        println!("  {}", name);
    }

    Ok(())
}

#[cfg(not(feature = "devices"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("Built without audio device support; rebuild with --features devices")
}
