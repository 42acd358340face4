//! Konsolen-Runner für die Call-Engine
//!
//! Liest Befehle von stdin und gibt Notifications aus. Praktisch, um die
//! Übergänge ohne UI durchzuspielen.

use anyhow::{bail, Context, Result};
use appointment_call::call_engine::{CallOutcome, CallRecord};
use appointment_call::config::EngineConfig;
use appointment_call::directory::{Participant, ParticipantDirectory, Role};
use appointment_call::notifications::Notification;
use appointment_call::{init_logging, AppState};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const HELP: &str = "\
commands:
  call <appointment> <participant>   start an outgoing call
  ring [participant]                 simulate an incoming call (random if omitted)
  accept | reject | end              answer, decline or hang up
  leave                              simulate the remote side leaving
  video | audio | share              toggle camera, microphone, screen sharing
  online <participant> | offline <participant>
  who | status | history | help | quit";

// ============================================================================
// CONSOLE COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Call {
        appointment_id: String,
        participant_id: String,
    },
    Ring(Option<String>),
    Accept,
    Reject,
    End,
    Leave,
    Video,
    Audio,
    Share,
    Presence {
        participant_id: String,
        is_online: bool,
    },
    Who,
    Status,
    History,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = parts.collect();

        let command = match (verb, args.as_slice()) {
            ("call", [appointment, participant]) => ConsoleCommand::Call {
                appointment_id: appointment.to_string(),
                participant_id: participant.to_string(),
            },
            ("ring", []) => ConsoleCommand::Ring(None),
            ("ring", [participant]) => ConsoleCommand::Ring(Some(participant.to_string())),
            ("accept", []) => ConsoleCommand::Accept,
            ("reject", []) => ConsoleCommand::Reject,
            ("end", []) => ConsoleCommand::End,
            ("leave", []) => ConsoleCommand::Leave,
            ("video", []) => ConsoleCommand::Video,
            ("audio", []) => ConsoleCommand::Audio,
            ("share", []) => ConsoleCommand::Share,
            ("online", [participant]) | ("offline", [participant]) => ConsoleCommand::Presence {
                participant_id: participant.to_string(),
                is_online: verb == "online",
            },
            ("who", []) => ConsoleCommand::Who,
            ("status", []) => ConsoleCommand::Status,
            ("history", []) => ConsoleCommand::History,
            ("help", []) => ConsoleCommand::Help,
            ("quit", []) | ("exit", []) => ConsoleCommand::Quit,
            _ => bail!("unknown command: {:?} (try 'help')", line.trim()),
        };
        Ok(command)
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Teilnehmer aus `CALL_DIRECTORY` (JSON) oder die eingebaute Demo-Liste
fn load_directory() -> Result<ParticipantDirectory> {
    match std::env::var("CALL_DIRECTORY") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read participant list {}", path))?;
            ParticipantDirectory::from_json_str(&json)
                .with_context(|| format!("failed to parse participant list {}", path))
        }
        Err(_) => Ok(demo_directory()),
    }
}

fn demo_directory() -> ParticipantDirectory {
    ParticipantDirectory::from_participants([
        Participant::new("p1", "Ahmed", Role::Student),
        Participant::new("c1", "Dana", Role::Student),
        Participant::new("c2", "Omar", Role::Student).with_online(false),
        Participant::new("o1", "Mona", Role::Officer),
    ])
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = EngineConfig::from_env().context("invalid call engine configuration")?;
    let directory = load_directory()?;
    let app = AppState::start(config, directory);

    let notifications = app.engine.subscribe();
    let printer = tokio::spawn(forward_notifications(notifications, |notification| {
        println!("{}", notification)
    }));

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = execute(&app, command).await {
            eprintln!("error: {:#}", e);
        }
    }

    printer.abort();
    app.shutdown().await;
    Ok(())
}

/// Gibt Notifications aus, bis die Engine weg ist; verpasste werden übersprungen
async fn forward_notifications(
    mut notifications: broadcast::Receiver<Notification>,
    mut emit: impl FnMut(&Notification),
) {
    loop {
        match notifications.recv().await {
            Ok(notification) => emit(&notification),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Notification printer lagged, {} skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn execute(app: &AppState, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Call {
            appointment_id,
            participant_id,
        } => {
            let participant = app.directory.get(&participant_id)?;
            app.engine.start_call(appointment_id, participant)?;
        }
        ConsoleCommand::Ring(Some(participant_id)) => {
            let caller = app.directory.get(&participant_id)?;
            app.signaling.inject_incoming_call(caller, None);
        }
        ConsoleCommand::Ring(None) => {
            // Der Task meldet sich selbst über die Notifications
            let _ = app
                .signaling
                .ring_randomly(app.directory.clone(), Duration::from_secs(1));
        }
        ConsoleCommand::Accept => app.engine.accept_call()?,
        ConsoleCommand::Reject => app.engine.reject_call()?,
        ConsoleCommand::End => app.engine.end_call()?,
        ConsoleCommand::Leave => app.signaling.inject_remote_left(),
        ConsoleCommand::Video => app.engine.toggle_video()?,
        ConsoleCommand::Audio => app.engine.toggle_audio()?,
        ConsoleCommand::Share => app.engine.toggle_screen_share()?,
        ConsoleCommand::Presence {
            participant_id,
            is_online,
        } => app.signaling.set_presence(participant_id, is_online),
        ConsoleCommand::Who => {
            for p in app.directory.all() {
                let presence = if p.is_online { "online" } else { "offline" };
                println!("  {:<4} {:<10} {:<8} {}", p.id, p.name, p.role, presence);
            }
        }
        ConsoleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&app.engine.snapshot())?);
        }
        ConsoleCommand::History => {
            let history = app.engine.history().await?;
            if history.is_empty() {
                println!("  no calls yet");
            }
            for record in history {
                println!("  {}", describe(&record));
            }
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn describe(record: &CallRecord) -> String {
    let outcome = match &record.outcome {
        CallOutcome::Completed { duration } => format!("completed ({}s)", duration.as_secs()),
        CallOutcome::Cancelled => "cancelled".to_string(),
        CallOutcome::Missed => "missed".to_string(),
        CallOutcome::Rejected => "rejected".to_string(),
        CallOutcome::Busy => "missed (busy)".to_string(),
    };
    format!(
        "{} {:?} {} [{}]: {}",
        record.at.format("%H:%M:%S"),
        record.direction,
        record.participant.name,
        record.appointment_id,
        outcome
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "call appt-1 p1".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Call {
                appointment_id: "appt-1".to_string(),
                participant_id: "p1".to_string(),
            }
        );
        assert_eq!(
            "  ring  ".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Ring(None)
        );
        assert_eq!(
            "offline c2".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Presence {
                participant_id: "c2".to_string(),
                is_online: false,
            }
        );
        assert_eq!("exit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("call appt-1".parse::<ConsoleCommand>().is_err());
        assert!("dance".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test]
    async fn test_printer_survives_lag() {
        use appointment_call::notifications::NotificationKind;

        let (tx, rx) = broadcast::channel(1);
        for name in ["Ahmed", "Dana", "Omar"] {
            tx.send(Notification::info(
                NotificationKind::Calling,
                format!("Calling {}", name),
            ))
            .unwrap();
        }
        drop(tx);

        let mut printed = Vec::new();
        forward_notifications(rx, |n| printed.push(n.message.clone())).await;
        assert_eq!(printed, vec!["Calling Omar"]);
    }

    #[test]
    fn test_demo_directory_has_offline_participant() {
        let directory = demo_directory();
        assert_eq!(directory.len(), 4);
        assert_eq!(directory.presence("c2"), Some(false));
    }
}
