//! Line-oriented operator console.
//!
//! Each input line is one command. Anything that is not a console verb is
//! passed to the dispatcher as a raw action (`B0011`, `W010`,
//! `EMERGENCY_STOP_ON`, ...).

use crate::app::Controller;
use crate::error::AppResult;
use railctl_core::{ElementId, ProtocolResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

pub const HELP: &str = "\
commands:
  <ACTION>            raw action, e.g. B0011, W010, EMERGENCY_STOP_ON
  toggle <ID>         flip a block or switch
  stop | start        engage / release the emergency stop
  estop               toggle the emergency stop
  connect | disconnect
  suspend | resume
  send <TEXT>         free-form operator command, e.g. send INITIALIZE
  status              JSON snapshot
  layout              sections and element states
  metrics             Prometheus text exposition
  help
  quit";

/// Parsed console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Action(String),
    Toggle(ElementId),
    Stop,
    Start,
    EmergencyToggle,
    Connect,
    Disconnect,
    Suspend,
    Resume,
    Send(String),
    Status,
    Layout,
    Metrics,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> ProtocolResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb {
            "toggle" => Self::Toggle(ElementId::parse(rest)?),
            "send" => Self::Send(rest.to_string()),
            "stop" => Self::Stop,
            "start" => Self::Start,
            "estop" => Self::EmergencyToggle,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "suspend" => Self::Suspend,
            "resume" => Self::Resume,
            "status" => Self::Status,
            "layout" => Self::Layout,
            "metrics" => Self::Metrics,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Action(line.to_string()),
        };
        Ok(Some(command))
    }
}

/// Read commands from `input` until EOF or `quit`, writing replies to
/// `output`. Command failures are reported and do not end the session.
pub async fn run<R, W>(controller: &Controller, input: R, mut output: W) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match ConsoleCommand::parse(&line) {
            Ok(None) => continue,
            Ok(Some(ConsoleCommand::Quit)) => {
                info!("Quit requested from console");
                break;
            }
            Ok(Some(command)) => {
                debug!(?command, "Console command");
                controller
                    .execute(command)
                    .unwrap_or_else(|e| format!("error: {e}"))
            }
            Err(e) => format!("error: {e}"),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        ConsoleCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_verbs() {
        assert_eq!(parse("stop"), ConsoleCommand::Stop);
        assert_eq!(parse("  start  "), ConsoleCommand::Start);
        assert_eq!(parse("estop"), ConsoleCommand::EmergencyToggle);
        assert_eq!(parse("exit"), ConsoleCommand::Quit);
        assert_eq!(parse("status"), ConsoleCommand::Status);
    }

    #[test]
    fn test_toggle_parses_id() {
        assert_eq!(
            parse("toggle W01"),
            ConsoleCommand::Toggle(ElementId::parse("W01").unwrap())
        );
        assert!(ConsoleCommand::parse("toggle").is_err());
        assert!(ConsoleCommand::parse("toggle Q7").is_err());
    }

    #[test]
    fn test_send_keeps_text() {
        assert_eq!(parse("send INITIALIZE"), ConsoleCommand::Send("INITIALIZE".into()));
        assert_eq!(parse("send"), ConsoleCommand::Send(String::new()));
    }

    #[test]
    fn test_other_input_is_raw_action() {
        assert_eq!(parse("B0011"), ConsoleCommand::Action("B0011".into()));
        assert_eq!(
            parse("EMERGENCY_STOP_ON"),
            ConsoleCommand::Action("EMERGENCY_STOP_ON".into())
        );
    }

    #[test]
    fn test_blank_line_is_none() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }
}
