//! Controller wiring.
//!
//! Owns the shared status board, the dispatcher and the link supervisor,
//! and runs the two transport tasks:
//! - outbound writer (UDP broadcast)
//! - ACK listener (TCP)
//!
//! Both stop on the controller's shutdown token.

use crate::config::AppConfig;
use crate::console::{ConsoleCommand, HELP};
use crate::error::AppResult;
use railctl_control::{ControlSnapshot, Dispatcher};
use railctl_core::{Command, ElementId, StatusBoard, StatusEvent};
use railctl_link::{
    outbound_channel, AckListener, LinkSnapshot, LinkSupervisor, OutboundWriter, UdpBroadcastSink,
};
use railctl_telemetry::Metrics;
use serde::Serialize;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Combined view for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub status: StatusEvent,
    pub link: LinkSnapshot,
    pub control: ControlSnapshot,
}

/// Running controller.
pub struct Controller {
    config: AppConfig,
    status: Arc<StatusBoard>,
    dispatcher: Dispatcher,
    link: Arc<LinkSupervisor>,
    ack_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Bind the ACK listener, spawn the transport tasks and apply the
    /// startup options.
    ///
    /// # Errors
    ///
    /// `AppError::Link` if the ACK address cannot be bound.
    pub async fn start(config: AppConfig) -> AppResult<Self> {
        let status = Arc::new(StatusBoard::default());
        let (outbound, rx) = outbound_channel();

        let dispatcher = Dispatcher::new(
            outbound.clone(),
            status.clone(),
            config.control.start_in_emergency_stop,
        );
        let link = Arc::new(LinkSupervisor::new(
            config.link_config(),
            outbound,
            status.clone(),
        ));

        let listener = AckListener::bind(config.ack_listener_config(), link.clone()).await?;
        let ack_addr = listener.local_addr();

        let sink = UdpBroadcastSink::new(config.link.broadcast_addr);
        info!(
            broadcast = %sink.target(),
            ack = ?ack_addr,
            heartbeat_ms = link.config().heartbeat_interval.as_millis() as u64,
            watchdog_timeout_ms = link.config().watchdog_timeout.as_millis() as u64,
            sections = config.layout.sections.len(),
            emergency_stop = config.control.start_in_emergency_stop,
            "Controller started"
        );

        let shutdown = CancellationToken::new();
        let writer = OutboundWriter::new(rx, sink, status.clone());
        let tasks = vec![
            tokio::spawn(writer.run(shutdown.clone())),
            tokio::spawn(listener.run(shutdown.clone())),
        ];

        let controller = Self {
            config,
            status,
            dispatcher,
            link,
            ack_addr,
            shutdown,
            tasks,
        };

        if controller.config.control.connect_on_start {
            controller.link.connect()?;
        }
        Ok(controller)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn link(&self) -> &Arc<LinkSupervisor> {
        &self.link
    }

    /// Address the ACK listener actually bound.
    pub fn ack_addr(&self) -> Option<SocketAddr> {
        self.ack_addr
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            status: self.status.current(),
            link: self.link.snapshot(),
            control: self.dispatcher.snapshot(),
        }
    }

    /// Execute one console command and return the reply text.
    ///
    /// `Quit` is handled by the console loop and answers with a no-op here.
    pub fn execute(&self, command: ConsoleCommand) -> AppResult<String> {
        let reply = match command {
            ConsoleCommand::Action(raw) => self.sent_reply(&self.dispatcher.handle_action(&raw)?),
            ConsoleCommand::Toggle(id) => self.sent_reply(&self.dispatcher.toggle(&id)?),
            ConsoleCommand::Send(text) => self.sent_reply(&self.dispatcher.send_operator(&text)?),
            ConsoleCommand::Stop => {
                let changed = self.dispatcher.set_emergency_stop(true)?;
                stop_reply(true, changed)
            }
            ConsoleCommand::Start => {
                let changed = self.dispatcher.set_emergency_stop(false)?;
                stop_reply(false, changed)
            }
            ConsoleCommand::EmergencyToggle => {
                let engaged = self.dispatcher.toggle_emergency_stop()?;
                stop_reply(engaged, true)
            }
            ConsoleCommand::Connect => {
                self.link.connect()?;
                format!("link {}", self.link.state())
            }
            ConsoleCommand::Disconnect => {
                self.link.disconnect();
                format!("link {}", self.link.state())
            }
            ConsoleCommand::Suspend => {
                self.link.suspend();
                "supervision suspended".to_string()
            }
            ConsoleCommand::Resume => {
                self.link.resume()?;
                format!("link {}", self.link.state())
            }
            ConsoleCommand::Status => serde_json::to_string_pretty(&self.snapshot())?,
            ConsoleCommand::Layout => self.describe_layout(),
            ConsoleCommand::Metrics => Metrics::gather_text()?,
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => String::new(),
        };
        Ok(reply)
    }

    /// `ok <payload>`, with the layout section for catalogued elements.
    fn sent_reply(&self, command: &Command) -> String {
        let section = command
            .element_id()
            .and_then(|id| self.config.layout.section_of(id));
        match section {
            Some(section) => format!("ok {command} ({})", section.name),
            None => format!("ok {command}"),
        }
    }

    /// One line per section: `name: B001=1 B002=0 | W001=1`.
    fn describe_layout(&self) -> String {
        let store = self.dispatcher.store();
        let render = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .filter_map(|raw| ElementId::parse(raw).ok())
                .map(|id| format!("{id}={}", u8::from(store.get(&id))))
                .collect()
        };

        let mut out = String::new();
        for section in &self.config.layout.sections {
            let _ = writeln!(
                out,
                "{}: {} | {}",
                section.name,
                render(&section.blocks).join(" "),
                render(&section.switches).join(" ")
            );
        }
        let engaged = self.dispatcher.is_emergency_stop_engaged();
        let _ = write!(
            out,
            "emergency stop: {}",
            if engaged { "ENGAGED" } else { "released" }
        );
        out
    }

    /// Stop supervision, flush the outbound queue and wait for the
    /// transport tasks.
    pub async fn shutdown(self) {
        info!("Shutting down controller");
        self.link.disconnect();
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Transport task failed");
            }
        }
        info!("Controller stopped");
    }
}

fn stop_reply(engaged: bool, changed: bool) -> String {
    match (engaged, changed) {
        (true, true) => "emergency stop engaged".to_string(),
        (true, false) => "emergency stop already engaged".to_string(),
        (false, true) => "emergency stop released".to_string(),
        (false, false) => "emergency stop already released".to_string(),
    }
}
