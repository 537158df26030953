//! Request handling for authenticated sessions.
//!
//! [`ServiceContext`] holds everything a request can touch: the process
//! supervisor, the console buffer, the last known server status and the
//! client's log cursor. [`dispatch`] routes one message to its handler.

use crate::console::{LogCursor, LogStore};
use crate::error::{RemoteError, Result};
use crate::network::ServiceEvent;
use crate::session::Session;
use crate::supervisor::{ProcessEvent, ProcessSupervisor, ServerStatus};
use crate::transfer::TransferJob;
use chrono::Local;
use log::{debug, info, warn};
use shared::{Message, Tag};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Status reply timestamp, followed by the status label.
pub const STATUS_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S ";

pub const COMMAND_REJECTED: &str = "Send Command Error Occur!!Reason : Server isn't running.";
pub const NO_LOGS: &str = "mcServerLogs:Didn't Found Any Logs.";

/// Command clients send to test the connection; never forwarded.
const CONNECTION_TEST_COMMAND: &[u8] = b"texttest";

pub struct ServiceContext {
    supervisor: Box<dyn ProcessSupervisor>,
    console: Box<dyn LogStore>,
    status: ServerStatus,
    cursor: LogCursor,
    snapshot: Option<Vec<u8>>,
    latest_log: Option<PathBuf>,
    chunk_size: usize,
    notify: Option<mpsc::UnboundedSender<ServiceEvent>>,
}

impl ServiceContext {
    pub fn new(
        supervisor: Box<dyn ProcessSupervisor>,
        console: Box<dyn LogStore>,
        latest_log: Option<PathBuf>,
        chunk_size: usize,
    ) -> Self {
        Self {
            supervisor,
            console,
            status: ServerStatus::Stopped,
            cursor: LogCursor::default(),
            snapshot: None,
            latest_log,
            chunk_size,
            notify: None,
        }
    }

    /// Routes service notifications to the returned receiver. A second call
    /// replaces the first subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify = Some(tx);
        rx
    }

    pub fn emit(&self, event: ServiceEvent) {
        if let Some(notify) = &self.notify {
            let _ = notify.send(event);
        }
    }

    /// Logs a connection notice and forwards it to the subscriber.
    pub fn connection_log(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.emit(ServiceEvent::ConnectionLog(text));
    }

    pub fn console_line(&mut self, line: &str) {
        self.console.append_line(line);
        self.emit(ServiceEvent::ConsoleLine(line.to_string()));
    }

    pub fn clear_console(&mut self) {
        info!("Clearing {} console line(s)", self.console.line_count());
        self.console.clear();
        self.snapshot = None;
    }

    pub fn console(&self) -> &dyn LogStore {
        self.console.as_ref()
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    fn set_status(&mut self, status: ServerStatus) {
        if self.status != status {
            self.status = status;
            self.emit(ServiceEvent::ServerStatus(status));
        }
    }

    pub fn is_process_running(&self) -> bool {
        self.status == ServerStatus::Running || self.supervisor.is_running()
    }

    /// Starts the game server unless it is already up.
    pub fn start_process(&mut self) {
        if self.is_process_running() {
            debug!("Start requested while the server is running, ignoring");
            return;
        }
        if let Err(e) = self.supervisor.start() {
            warn!("Failed to start Minecraft server: {}", e);
            self.console_line(&format!(">> Unable to start Minecraft Server: {}", e));
        }
    }

    /// Asks a running game server to stop.
    pub fn stop_process(&mut self) {
        if !self.is_process_running() {
            debug!("Stop requested while the server is stopped, ignoring");
            return;
        }
        self.console_line(">> Stopping Minecraft Server...");
        if let Err(e) = self.supervisor.stop() {
            warn!("Failed to stop Minecraft server: {}", e);
        }
    }

    /// Forwards a console command, echoing it into the console first.
    pub fn send_console_command(&mut self, text: &str) -> Result<()> {
        if !self.is_process_running() {
            return Err(RemoteError::ProcessUnavailable);
        }
        if text.is_empty() {
            return Ok(());
        }

        self.console_line(&format!("<< {}", text));
        if text.trim() == "stop" {
            self.console_line(">> Stopping Minecraft Server...");
        }
        self.supervisor.write_line(text)
    }

    pub fn kill_process(&mut self) {
        self.supervisor.kill();
    }

    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Started => {
                self.console_line(">> Starting Minecraft Server...");
                self.set_status(ServerStatus::Running);
            }
            ProcessEvent::Exited { code, crashed } => {
                let notice = match (code, crashed) {
                    (_, true) | (None, _) => ">> Minecraft Server crashed!".to_string(),
                    (Some(0), false) => {
                        ">> Minecraft Server stopped normally with exit code: 0".to_string()
                    }
                    (Some(1), false) => {
                        ">> Minecraft Server killed and exited with exit code: 1".to_string()
                    }
                    (Some(code), false) => {
                        format!(">> Minecraft Server exited with exit code: {}", code)
                    }
                };
                info!("{}", notice.trim_start_matches(">> "));
                self.console_line(&notice);
                self.set_status(ServerStatus::Stopped);
            }
            ProcessEvent::OutputLine(line) => self.console_line(&line),
        }
    }
}

/// Handles one message from an authenticated session.
///
/// Errors are for the operator only; nothing is sent to the peer for them.
pub async fn dispatch(ctx: &mut ServiceContext, session: &mut Session, message: Message) -> Result<()> {
    match message.tag {
        Tag::Button => {
            press_button(ctx, &message.payload);
            Ok(())
        }
        Tag::Command => run_command(ctx, session, &message.payload),
        Tag::McServerStatus => {
            report_status(ctx, session);
            Ok(())
        }
        Tag::McServerLogs => {
            export_console(ctx, session, &message.payload);
            Ok(())
        }
        Tag::McLogsUpdate => {
            send_log_update(ctx, session);
            Ok(())
        }
        Tag::File => send_latest_log(ctx, session).await,
        _ => {
            ctx.connection_log(format!(
                "\"error format\"->{}",
                String::from_utf8_lossy(&message.to_bytes())
            ));
            Ok(())
        }
    }
}

fn press_button(ctx: &mut ServiceContext, payload: &[u8]) {
    match payload {
        b"start" => {
            ctx.connection_log("ReceiveButton \"start\"");
            ctx.start_process();
        }
        b"stop" => {
            ctx.connection_log("ReceiveButton \"stop\"");
            ctx.stop_process();
        }
        other => ctx.connection_log(format!(
            "\"error format\"->button|{}",
            String::from_utf8_lossy(other)
        )),
    }
}

fn run_command(ctx: &mut ServiceContext, session: &Session, payload: &[u8]) -> Result<()> {
    if payload == CONNECTION_TEST_COMMAND {
        return Ok(());
    }

    let text = String::from_utf8_lossy(payload);
    match ctx.send_console_command(&text) {
        Ok(()) => {
            ctx.connection_log(format!("ReceiveCommand \"{}\"", text));
            Ok(())
        }
        Err(RemoteError::ProcessUnavailable) => {
            session.reply(&Tag::Reason, &[COMMAND_REJECTED.as_bytes()]);
            ctx.connection_log(format!("Rejected command \"{}\": server isn't running", text));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn report_status(ctx: &ServiceContext, session: &Session) {
    let status = format!(
        "{}{}",
        Local::now().format(STATUS_TIME_FORMAT),
        ctx.status.label()
    );
    session.reply(&Tag::McServerStatus, &[status.as_bytes()]);
}

fn export_console(ctx: &mut ServiceContext, session: &mut Session, payload: &[u8]) {
    match payload {
        b"" => {
            if ctx.console.is_empty() {
                session.reply(&Tag::Reason, &[NO_LOGS.as_bytes()]);
                return;
            }
            let snapshot = ctx.console.current_text().as_bytes().to_vec();
            let size = snapshot.len();
            ctx.cursor.mark(size);
            ctx.snapshot = Some(snapshot);
            session.reply(&Tag::McServerLogs, &[size.to_string().as_bytes()]);
        }
        b"start" => {
            let body = ctx
                .snapshot
                .take()
                .unwrap_or_else(|| ctx.console.current_text().as_bytes().to_vec());
            session.begin_transfer(TransferJob::raw("console", body, ctx.chunk_size));
        }
        b"finished" => ctx.connection_log("successfully send logs"),
        other => ctx.connection_log(format!(
            "\"error format\"->mcServerLogs|{}",
            String::from_utf8_lossy(other)
        )),
    }
}

fn send_log_update(ctx: &mut ServiceContext, session: &Session) {
    let text = ctx.console.current_text().as_bytes();
    if let Some(delta) = ctx.cursor.advance(text) {
        session.reply(&Tag::McLogsUpdate, &[delta]);
    }
}

async fn send_latest_log(ctx: &mut ServiceContext, session: &mut Session) -> Result<()> {
    let path = ctx.latest_log.clone().ok_or_else(|| RemoteError::Config {
        message: "no server file configured, there is no log to send".to_string(),
    })?;
    let job = TransferJob::open_file(&path, ctx.chunk_size).await?;

    ctx.connection_log(format!(
        "PushButton \"get logs\" size: {:.1}KB",
        job.total_bytes() as f64 / 1024.0
    ));
    session.begin_transfer(job);
    Ok(())
}
