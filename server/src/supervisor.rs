//! Supervision of the game server child process.
//!
//! The service only talks to the [`ProcessSupervisor`] trait. Output lines,
//! start and exit notifications come back as [`ProcessEvent`]s on the service
//! event channel, so they are handled in order with network events.

use crate::config::LaunchSettings;
use crate::error::{RemoteError, Result};
use crate::network::ServerEvent;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Notifications emitted by a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Started,
    /// `code` is `None` when the process was terminated by a signal.
    Exited { code: Option<i32>, crashed: bool },
    OutputLine(String),
}

/// Run state of the game server as reported to remote clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Running,
    Stopped,
}

impl ServerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::Running => shared::STATUS_RUNNING,
            ServerStatus::Stopped => shared::STATUS_STOPPED,
        }
    }
}

/// Control surface of the child process.
pub trait ProcessSupervisor: Send {
    fn start(&mut self) -> Result<()>;

    /// Asks the process to shut down.
    fn stop(&mut self) -> Result<()>;

    /// Writes one line to the process standard input.
    fn write_line(&mut self, text: &str) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Terminates the process without asking.
    fn kill(&mut self) {}
}

/// Program, arguments and directory used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchPlan {
    /// Batch scripts run through `cmd.exe /c`; anything else is a jar run by
    /// Java with the configured heap limits and `nogui`.
    pub fn from_settings(settings: &LaunchSettings) -> Result<Self> {
        let server_path = settings
            .server_path
            .as_ref()
            .ok_or_else(|| RemoteError::Config {
                message: "no Minecraft server file configured".to_string(),
            })?;
        let file_name = server_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteError::Config {
                message: format!("{} does not name a file", server_path.display()),
            })?;
        let working_dir = settings
            .working_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        let is_batch = server_path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("bat"));
        if is_batch {
            return Ok(Self {
                program: PathBuf::from("cmd.exe"),
                args: vec!["/c".to_string(), file_name],
                working_dir,
            });
        }

        let mut args = Vec::new();
        if settings.xms > 0 {
            args.push(format!("-Xms{}M", settings.xms));
        }
        if settings.xmx > 0 {
            args.push(format!("-Xmx{}M", settings.xmx));
        }
        args.push("-jar".to_string());
        args.push(file_name);
        args.push("nogui".to_string());
        args.extend(
            settings
                .additional_parameters
                .split_whitespace()
                .map(str::to_string),
        );

        Ok(Self {
            program: settings
                .java_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("java")),
            args,
            working_dir,
        })
    }

    /// Command line as shown in the console.
    pub fn describe(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Supervisor backed by a tokio child process.
pub struct ChildSupervisor {
    settings: LaunchSettings,
    events: mpsc::UnboundedSender<ServerEvent>,
    running: Arc<AtomicBool>,
    stdin: Option<mpsc::UnboundedSender<String>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ChildSupervisor {
    pub fn new(settings: LaunchSettings, events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            settings,
            events,
            running: Arc::new(AtomicBool::new(false)),
            stdin: None,
            kill: None,
        }
    }

    fn spawn_output_reader<R>(reader: R, events: mpsc::UnboundedSender<ServerEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buffer = Vec::new();

            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let event = ServerEvent::Process(ProcessEvent::OutputLine(line.to_string()));
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read server output: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

impl ProcessSupervisor for ChildSupervisor {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(RemoteError::Process {
                message: "server process is already running".to_string(),
            });
        }

        let plan = LaunchPlan::from_settings(&self.settings)?;
        info!(
            "Starting {} in working directory {}",
            plan.describe(),
            plan.working_dir.display()
        );

        let mut child = Command::new(&plan.program)
            .args(&plan.args)
            .current_dir(&plan.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Process {
                message: format!("unable to start {}: {}", plan.program.display(), e),
            })?;

        if let Some(stdout) = child.stdout.take() {
            Self::spawn_output_reader(stdout, self.events.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            Self::spawn_output_reader(stderr, self.events.clone());
        }

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(line) = stdin_rx.recv().await {
                    if let Err(e) = stdin.write_all(line.as_bytes()).await {
                        warn!("Failed to write to server input: {}", e);
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }
        self.stdin = Some(stdin_tx);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        self.kill = Some(kill_tx);

        let running = Arc::clone(&self.running);
        let events = self.events.clone();
        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill server process: {}", e);
                    }
                    child.wait().await
                }
            };

            running.store(false, Ordering::SeqCst);
            let event = match status {
                Ok(status) => ProcessEvent::Exited {
                    code: status.code(),
                    crashed: status.code().is_none(),
                },
                Err(e) => {
                    error!("Failed to wait for server process: {}", e);
                    ProcessEvent::Exited {
                        code: None,
                        crashed: true,
                    }
                }
            };
            let _ = events.send(ServerEvent::Process(event));
        });

        let _ = self.events.send(ServerEvent::Process(ProcessEvent::Started));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(RemoteError::ProcessUnavailable);
        }
        self.write_line("stop")
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        if !self.is_running() {
            return Err(RemoteError::ProcessUnavailable);
        }
        match &self.stdin {
            Some(stdin) => stdin
                .send(format!("{}\n", text))
                .map_err(|_| RemoteError::ProcessUnavailable),
            None => Err(RemoteError::ProcessUnavailable),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar_settings() -> LaunchSettings {
        LaunchSettings {
            server_path: Some(PathBuf::from("/srv/mc/minecraft_server.jar")),
            ..LaunchSettings::default()
        }
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ServerStatus::Running.label(), "Minecraft Server: Running");
        assert_eq!(ServerStatus::Stopped.label(), "Minecraft Server: Stopped");
    }

    #[test]
    fn test_jar_launch_plan() {
        let plan = LaunchPlan::from_settings(&jar_settings()).unwrap();
        assert_eq!(plan.program, PathBuf::from("java"));
        assert_eq!(
            plan.args,
            vec!["-Xms512M", "-Xmx512M", "-jar", "minecraft_server.jar", "nogui"]
        );
        assert_eq!(plan.working_dir, PathBuf::from("/srv/mc"));
        assert_eq!(
            plan.describe(),
            "java -Xms512M -Xmx512M -jar minecraft_server.jar nogui"
        );
    }

    #[test]
    fn test_launch_plan_options() {
        let settings = LaunchSettings {
            java_path: Some(PathBuf::from("/opt/jdk/bin/java")),
            xms: 0,
            xmx: 2048,
            additional_parameters: "--port 25566  --world lobby".to_string(),
            ..jar_settings()
        };
        let plan = LaunchPlan::from_settings(&settings).unwrap();

        assert_eq!(plan.program, PathBuf::from("/opt/jdk/bin/java"));
        assert_eq!(
            plan.args,
            vec![
                "-Xmx2048M",
                "-jar",
                "minecraft_server.jar",
                "nogui",
                "--port",
                "25566",
                "--world",
                "lobby"
            ]
        );
    }

    #[test]
    fn test_batch_launch_plan() {
        let settings = LaunchSettings {
            server_path: Some(PathBuf::from("C:/mc/run.BAT")),
            ..LaunchSettings::default()
        };
        let plan = LaunchPlan::from_settings(&settings).unwrap();
        assert_eq!(plan.program, PathBuf::from("cmd.exe"));
        assert_eq!(plan.args, vec!["/c", "run.BAT"]);
    }

    #[test]
    fn test_launch_plan_needs_server_path() {
        let err = LaunchPlan::from_settings(&LaunchSettings::default()).unwrap_err();
        assert!(matches!(err, RemoteError::Config { .. }));
    }

    #[tokio::test]
    async fn test_stopped_supervisor_rejects_input() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut supervisor = ChildSupervisor::new(jar_settings(), tx);

        assert!(!supervisor.is_running());
        assert!(matches!(
            supervisor.write_line("list"),
            Err(RemoteError::ProcessUnavailable)
        ));
        assert!(matches!(
            supervisor.stop(),
            Err(RemoteError::ProcessUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LaunchSettings {
            server_path: Some(dir.path().join("server.jar")),
            java_path: Some(PathBuf::from("/nonexistent/bin/java")),
            ..LaunchSettings::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = ChildSupervisor::new(settings, tx);

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, RemoteError::Process { .. }));
        assert!(!supervisor.is_running());
        assert!(rx.try_recv().is_err());
    }
}
