use clap::Parser;
use log::{error, info, warn};
use server::config::RemoteConfig;
use server::console::ConsoleLog;
use server::network::{EventChannel, OperatorCommand, RemoteServer, ServiceEvent};
use server::supervisor::ChildSupervisor;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Main-method of the application.
/// Parses configuration, then runs the remote-control service next to an operator console on stdin.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// JSON configuration file
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// IP address the remote-control listener binds to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Remote-control port
        #[clap(short, long)]
        port: Option<u16>,
        /// Minecraft server jar or .bat launcher
        #[clap(short, long)]
        server_path: Option<PathBuf>,
        /// Java executable used for jar servers
        #[clap(long)]
        java_path: Option<PathBuf>,
        /// Initial heap in MiB (0 omits the flag)
        #[clap(long)]
        xms: Option<u32>,
        /// Maximum heap in MiB (0 omits the flag)
        #[clap(long)]
        xmx: Option<u32>,
        /// Time a client has to present the key
        #[clap(long)]
        handshake_timeout_ms: Option<u64>,
        /// Do not listen for remote clients until /restart
        #[clap(long)]
        no_listen: bool,
        /// Start the Minecraft server right away
        #[clap(long)]
        start: bool,
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RemoteConfig::from_file(path)?,
        None => RemoteConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(server_path) = args.server_path {
        config.launch.server_path = Some(server_path);
    }
    if let Some(java_path) = args.java_path {
        config.launch.java_path = Some(java_path);
    }
    if let Some(xms) = args.xms {
        config.launch.xms = xms;
    }
    if let Some(xmx) = args.xmx {
        config.launch.xmx = xmx;
    }
    if let Some(timeout) = args.handshake_timeout_ms {
        config.handshake_timeout_ms = timeout;
    }
    if args.no_listen {
        config.listen_on_start = false;
    }
    config.validate()?;

    match config.launch.properties_path() {
        Some(properties) => info!("Server properties: {}", properties.display()),
        None => warn!("No Minecraft server file configured; /start will fail"),
    }

    let channel = EventChannel::new();
    let supervisor = ChildSupervisor::new(config.launch.clone(), channel.sender());
    let mut server = RemoteServer::new(
        config,
        channel,
        Box::new(supervisor),
        Box::new(ConsoleLog::new()),
    );
    let handle = server.handle();
    let mut notifications = server.subscribe();

    if args.start {
        handle.send(OperatorCommand::StartProcess);
    }

    // Echo the game server console
    tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            match event {
                ServiceEvent::ConsoleLine(line) => println!("{}", line),
                ServiceEvent::TransferFailed(reason) => warn!("Transfer failed: {}", reason),
                ServiceEvent::RequestFailed(reason) => warn!("Request failed: {}", reason),
                _ => {}
            }
        }
    });

    // Operator console
    let operator = handle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match OperatorCommand::parse_line(&line) {
                Some(command) => {
                    if !operator.send(command) {
                        break;
                    }
                }
                None if line.trim().starts_with('/') => {
                    println!("Commands: /start /stop /restart /disconnect /stop-listening /key /clear /quit")
                }
                None => {}
            }
        }
    });

    let mut server_handle = tokio::spawn(async move { server.run().await });

    // Handle shutdown gracefully
    let finished = tokio::select! {
        result = &mut server_handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            println!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            server_handle.await
        }
    };

    match result {
        Ok(Ok(())) => info!("Remote control service stopped"),
        Ok(Err(e)) => error!("Remote control service failed: {}", e),
        Err(e) => error!("Remote control task panicked: {}", e),
    }

    Ok(())
}
