use clap::Parser;
use log::{debug, info};
use shared::{FrameError, Message, SharedKey, Tag, TransferHeader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sends remote-control messages to a Minecraft server")]
struct Args {
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Key as hex; derived from the local clock when omitted
    #[clap(short, long)]
    key_hex: Option<String>,
    /// Where `file|` downloads are written
    #[clap(short, long, default_value = "latest.log")]
    output: PathBuf,
    /// How long to wait for each reply
    #[clap(long, default_value = "2000")]
    reply_timeout_ms: u64,
    /// Messages to send after authenticating, e.g. `mcServerStatus|`
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let reply_timeout = Duration::from_millis(args.reply_timeout_ms);

    let key = match &args.key_hex {
        Some(hex) => SharedKey::from_hex(hex).ok_or("key must be 128 hex digits")?,
        None => SharedKey::generate(),
    };

    let mut stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    println!("Connected to {}", stream.peer_addr()?);

    stream
        .write_all(&Message::join(&Tag::Key, &[key.as_bytes()]))
        .await?;
    let verdict = read_reply(&mut stream, reply_timeout)
        .await?
        .ok_or("no handshake reply")?;
    let verdict = Message::parse(&verdict)?;
    if verdict.tag != Tag::Remote || verdict.payload != b"success" {
        return Err(format!("handshake rejected: {}", verdict.payload_lossy()).into());
    }
    info!("Authenticated");

    // Size announced by the last mcServerLogs| reply
    let mut announced_logs: Option<usize> = None;

    for raw in &args.messages {
        stream.write_all(raw.as_bytes()).await?;

        if raw.starts_with("file|") {
            let (header, body) = receive_file(&mut stream, reply_timeout).await?;
            tokio::fs::write(&args.output, &body).await?;
            println!(
                "Saved {} ({} bytes) to {}",
                header.name,
                body.len(),
                args.output.display()
            );
        } else if raw == "mcServerLogs|start" {
            let size = announced_logs.take().ok_or("send mcServerLogs| first")?;
            let body = read_exact_within(&mut stream, size, reply_timeout).await?;
            print!("{}", String::from_utf8_lossy(&body));
            stream.write_all(b"mcServerLogs|finished").await?;
        } else {
            match read_reply(&mut stream, reply_timeout).await? {
                Some(reply) => {
                    if let Ok(message) = Message::parse(&reply) {
                        if message.tag == Tag::McServerLogs {
                            announced_logs = message.payload_lossy().parse().ok();
                        }
                    }
                    println!("{}", String::from_utf8_lossy(&reply));
                }
                None => println!("(no reply)"),
            }
        }

        // Keep consecutive messages in separate reads
        sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

/// Reads one reply, or `None` when nothing arrives in time.
async fn read_reply(
    stream: &mut TcpStream,
    wait: Duration,
) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error>> {
    let mut buf = vec![0u8; 64 * 1024];
    match timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(0)) => Err("connection closed by server".into()),
        Ok(Ok(len)) => Ok(Some(buf[..len].to_vec())),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Ok(None),
    }
}

async fn read_exact_within(
    stream: &mut TcpStream,
    len: usize,
    wait: Duration,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut body = vec![0u8; len];
    timeout(wait, stream.read_exact(&mut body)).await??;
    Ok(body)
}

async fn receive_file(
    stream: &mut TcpStream,
    wait: Duration,
) -> Result<(TransferHeader, Vec<u8>), Box<dyn std::error::Error>> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];

    let (header, used) = loop {
        match TransferHeader::decode(&received) {
            Ok(decoded) => break decoded,
            Err(FrameError::HeaderTooShort { .. }) => {
                let len = timeout(wait, stream.read(&mut buf)).await??;
                if len == 0 {
                    return Err("connection closed before the transfer header".into());
                }
                received.extend_from_slice(&buf[..len]);
            }
            Err(e) => return Err(e.into()),
        }
    };
    debug!("Transfer header: {:?}", header);

    let body_len = header.body_len() as usize;
    let mut body = received.split_off(used);
    if body.len() < body_len {
        let rest = read_exact_within(stream, body_len - body.len(), wait).await?;
        body.extend_from_slice(&rest);
    }
    body.truncate(body_len);

    Ok((header, body))
}
