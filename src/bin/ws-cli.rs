use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpStream;

use socket_pipe::channel::{ChannelOptions, CloseReason, PackageReader, PipeChannel};
use socket_pipe::websocket::{
    client_request, generate_key, verify_response, CloseCode, MaskedWebSocketEncoder, OpCode,
    WebSocketFilter, WebSocketOptions, WebSocketPackage,
};

#[derive(Parser)]
#[command(name = "ws-cli")]
#[command(about = "WebSocket client for the socket-pipe server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:4040")]
    addr: String,

    #[arg(short, long, default_value = "/")]
    path: String,

    /// Sub-protocol to offer; repeatable.
    #[arg(long = "protocol")]
    protocols: Vec<String>,

    /// Seconds to wait for each reply.
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send text messages and print the replies
    Send { messages: Vec<String> },
    /// Send a ping and wait for the pong
    Ping {
        #[arg(default_value = "ping")]
        payload: String,
    },
}

type Channel = PipeChannel<TcpStream, WebSocketFilter>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let wait = Duration::from_secs(cli.timeout);

    let stream = TcpStream::connect(&cli.addr).await?;
    let channel: Channel = PipeChannel::new(
        stream,
        WebSocketFilter::client(WebSocketOptions::default()),
        ChannelOptions::default(),
    );
    let mut packages = channel.start()?;

    let key = generate_key(&mut rand::thread_rng());
    channel
        .send(client_request(&cli.addr, &cli.path, &key, &cli.protocols).as_bytes())
        .await?;

    let handshake = next(&mut packages, wait).await?;
    let header = handshake.header.ok_or("server did not answer the handshake")?;
    let protocol = verify_response(&header, &key, &cli.protocols)?;
    println!("connected to {}{} (protocol: {:?})", cli.addr, cli.path, protocol);

    let mut encoder = MaskedWebSocketEncoder::new();
    match cli.command {
        Commands::Send { messages } => {
            for message in messages {
                channel
                    .send_package(&mut encoder, &WebSocketPackage::text(message))
                    .await?;
                print_package(&next(&mut packages, wait).await?);
            }
        }
        Commands::Ping { payload } => {
            channel
                .send_package(&mut encoder, &WebSocketPackage::ping(payload.as_bytes()))
                .await?;
            print_package(&next(&mut packages, wait).await?);
        }
    }

    channel
        .send_package(&mut encoder, &WebSocketPackage::close(CloseCode::NORMAL, ""))
        .await?;
    if let Ok(package) = next(&mut packages, wait).await {
        print_package(&package);
    }
    channel.close(CloseReason::LocalClosing).await;
    Ok(())
}

async fn next(
    packages: &mut PackageReader<WebSocketPackage>,
    wait: Duration,
) -> Result<WebSocketPackage, Box<dyn std::error::Error>> {
    match tokio::time::timeout(wait, packages.next()).await {
        Ok(Some(package)) => Ok(package),
        Ok(None) => Err("connection closed".into()),
        Err(_) => Err("timed out waiting for the server".into()),
    }
}

fn print_package(package: &WebSocketPackage) {
    match package.op_code {
        OpCode::Text => println!("< {}", package.message.as_deref().unwrap_or_default()),
        OpCode::Close => match package.close_status() {
            Some((code, reason)) => println!("< close {code} {reason}"),
            None => println!("< close"),
        },
        op_code => println!("< {op_code} ({} bytes)", package.len()),
    }
}
