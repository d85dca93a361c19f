//! omnipcx-sim: stand-ins for the PBX and the hotel system.
//!
//! Run `omnipcx-sim pbx` where the proxy expects the PBX and
//! `omnipcx-sim hotel` against the proxy's hotel port to watch traffic flow
//! through it, CDRs included.

use std::error::Error;
use std::io;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use omnipcx_protocol::{ControlCode, Message, MessageKind, ProtocolMessage};
use omnipcx_proxy::detector::{Detection, Detector};
use omnipcx_proxy::link::{Link, TcpLink};

const SIM_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// omnipcx-sim - PBX and hotel simulators for omnipcx-proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept the proxy like a PBX: announce, send a CDR, acknowledge the hotel
    Pbx {
        #[arg(long, default_value_t = 5010)]
        port: u16,

        /// Listen on [::] instead of 0.0.0.0
        #[arg(long)]
        ipv6: bool,

        /// Pause between exchanges in seconds
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Connect to the proxy like the hotel system: acknowledge, check a guest in
    Hotel {
        #[arg(long, default_value = "localhost")]
        address: String,

        #[arg(long, default_value_t = 2561)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.mode {
        Mode::Pbx {
            port,
            ipv6,
            interval_secs,
        } => run_pbx(port, ipv6, Duration::from_secs(interval_secs)).await,
        Mode::Hotel { address, port } => run_hotel(address, port).await,
    }
}

/// Payload of `kind` built from `text`, space padded or truncated to fit.
fn fixed(kind: MessageKind, text: &[u8]) -> Result<ProtocolMessage, Box<dyn Error>> {
    let mut payload = text.to_vec();
    payload.resize(kind.payload_len(), b' ');
    Ok(ProtocolMessage::new(kind, payload)?)
}

async fn expect<L: Link>(link: &mut L, detector: &mut Detector) -> Result<Message, Box<dyn Error>> {
    match detector.detect(link).await? {
        Detection::Message(msg) => {
            info!("Message received {}", msg);
            Ok(msg)
        }
        Detection::Timeout => Err(Box::new(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("nothing from {}", link.name()),
        ))),
    }
}

async fn send<L: Link>(link: &mut L, msg: Message) -> Result<(), Box<dyn Error>> {
    link.send(&msg).await?;
    info!("Sent {}", msg);
    Ok(())
}

async fn run_pbx(port: u16, ipv6: bool, interval: Duration) -> Result<(), Box<dyn Error>> {
    let addr = if ipv6 { format!("[::]:{}", port) } else { format!("0.0.0.0:{}", port) };
    let listener = TcpListener::bind(&addr).await?;
    info!("Simulated PBX listening on {}", addr);

    let announce = fixed(MessageKind::TcpConnection, b"FFFF")?;
    let cdr = fixed(
        MessageKind::Smdr,
        b"24271640Z000000113112992359 9995912345678           0066989202161",
    )?;

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Proxy connected from {}", peer);
        let mut link = TcpLink::accepted("proxy", socket)
            .with_timeouts(SIM_READ_TIMEOUT, SIM_READ_TIMEOUT);

        if let Err(e) = pbx_exchanges(&mut link, &announce, &cdr, interval).await {
            info!("Proxy session over: {}", e);
        }
        link.close().await;
    }
}

async fn pbx_exchanges(
    link: &mut TcpLink,
    announce: &ProtocolMessage,
    cdr: &ProtocolMessage,
    interval: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut detector = Detector::new();
    loop {
        send(link, announce.clone().into()).await?;
        expect(link, &mut detector).await?;
        send(link, cdr.clone().into()).await?;
        expect(link, &mut detector).await?;
        expect(link, &mut detector).await?;
        send(link, ControlCode::Ack.into()).await?;
        tokio::time::sleep(interval).await;
    }
}

async fn run_hotel(address: String, port: u16) -> Result<(), Box<dyn Error>> {
    // Blank password: the proxy fills in its default.
    let mut check_in = fixed(
        MessageKind::CheckIn,
        b"24271640 VldPoenaru          1    1234039999999.11230 2",
    )?;
    check_in.set_password("")?;

    let mut link =
        TcpLink::client("proxy", address, port).with_timeouts(SIM_READ_TIMEOUT, SIM_READ_TIMEOUT);
    link.connect().await?;
    let mut detector = Detector::new();

    loop {
        expect(&mut link, &mut detector).await?;
        send(&mut link, ControlCode::Ack.into()).await?;
        expect(&mut link, &mut detector).await?;
        send(&mut link, ControlCode::Ack.into()).await?;
        send(&mut link, check_in.clone().into()).await?;
        expect(&mut link, &mut detector).await?;
    }
}
