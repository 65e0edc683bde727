//! Tether demo CLI entry point

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tether_core::harness::{collect_until_idle, start_memory_client};
use tether_core::relay::RelaySelector;
use tether_core::{ClientConfig, HandshakeInfo};
use tether_crypto::identity::Identity;
use tether_transport::MemoryRelayNetwork;

#[derive(Parser)]
#[command(name = "tether-demo", version, about = "Pairing and secure channels over chat relays")]
struct Cli {
    /// Enable debug logging and client diagnostics
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ClientArgs {
    /// TOML config file; TETHER_* environment variables otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Secret seed the identity is derived from
    #[arg(long, env = "TETHER_SEED", hide_env_values = true)]
    seed: Option<String>,

    /// Number of parallel relay connections
    #[arg(long)]
    replication: Option<usize>,

    /// Relay server (repeat to replace the default list)
    #[arg(long = "relay")]
    relays: Vec<String>,
}

impl ClientArgs {
    fn resolve(&self, debug: bool) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_toml(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::from_env()?,
        };
        if let Some(seed) = &self.seed {
            config.seed = seed.clone();
        }
        if let Some(count) = self.replication {
            config.replication_count = count;
        }
        if !self.relays.is_empty() {
            config.relay_servers = self.relays.clone();
        }
        config.debug |= debug;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print identity, relay placement and the pairing payload
    Info {
        #[command(flatten)]
        client: ClientArgs,

        /// Also print the pairing payload as an SVG QR code
        #[arg(long)]
        qr: bool,
    },
    /// Pair two clients on an in-memory relay network and exchange a message
    Loopback {
        #[arg(long, default_value = "hello")]
        message: String,

        #[arg(long, default_value_t = 2)]
        replication: usize,
    },
    /// Log in to live relays and print incoming channels and messages
    Listen {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Open a channel to a peer on live relays and send a message
    Send {
        #[command(flatten)]
        client: ClientArgs,

        /// Pairing payload JSON of the peer ({"publicKey": ..., "relayServer": ...})
        #[arg(long)]
        peer: String,

        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Command::Info { client, qr } => run_info(client.resolve(cli.debug)?, qr),
        Command::Loopback {
            message,
            replication,
        } => run_loopback(&message, replication, cli.debug).await,
        Command::Listen { client } => live::run_listen(client.resolve(cli.debug)?).await,
        Command::Send {
            client,
            peer,
            message,
        } => live::run_send(client.resolve(cli.debug)?, &peer, &message).await,
    }
}

fn run_info(config: ClientConfig, qr: bool) -> anyhow::Result<()> {
    let identity = Identity::from_seed(&config.seed)?;
    let selector = RelaySelector::new(config.relay_servers.clone())?;

    println!("NAME={}", config.name);
    println!("PUBLIC_KEY={}", identity.public_key_hex());
    println!("IDENTIFIER={}", identity.identifier());
    for replica in 0..config.replication_count {
        let relay = selector.select(&identity.identifier(), replica)?;
        println!("RELAY_{replica}={relay}");
    }

    let info = HandshakeInfo {
        public_key: identity.public_key_hex(),
        relay_server: selector.select(&identity.identifier(), 0)?.to_string(),
    };
    println!("HANDSHAKE={}", info.to_json()?);

    if qr {
        print_qr(&info)?;
    }
    Ok(())
}

#[cfg(feature = "qr")]
fn print_qr(info: &HandshakeInfo) -> anyhow::Result<()> {
    println!("{}", info.to_qr_svg()?);
    Ok(())
}

#[cfg(not(feature = "qr"))]
fn print_qr(_info: &HandshakeInfo) -> anyhow::Result<()> {
    anyhow::bail!("built without the qr feature")
}

async fn run_loopback(message: &str, replication: usize, debug: bool) -> anyhow::Result<()> {
    let network = MemoryRelayNetwork::new();
    let relays: Vec<String> = ClientConfig::default().relay_servers;
    let idle = Duration::from_millis(200);

    let wallet = start_memory_client(
        &network,
        "wallet",
        "loopback wallet",
        replication,
        relays.clone(),
    )
    .await
    .context("starting wallet")?;
    let dapp = start_memory_client(&network, "dapp", "loopback dapp", replication, relays)
        .await
        .context("starting dapp")?;
    if debug {
        println!("wallet connections: {:?}", wallet.connections());
        println!("dapp connections: {:?}", dapp.connections());
    }

    let (open_tx, mut open_rx) = mpsc::unbounded_channel();
    wallet
        .listen_for_channel_opening(move |public_key| {
            let _ = open_tx.send(public_key);
        })
        .await?;

    let info = wallet.handshake_info()?;
    println!("wallet pairing payload: {}", info.to_json()?);
    dapp.open_channel(&info.public_key, &info.relay_server).await?;

    let opened = collect_until_idle(&mut open_rx, idle).await;
    let peer = opened.first().context("wallet saw no channel-open")?;
    println!("wallet: channel opened by {peer}");

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    wallet
        .listen_for_encrypted_message(peer, move |result| {
            let _ = msg_tx.send(result);
        })
        .await?;
    dapp.send_message(&info.public_key, message).await?;

    let received = collect_until_idle(&mut msg_rx, idle).await;
    anyhow::ensure!(!received.is_empty(), "wallet received nothing");
    for result in received {
        println!("wallet received: {}", result?);
    }
    println!("rooms on network: {}", network.room_count());
    Ok(())
}

#[cfg(feature = "matrix")]
mod live {
    use super::*;
    use std::sync::Arc;

    use tether_core::ChannelClient;
    use tether_transport::matrix::MatrixConnector;

    async fn start(config: ClientConfig) -> anyhow::Result<ChannelClient> {
        let connector = Arc::new(MatrixConnector::new()?);
        let mut client = ChannelClient::new(config, connector)?;
        client.start().await.context("logging in to relays")?;
        for (server, user_id) in client.connections() {
            println!("connected to {server} as {user_id}");
        }
        Ok(client)
    }

    pub async fn run_listen(config: ClientConfig) -> anyhow::Result<()> {
        let client = start(config).await?;
        println!("pairing payload: {}", client.handshake_info()?.to_json()?);

        let (open_tx, mut open_rx) = mpsc::unbounded_channel();
        client
            .listen_for_channel_opening(move |public_key| {
                let _ = open_tx.send(public_key);
            })
            .await?;

        loop {
            tokio::select! {
                Some(peer) = open_rx.recv() => {
                    println!("channel opened by {peer}");
                    let from = peer.clone();
                    client
                        .listen_for_encrypted_message(&peer, move |result| match result {
                            Ok(text) => println!("[{from}] {text}"),
                            Err(e) => eprintln!("[{from}] undecryptable message: {e}"),
                        })
                        .await?;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }

    pub async fn run_send(config: ClientConfig, peer: &str, message: &str) -> anyhow::Result<()> {
        let peer = HandshakeInfo::from_json(peer).context("parsing peer pairing payload")?;
        let client = start(config).await?;

        client.open_channel(&peer.public_key, &peer.relay_server).await?;
        client.send_message(&peer.public_key, message).await?;
        println!("sent to {}", peer.public_key);
        Ok(())
    }
}

#[cfg(not(feature = "matrix"))]
mod live {
    use super::*;

    pub async fn run_listen(_config: ClientConfig) -> anyhow::Result<()> {
        anyhow::bail!("built without the matrix feature")
    }

    pub async fn run_send(_config: ClientConfig, _peer: &str, _message: &str) -> anyhow::Result<()> {
        anyhow::bail!("built without the matrix feature")
    }
}
