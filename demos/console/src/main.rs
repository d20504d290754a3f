//! meshchat console
//!
//! Joins the simulated channel as one node and chats over the mesh.
//!
//! ## Usage
//!
//! ```bash
//! meshchat --server 127.0.0.1:8954 --frequency 1000 --token secret
//! ```
//!
//! Commands (case-insensitive):
//!
//! - `RANGE`: reachable nodes
//! - `WHISPER <addr> <text>`: message one reachable node
//! - `BROAD <text>`: message every known node
//! - `TOP`: known nodes and their route cost
//! - `HELP`, `QUIT`

use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use meshchat::link::ChannelSocket;
use meshchat::{Address, BROADCAST_ADDRESS, Node, NodeConfigBuilder, NodeEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// meshchat - text chat over an ad-hoc mesh
#[derive(Parser)]
#[command(name = "meshchat")]
#[command(about = "Chat over a simulated shared broadcast channel")]
#[command(version)]
struct Cli {
    /// Channel server address
    #[arg(short, long, default_value = "127.0.0.1:8954")]
    server: SocketAddr,

    /// Channel frequency
    #[arg(short, long)]
    frequency: u32,

    /// Access token
    #[arg(short, long)]
    token: String,

    /// Fixed node address (random when omitted)
    #[arg(short, long)]
    address: Option<Address>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Range,
    Whisper(Address, String),
    Broad(String),
    Top,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match word.to_ascii_uppercase().as_str() {
            "RANGE" => Ok(Self::Range),
            "TOP" => Ok(Self::Top),
            "HELP" => Ok(Self::Help),
            "QUIT" => Ok(Self::Quit),
            "BROAD" if !rest.is_empty() => Ok(Self::Broad(rest.to_string())),
            "WHISPER" => {
                let (addr, text) = rest
                    .split_once(' ')
                    .context("usage: WHISPER <addr> <text>")?;
                let addr: Address = addr.parse().context("address must be a number")?;
                let text = text.trim();
                if text.is_empty() {
                    bail!("usage: WHISPER <addr> <text>");
                }
                Ok(Self::Whisper(addr, text.to_string()))
            }
            "BROAD" => bail!("usage: BROAD <text>"),
            other => bail!("unknown command '{other}', try HELP"),
        }
    }
}

const HELP: &str = "\
RANGE                  list reachable nodes
WHISPER <addr> <text>  send to one reachable node
BROAD <text>           send to every known node
TOP                    list known nodes and route costs
HELP                   show this text
QUIT                   leave";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshchat=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut builder = NodeConfigBuilder::new();
    if let Some(address) = cli.address {
        builder = builder.address(address);
    }
    let config = builder.build()?;

    let (_socket, link) = ChannelSocket::connect(cli.server, cli.frequency, &cli.token)
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;
    let (mut node, mut events) = Node::start(config, link)?;
    println!("Joined as node {}. Type HELP for commands.", node.local_address());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run(&node, command),
                    Err(e) => println!("{e}"),
                }
            }
            event = events.recv() => match event {
                Some(NodeEvent::MessageReceived { source, text }) => {
                    println!("Message from {source}: {text}");
                }
                Some(NodeEvent::AddressChanged { old, new }) => {
                    println!("Address {old} was taken, now node {new}");
                }
                Some(NodeEvent::LinkReady) => tracing::info!("channel ready"),
                Some(NodeEvent::LinkClosed { reason }) => {
                    println!("Channel closed: {reason}");
                    break;
                }
                None => break,
            },
        }
    }

    node.shutdown();
    Ok(())
}

fn run(node: &Node, command: Command) {
    match command {
        Command::Range => {
            let nodes = node.reachable_nodes();
            if nodes.is_empty() {
                println!("No reachable nodes");
            } else {
                println!("Reachable: {}", join(&nodes));
            }
        }
        Command::Whisper(addr, text) => {
            if !node.reachable_nodes().contains(&addr) {
                println!("Node {addr} is not reachable");
                return;
            }
            if let Err(e) = node.send_message(&text, addr) {
                println!("Send failed: {e}");
            }
        }
        Command::Broad(text) => match node.send_message(&text, BROADCAST_ADDRESS) {
            Ok(ids) if ids.is_empty() => println!("No known nodes"),
            Ok(_) => {}
            Err(e) => println!("Send failed: {e}"),
        },
        Command::Top => {
            println!("Local address: {}", node.local_address());
            for addr in node.known_nodes() {
                match node.route(addr) {
                    Some(route) => println!("{addr}: cost {} via {}", route.cost, route.next_hop),
                    None => println!("{addr}: unknown"),
                }
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn join(nodes: &[Address]) -> String {
    nodes
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("range").unwrap(), Command::Range);
        assert_eq!(Command::parse("  Top ").unwrap(), Command::Top);
        assert_eq!(
            Command::parse("WHISPER 4 hello there").unwrap(),
            Command::Whisper(4, "hello there".into())
        );
        assert_eq!(
            Command::parse("broad hi all").unwrap(),
            Command::Broad("hi all".into())
        );
        assert_eq!(Command::parse("quit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("WHISPER x hi").is_err());
        assert!(Command::parse("WHISPER 4").is_err());
        assert!(Command::parse("BROAD").is_err());
        assert!(Command::parse("dance").is_err());
    }
}
