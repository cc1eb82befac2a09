use std::fs;
use std::net::UdpSocket;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rendezlink::control::{DEFAULT_CONTROL_PORT, LocalCommand};
use rendezlink::envelope;

#[derive(Parser, Debug)]
#[command(about = "sends local control commands to a running peerd")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the client to punch a hole toward another peer's address.
    TalkTo {
        addr: String,
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// End the current session with every peer.
    EndSession {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Tell the client to leave its session and terminate.
    Exit {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Encode a .torrent file into an envelope and hand it to the client
    /// for distribution to the current session.
    SubmitTorrent {
        path: String,
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let (wire, control_port) = match args.command {
        Command::TalkTo { addr, control_port } => (LocalCommand::TalkTo(addr).to_wire(), control_port),
        Command::EndSession { control_port } => (LocalCommand::EndSession.to_wire(), control_port),
        Command::Exit { control_port } => (LocalCommand::ExitScript.to_wire(), control_port),
        Command::SubmitTorrent { path, control_port } => {
            let original = fs::read(&path).with_context(|| format!("reading torrent file {path}"))?;
            let envelope = envelope::encode(&original)
                .with_context(|| format!("encoding torrent envelope for {path}"))?
                .into_string()
                .context("envelope bytes were not valid UTF-8")?;
            (LocalCommand::SendTorrent(envelope).to_wire(), control_port)
        }
    };

    let socket = UdpSocket::bind("127.0.0.1:0").context("binding local sender socket")?;
    socket
        .send_to(wire.as_bytes(), ("127.0.0.1", control_port))
        .with_context(|| format!("sending command to local control port {control_port}"))?;

    Ok(())
}
