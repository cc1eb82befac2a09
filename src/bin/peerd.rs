use std::net::ToSocketAddrs;

use anyhow::Context;
use clap::Parser;

use rendezlink::client::Client;
use rendezlink::control::DEFAULT_CONTROL_PORT;

#[derive(Parser, Debug)]
#[command(about = "NAT-punching peer client for the rendezvous swarm")]
struct Cli {
    #[arg(long)]
    server_addr: String,

    #[arg(long)]
    server_port: u16,

    /// External-address hint used only until R's GetInfo reply teaches the
    /// client its real NAT binding.
    #[arg(long)]
    external_hint: String,

    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Directory the three agent-handoff files are written into.
    #[arg(long, default_value = "./handoff")]
    handoff_dir: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let server_addr = (args.server_addr.as_str(), args.server_port)
        .to_socket_addrs()
        .with_context(|| format!("resolving server address {}:{}", args.server_addr, args.server_port))?
        .next()
        .context("server address resolved to no addresses")?;

    let mut client = Client::bind(server_addr, args.external_hint, args.control_port, args.handoff_dir)
        .context("binding peer client sockets")?;

    client.bootstrap().context("GetInfo bootstrap against rendezvous server failed")?;
    log::info!("bootstrapped as {}", client.own_addr());

    client.run().context("peer client loop failed")?;
    Ok(())
}
