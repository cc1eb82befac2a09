use anyhow::Context;
use clap::Parser;

use rendezlink::server::Server;

#[derive(Parser, Debug)]
#[command(about = "rendezvous server for NAT-punching peer clients")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 9000)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let mut server = Server::bind(&args.host, args.port)
        .with_context(|| format!("binding rendezvous server to {}:{}", args.host, args.port))?;

    server.run().context("rendezvous server loop failed")?;
    Ok(())
}
