mod client;

use clap::Parser;
use std::time::Duration;

/// Reference client for the rendezvous forwarding proxy.
#[derive(Parser, Debug)]
#[command(author = "SleepingPills", version, about)]
struct ClientArgs {
    /// Server address.
    #[arg(long)]
    addr: String,

    /// Server port.
    #[arg(long, default_value_t = 9595)]
    port: u16,

    /// Pairing secret. Omit to pair anonymously with the next unsecured client.
    #[arg(long)]
    secret: Option<String>,

    /// Seconds to wait for a counterpart before giving up.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn main() {
    let args = ClientArgs::parse();

    let stream = match client::connect(
        &args.addr,
        args.port,
        args.secret.as_deref(),
        Duration::from_secs(args.timeout),
    ) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    println!("paired. ready for input...");

    if let Err(e) = client::run_session(stream) {
        eprintln!("session error: {}", e);
        std::process::exit(1);
    }
}
