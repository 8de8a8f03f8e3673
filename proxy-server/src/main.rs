use clap::Parser;
use proxy_core::logging::build_logger;
use proxy_core::Server;
use sloggers::types::Severity;
use std::io::BufRead;

/// Rendezvous forwarding proxy.
#[derive(Parser, Debug)]
#[command(author = "SleepingPills", version, about)]
struct ServerArgs {
    /// Port to listen on.
    #[arg(long, default_value_t = 9595)]
    port: u16,

    /// Log verbosity: critical, error, warning, info, debug or trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_severity(level: &str) -> Severity {
    match level.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" | "warn" => Severity::Warning,
        "debug" => Severity::Debug,
        "trace" => Severity::Trace,
        _ => Severity::Info,
    }
}

fn main() {
    let args = ServerArgs::parse();
    let log = build_logger(parse_severity(&args.log_level));

    let mut server = match Server::start(args.port, log.clone()) {
        Ok(server) => server,
        Err(e) => {
            slog::crit!(log, "failed to start"; "error" => %e);
            std::process::exit(1);
        }
    };

    slog::info!(log, "listening"; "addr" => %server.local_addr());
    println!("listening on {}; type 'q' and press enter to stop", server.local_addr());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "q" => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    server.stop();
}
