use std::{
    error::Error,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use log::info;
use tether::{
    ControlServer, DatabaseConfig, ServerConfig, SqliteEngine, config::DEFAULT_CONTROL_PORT,
    protocol::DEFAULT_MAX_FRAME_SIZE,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Database file; an in-memory database is used when omitted
    #[arg(long)]
    database: Option<PathBuf>,
    /// Listen for control connections at address
    #[arg(long, default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_CONTROL_PORT))]
    address: SocketAddr,
    /// Interface session listeners bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    session_host: IpAddr,
    /// Largest accepted message, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    max_frame_size: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let engine = SqliteEngine::open(&DatabaseConfig {
        path: cli.database,
        ..DatabaseConfig::default()
    })?;
    let server = ControlServer::bind(
        ServerConfig {
            control_addr: cli.address,
            session_host: cli.session_host,
            max_frame_size: cli.max_frame_size,
        },
        engine,
    )?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        shutdown.shutdown();
    })?;

    server.serve()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_validated() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["tether_server"]).unwrap();
        assert_eq!(cli.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(cli.database.is_none());

        assert!(Cli::try_parse_from(["tether_server", "--max-frame-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["tether_server", "--workers", "0"]).is_err());
    }
}
