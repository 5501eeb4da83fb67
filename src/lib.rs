pub mod client;
pub mod config;

use config::{Config, Transport};

/// Runs one client session over the configured transport.
///
/// Opened as a library entry point so integration tests can drive the
/// client without going through the binary.
pub async fn client_main(config: Config) -> anyhow::Result<()> {
    match config.transport {
        Transport::Tcp => client::tcp::run(&config).await,
        Transport::Udp => client::udp::run(&config).await,
    }
}
