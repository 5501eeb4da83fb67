use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Command-line surface of the client.
///
/// The two transports share the address flags; the timeout and retry
/// flags only matter to the datagram transport, which is the one that has
/// to build its own delivery guarantees.
#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Config {
    /// transport protocol
    ///
    /// `tcp` speaks the text form of the protocol over a stream
    /// connection; `udp` speaks the binary form with per-message
    /// confirmation and retransmission.
    #[arg(short = 't', value_enum)]
    pub transport: Transport,

    /// server address
    ///
    /// IP address or hostname of the chat server. Resolution happens once
    /// at startup; the first resolved address is used.
    #[arg(short = 's')]
    pub server: String,

    /// server port
    ///
    /// The same default port serves both transports.
    #[arg(short = 'p', default_value_t = 4567)]
    pub port: u16,

    /// confirmation timeout in milliseconds
    ///
    /// How long the datagram transport waits for a CONFIRM before
    /// retransmitting a packet.
    #[arg(short = 'd', default_value_t = 250)]
    pub confirm_timeout: u64,

    /// maximum retransmissions
    ///
    /// How many times an unconfirmed packet is retransmitted before the
    /// session is declared undeliverable. The packet is sent at most
    /// `1 + retries` times in total.
    #[arg(short = 'r', default_value_t = 3)]
    pub max_retries: u8,
}

impl Config {
    /// Parses the process arguments; prints usage and exits nonzero when
    /// the required flags are missing or unparseable.
    pub fn load() -> Self {
        Self::parse()
    }
}
