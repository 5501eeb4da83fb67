pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use codec::Message;
use session::Effect;

/// Renders the session effects that need no transport work and returns
/// the messages that must go out on the wire, in order.
///
/// Protocol-mandated lines go to stdout; local diagnostics go to stderr
/// so piped output stays clean.
pub(crate) fn render(effects: Vec<Effect>) -> Vec<Message> {
    let mut outbound = Vec::new();

    for effect in effects {
        match effect {
            Effect::Print(line) => println!("{line}"),
            Effect::Notice(line) => eprintln!("{line}"),
            Effect::Send(message) => outbound.push(message),
        }
    }

    outbound
}

/// Resolves the server name once; the first address wins.
pub(crate) async fn resolve(server: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((server, port))
        .await?
        .next()
        .ok_or_else(|| anyhow!("no address found for {server}:{port}"))
}
