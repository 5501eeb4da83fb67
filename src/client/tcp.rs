//! Stream transport: the text form of the protocol over one TCP
//! connection, one CRLF-terminated line per message.

use std::io;

use anyhow::{Result, anyhow};
use codec::{Message, text};
use session::Session;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{render, resolve};
use crate::config::Config;

/// Carries partial lines across reads and yields complete lines with
/// their CRLF stripped.
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.windows(2).position(|window| window == b"\r\n")?;
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.drain(..end + 2);

        Some(line)
    }
}

enum Tick {
    Cancel,
    Line(Option<String>),
    Inbound,
}

pub async fn run(config: &Config) -> Result<()> {
    let server = resolve(&config.server, config.port).await?;
    let mut stream = TcpStream::connect(server).await?;
    log::info!("stream transport connected: server={server}");

    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inbound = LineBuffer::new();
    let mut chunk = [0u8; 4096];

    while !session.is_terminated() {
        let tick = tokio::select! {
            _ = tokio::signal::ctrl_c() => Tick::Cancel,
            line = lines.next_line() => Tick::Line(line?),
            ready = stream.readable() => {
                ready?;
                Tick::Inbound
            }
        };

        match tick {
            Tick::Cancel | Tick::Line(None) => {
                // goodbye is best effort once the user is gone
                for message in render(session.hangup()) {
                    if let Err(error) = transmit(&mut stream, &message).await {
                        log::warn!("farewell send failed: {error}");
                    }
                }
            }
            Tick::Line(Some(line)) => {
                for message in render(session.handle_line(&line)) {
                    transmit(&mut stream, &message).await?;
                }
            }
            Tick::Inbound => match stream.try_read(&mut chunk) {
                Ok(0) => {
                    log::warn!("server closed the connection");
                    return Err(anyhow!("connection closed by the server"));
                }
                Ok(len) => {
                    inbound.extend(&chunk[..len]);

                    while let Some(line) = inbound.next_line() {
                        if !dispatch_line(&mut stream, &mut session, &line).await? {
                            return Err(anyhow!("malformed inbound message"));
                        }
                        if session.is_terminated() {
                            break;
                        }
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => return Err(error.into()),
            },
        }
    }

    Ok(())
}

/// Decodes one server line and applies it; `Ok(false)` means the line
/// broke the protocol and the ERR+BYE farewell has been attempted.
async fn dispatch_line(
    stream: &mut TcpStream,
    session: &mut Session,
    line: &str,
) -> Result<bool> {
    log::trace!("stream transport receive: {line:?}");

    let message = match text::decode(line) {
        Ok(message) => message,
        Err(error) => {
            log::warn!("malformed line from the server: {error}");

            for message in render(session.protocol_error("Malformed message")) {
                if let Err(error) = transmit(stream, &message).await {
                    log::warn!("farewell send failed: {error}");
                    break;
                }
            }

            return Ok(false);
        }
    };

    for message in render(session.handle_message(message)) {
        transmit(stream, &message).await?;
    }

    Ok(true)
}

async fn transmit(stream: &mut TcpStream, message: &Message) -> Result<()> {
    let line = text::encode(message)?;
    log::trace!("stream transport send: {line:?}");

    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::LineBuffer;

    #[test]
    fn yields_lines_as_they_complete() {
        let mut buffer = LineBuffer::new();

        buffer.extend(b"REPLY OK IS Wel");
        assert_eq!(buffer.next_line(), None);

        buffer.extend(b"come\r\nMSG FROM Bob IS hi\r\n");
        assert_eq!(buffer.next_line().as_deref(), Some("REPLY OK IS Welcome"));
        assert_eq!(buffer.next_line().as_deref(), Some("MSG FROM Bob IS hi"));
        assert_eq!(buffer.next_line(), None);
    }

    #[test]
    fn crlf_may_split_across_reads() {
        let mut buffer = LineBuffer::new();

        buffer.extend(b"BYE FROM Bob\r");
        assert_eq!(buffer.next_line(), None);

        buffer.extend(b"\n");
        assert_eq!(buffer.next_line().as_deref(), Some("BYE FROM Bob"));
    }

    #[test]
    fn bare_newline_does_not_terminate() {
        let mut buffer = LineBuffer::new();

        buffer.extend(b"MSG FROM Bob IS a\nb\r\n");
        assert_eq!(buffer.next_line().as_deref(), Some("MSG FROM Bob IS a\nb"));
    }
}
