//! Datagram transport: the binary form of the protocol over UDP, made
//! reliable by per-message identifiers, CONFIRM packets, bounded
//! retransmission, and duplicate suppression.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::BytesMut;
use codec::{Datagram, Message, binary};
use session::{DuplicateFilter, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use super::{render, resolve};
use crate::config::Config;

/// How long the server may take to produce a REPLY once the request is
/// confirmed. Deliberately much larger than the confirm timeout: a REPLY
/// involves the server acting on the request, not just receiving it.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest safe UDP payload.
const MAX_DATAGRAM: usize = 65_507;

/// Errors surfaced by the reliability layer.
#[derive(Debug)]
pub enum LinkError {
    Io(io::Error),
    /// No CONFIRM after the bounded number of transmissions.
    Unconfirmed { attempts: u32 },
    /// The request was confirmed but no REPLY arrived in time.
    NoReply,
    /// The peer sent a packet that fails validation. The header
    /// identifier is kept when the three-byte header itself was readable,
    /// so the packet can still be confirmed.
    Malformed { id: Option<u16> },
    /// The peer answered the outstanding request with an ERR.
    Peer {
        display_name: String,
        content: String,
    },
}

impl std::error::Error for LinkError {}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for LinkError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// One reliable datagram link to the server.
///
/// Owns the socket, the identifier counter, the duplicate filter, and the
/// authoritative peer address. The address starts at the bootstrap
/// address given to [`Link::connect`] and is replaced exactly once, by
/// the source address of the first accepted REPLY; the server answers
/// AUTH from a per-session worker port and everything after that must go
/// there.
pub struct Link {
    socket: UdpSocket,
    peer: SocketAddr,
    rebound: bool,
    next_id: u16,
    seen: DuplicateFilter,
    /// Inbound messages accepted (confirmed and recorded) while a send
    /// operation was waiting; delivered by the event loop afterwards.
    pending: VecDeque<(Message, SocketAddr)>,
    confirm_timeout: Duration,
    max_retries: u8,
    recv_buf: Vec<u8>,
    send_buf: BytesMut,
}

impl Link {
    pub async fn connect(
        peer: SocketAddr,
        confirm_timeout: Duration,
        max_retries: u8,
    ) -> io::Result<Self> {
        let bind = SocketAddr::new(
            match peer {
                SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            },
            0,
        );

        Ok(Self {
            socket: UdpSocket::bind(bind).await?,
            peer,
            rebound: false,
            next_id: 0,
            seen: DuplicateFilter::default(),
            pending: VecDeque::new(),
            confirm_timeout,
            max_retries,
            recv_buf: vec![0u8; MAX_DATAGRAM],
            send_buf: BytesMut::with_capacity(1500),
        })
    }

    /// The authoritative peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn allocate_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        id
    }

    async fn transmit(&mut self, datagram: &Datagram) -> io::Result<()> {
        binary::encode(datagram, &mut self.send_buf);
        log::trace!(
            "datagram send: kind={:?}, id={}, addr={}",
            datagram.message.kind(),
            datagram.id,
            self.peer,
        );

        self.socket.send_to(&self.send_buf, self.peer).await?;
        Ok(())
    }

    /// Acknowledges the packet carrying `ref_id`. CONFIRMs are never
    /// retransmitted and never expect one back.
    pub async fn send_confirm(&mut self, ref_id: u16) -> io::Result<()> {
        self.transmit(&Datagram {
            id: ref_id,
            message: Message::Confirm,
        })
        .await
    }

    /// One transmission with a fresh identifier and no confirm wait; the
    /// shutdown paths use this to keep farewells bounded.
    pub async fn send_once(&mut self, message: Message) -> io::Result<()> {
        let id = self.allocate_id();
        self.transmit(&Datagram { id, message }).await
    }

    /// Sends `message` and waits for its CONFIRM, retransmitting with the
    /// same identifier on every confirm-timeout expiry. Returns the
    /// identifier used. After `1 + max_retries` unconfirmed
    /// transmissions the link is considered undeliverable.
    ///
    /// Packets that arrive while waiting are handled in line: a stale
    /// CONFIRM is dropped, an ERR answering this identifier fails the
    /// operation, and everything else is confirmed, duplicate-filtered,
    /// and queued for delivery after the operation.
    pub async fn send_with_confirm(&mut self, message: Message) -> Result<u16, LinkError> {
        let id = self.allocate_id();
        let datagram = Datagram { id, message };

        for attempt in 0..=u32::from(self.max_retries) {
            if attempt > 0 {
                log::trace!("datagram retransmit: id={id}, attempt={attempt}");
            }
            self.transmit(&datagram).await?;

            let deadline = Instant::now() + self.confirm_timeout;
            loop {
                let received = match timeout_at(deadline, self.socket.recv_from(&mut self.recv_buf)).await {
                    Err(_) => break,
                    Ok(received) => received?,
                };

                match self.decode(received)? {
                    (
                        Datagram {
                            id: inbound_id,
                            message: Message::Confirm,
                        },
                        _,
                    ) => {
                        if inbound_id == id {
                            return Ok(id);
                        }
                        // a confirm for an attempt count we already gave
                        // up on, or for a packet we no longer track
                        log::trace!("stale confirm ignored: id={inbound_id}");
                    }
                    (
                        Datagram {
                            id: inbound_id,
                            message: Message::Err {
                                display_name,
                                content,
                            },
                        },
                        _,
                    ) if inbound_id == id => {
                        return Err(LinkError::Peer {
                            display_name,
                            content,
                        });
                    }
                    (datagram, source) => self.register(datagram, source).await?,
                }
            }
        }

        Err(LinkError::Unconfirmed {
            attempts: u32::from(self.max_retries) + 1,
        })
    }

    /// Sends a request that expects a REPLY: send-with-confirm first,
    /// then a bounded wait for a REPLY whose reference identifier matches
    /// the request.
    ///
    /// On acceptance the authoritative address is rebound to the REPLY's
    /// source if this is the first REPLY of the session, the REPLY itself
    /// is confirmed, and it is returned to the caller. Anything else that
    /// arrives meanwhile is confirmed, duplicate-filtered, and queued.
    pub async fn send_with_reply(&mut self, message: Message) -> Result<Message, LinkError> {
        let id = self.send_with_confirm(message).await?;

        // the REPLY may have overtaken its CONFIRM and already be queued
        if let Some((reply, source)) = self.take_pending_reply(id) {
            self.rebind(source);
            return Ok(reply);
        }

        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let received = match timeout_at(deadline, self.socket.recv_from(&mut self.recv_buf)).await {
                Err(_) => return Err(LinkError::NoReply),
                Ok(received) => received?,
            };

            match self.decode(received)? {
                (
                    Datagram {
                        message: Message::Confirm,
                        ..
                    },
                    _,
                ) => {}
                (
                    Datagram {
                        id: inbound_id,
                        message: Message::Err {
                            display_name,
                            content,
                        },
                    },
                    _,
                ) if inbound_id == id => {
                    self.send_confirm(inbound_id).await?;
                    return Err(LinkError::Peer {
                        display_name,
                        content,
                    });
                }
                (
                    Datagram {
                        id: reply_id,
                        message: reply @ Message::Reply { .. },
                    },
                    source,
                ) if reply_references(&reply, id) && !self.seen.contains(reply_id) => {
                    // rebind before confirming so the acknowledgment
                    // already goes to the worker address
                    self.rebind(source);
                    self.send_confirm(reply_id).await?;
                    self.seen.insert(reply_id);

                    return Ok(reply);
                }
                (datagram, source) => self.register(datagram, source).await?,
            }
        }
    }

    /// Waits until the socket has a datagram to read.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    /// Reads one datagram without blocking and runs it through the
    /// acceptance path. Returns the next deliverable message, if this
    /// datagram produced one.
    pub async fn try_recv(&mut self) -> Result<Option<Message>, LinkError> {
        let received = match self.socket.try_recv_from(&mut self.recv_buf) {
            Ok(received) => received,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        match self.decode(received)? {
            (
                Datagram {
                    message: Message::Confirm,
                    id,
                },
                _,
            ) => {
                // no send is outstanding here, so this confirm is late
                log::trace!("stale confirm ignored: id={id}");
                Ok(None)
            }
            (datagram, source) => {
                self.register(datagram, source).await?;
                Ok(self.take_pending())
            }
        }
    }

    /// Removes the next queued inbound message.
    pub fn take_pending(&mut self) -> Option<Message> {
        self.pending.pop_front().map(|(message, _)| message)
    }

    fn decode(&self, received: (usize, SocketAddr)) -> Result<(Datagram, SocketAddr), LinkError> {
        let (len, source) = received;
        log::trace!("datagram receive: size={len}, addr={source}");

        match binary::decode(&self.recv_buf[..len]) {
            Ok(datagram) => Ok((datagram, source)),
            Err(error) => {
                log::warn!("malformed datagram from {source}: {error}");
                Err(LinkError::Malformed {
                    id: (len >= 3)
                        .then(|| u16::from_be_bytes([self.recv_buf[1], self.recv_buf[2]])),
                })
            }
        }
    }

    /// Acknowledges a freshly decoded non-CONFIRM datagram and queues it
    /// for delivery unless its identifier was already seen. The CONFIRM
    /// goes out before the message can have any visible effect, so the
    /// peer never retransmits something we have already acted on.
    async fn register(&mut self, datagram: Datagram, source: SocketAddr) -> Result<(), LinkError> {
        self.send_confirm(datagram.id).await?;

        if self.seen.contains(datagram.id) {
            log::trace!("duplicate suppressed: id={}", datagram.id);
            return Ok(());
        }
        self.seen.insert(datagram.id);

        match datagram.message {
            // aliveness probe: the confirm above is the whole answer
            Message::Ping => {}
            message => self.pending.push_back((message, source)),
        }

        Ok(())
    }

    fn rebind(&mut self, source: SocketAddr) {
        if !self.rebound {
            log::info!("authoritative address rebound: {} -> {source}", self.peer);
            self.peer = source;
            self.rebound = true;
        }
    }

    fn take_pending_reply(&mut self, ref_id: u16) -> Option<(Message, SocketAddr)> {
        let index = self
            .pending
            .iter()
            .position(|(message, _)| reply_references(message, ref_id))?;

        self.pending.remove(index)
    }
}

fn reply_references(message: &Message, id: u16) -> bool {
    matches!(message, Message::Reply { ref_id, .. } if *ref_id == id)
}

enum Tick {
    Cancel,
    Line(Option<String>),
    Inbound,
}

pub async fn run(config: &Config) -> Result<()> {
    let server = resolve(&config.server, config.port).await?;
    let mut link = Link::connect(
        server,
        Duration::from_millis(config.confirm_timeout),
        config.max_retries,
    )
    .await?;
    log::info!(
        "datagram transport ready: server={server}, local={}",
        link.local_addr()?,
    );

    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while !session.is_terminated() {
        // stray messages accepted during a send operation come first, in
        // arrival order
        while let Some(message) = link.take_pending() {
            let effects = session.handle_message(message);
            dispatch(&mut link, &mut session, render(effects)).await?;
            if session.is_terminated() {
                return Ok(());
            }
        }

        let tick = tokio::select! {
            _ = tokio::signal::ctrl_c() => Tick::Cancel,
            line = lines.next_line() => Tick::Line(line?),
            ready = link.readable() => {
                ready?;
                Tick::Inbound
            }
        };

        match tick {
            Tick::Cancel | Tick::Line(None) => farewell(&mut link, &mut session).await,
            Tick::Line(Some(line)) => {
                let effects = session.handle_line(&line);
                dispatch(&mut link, &mut session, render(effects)).await?;
            }
            Tick::Inbound => match link.try_recv().await {
                Ok(Some(message)) => {
                    let effects = session.handle_message(message);
                    dispatch(&mut link, &mut session, render(effects)).await?;
                }
                Ok(None) => {}
                Err(LinkError::Malformed { id }) => {
                    if let Some(id) = id {
                        link.send_confirm(id).await?;
                    }
                    return fail(
                        &mut link,
                        &mut session,
                        "Malformed packet",
                        ErrDelivery::Confirmed,
                    )
                    .await;
                }
                Err(error) => return Err(error.into()),
            },
        }
    }

    Ok(())
}

/// Pushes session output onto the link with the delivery semantics each
/// kind calls for: AUTH and JOIN expect a REPLY, everything else only a
/// CONFIRM.
async fn dispatch(link: &mut Link, session: &mut Session, outbound: Vec<Message>) -> Result<()> {
    for message in outbound {
        let expects_reply = matches!(message, Message::Auth { .. } | Message::Join { .. });

        if expects_reply {
            match link.send_with_reply(message).await {
                Ok(reply) => {
                    let keep = render(session.handle_message(reply));
                    debug_assert!(keep.is_empty());
                }
                Err(error) => return failed_send(link, session, error).await,
            }
        } else {
            match link.send_with_confirm(message).await {
                Ok(_) => {}
                Err(error) => return failed_send(link, session, error).await,
            }
        }
    }

    Ok(())
}

/// How hard the terminal ERR is pushed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ErrDelivery {
    /// The link still works (the peer broke the protocol): the ERR goes
    /// out with full confirm semantics.
    Confirmed,
    /// The link just failed to deliver: one best-effort send, no
    /// retransmit escalation.
    BestEffort,
}

/// Routes a failed send to its terminal path.
async fn failed_send(link: &mut Link, session: &mut Session, error: LinkError) -> Result<()> {
    match error {
        LinkError::Peer {
            display_name,
            content,
        } => {
            // the server answered with ERR: report and stop, no farewell
            let keep = render(session.handle_message(Message::Err {
                display_name,
                content,
            }));
            debug_assert!(keep.is_empty());

            Ok(())
        }
        LinkError::Unconfirmed { attempts } => {
            fail(
                link,
                session,
                &format!("CONFIRM not received after {attempts} attempts"),
                ErrDelivery::BestEffort,
            )
            .await
        }
        LinkError::NoReply => {
            fail(link, session, "No REPLY received", ErrDelivery::BestEffort).await
        }
        LinkError::Malformed { id } => {
            if let Some(id) = id {
                link.send_confirm(id).await?;
            }
            fail(link, session, "Malformed packet", ErrDelivery::Confirmed).await
        }
        LinkError::Io(error) => Err(error.into()),
    }
}

/// Terminal ERR+BYE attempt. The BYE is always a single transmission so
/// shutdown stays bounded; the ERR only leans on retransmission when the
/// link has not just been shown to be lossy beyond recovery.
async fn fail(
    link: &mut Link,
    session: &mut Session,
    reason: &str,
    delivery: ErrDelivery,
) -> Result<()> {
    for message in render(session.protocol_error(reason)) {
        let sent = match message {
            err @ Message::Err { .. } if delivery == ErrDelivery::Confirmed => {
                link.send_with_confirm(err).await.map(|_| ())
            }
            message => link.send_once(message).await.map_err(LinkError::Io),
        };

        if let Err(error) = sent {
            log::warn!("terminal handshake incomplete: {error}");
            break;
        }
    }

    Err(anyhow!("session failed: {reason}"))
}

/// Cancellation or input EOF: one best-effort BYE, no escalation.
async fn farewell(link: &mut Link, session: &mut Session) {
    for message in render(session.hangup()) {
        if let Err(error) = link.send_once(message).await {
            log::warn!("farewell send failed: {error}");
        }
    }
}
