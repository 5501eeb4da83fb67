//! ## Chat protocol wire codec
//!
//! The chat protocol has two interchangeable wire forms carrying the same
//! eight message kinds: a text form of single CRLF-terminated lines spoken
//! over a stream transport, and a binary form of self-contained datagrams
//! spoken over a datagram transport.
//!
//! This crate is the pure serialization layer. It owns the message model
//! and the two codecs ([`binary`] and [`text`]) and performs no I/O; the
//! transports decide where bytes come from and go to.

pub mod binary;
pub mod text;

use std::str::Utf8Error;

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The datagram is shorter than the three-byte header.
    TooShort,
    /// The type byte matches no known message kind.
    UnknownKind(u8),
    /// The kind carries no body, but bytes follow the header.
    TrailingBytes,
    /// A string body does not end in NUL.
    MissingTerminator,
    /// A NUL-terminated field contains no bytes.
    EmptyField,
    /// The body holds the wrong number of NUL-terminated fields.
    FieldCount,
    /// The REPLY result byte is neither 0 nor 1.
    BadResult(u8),
    /// The line matches no keyword prefix, or fails its shape.
    BadLine,
    /// The kind exists only in the binary form.
    NotTextual,
    Utf8(Utf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8(value)
    }
}

/// The type byte of the binary form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Kind {
    Confirm = 0x00,
    Reply = 0x01,
    Auth = 0x02,
    Join = 0x03,
    Msg = 0x04,
    Ping = 0xFD,
    Err = 0xFE,
    Bye = 0xFF,
}

/// One protocol message, independent of wire form and of the identifier
/// the datagram framing attaches to it.
///
/// `Confirm` and `Ping` exist only in the binary form; a CONFIRM's
/// reference identifier travels in the [`Datagram`] header. A REPLY keeps
/// its reference identifier here because it is distinct from the REPLY's
/// own identifier; the text form does not carry it and decodes it as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Confirm,
    Reply {
        ok: bool,
        ref_id: u16,
        content: String,
    },
    Auth {
        username: String,
        display_name: String,
        secret: String,
    },
    Join {
        channel_id: String,
        display_name: String,
    },
    Msg {
        display_name: String,
        content: String,
    },
    Ping,
    Err {
        display_name: String,
        content: String,
    },
    Bye {
        display_name: String,
    },
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Confirm => Kind::Confirm,
            Self::Reply { .. } => Kind::Reply,
            Self::Auth { .. } => Kind::Auth,
            Self::Join { .. } => Kind::Join,
            Self::Msg { .. } => Kind::Msg,
            Self::Ping => Kind::Ping,
            Self::Err { .. } => Kind::Err,
            Self::Bye { .. } => Kind::Bye,
        }
    }
}

/// A message together with the identifier the binary framing carries in
/// its header. For a CONFIRM the identifier is the reference identifier of
/// the packet being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub id: u16,
    pub message: Message,
}
