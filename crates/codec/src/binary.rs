//! Binary form: `type:u8 || id:u16-be || body`, string fields UTF-8 with a
//! trailing NUL.

use bytes::{BufMut, BytesMut};

use crate::{Datagram, Error, Kind, Message};

/// Serializes one datagram into `buf`, replacing its previous content.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use chat_client_codec::{binary, Datagram, Message};
///
/// let mut buf = BytesMut::new();
/// binary::encode(
///     &Datagram {
///         id: 1,
///         message: Message::Bye {
///             display_name: "Alice".to_string(),
///         },
///     },
///     &mut buf,
/// );
///
/// assert_eq!(&buf[..], b"\xFF\x00\x01Alice\x00");
/// ```
pub fn encode(datagram: &Datagram, buf: &mut BytesMut) {
    buf.clear();
    buf.put_u8(datagram.message.kind().into());
    buf.put_u16(datagram.id);

    match &datagram.message {
        Message::Confirm | Message::Ping => {}
        Message::Reply {
            ok,
            ref_id,
            content,
        } => {
            buf.put_u8(*ok as u8);
            buf.put_u16(*ref_id);
            // empty content is the bare three-byte body, mirroring what
            // the decoder accepts
            if !content.is_empty() {
                put_field(buf, content);
            }
        }
        Message::Auth {
            username,
            display_name,
            secret,
        } => {
            put_field(buf, username);
            put_field(buf, display_name);
            put_field(buf, secret);
        }
        Message::Join {
            channel_id,
            display_name,
        } => {
            put_field(buf, channel_id);
            put_field(buf, display_name);
        }
        Message::Msg {
            display_name,
            content,
        }
        | Message::Err {
            display_name,
            content,
        } => {
            put_field(buf, display_name);
            put_field(buf, content);
        }
        Message::Bye { display_name } => put_field(buf, display_name),
    }
}

fn put_field(buf: &mut BytesMut, value: &str) {
    buf.put(value.as_bytes());
    buf.put_u8(0);
}

/// Parses and validates one received datagram.
///
/// Validation is strict: CONFIRM and PING must be exactly the header, a
/// REPLY needs its result byte (0 or 1) and reference identifier, and
/// every string-carrying kind must hold exactly its number of
/// NUL-terminated, non-empty fields with the final NUL as the last byte.
/// A REPLY body of exactly three bytes decodes as empty content.
///
/// # Test
///
/// ```
/// use chat_client_codec::{binary, Message};
///
/// let datagram = binary::decode(b"\x01\x00\x07\x01\x00\x00Welcome\x00").unwrap();
///
/// assert_eq!(datagram.id, 7);
/// assert_eq!(
///     datagram.message,
///     Message::Reply {
///         ok: true,
///         ref_id: 0,
///         content: "Welcome".to_string(),
///     },
/// );
/// ```
pub fn decode(bytes: &[u8]) -> Result<Datagram, Error> {
    if bytes.len() < 3 {
        return Err(Error::TooShort);
    }

    let kind = Kind::try_from(bytes[0]).map_err(|_| Error::UnknownKind(bytes[0]))?;
    let id = u16::from_be_bytes([bytes[1], bytes[2]]);
    let body = &bytes[3..];

    let message = match kind {
        Kind::Confirm => {
            if !body.is_empty() {
                return Err(Error::TrailingBytes);
            }

            Message::Confirm
        }
        Kind::Ping => {
            if !body.is_empty() {
                return Err(Error::TrailingBytes);
            }

            Message::Ping
        }
        Kind::Reply => {
            if body.len() < 3 {
                return Err(Error::TooShort);
            }

            let ok = match body[0] {
                0 => false,
                1 => true,
                result => return Err(Error::BadResult(result)),
            };

            let ref_id = u16::from_be_bytes([body[1], body[2]]);
            let content = if body.len() == 3 {
                String::new()
            } else {
                let [content] = fields::<1>(&body[3..])?;
                content
            };

            Message::Reply {
                ok,
                ref_id,
                content,
            }
        }
        Kind::Auth => {
            let [username, display_name, secret] = fields::<3>(body)?;

            Message::Auth {
                username,
                display_name,
                secret,
            }
        }
        Kind::Join => {
            let [channel_id, display_name] = fields::<2>(body)?;

            Message::Join {
                channel_id,
                display_name,
            }
        }
        Kind::Msg => {
            let [display_name, content] = fields::<2>(body)?;

            Message::Msg {
                display_name,
                content,
            }
        }
        Kind::Err => {
            let [display_name, content] = fields::<2>(body)?;

            Message::Err {
                display_name,
                content,
            }
        }
        Kind::Bye => {
            let [display_name] = fields::<1>(body)?;

            Message::Bye { display_name }
        }
    };

    Ok(Datagram { id, message })
}

/// Splits `body` into exactly `N` NUL-terminated, non-empty UTF-8 fields
/// covering the whole slice.
fn fields<const N: usize>(body: &[u8]) -> Result<[String; N], Error> {
    if body.last() != Some(&0) {
        return Err(Error::MissingTerminator);
    }

    let mut parts = body[..body.len() - 1].split(|byte| *byte == 0);
    let mut out = [(); N].map(|()| String::new());

    for slot in &mut out {
        let part = parts.next().ok_or(Error::FieldCount)?;
        if part.is_empty() {
            return Err(Error::EmptyField);
        }

        *slot = std::str::from_utf8(part)?.to_owned();
    }

    if parts.next().is_some() {
        return Err(Error::FieldCount);
    }

    Ok(out)
}
