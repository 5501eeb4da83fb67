//! Text form: one line per message, fixed keyword prefixes, CRLF supplied
//! by the transport.

use crate::{Error, Message};

/// Renders one message as a line, without the trailing CRLF.
///
/// CONFIRM and PING have no text form and yield [`Error::NotTextual`]; the
/// stream transport has no use for them.
///
/// # Test
///
/// ```
/// use chat_client_codec::{text, Message};
///
/// let line = text::encode(&Message::Auth {
///     username: "alice".to_string(),
///     display_name: "Alice".to_string(),
///     secret: "secret".to_string(),
/// })
/// .unwrap();
///
/// assert_eq!(line, "AUTH alice AS Alice USING secret");
/// ```
pub fn encode(message: &Message) -> Result<String, Error> {
    Ok(match message {
        Message::Auth {
            username,
            display_name,
            secret,
        } => format!("AUTH {username} AS {display_name} USING {secret}"),
        Message::Join {
            channel_id,
            display_name,
        } => format!("JOIN {channel_id} AS {display_name}"),
        Message::Msg {
            display_name,
            content,
        } => format!("MSG FROM {display_name} IS {content}"),
        Message::Err {
            display_name,
            content,
        } => format!("ERR FROM {display_name} IS {content}"),
        Message::Reply { ok, content, .. } => {
            format!("REPLY {} IS {content}", if *ok { "OK" } else { "NOK" })
        }
        Message::Bye { display_name } => format!("BYE FROM {display_name}"),
        Message::Confirm | Message::Ping => return Err(Error::NotTextual),
    })
}

/// Parses one line (without its CRLF) into a message.
///
/// Prefixes are matched in grammar order: AUTH, JOIN, MSG, ERR, REPLY,
/// BYE. A line matching no prefix, or matching one but failing the rest of
/// its shape, is a protocol error. The text form carries no identifiers, so
/// a decoded REPLY has a reference identifier of 0.
///
/// # Test
///
/// ```
/// use chat_client_codec::{text, Message};
///
/// let message = text::decode("REPLY OK IS Welcome").unwrap();
///
/// assert_eq!(
///     message,
///     Message::Reply {
///         ok: true,
///         ref_id: 0,
///         content: "Welcome".to_string(),
///     },
/// );
/// ```
pub fn decode(line: &str) -> Result<Message, Error> {
    if let Some(rest) = line.strip_prefix("AUTH ") {
        let (username, rest) = split_field(rest, " AS ")?;
        let (display_name, secret) = split_field(rest, " USING ")?;
        if secret.is_empty() {
            return Err(Error::BadLine);
        }

        Ok(Message::Auth {
            username,
            display_name,
            secret: secret.to_string(),
        })
    } else if let Some(rest) = line.strip_prefix("JOIN ") {
        let (channel_id, display_name) = split_field(rest, " AS ")?;
        if display_name.is_empty() {
            return Err(Error::BadLine);
        }

        Ok(Message::Join {
            channel_id,
            display_name: display_name.to_string(),
        })
    } else if let Some(rest) = line.strip_prefix("MSG FROM ") {
        let (display_name, content) = split_field(rest, " IS ")?;

        Ok(Message::Msg {
            display_name,
            content: content.to_string(),
        })
    } else if let Some(rest) = line.strip_prefix("ERR FROM ") {
        let (display_name, content) = split_field(rest, " IS ")?;

        Ok(Message::Err {
            display_name,
            content: content.to_string(),
        })
    } else if let Some(rest) = line.strip_prefix("REPLY ") {
        let (ok, content) = if let Some(content) = rest.strip_prefix("OK IS ") {
            (true, content)
        } else if let Some(content) = rest.strip_prefix("NOK IS ") {
            (false, content)
        } else {
            return Err(Error::BadLine);
        };

        Ok(Message::Reply {
            ok,
            ref_id: 0,
            content: content.to_string(),
        })
    } else if let Some(display_name) = line.strip_prefix("BYE FROM ") {
        if display_name.is_empty() {
            return Err(Error::BadLine);
        }

        Ok(Message::Bye {
            display_name: display_name.to_string(),
        })
    } else {
        Err(Error::BadLine)
    }
}

/// Splits at the first occurrence of `marker`, requiring a non-empty field
/// before it.
fn split_field<'a>(rest: &'a str, marker: &str) -> Result<(String, &'a str), Error> {
    let (field, tail) = rest.split_once(marker).ok_or(Error::BadLine)?;
    if field.is_empty() {
        return Err(Error::BadLine);
    }

    Ok((field.to_string(), tail))
}
