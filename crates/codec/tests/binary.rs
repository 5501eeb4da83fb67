use anyhow::Result;
use bytes::BytesMut;
use chat_client_codec::{Datagram, Error, Message, binary};

fn encoded(datagram: &Datagram) -> BytesMut {
    let mut buf = BytesMut::new();
    binary::encode(datagram, &mut buf);
    buf
}

#[test]
fn test_binary_samples() -> Result<()> {
    {
        let datagram = binary::decode(b"\x02\x00\x00alice\x00Alice\x00secret\x00")?;

        assert_eq!(datagram.id, 0);
        assert_eq!(
            datagram.message,
            Message::Auth {
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
                secret: "secret".to_string(),
            },
        );
    }

    {
        let datagram = binary::decode(b"\x00\x00\x2A")?;

        assert_eq!(datagram.id, 42);
        assert_eq!(datagram.message, Message::Confirm);
    }

    {
        let datagram = binary::decode(b"\x01\x00\x07\x01\x00\x00Welcome\x00")?;

        assert_eq!(datagram.id, 7);
        assert_eq!(
            datagram.message,
            Message::Reply {
                ok: true,
                ref_id: 0,
                content: "Welcome".to_string(),
            },
        );
    }

    {
        let datagram = binary::decode(b"\x04\x00\x2ABob\x00hello\x00")?;

        assert_eq!(datagram.id, 42);
        assert_eq!(
            datagram.message,
            Message::Msg {
                display_name: "Bob".to_string(),
                content: "hello".to_string(),
            },
        );
    }

    {
        let datagram = binary::decode(b"\xFD\x00\x09")?;

        assert_eq!(datagram.id, 9);
        assert_eq!(datagram.message, Message::Ping);
    }

    Ok(())
}

#[test]
fn test_binary_encoding() {
    assert_eq!(
        &encoded(&Datagram {
            id: 5,
            message: Message::Confirm,
        })[..],
        b"\x00\x00\x05",
    );

    assert_eq!(
        &encoded(&Datagram {
            id: 0,
            message: Message::Auth {
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
                secret: "secret".to_string(),
            },
        })[..],
        b"\x02\x00\x00alice\x00Alice\x00secret\x00",
    );

    assert_eq!(
        &encoded(&Datagram {
            id: 1,
            message: Message::Join {
                channel_id: "general".to_string(),
                display_name: "Alice".to_string(),
            },
        })[..],
        b"\x03\x00\x01general\x00Alice\x00",
    );

    assert_eq!(
        &encoded(&Datagram {
            id: 3,
            message: Message::Reply {
                ok: false,
                ref_id: 2,
                content: "denied".to_string(),
            },
        })[..],
        b"\x01\x00\x03\x00\x00\x02denied\x00",
    );

    // empty REPLY content encodes as the bare three-byte body
    assert_eq!(
        &encoded(&Datagram {
            id: 3,
            message: Message::Reply {
                ok: true,
                ref_id: 2,
                content: String::new(),
            },
        })[..],
        b"\x01\x00\x03\x01\x00\x02",
    );
}

#[test]
fn test_binary_round_trip() -> Result<()> {
    let messages = [
        Message::Confirm,
        Message::Reply {
            ok: true,
            ref_id: 513,
            content: "Joined default".to_string(),
        },
        Message::Reply {
            ok: false,
            ref_id: 7,
            content: String::new(),
        },
        Message::Auth {
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            secret: "secret".to_string(),
        },
        Message::Join {
            channel_id: "general".to_string(),
            display_name: "Alice".to_string(),
        },
        Message::Msg {
            display_name: "Alice".to_string(),
            content: "hi there".to_string(),
        },
        Message::Ping,
        Message::Err {
            display_name: "Server".to_string(),
            content: "internal failure".to_string(),
        },
        Message::Bye {
            display_name: "Alice".to_string(),
        },
    ];

    for (id, message) in messages.into_iter().enumerate() {
        let datagram = Datagram {
            id: id as u16 * 257,
            message,
        };

        assert_eq!(binary::decode(&encoded(&datagram))?, datagram);
    }

    Ok(())
}

#[test]
fn test_binary_malformed() {
    // shorter than the header
    assert_eq!(binary::decode(b""), Err(Error::TooShort));
    assert_eq!(binary::decode(b"\xFE\x00"), Err(Error::TooShort));

    // unknown type byte
    assert_eq!(binary::decode(b"\x10\x00\x00"), Err(Error::UnknownKind(0x10)));

    // CONFIRM and PING are exactly the header
    assert_eq!(binary::decode(b"\x00\x00\x01\x00"), Err(Error::TrailingBytes));
    assert_eq!(binary::decode(b"\xFD\x00\x01\xFF"), Err(Error::TrailingBytes));

    // ERR with no NUL-terminated fields at all
    assert_eq!(binary::decode(b"\xFE\x00\x05"), Err(Error::MissingTerminator));

    // string body not ending in NUL
    assert_eq!(
        binary::decode(b"\xFF\x00\x01Alice"),
        Err(Error::MissingTerminator),
    );

    // AUTH with only two fields
    assert_eq!(
        binary::decode(b"\x02\x00\x00alice\x00Alice\x00"),
        Err(Error::FieldCount),
    );

    // BYE with a second field
    assert_eq!(
        binary::decode(b"\xFF\x00\x01Alice\x00extra\x00"),
        Err(Error::FieldCount),
    );

    // MSG with an empty display name
    assert_eq!(binary::decode(b"\x04\x00\x01\x00hi\x00"), Err(Error::EmptyField));

    // REPLY result byte out of range
    assert_eq!(
        binary::decode(b"\x01\x00\x03\x02\x00\x00ok\x00"),
        Err(Error::BadResult(2)),
    );

    // REPLY body shorter than result + reference id
    assert_eq!(binary::decode(b"\x01\x00\x03\x01\x00"), Err(Error::TooShort));

    // REPLY content suffix with an embedded NUL
    assert_eq!(
        binary::decode(b"\x01\x00\x03\x01\x00\x00a\x00b\x00"),
        Err(Error::FieldCount),
    );
}

#[test]
fn test_binary_empty_reply_content() -> Result<()> {
    // a body of exactly result + reference id carries empty content
    let datagram = binary::decode(b"\x01\x00\x03\x00\x00\x02")?;

    assert_eq!(
        datagram.message,
        Message::Reply {
            ok: false,
            ref_id: 2,
            content: String::new(),
        },
    );

    Ok(())
}
