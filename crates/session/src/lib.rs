//! ## Chat client session
//!
//! The session state machine shared by both transports. It consumes user
//! input lines and decoded server messages, and emits [`Effect`]s for the
//! transport loop to act on: messages to serialize and send, and lines to
//! show the user. It performs no I/O itself, which is what keeps the
//! stream and datagram clients behaviorally identical.

pub mod command;
pub mod filter;

pub use command::Command;
pub use filter::DuplicateFilter;

use codec::Message;

const HELP: &[&str] = &[
    "Commands:",
    "  /auth <username> <secret> <display>",
    "  /join <channel>",
    "  /rename <display>",
    "  /quit",
    "  /help",
];

/// Session states.
///
/// `AuthPending` covers the window between sending AUTH and consuming its
/// REPLY; a negative REPLY returns to `Closed` so the user can retry.
/// `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    AuthPending,
    Open,
    Terminated,
}

/// An instruction the session hands back to the transport loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Serialize and transmit toward the server.
    Send(Message),
    /// Protocol-mandated user output, one stdout line.
    Print(String),
    /// Local diagnostics for the user, kept off stdout.
    Notice(String),
}

/// One client session.
///
/// Created when the transport connects, destroyed when the state reaches
/// [`State::Terminated`]. The display name starts as `anonymous` so a BYE
/// emitted before any successful AUTH still has a sender.
pub struct Session {
    state: State,
    username: String,
    secret: String,
    display_name: String,
    awaiting_reply: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: State::Closed,
            username: String::new(),
            secret: String::new(),
            display_name: "anonymous".to_string(),
            awaiting_reply: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == State::Terminated
    }

    /// Whether an AUTH or JOIN is outstanding. While true, no request that
    /// expects a REPLY may be issued, and chat messages are held back to
    /// keep their ordering unambiguous relative to the pending action.
    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The username of the last AUTH attempt; empty before the first one.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The secret of the last AUTH attempt; empty before the first one.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Applies one line of user input.
    pub fn handle_line(&mut self, line: &str) -> Vec<Effect> {
        let Some(command) = Command::parse(line) else {
            return Vec::new();
        };

        match command {
            Command::Help => HELP.iter().map(|entry| print(entry)).collect(),
            Command::Invalid(reason) => vec![notice(&reason)],
            Command::Rename { display_name } => {
                if self.state != State::Terminated {
                    self.display_name = display_name;
                }

                Vec::new()
            }
            Command::Quit => {
                if self.state == State::Terminated {
                    return Vec::new();
                }

                self.state = State::Terminated;
                vec![Effect::Send(Message::Bye {
                    display_name: self.display_name.clone(),
                })]
            }
            Command::Auth {
                username,
                secret,
                display_name,
            } => match self.state {
                State::Closed => {
                    self.username = username.clone();
                    self.secret = secret.clone();
                    self.display_name = display_name.clone();
                    self.state = State::AuthPending;
                    self.awaiting_reply = true;

                    vec![Effect::Send(Message::Auth {
                        username,
                        display_name,
                        secret,
                    })]
                }
                State::AuthPending => vec![notice("authorization already in progress.")],
                State::Open => vec![notice("Already authorized.")],
                State::Terminated => Vec::new(),
            },
            Command::Join { channel_id } => match self.state {
                State::Open if self.awaiting_reply => {
                    vec![notice("still waiting for the previous action to complete.")]
                }
                State::Open => {
                    self.awaiting_reply = true;

                    vec![Effect::Send(Message::Join {
                        channel_id,
                        display_name: self.display_name.clone(),
                    })]
                }
                State::Closed | State::AuthPending => {
                    vec![notice("Please authenticate first using /auth.")]
                }
                State::Terminated => Vec::new(),
            },
            Command::Say(content) => match self.state {
                State::Open if self.awaiting_reply => {
                    vec![notice("still waiting for the previous action to complete.")]
                }
                State::Open => vec![Effect::Send(Message::Msg {
                    display_name: self.display_name.clone(),
                    content,
                })],
                State::Closed | State::AuthPending => {
                    vec![notice("Please authenticate first using /auth.")]
                }
                State::Terminated => Vec::new(),
            },
        }
    }

    /// Applies one decoded inbound message.
    pub fn handle_message(&mut self, message: Message) -> Vec<Effect> {
        match message {
            Message::Reply { ok, content, .. } => {
                self.awaiting_reply = false;
                if self.state == State::AuthPending {
                    self.state = if ok { State::Open } else { State::Closed };
                }

                let verdict = if ok { "Action Success" } else { "Action Failure" };
                vec![Effect::Print(format!("{verdict}: {content}"))]
            }
            Message::Msg {
                display_name,
                content,
            } => vec![Effect::Print(format!("{display_name}: {content}"))],
            Message::Err {
                display_name,
                content,
            } => {
                self.awaiting_reply = false;
                self.state = State::Terminated;

                vec![Effect::Print(format!("ERROR FROM {display_name}: {content}"))]
            }
            Message::Bye { display_name } => {
                log::info!("server said goodbye: display_name={display_name}");
                self.awaiting_reply = false;
                self.state = State::Terminated;

                Vec::new()
            }
            // the reliability layer answers these below the session
            Message::Confirm | Message::Ping => Vec::new(),
            Message::Auth { .. } | Message::Join { .. } => {
                log::warn!("ignoring a client-only message from the server");
                Vec::new()
            }
        }
    }

    /// Input ended or the process was interrupted: say goodbye and stop.
    pub fn hangup(&mut self) -> Vec<Effect> {
        if self.state == State::Terminated {
            return Vec::new();
        }

        self.state = State::Terminated;
        vec![Effect::Send(Message::Bye {
            display_name: self.display_name.clone(),
        })]
    }

    /// The peer broke the protocol: report it, answer with ERR then BYE,
    /// and stop.
    pub fn protocol_error(&mut self, content: &str) -> Vec<Effect> {
        self.state = State::Terminated;

        vec![
            notice(content),
            Effect::Send(Message::Err {
                display_name: self.display_name.clone(),
                content: content.to_string(),
            }),
            Effect::Send(Message::Bye {
                display_name: self.display_name.clone(),
            }),
        ]
    }
}

fn print(line: &str) -> Effect {
    Effect::Print(line.to_string())
}

fn notice(reason: &str) -> Effect {
    Effect::Notice(format!("ERROR: {reason}"))
}

#[cfg(test)]
mod tests {
    use codec::Message;

    use super::{Effect, Session, State};

    fn authorized() -> Session {
        let mut session = Session::new();
        session.handle_line("/auth alice secret Alice");
        session.handle_message(Message::Reply {
            ok: true,
            ref_id: 0,
            content: "Welcome".to_string(),
        });

        session
    }

    #[test]
    fn auth_moves_closed_to_auth_pending() {
        let mut session = Session::new();
        let effects = session.handle_line("/auth alice secret Alice");

        assert_eq!(session.state(), State::AuthPending);
        assert!(session.awaiting_reply());
        assert_eq!(session.username(), "alice");
        assert_eq!(session.secret(), "secret");
        assert_eq!(
            effects,
            vec![Effect::Send(Message::Auth {
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
                secret: "secret".to_string(),
            })],
        );
    }

    #[test]
    fn positive_reply_opens_the_session() {
        let mut session = Session::new();
        session.handle_line("/auth alice secret Alice");

        let effects = session.handle_message(Message::Reply {
            ok: true,
            ref_id: 0,
            content: "Welcome".to_string(),
        });

        assert_eq!(session.state(), State::Open);
        assert!(!session.awaiting_reply());
        assert_eq!(
            effects,
            vec![Effect::Print("Action Success: Welcome".to_string())],
        );
    }

    #[test]
    fn negative_reply_allows_retry() {
        let mut session = Session::new();
        session.handle_line("/auth alice wrong Alice");

        let effects = session.handle_message(Message::Reply {
            ok: false,
            ref_id: 0,
            content: "bad credentials".to_string(),
        });

        assert_eq!(session.state(), State::Closed);
        assert_eq!(
            effects,
            vec![Effect::Print("Action Failure: bad credentials".to_string())],
        );

        // a second attempt is legal again
        let effects = session.handle_line("/auth alice secret Alice");
        assert_eq!(session.state(), State::AuthPending);
        assert!(matches!(effects[..], [Effect::Send(Message::Auth { .. })]));
    }

    #[test]
    fn chat_requires_an_open_session() {
        let mut session = Session::new();
        let effects = session.handle_line("hello");

        assert_eq!(session.state(), State::Closed);
        assert!(matches!(effects[..], [Effect::Notice(_)]));
    }

    #[test]
    fn open_session_sends_chat_messages() {
        let mut session = authorized();
        let effects = session.handle_line("hello");

        assert_eq!(
            effects,
            vec![Effect::Send(Message::Msg {
                display_name: "Alice".to_string(),
                content: "hello".to_string(),
            })],
        );
    }

    #[test]
    fn awaiting_reply_blocks_new_requests() {
        let mut session = authorized();
        session.handle_line("/join general");

        // both a second join and free text are refused locally
        assert!(matches!(
            session.handle_line("/join other")[..],
            [Effect::Notice(_)],
        ));
        assert!(matches!(session.handle_line("hi")[..], [Effect::Notice(_)]));

        // the reply unblocks
        session.handle_message(Message::Reply {
            ok: true,
            ref_id: 0,
            content: "Joined general".to_string(),
        });
        assert!(!session.awaiting_reply());
        assert!(matches!(
            session.handle_line("hi")[..],
            [Effect::Send(Message::Msg { .. })],
        ));
    }

    #[test]
    fn rename_is_local_only() {
        let mut session = authorized();

        assert!(session.handle_line("/rename Bob").is_empty());

        let effects = session.handle_line("hello");
        assert_eq!(
            effects,
            vec![Effect::Send(Message::Msg {
                display_name: "Bob".to_string(),
                content: "hello".to_string(),
            })],
        );
    }

    #[test]
    fn rename_is_legal_while_auth_pending() {
        let mut session = Session::new();
        session.handle_line("/auth alice secret Alice");

        assert!(session.handle_line("/rename Bob").is_empty());
        assert_eq!(session.display_name(), "Bob");
    }

    #[test]
    fn inbound_msg_prints_sender_and_content() {
        let mut session = authorized();
        let effects = session.handle_message(Message::Msg {
            display_name: "Bob".to_string(),
            content: "hi".to_string(),
        });

        assert_eq!(effects, vec![Effect::Print("Bob: hi".to_string())]);
        assert_eq!(session.state(), State::Open);
    }

    #[test]
    fn inbound_err_terminates() {
        let mut session = authorized();
        let effects = session.handle_message(Message::Err {
            display_name: "Server".to_string(),
            content: "kicked".to_string(),
        });

        assert_eq!(session.state(), State::Terminated);
        assert_eq!(
            effects,
            vec![Effect::Print("ERROR FROM Server: kicked".to_string())],
        );
    }

    #[test]
    fn inbound_bye_terminates_silently() {
        let mut session = authorized();
        let effects = session.handle_message(Message::Bye {
            display_name: "Server".to_string(),
        });

        assert_eq!(session.state(), State::Terminated);
        assert!(effects.is_empty());
    }

    #[test]
    fn quit_sends_bye_from_any_state() {
        let mut session = Session::new();
        let effects = session.handle_line("/quit");

        assert_eq!(session.state(), State::Terminated);
        assert_eq!(
            effects,
            vec![Effect::Send(Message::Bye {
                display_name: "anonymous".to_string(),
            })],
        );
    }

    #[test]
    fn hangup_sends_bye_once() {
        let mut session = authorized();

        assert_eq!(
            session.hangup(),
            vec![Effect::Send(Message::Bye {
                display_name: "Alice".to_string(),
            })],
        );
        assert!(session.hangup().is_empty());
    }

    #[test]
    fn protocol_error_reports_then_err_then_bye() {
        let mut session = authorized();
        let effects = session.protocol_error("Malformed packet");

        assert_eq!(session.state(), State::Terminated);
        assert_eq!(
            effects,
            vec![
                Effect::Notice("ERROR: Malformed packet".to_string()),
                Effect::Send(Message::Err {
                    display_name: "Alice".to_string(),
                    content: "Malformed packet".to_string(),
                }),
                Effect::Send(Message::Bye {
                    display_name: "Alice".to_string(),
                }),
            ],
        );
    }

    #[test]
    fn auth_is_refused_when_already_authorized() {
        let mut session = authorized();

        assert!(matches!(
            session.handle_line("/auth alice secret Alice")[..],
            [Effect::Notice(_)],
        ));
        assert_eq!(session.state(), State::Open);
    }

    #[test]
    fn join_is_refused_before_auth() {
        let mut session = Session::new();

        assert!(matches!(
            session.handle_line("/join general")[..],
            [Effect::Notice(_)],
        ));
        assert_eq!(session.state(), State::Closed);
    }

    #[test]
    fn terminated_session_ignores_input() {
        let mut session = authorized();
        session.handle_message(Message::Bye {
            display_name: "Server".to_string(),
        });

        assert!(session.handle_line("hello").is_empty());
        assert!(session.handle_line("/join general").is_empty());
        assert!(session.handle_line("/quit").is_empty());
    }
}
