/*!
One connection's worth of protocol.

A session starts out `Connecting`, greets the client and moves to
`Authenticating`, where only `/login` and `/register` do anything. A good
login makes it `Active` until the client quits, the connection drops, or
the hub shuts it down; then it is `Closed` for good.
*/
use std::sync::Arc;

use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
        ReadHalf, WriteHalf,
    },
    sync::mpsc::UnboundedReceiver,
};
use tracing::{event, Level};

use crate::{
    command::{parse_auth, parse_chat, AuthCommand, ChatCommand},
    error::Error,
    hub::Hub,
    message::{self, *},
};

#[derive(Debug)]
enum State {
    Connecting,
    Authenticating,
    Active {
        /// The account this session logged in with.
        account: String,
        /// What the session is currently called; starts as `account`.
        name: String,
    },
    Closed,
}

pub struct Session<S> {
    id: usize,
    from_user: BufReader<ReadHalf<S>>,
    to_user: WriteHalf<S>,
    from_hub: UnboundedReceiver<Outbound>,
    hub: Arc<Hub>,
    state: State,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(
        id: usize,
        socket: S,
        from_hub: UnboundedReceiver<Outbound>,
        hub: Arc<Hub>,
    ) -> Session<S> {
        let (from_user, to_user) = tokio::io::split(socket);
        let from_user = BufReader::new(from_user);

        Session {
            id, from_user, to_user, from_hub, hub,
            state: State::Connecting,
        }
    }

    async fn say(&mut self, text: &str) -> Result<(), Error> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.to_user.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn handle_auth(&mut self, line: &str) -> Result<(), Error> {
        match parse_auth(line) {
            AuthCommand::Login{ user, pass } => {
                let hub = self.hub.clone();
                let creds = hub.credentials();
                if !creds.exists(user).await {
                    self.say(NO_SUCH_USER_TEXT).await?;
                } else if !creds.verify(user, pass).await {
                    event!(Level::DEBUG,
                        "session {}: bad password for {:?}", &self.id, user
                    );
                    self.say(WRONG_PASSWORD_TEXT).await?;
                } else {
                    self.hub.login(self.id, user).await;
                    self.state = State::Active {
                        account: user.to_string(),
                        name: user.to_string(),
                    };
                    self.hub.broadcast(&message::joined(user)).await;
                }
            },

            AuthCommand::Register{ user, pass } => {
                let hub = self.hub.clone();
                let creds = hub.credentials();
                if creds.exists(user).await {
                    self.say(USER_EXISTS_TEXT).await?;
                } else if creds.register(user, pass).await {
                    self.say(REGISTERED_TEXT).await?;
                } else {
                    self.say(REGISTER_FAILED_TEXT).await?;
                }
            },

            AuthCommand::Malformed(usage) => {
                self.say(usage).await?;
            },

            AuthCommand::Other => {
                self.say(NOT_LOGGED_IN_TEXT).await?;
                self.say(USAGE_TEXT).await?;
            },
        }

        Ok(())
    }

    /// Returns `Ok(false)` when the client has asked to leave.
    async fn handle_chat(&mut self, line: &str) -> Result<bool, Error> {
        let (account, name) = match &self.state {
            State::Active{ account, name } => (account.clone(), name.clone()),
            _ => return Ok(true),
        };

        match parse_chat(line) {
            ChatCommand::Quit => {
                self.say(GOODBYE_TEXT).await?;
                return Ok(false);
            },

            ChatCommand::Dm{ to, text } => {
                self.hub.send_direct(self.id, &name, to, text).await;
            },

            ChatCommand::Nick(new) => {
                // Can't borrow somebody else's account name.
                let owned = new.to_lowercase() == account.to_lowercase();
                if !owned && self.hub.credentials().exists(new).await {
                    self.say(&message::nick_taken(new)).await?;
                } else if !self.hub.rename(self.id, &name, new).await {
                    self.say(&message::nick_taken(new)).await?;
                } else {
                    self.hub.broadcast(&message::renamed(&name, new)).await;
                    self.state = State::Active {
                        account,
                        name: new.to_string(),
                    };
                    self.say(&message::nick_ok(new)).await?;
                }
            },

            ChatCommand::Malformed(usage) => {
                self.say(usage).await?;
            },

            ChatCommand::Say(text) => {
                self.hub.broadcast(&message::public(&name, text)).await;
            },
        }

        Ok(true)
    }

    async fn run(&mut self) -> Result<(), Error> {
        self.say(WELCOME_TEXT).await?;
        self.say(USAGE_TEXT).await?;
        self.state = State::Authenticating;

        // `read_until()` keeps whatever it got in here if the other branch
        // wins, so only clear it once a whole line has been handled.
        let mut line_buff: Vec<u8> = Vec::new();

        loop {
            tokio::select!{
                res = self.from_user.read_until(b'\n', &mut line_buff) => {
                    if res? == 0 {
                        event!(Level::DEBUG,
                            "session {} read 0 bytes; closing", &self.id
                        );
                        return Err(Error::Eof);
                    }
                    // Bad bytes become U+FFFD rather than ending the session.
                    let line = String::from_utf8_lossy(&line_buff)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    line_buff.clear();
                    event!(Level::TRACE, "session {} rec'd {:?}", &self.id, &line);

                    match self.state {
                        State::Authenticating => self.handle_auth(&line).await?,
                        State::Active{ .. } => {
                            if !self.handle_chat(&line).await? {
                                return Ok(());
                            }
                        },
                        _ => return Ok(()),
                    }
                },

                msg = self.from_hub.recv() => match msg {
                    Some(Outbound::Line(text)) => self.say(&text).await?,
                    Some(Outbound::Close) | None => {
                        // We're leaving either way.
                        let _ = self.say(SHUTDOWN_TEXT).await;
                        return Err(Error::Shutdown);
                    },
                },
            }
        }
    }

    pub async fn start(mut self) {
        event!(Level::DEBUG, "session {} started", &self.id);

        let res = self.run().await;
        let announce = match res {
            Ok(()) | Err(Error::Eof) => true,
            Err(Error::Shutdown) => false,
            Err(Error::IOError(ref e)) => {
                event!(Level::WARN, "session {}: {}", &self.id, e);
                true
            },
        };

        self.close(announce).await;
    }

    /// Leave the hub and shut the connection down. Consumes the session,
    /// so the socket is released exactly once.
    async fn close(mut self, announce: bool) {
        let prev = std::mem::replace(&mut self.state, State::Closed);
        event!(Level::TRACE, "session {} closing from {:?}", &self.id, &prev);

        if let State::Active{ ref name, .. } = prev {
            self.hub.unregister_username(name, self.id).await;
        }
        self.hub.disconnect(self.id).await;
        if let State::Active{ name, .. } = prev {
            if announce {
                self.hub.broadcast(&message::left(&name)).await;
            }
        }

        self.from_hub.close();
        if let Err(e) = self.from_user.into_inner()
            .unsplit(self.to_user)
            .shutdown()
            .await
        {
            event!(Level::DEBUG,
                "session {}: error shutting down connection: {}", &self.id, &e
            );
        }

        event!(Level::DEBUG, "session {} disconnects", &self.id);
    }
}
