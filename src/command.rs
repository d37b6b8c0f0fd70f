/*!
Turning client lines into commands.

What a line means depends on whether the session has logged in yet, so
there is one parser per phase.
*/
use crate::message::{
    DM_USAGE_TEXT, LOGIN_USAGE_TEXT, NICK_USAGE_TEXT, REGISTER_USAGE_TEXT,
};

/// A line received before login.
#[derive(Debug, PartialEq)]
pub enum AuthCommand<'a> {
    Login { user: &'a str, pass: &'a str },
    Register { user: &'a str, pass: &'a str },
    /// A known command with the wrong arguments; carries its usage line.
    Malformed(&'static str),
    Other,
}

/// A line received after login.
#[derive(Debug, PartialEq)]
pub enum ChatCommand<'a> {
    Quit,
    Dm { to: &'a str, text: &'a str },
    Nick(&'a str),
    Malformed(&'static str),
    Say(&'a str),
}

/// Names end up as the first field of a `name:password` record, so they
/// can't hold a colon.
fn name_is_ok(name: &str) -> bool {
    !name.is_empty() && !name.contains(':')
}

fn credentials<'a>(
    mut tokens: std::str::SplitWhitespace<'a>,
    usage: &'static str,
) -> Result<(&'a str, &'a str), &'static str> {
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(user), Some(pass), None) if name_is_ok(user) => Ok((user, pass)),
        _ => Err(usage),
    }
}

pub fn parse_auth(line: &str) -> AuthCommand<'_> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("/login") => match credentials(tokens, LOGIN_USAGE_TEXT) {
            Ok((user, pass)) => AuthCommand::Login { user, pass },
            Err(usage) => AuthCommand::Malformed(usage),
        },
        Some("/register") => match credentials(tokens, REGISTER_USAGE_TEXT) {
            Ok((user, pass)) => AuthCommand::Register { user, pass },
            Err(usage) => AuthCommand::Malformed(usage),
        },
        _ => AuthCommand::Other,
    }
}

pub fn parse_chat(line: &str) -> ChatCommand<'_> {
    if line.starts_with("/quit") {
        return ChatCommand::Quit;
    }

    // The message part of a DM keeps its spaces.
    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some("/dm") => match (parts.next(), parts.next()) {
            (Some(to), Some(text)) => ChatCommand::Dm { to, text },
            _ => ChatCommand::Malformed(DM_USAGE_TEXT),
        },
        Some("/nick") => {
            let mut rest = line["/nick".len()..].split_whitespace();
            match (rest.next(), rest.next()) {
                (Some(name), None) if name_is_ok(name) => ChatCommand::Nick(name),
                _ => ChatCommand::Malformed(NICK_USAGE_TEXT),
            }
        },
        _ => ChatCommand::Say(line),
    }
}
