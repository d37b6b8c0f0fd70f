/*!
Lines the server says, and what the hub hands to sessions.
*/

pub static WELCOME_TEXT: &str = "Welcome to the chat server!";
pub static USAGE_TEXT: &str =
    "Please /login <username> <password> or /register <username> <password>.";
pub static NOT_LOGGED_IN_TEXT: &str = "Please /login or /register first.";
pub static LOGIN_USAGE_TEXT: &str = "Usage: /login <username> <password>";
pub static REGISTER_USAGE_TEXT: &str = "Usage: /register <username> <password>";
pub static NO_SUCH_USER_TEXT: &str =
    "User does not exist. Try /register <username> <password>.";
pub static WRONG_PASSWORD_TEXT: &str = "Wrong password, try again.";
pub static USER_EXISTS_TEXT: &str =
    "User already exists. Try /login <username> <password>.";
pub static REGISTERED_TEXT: &str = "Registration successful. You can now /login.";
pub static REGISTER_FAILED_TEXT: &str = "Registration failed.";
pub static DM_USAGE_TEXT: &str = "Usage: /dm <username> <message>";
pub static NICK_USAGE_TEXT: &str = "No nickname provided!";
pub static GOODBYE_TEXT: &str = "Goodbye!";
pub static SHUTDOWN_TEXT: &str = "Server is shutting down.";
pub static HISTORY_START: &str = "=== Chat History ===";
pub static HISTORY_END: &str = "====================";

pub fn login_ok(name: &str) -> String {
    format!("Login successful. Welcome, {}!", name)
}

pub fn joined(name: &str) -> String {
    format!("{} joined the chat!", name)
}

pub fn left(name: &str) -> String {
    format!("{} left the chat!", name)
}

pub fn public(name: &str, text: &str) -> String {
    format!("{}: {}", name, text)
}

pub fn direct(from: &str, to: &str, text: &str) -> String {
    format!("[DM] {} -> {}: {}", from, to, text)
}

pub fn not_found(name: &str) -> String {
    format!("User '{}' not found or not logged in.", name)
}

pub fn renamed(old: &str, new: &str) -> String {
    format!("{} renamed themselves to {}", old, new)
}

pub fn nick_ok(name: &str) -> String {
    format!("Successfully changed nickname to {}", name)
}

pub fn nick_taken(name: &str) -> String {
    format!("Nickname '{}' is already in use.", name)
}

/// Things the hub pushes down a session's channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Write this line to the client.
    Line(String),
    /// Close the connection.
    Close,
}
