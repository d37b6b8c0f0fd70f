/*!
A line-oriented chat server.

Clients connect over TCP, `/register` and `/login` against a flat file of
accounts, and then chat: plain lines go to everyone, `/dm` goes to one
person, `/nick` changes what you're called, and `/quit` leaves. Everything
said is appended to a history file that each newly logged-in client is
shown.
*/
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod history;
pub mod hub;
pub mod message;
pub mod session;
