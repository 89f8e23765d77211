//! Joshua core library: protocol, client state, connection driver, and formatting
//! shared by the CLI and desktop chat clients.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod init;
pub mod markup;
pub mod protocol;
pub mod upload;

pub use client::{ChatClient, ChatMessage, ClientEvent, MessageBody, MessageId, Role, SubmitError};
pub use connection::{ConnectionEvent, ConnectionHandle};
pub use protocol::{Capabilities, ServerFrame};
