#![deny(unused_must_use, deprecated)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Protocol pieces shared by the server, the client and the agent: framing, key derivation,
//! command and reply types.

pub mod agent_message;
pub mod client_message;
pub mod constants;
pub mod kdf;
pub mod server_message;
pub mod shutdown;
pub mod types;
pub mod wire;
