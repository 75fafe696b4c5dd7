//! Shared constants for client, agent and server.

use std::time::Duration;

/// Separates the fields of a message.
pub const FIELD_SEPARATOR: [u8; 3] = [0xB2, 0xEA, 0xC0];

/// Terminates a message on the wire ("DEAD END").
pub const MESSAGE_TERMINATOR: [u8; 4] = [0xDE, 0xAD, 0xE1, 0x1D];

/// Size of the chunks a message is read in.
pub const READ_CHUNK_SIZE: usize = 16;

/// Upper bound for a single inbound message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64 MiB

/// Idle timeout for reads and for the time between accept and the first byte.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Highest accepted number of key transformation rounds.
pub const MAX_KEY_ROUNDS: u32 = 50_000_000;

/// Every reply starting with these bytes is an error.
pub const FAIL_PREFIX: &[u8] = b"FAIL";

/// Id of the ephemeral search results group, never a real group.
pub const RESULTS_GROUP_ID: u32 = 0;

/// Default port of the loopback plaintext server socket.
pub const SERVER_LOCAL_PORT: u16 = 50_000;

/// Default port of the agent socket.
pub const AGENT_PORT: u16 = 50_001;

/// Default port of the network plaintext server socket.
pub const SERVER_NETWORK_PORT: u16 = 50_002;

/// Default port of the TLS server socket.
pub const SERVER_TLS_PORT: u16 = 50_003;

/// File names inside the TLS directory.
pub const TLS_CERT_FILE: &str = "servercert.pem";
pub const TLS_KEY_FILE: &str = "serverkey.pem";
pub const TLS_CA_FILE: &str = "cacert.pem";
pub const TLS_PIN_FILE: &str = "pin";
