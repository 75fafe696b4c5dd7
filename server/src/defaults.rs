//! Contains the default values for the configuration and various constants.

/// Key transformation rounds of newly created databases.
pub const KEY_ROUNDS: u32 = 50_000;

/// Title of the top-level group of a newly created database.
pub const FIRST_GROUP: &str = "Internet";

/// The name of the folder that contains the application data.
pub const APP_FOLDER_NAME: &str = "keepassc";

/// The name of the folder (inside the application folder) holding the TLS certificate and key.
pub const TLS_FOLDER_NAME: &str = "tls";

/// The address the local plaintext socket binds to.
pub const LOCAL_BIND_IP: &str = "127.0.0.1";
