//! Contains the default values for the configuration and various constants.

/// The address of the server.
pub const SERVER_ADDRESS: &str = "127.0.0.1";

/// The name of the folder that contains the application data.
pub const APP_FOLDER_NAME: &str = "keepassc";

/// The name of the folder (inside the application folder) holding the pin and CA certificates.
pub const TLS_FOLDER_NAME: &str = "tls";
