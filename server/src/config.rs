//! Command line and environment configuration. Every flag can also be given as a `KPC_*`
//! environment variable, which may come from a `.env` file.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use shared::{
    constants::{SERVER_LOCAL_PORT, SERVER_NETWORK_PORT, SERVER_TLS_PORT},
    kdf::Credential,
};
use zeroize::Zeroizing;

use crate::{defaults, tls::MinTlsVersion};

#[derive(Parser, Debug)]
#[command(author, version, about = "KeePassC database server", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub database: DatabaseArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new database
    Init(InitArgs),
    /// Serve an existing database
    Run(ServeConfig),
}

#[derive(Args, Clone, Debug)]
pub struct DatabaseArgs {
    /// Path of the database file
    #[arg(long, env = "KPC_DB_PATH")]
    pub db_path: PathBuf,

    /// Keyfile that is part of the master credential
    #[arg(long, env = "KPC_KEYFILE")]
    pub keyfile: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct InitArgs {
    /// Key transformation rounds
    #[arg(long, env = "KPC_ROUNDS", default_value_t = defaults::KEY_ROUNDS)]
    pub rounds: u32,

    /// Title of the first top-level group
    #[arg(long, default_value = defaults::FIRST_GROUP)]
    pub group: String,
}

#[derive(Args, Clone, Debug)]
pub struct ServeConfig {
    /// Address for the network sockets; without it only the local socket is opened
    #[arg(long, env = "KPC_BIND_IP")]
    pub bind_ip: Option<IpAddr>,

    #[arg(long, env = "KPC_LOCAL_PORT", default_value_t = SERVER_LOCAL_PORT)]
    pub local_port: u16,

    #[arg(long, env = "KPC_PORT", default_value_t = SERVER_NETWORK_PORT)]
    pub port: u16,

    /// Open the TLS socket
    #[arg(long, env = "KPC_TLS")]
    pub tls: bool,

    #[arg(long, env = "KPC_TLS_PORT", default_value_t = SERVER_TLS_PORT)]
    pub tls_port: u16,

    /// Directory with servercert.pem and serverkey.pem
    #[arg(long, env = "KPC_TLS_DIR")]
    pub tls_dir: Option<PathBuf>,

    /// Don't open the plaintext network socket
    #[arg(long, env = "KPC_TLS_REQUIRED")]
    pub tls_required: bool,

    #[arg(long, env = "KPC_TLS_MIN_VERSION", value_enum, default_value_t = MinTlsVersion::Tls12)]
    pub tls_min_version: MinTlsVersion,
}

impl ServeConfig {
    /// Loopback only, every port picked by the OS and no TLS.
    pub fn local_only() -> Self {
        Self {
            bind_ip: None,
            local_port: 0,
            port: 0,
            tls: false,
            tls_port: 0,
            tls_dir: None,
            tls_required: false,
            tls_min_version: MinTlsVersion::default(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        let ip = defaults::LOCAL_BIND_IP.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(ip, self.local_port)
    }

    /// The plaintext network socket, unless TLS is required.
    pub fn network_addr(&self) -> Option<SocketAddr> {
        match self.bind_ip {
            Some(ip) if !self.tls_required => Some(SocketAddr::new(ip, self.port)),
            _ => None,
        }
    }

    /// The TLS socket binds the network address, or loopback when there is none.
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls.then(|| {
            let ip = self.bind_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            SocketAddr::new(ip, self.tls_port)
        })
    }

    pub fn tls_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.tls_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_tls_dir(),
        }
    }
}

/// `<config dir>/keepassc/tls`
pub fn default_tls_dir() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::config_dir().context("Cannot find the system config directory")?;
    dir.push(defaults::APP_FOLDER_NAME);
    dir.push(defaults::TLS_FOLDER_NAME);
    Ok(dir)
}

impl DatabaseArgs {
    /// Reads the keyfile (if any) and the password from `KPC_PASSWORD` or an interactive prompt.
    pub fn credential(&self, confirm: bool) -> anyhow::Result<Credential> {
        let keyfile = match &self.keyfile {
            Some(path) => Some(
                std::fs::read(path).with_context(|| format!("Unable to read the keyfile at {}", path.display()))?,
            ),
            None => None,
        };

        let password = match dotenv::var("KPC_PASSWORD") {
            Ok(password) => Zeroizing::new(password),
            Err(_) => prompt_password(confirm)?,
        };
        let password = (!password.is_empty()).then(|| String::clone(&password));

        Credential::new(password, keyfile).context("A password or a keyfile is required")
    }
}

fn prompt_password(confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    let mut prompt = dialoguer::Password::new().with_prompt("Master password").allow_empty_password(true);
    if confirm {
        prompt = prompt.with_confirmation("Repeat the password", "The passwords don't match");
    }

    Ok(Zeroizing::new(prompt.interact()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockets_follow_flags() {
        let mut config = ServeConfig::local_only();
        assert_eq!(config.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.network_addr(), None);
        assert_eq!(config.tls_addr(), None);

        config.bind_ip = Some("0.0.0.0".parse().unwrap());
        config.port = 50_002;
        assert_eq!(config.network_addr(), Some("0.0.0.0:50002".parse().unwrap()));

        config.tls = true;
        config.tls_port = 50_003;
        config.tls_required = true;
        assert_eq!(config.network_addr(), None);
        assert_eq!(config.tls_addr(), Some("0.0.0.0:50003".parse().unwrap()));
    }

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "kpc-server",
            "--db-path",
            "/tmp/db.kpc",
            "run",
            "--bind-ip",
            "10.0.0.1",
            "--tls",
            "--tls-min-version",
            "1.3",
        ])
        .unwrap();

        assert_eq!(cli.database.db_path, PathBuf::from("/tmp/db.kpc"));
        let Commands::Run(config) = cli.command else {
            panic!("expected run");
        };
        assert!(config.tls);
        assert_eq!(config.tls_min_version, MinTlsVersion::Tls13);
        assert_eq!(config.bind_ip, Some("10.0.0.1".parse().unwrap()));
    }
}
