//! Command line and environment configuration. Every flag can also be given as a `KPC_*`
//! environment variable, which may come from a `.env` file.

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use shared::{
    constants::{AGENT_PORT, SERVER_LOCAL_PORT},
    kdf::Credential,
    types::GroupId,
};
use zeroize::Zeroizing;

use crate::{
    defaults,
    net::{
        default_tls_dir,
        tls::{TlsOptions, TrustMode},
        Endpoint,
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about = "KeePassC network client and agent", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Port of the local agent
    #[arg(long, env = "KPC_AGENT_PORT", default_value_t = AGENT_PORT)]
    pub agent_port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find entries by title
    Find { title: String },
    /// Download the encrypted database
    Get {
        /// File to write the database to
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Change the master password and/or keyfile (loopback connections only)
    ChangeSecret {
        /// New keyfile, none if omitted
        #[arg(long)]
        new_keyfile: Option<PathBuf>,
    },
    /// Create a group
    NewGroup {
        title: String,
        /// Parent group id, 0 for a top-level group
        #[arg(long, default_value_t = 0)]
        parent: GroupId,
    },
    /// Create an entry, the entry password is prompted for
    NewEntry(NewEntryArgs),
    /// Run the agent in the foreground
    Agent,
    /// Find entries through the agent
    AgentFind { title: String },
    /// Download the encrypted database through the agent
    AgentGet {
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Show the server settings the agent holds
    AgentCredentials,
}

#[derive(Args, Clone, Debug)]
pub struct NewEntryArgs {
    pub title: String,

    /// Group the entry is created in
    #[arg(long)]
    pub group: GroupId,

    #[arg(long, default_value = "")]
    pub url: String,

    #[arg(long, default_value = "")]
    pub username: String,

    #[arg(long, default_value = "")]
    pub comment: String,

    /// Expiration date (YYYY-MM-DD), never expires if omitted
    #[arg(long)]
    pub expire: Option<NaiveDate>,
}

#[derive(Args, Clone, Debug)]
pub struct ServerArgs {
    /// Server address
    #[arg(long, env = "KPC_SERVER", default_value = defaults::SERVER_ADDRESS)]
    pub server: String,

    #[arg(long, env = "KPC_SERVER_PORT", default_value_t = SERVER_LOCAL_PORT)]
    pub server_port: u16,

    /// Connect over TLS
    #[arg(long, env = "KPC_TLS")]
    pub tls: bool,

    /// Directory holding the pin file and cacert.pem
    #[arg(long, env = "KPC_TLS_DIR")]
    pub tls_dir: Option<PathBuf>,

    /// How the server certificate is trusted
    #[arg(long, env = "KPC_TLS_TRUST", value_enum, default_value_t = TrustMode::Pin)]
    pub tls_trust: TrustMode,

    /// Name the certificate is verified against, the server address by default
    #[arg(long, env = "KPC_TLS_NAME")]
    pub tls_name: Option<String>,

    /// Keyfile that is part of the master credential
    #[arg(long, env = "KPC_KEYFILE")]
    pub keyfile: Option<PathBuf>,
}

impl ServerArgs {
    pub fn endpoint(&self) -> anyhow::Result<Endpoint> {
        let tls = if self.tls {
            let dir = match &self.tls_dir {
                Some(dir) => dir.clone(),
                None => default_tls_dir().context("Cannot find the system config directory")?,
            };
            Some(TlsOptions {
                dir,
                trust: self.tls_trust,
                server_name: self.tls_name.clone(),
            })
        } else {
            None
        };

        Ok(Endpoint {
            address: self.server.clone(),
            port: self.server_port,
            tls,
        })
    }

    /// Reads the keyfile (if any) and the password from `KPC_PASSWORD` or an interactive prompt.
    pub fn credential(&self) -> anyhow::Result<Credential> {
        let password = match dotenv::var("KPC_PASSWORD") {
            Ok(password) => Zeroizing::new(password),
            Err(_) => prompt_password("Master password", false)?,
        };

        read_credential(&password, self.keyfile.as_deref())
    }
}

/// Builds a credential where an empty password means "keyfile only".
pub fn read_credential(password: &str, keyfile: Option<&std::path::Path>) -> anyhow::Result<Credential> {
    let keyfile = match keyfile {
        Some(path) => {
            Some(std::fs::read(path).with_context(|| format!("Unable to read the keyfile at {}", path.display()))?)
        }
        None => None,
    };
    let password = (!password.is_empty()).then(|| password.to_owned());

    Credential::new(password, keyfile).context("A password or a keyfile is required")
}

pub fn prompt_password(prompt: &str, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    let mut input = dialoguer::Password::new().with_prompt(prompt).allow_empty_password(true);
    if confirm {
        input = input.with_confirmation("Repeat the password", "The passwords don't match");
    }

    Ok(Zeroizing::new(input.interact()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_endpoint_by_default() {
        let cli = Cli::try_parse_from(["kpc", "find", "bank"]).unwrap();
        let endpoint = cli.server.endpoint().unwrap();

        assert_eq!(endpoint.address, defaults::SERVER_ADDRESS);
        assert_eq!(endpoint.port, SERVER_LOCAL_PORT);
        assert!(endpoint.tls.is_none());
        assert!(matches!(cli.command, Commands::Find { ref title } if title == "bank"));
    }

    #[test]
    fn tls_flags() {
        let cli = Cli::try_parse_from([
            "kpc",
            "--server",
            "vault.example.org",
            "--server-port",
            "50003",
            "--tls",
            "--tls-dir",
            "/tmp/tls",
            "--tls-trust",
            "ca",
            "agent",
        ])
        .unwrap();

        let tls = cli.server.endpoint().unwrap().tls.unwrap();
        assert_eq!(tls.dir, PathBuf::from("/tmp/tls"));
        assert_eq!(tls.trust, TrustMode::Ca);
        assert!(matches!(cli.command, Commands::Agent));
    }

    #[test]
    fn keyfile_only_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, b"key bytes").unwrap();

        let credential = read_credential("", Some(&path)).unwrap();
        assert_eq!(credential.password(), None);
        assert_eq!(credential.keyfile(), Some(&b"key bytes"[..]));

        assert!(read_credential("", None).is_err());
    }
}
