//! Messages between a local client and the agent. Unlike server requests they carry no
//! credential envelope: the first field is the command.

use std::path::PathBuf;

use crate::{client_message::CommandParseError, kdf::Credential, types::parse_number, wire};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    Find { title: String },
    Get,
    GetCredentials,
}

impl AgentCommand {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Find { .. } => "FIND",
            Self::Get => "GET",
            Self::GetCredentials => "GETC",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Find { title } => wire::encode(&[self.token().as_bytes(), title.as_bytes()]),
            Self::Get | Self::GetCredentials => self.token().as_bytes().to_vec(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, CommandParseError> {
        let fields = wire::split_fields(body);

        match fields.as_slice() {
            [token, title] if token.as_slice() == b"FIND" => Ok(Self::Find {
                title: String::from_utf8(title.clone()).map_err(|_| CommandParseError::InvalidText("title"))?,
            }),
            [token] if token.as_slice() == b"FIND" => Err(CommandParseError::MissingArgument("title")),
            [token] if token.as_slice() == b"GET" => Ok(Self::Get),
            [token] if token.as_slice() == b"GETC" => Ok(Self::GetCredentials),
            [token, ..] if [&b"FIND"[..], b"GET", b"GETC"].contains(&token.as_slice()) => {
                Err(CommandParseError::TooManyArguments)
            }
            [token, ..] => Err(CommandParseError::UnknownCommand(String::from_utf8_lossy(token).into_owned())),
            [] => Err(CommandParseError::IncompleteEnvelope),
        }
    }
}

/// Everything a local client needs to open its own authenticated session, as handed out by
/// `GETC`.
#[derive(Clone, Debug)]
pub struct AgentCredentials {
    pub credential: Credential,
    pub server_address: String,
    pub server_port: u16,
    pub tls: bool,
    pub tls_dir: Option<PathBuf>,
}

impl AgentCredentials {
    /// `[password, keyfile, address, port, True|False, tls_dir]`
    pub fn encode(&self) -> Vec<u8> {
        let [password, keyfile] = self.credential.envelope_fields();
        let port = self.server_port.to_string();
        let tls: &[u8] = if self.tls { b"True" } else { b"False" };
        let tls_dir = self
            .tls_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();

        wire::encode(&[
            password,
            keyfile,
            self.server_address.as_bytes(),
            port.as_bytes(),
            tls,
            tls_dir.as_bytes(),
        ])
    }

    pub fn decode(body: &[u8]) -> Result<Self, CommandParseError> {
        let fields = wire::split_fields(body);
        let [password, keyfile, address, port, tls, tls_dir] = fields.as_slice() else {
            return Err(CommandParseError::IncompleteEnvelope);
        };

        let server_address =
            String::from_utf8(address.clone()).map_err(|_| CommandParseError::InvalidText("server address"))?;
        let tls_dir = String::from_utf8(tls_dir.clone()).map_err(|_| CommandParseError::InvalidText("tls dir"))?;

        Ok(Self {
            credential: Credential::from_envelope(password, keyfile)?,
            server_address,
            server_port: parse_number(port, "port")?,
            tls: tls.as_slice() == b"True",
            tls_dir: (!tls_dir.is_empty()).then(|| PathBuf::from(tls_dir)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_command_tokens() {
        assert_eq!(AgentCommand::decode(b"GETC").unwrap(), AgentCommand::GetCredentials);
        assert_eq!(AgentCommand::decode(b"GET").unwrap(), AgentCommand::Get);
        assert_eq!(
            AgentCommand::decode(&AgentCommand::Find { title: "bank".into() }.encode()).unwrap(),
            AgentCommand::Find { title: "bank".into() }
        );
        assert_eq!(
            AgentCommand::decode(b"NEWG").unwrap_err(),
            CommandParseError::UnknownCommand("NEWG".into())
        );
        assert_eq!(AgentCommand::decode(b"FIND").unwrap_err(), CommandParseError::MissingArgument("title"));
    }

    #[test]
    fn credentials_layout() {
        let creds = AgentCredentials {
            credential: Credential::new(Some("p".into()), None).unwrap(),
            server_address: "h".into(),
            server_port: 50000,
            tls: false,
            tls_dir: None,
        };

        let fields = wire::split_fields(&creds.encode());
        let expected: Vec<Vec<u8>> = [&b"p"[..], b"", b"h", b"50000", b"False", b""].iter().map(|f| f.to_vec()).collect();
        assert_eq!(fields, expected);

        let decoded = AgentCredentials::decode(&creds.encode()).unwrap();
        assert_eq!(decoded.credential.password(), Some("p"));
        assert_eq!(decoded.credential.keyfile(), None);
        assert_eq!(decoded.server_port, 50000);
        assert!(!decoded.tls);
        assert_eq!(decoded.tls_dir, None);
    }
}
