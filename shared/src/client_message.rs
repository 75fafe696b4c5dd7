//! Commands sent from a client (or agent) to the server.
//!
//! Every request is an envelope `[password, keyfile, command, args...]`. Parsing turns the
//! argument fields into a typed [`Command`], so the server can match on it exhaustively.

use chrono::NaiveDate;
use zeroize::Zeroizing;

use crate::{
    kdf::{Credential, KdfError},
    types::{
        parse_entry_id, parse_number, parse_timestamp, timestamp_fields, EntryId, GroupId, Timestamp,
        TIMESTAMP_FIELDS,
    },
    wire,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("Too many arguments")]
    TooManyArguments,
    #[error("Invalid number in argument: {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid date")]
    InvalidDate,
    #[error("Invalid entry id")]
    InvalidEntryId,
    #[error("Invalid UTF-8 in argument: {0}")]
    InvalidText(&'static str),
    #[error("Envelope is incomplete")]
    IncompleteEnvelope,
    #[error("{0}")]
    Credential(#[from] KdfError),
}

/// Editable text fields of an entry, each with its own command token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryField {
    Title,
    Username,
    Url,
    Comment,
    Password,
}

impl EntryField {
    pub const ALL: [EntryField; 5] = [Self::Title, Self::Username, Self::Url, Self::Comment, Self::Password];

    pub fn token(self) -> &'static str {
        match self {
            Self::Title => "TITE",
            Self::Username => "USER",
            Self::Url => "URL",
            Self::Comment => "COMM",
            Self::Password => "PASS",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewGroup {
    pub title: String,
    /// `0` creates a top-level group.
    pub parent: GroupId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntry {
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub comment: String,
    pub expire: NaiveDate,
    pub group: GroupId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteGroup {
    pub group: GroupId,
    pub last_mod: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntry {
    pub entry: EntryId,
    pub last_mod: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveGroup {
    pub group: GroupId,
    /// `0` moves the group to the top level.
    pub parent: GroupId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveEntry {
    pub entry: EntryId,
    pub group: GroupId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetGroupTitle {
    pub title: String,
    pub group: GroupId,
    pub last_mod: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetEntryField {
    pub field: EntryField,
    pub value: String,
    pub entry: EntryId,
    pub last_mod: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetEntryExpiry {
    pub expire: NaiveDate,
    pub entry: EntryId,
    pub last_mod: Timestamp,
}

#[derive(Clone, Debug)]
pub struct ChangeSecret {
    pub password: Option<String>,
    pub keyfile: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub enum Command {
    Find { title: String },
    Get,
    ChangeSecret(ChangeSecret),
    NewGroup(NewGroup),
    NewEntry(NewEntry),
    DeleteGroup(DeleteGroup),
    DeleteEntry(DeleteEntry),
    MoveGroup(MoveGroup),
    MoveEntry(MoveEntry),
    SetGroupTitle(SetGroupTitle),
    SetEntryField(SetEntryField),
    SetEntryExpiry(SetEntryExpiry),
}

impl Command {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Find { .. } => "FIND",
            Self::Get => "GET",
            Self::ChangeSecret(_) => "CHANGESECRET",
            Self::NewGroup(_) => "NEWG",
            Self::NewEntry(_) => "NEWE",
            Self::DeleteGroup(_) => "DELG",
            Self::DeleteEntry(_) => "DELE",
            Self::MoveGroup(_) => "MOVG",
            Self::MoveEntry(_) => "MOVE",
            Self::SetGroupTitle(_) => "TITG",
            Self::SetEntryField(cmd) => cmd.field.token(),
            Self::SetEntryExpiry(_) => "DATE",
        }
    }

    /// Whether the command changes the database.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Find { .. } | Self::Get)
    }

    /// Parses a command token and its argument fields.
    pub fn parse(token: &[u8], args: &[Vec<u8>]) -> Result<Self, CommandParseError> {
        let mut args = Args::new(args);

        let command = match token {
            b"FIND" => Self::Find { title: args.text("title")? },
            b"GET" => Self::Get,
            b"CHANGESECRET" => {
                let password = args.text("new password")?;
                // the keyfile is binary and last, so a separator inside it is rejoined
                let keyfile = args.rest();
                Self::ChangeSecret(ChangeSecret {
                    password: (!password.is_empty()).then_some(password),
                    keyfile: (!keyfile.is_empty()).then_some(keyfile),
                })
            }
            b"NEWG" => Self::NewGroup(NewGroup {
                title: args.text("title")?,
                parent: args.number("parent id")?,
            }),
            b"NEWE" => {
                let title = args.text("title")?;
                let url = args.text("url")?;
                let username = args.text("username")?;
                let password = args.text("password")?;
                let comment = args.text("comment")?;
                let expire = args.date()?;
                Self::NewEntry(NewEntry {
                    title,
                    url,
                    username,
                    password,
                    comment,
                    expire,
                    group: args.number("group id")?,
                })
            }
            b"DELG" => Self::DeleteGroup(DeleteGroup {
                group: args.number("group id")?,
                last_mod: args.timestamp()?,
            }),
            b"DELE" => Self::DeleteEntry(DeleteEntry {
                entry: args.entry_id()?,
                last_mod: args.timestamp()?,
            }),
            b"MOVG" => Self::MoveGroup(MoveGroup {
                group: args.number("group id")?,
                parent: args.number("parent id")?,
            }),
            b"MOVE" => Self::MoveEntry(MoveEntry {
                entry: args.entry_id()?,
                group: args.number("parent id")?,
            }),
            b"TITG" => Self::SetGroupTitle(SetGroupTitle {
                title: args.text("title")?,
                group: args.number("group id")?,
                last_mod: args.timestamp()?,
            }),
            b"DATE" => Self::SetEntryExpiry(SetEntryExpiry {
                expire: args.date()?,
                entry: args.entry_id()?,
                last_mod: args.timestamp()?,
            }),
            other => {
                let field = EntryField::ALL
                    .into_iter()
                    .find(|f| f.token().as_bytes() == other)
                    .ok_or_else(|| CommandParseError::UnknownCommand(String::from_utf8_lossy(other).into_owned()))?;

                Self::SetEntryField(SetEntryField {
                    field,
                    value: args.text("value")?,
                    entry: args.entry_id()?,
                    last_mod: args.timestamp()?,
                })
            }
        };

        args.finish()?;
        Ok(command)
    }

    /// Argument fields in wire order, without the command token.
    pub fn args(&self) -> Vec<Vec<u8>> {
        fn text(s: &str) -> Vec<u8> {
            s.as_bytes().to_vec()
        }
        fn number(n: impl ToString) -> Vec<u8> {
            n.to_string().into_bytes()
        }
        // the textual form can't contain the field separator, unlike the 16 raw bytes
        fn entry_id(id: &EntryId) -> Vec<u8> {
            id.hyphenated().to_string().into_bytes()
        }
        fn date(d: &NaiveDate) -> [Vec<u8>; 3] {
            use chrono::Datelike;
            [number(d.year()), number(d.month()), number(d.day())]
        }

        let mut args = Vec::new();
        match self {
            Self::Find { title } => args.push(text(title)),
            Self::Get => {}
            Self::ChangeSecret(cmd) => {
                args.push(text(cmd.password.as_deref().unwrap_or_default()));
                args.push(cmd.keyfile.clone().unwrap_or_default());
            }
            Self::NewGroup(cmd) => {
                args.push(text(&cmd.title));
                args.push(number(cmd.parent));
            }
            Self::NewEntry(cmd) => {
                args.extend([&cmd.title, &cmd.url, &cmd.username, &cmd.password, &cmd.comment].map(|s| text(s)));
                args.extend(date(&cmd.expire));
                args.push(number(cmd.group));
            }
            Self::DeleteGroup(cmd) => {
                args.push(number(cmd.group));
                args.extend(timestamp_fields(&cmd.last_mod));
            }
            Self::DeleteEntry(cmd) => {
                args.push(entry_id(&cmd.entry));
                args.extend(timestamp_fields(&cmd.last_mod));
            }
            Self::MoveGroup(cmd) => {
                args.push(number(cmd.group));
                args.push(number(cmd.parent));
            }
            Self::MoveEntry(cmd) => {
                args.push(entry_id(&cmd.entry));
                args.push(number(cmd.group));
            }
            Self::SetGroupTitle(cmd) => {
                args.push(text(&cmd.title));
                args.push(number(cmd.group));
                args.extend(timestamp_fields(&cmd.last_mod));
            }
            Self::SetEntryField(cmd) => {
                args.push(text(&cmd.value));
                args.push(entry_id(&cmd.entry));
                args.extend(timestamp_fields(&cmd.last_mod));
            }
            Self::SetEntryExpiry(cmd) => {
                args.extend(date(&cmd.expire));
                args.push(entry_id(&cmd.entry));
                args.extend(timestamp_fields(&cmd.last_mod));
            }
        }

        args
    }
}

/// A request as received by the server: credential plus command.
#[derive(Debug)]
pub struct Envelope {
    pub credential: Credential,
    pub command: Command,
}

impl Envelope {
    pub fn new(credential: Credential, command: Command) -> Self {
        Self { credential, command }
    }

    pub fn encode(&self) -> Vec<u8> {
        let [password, keyfile] = self.credential.envelope_fields();
        let mut fields = vec![password.to_vec(), keyfile.to_vec(), self.command.token().as_bytes().to_vec()];
        fields.extend(self.command.args());

        wire::encode(&fields)
    }

    pub fn decode(body: &[u8]) -> Result<Self, CommandParseError> {
        let raw = RawEnvelope::split(body)?;

        Ok(Self {
            credential: raw.credential()?,
            command: raw.command()?,
        })
    }
}

/// An envelope split into its parts but not interpreted yet, so the server can authenticate
/// before it looks at the command.
pub struct RawEnvelope {
    password: Zeroizing<Vec<u8>>,
    keyfile: Zeroizing<Vec<u8>>,
    token: Vec<u8>,
    args: Vec<Vec<u8>>,
}

impl RawEnvelope {
    pub fn split(body: &[u8]) -> Result<Self, CommandParseError> {
        let mut fields = wire::split_fields(body).into_iter();

        match (fields.next(), fields.next(), fields.next()) {
            (Some(password), Some(keyfile), Some(token)) => Ok(Self {
                password: Zeroizing::new(password),
                keyfile: Zeroizing::new(keyfile),
                token,
                args: fields.collect(),
            }),
            _ => Err(CommandParseError::IncompleteEnvelope),
        }
    }

    pub fn credential(&self) -> Result<Credential, KdfError> {
        Credential::from_envelope(&self.password, &self.keyfile)
    }

    pub fn token(&self) -> String {
        String::from_utf8_lossy(&self.token).into_owned()
    }

    pub fn command(&self) -> Result<Command, CommandParseError> {
        Command::parse(&self.token, &self.args)
    }
}

/// Sequential reader over argument fields.
struct Args<'a> {
    fields: &'a [Vec<u8>],
}

impl<'a> Args<'a> {
    fn new(fields: &'a [Vec<u8>]) -> Self {
        Self { fields }
    }

    fn next(&mut self, name: &'static str) -> Result<&'a [u8], CommandParseError> {
        let (first, rest) = self
            .fields
            .split_first()
            .ok_or(CommandParseError::MissingArgument(name))?;
        self.fields = rest;
        Ok(first.as_slice())
    }

    fn text(&mut self, name: &'static str) -> Result<String, CommandParseError> {
        let field = self.next(name)?;
        String::from_utf8(field.to_vec()).map_err(|_| CommandParseError::InvalidText(name))
    }

    fn number<T: std::str::FromStr>(&mut self, name: &'static str) -> Result<T, CommandParseError> {
        parse_number(self.next(name)?, name)
    }

    fn date(&mut self) -> Result<NaiveDate, CommandParseError> {
        let (y, m, d) = (self.number("year")?, self.number("month")?, self.number("day")?);
        NaiveDate::from_ymd_opt(y, m, d).ok_or(CommandParseError::InvalidDate)
    }

    fn entry_id(&mut self) -> Result<EntryId, CommandParseError> {
        parse_entry_id(self.next("entry id")?)
    }

    fn timestamp(&mut self) -> Result<Timestamp, CommandParseError> {
        if self.fields.len() < TIMESTAMP_FIELDS {
            return Err(CommandParseError::MissingArgument("last modification"));
        }
        let (ts, rest) = self.fields.split_at(TIMESTAMP_FIELDS);
        self.fields = rest;
        parse_timestamp(ts)
    }

    fn rest(&mut self) -> Vec<u8> {
        let rest = wire::join_tail(self.fields);
        self.fields = &[];
        rest
    }

    fn finish(self) -> Result<(), CommandParseError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(CommandParseError::TooManyArguments)
        }
    }
}
