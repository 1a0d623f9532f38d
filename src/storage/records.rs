//! Record tags and the pinned index.
//!
//! Every persisted fact is one pinned message whose first line is a type
//! tag. The remaining lines are the payload, parsed by the owning feature
//! module. A separate `RECORD INDEX:` pin maps tags to message ids so a
//! restart never scans message history.

use serenity::model::id::{MessageId, RoleId};
use thiserror::Error;

/// The record types the store knows how to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    AdminRole,
    ColorPermRole,
    ColorRole,
    Routine,
    Reminder,
    JoinMessage,
}

impl RecordKind {
    /// First line of every record of this kind.
    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::AdminRole => "ADMIN ROLE:",
            RecordKind::ColorPermRole => "COLOR PERM ROLE:",
            RecordKind::ColorRole => "COLOR ROLE:",
            RecordKind::Routine => "ROUTINE:",
            RecordKind::Reminder => "REMINDER:",
            RecordKind::JoinMessage => "USER JOIN MESSAGE:",
        }
    }

    /// Singleton kinds are edited in place; the rest accumulate.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            RecordKind::AdminRole | RecordKind::ColorPermRole | RecordKind::JoinMessage
        )
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ADMIN ROLE:" => Some(RecordKind::AdminRole),
            "COLOR PERM ROLE:" => Some(RecordKind::ColorPermRole),
            "COLOR ROLE:" => Some(RecordKind::ColorRole),
            "ROUTINE:" => Some(RecordKind::Routine),
            "REMINDER:" => Some(RecordKind::Reminder),
            "USER JOIN MESSAGE:" => Some(RecordKind::JoinMessage),
            _ => None,
        }
    }
}

/// A stored record failed to parse. The record is skipped with a log line;
/// the surrounding load continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record is missing the {0} field")]
    MissingField(&'static str),
    #[error("record holds a malformed id: {0}")]
    BadId(String),
    #[error("record holds a malformed boolean: {0}")]
    BadBool(String),
}

pub fn parse_bool(raw: &str) -> Result<bool, RecordError> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(RecordError::BadBool(other.to_string())),
    }
}

/// Payload of a role-pointer record: a single role id line.
pub fn parse_role_record(body: &str) -> Result<RoleId, RecordError> {
    let line = body
        .lines()
        .next()
        .ok_or(RecordError::MissingField("role id"))?;
    line.trim()
        .parse::<u64>()
        .map(RoleId)
        .map_err(|_| RecordError::BadId(line.to_string()))
}

pub fn encode_role_record(role: RoleId) -> String {
    role.0.to_string()
}

/// The welcome-message setting: two flags and the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMessageSetting {
    pub enabled: bool,
    pub mention: bool,
    pub message: String,
}

impl Default for JoinMessageSetting {
    fn default() -> Self {
        JoinMessageSetting {
            enabled: true,
            mention: true,
            message: "Welcome to the server!".to_string(),
        }
    }
}

impl JoinMessageSetting {
    pub fn parse_record(body: &str) -> Result<Self, RecordError> {
        let mut lines = body.splitn(3, '\n');
        let enabled = parse_bool(lines.next().ok_or(RecordError::MissingField("enabled"))?)?;
        let mention = parse_bool(lines.next().ok_or(RecordError::MissingField("mention"))?)?;
        let message = lines
            .next()
            .ok_or(RecordError::MissingField("message"))?
            .to_string();
        Ok(JoinMessageSetting {
            enabled,
            mention,
            message,
        })
    }

    pub fn encode_record(&self) -> String {
        format!("{}\n{}\n{}", self.enabled, self.mention, self.message)
    }
}

/// In-memory mirror of the `RECORD INDEX:` pin. One entry per stored
/// record, in append order, each line `<TAG> <messageId>`.
#[derive(Debug, Default)]
pub struct RecordIndex {
    entries: Vec<(RecordKind, MessageId)>,
}

impl RecordIndex {
    pub const TAG: &'static str = "RECORD INDEX:";

    pub fn new() -> Self {
        RecordIndex::default()
    }

    /// Parses the index pin. Unrecognized or malformed lines are dropped
    /// rather than failing the whole index.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines().skip(1) {
            let Some((tag, id)) = line.rsplit_once(' ') else {
                continue;
            };
            let Some(kind) = RecordKind::from_tag(tag) else {
                continue;
            };
            let Ok(id) = id.parse::<u64>() else {
                continue;
            };
            entries.push((kind, MessageId(id)));
        }
        RecordIndex { entries }
    }

    pub fn append(&mut self, kind: RecordKind, message: MessageId) {
        self.entries.push((kind, message));
    }

    pub fn contains(&self, message: MessageId) -> bool {
        self.entries.iter().any(|(_, id)| *id == message)
    }

    /// Most recently appended record of a kind.
    pub fn latest(&self, kind: RecordKind) -> Option<MessageId> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
    }

    /// Every record of a kind, in append order.
    pub fn ids(&self, kind: RecordKind) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn encode(&self) -> String {
        let mut out = String::from(Self::TAG);
        for (kind, id) in &self.entries {
            out.push('\n');
            out.push_str(kind.tag());
            out.push(' ');
            out.push_str(&id.0.to_string());
        }
        out
    }
}
