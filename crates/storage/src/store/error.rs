#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    AliasCycle {
        start: String,
    },
    AliasChainTooDeep {
        start: String,
    },
    AliasNotFound {
        id: String,
    },
    UnknownUser,
    UnknownGroup,
    UnknownWorkspace,
    OwnershipInvariant(&'static str),
    GroupAlreadyOwnsWorkspace,
    MergeConflict(&'static str),
    ConversationLeaseHeld {
        conversation_id: String,
        holder: String,
        expires_at_ms: i64,
    },
    ConversationLeaseNotHeld {
        conversation_id: String,
        holder: Option<String>,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::AliasCycle { start } => write!(f, "alias cycle detected (start={start})"),
            Self::AliasChainTooDeep { start } => {
                write!(f, "alias chain too deep (start={start})")
            }
            Self::AliasNotFound { id } => write!(f, "no identity record for {id}"),
            Self::UnknownUser => write!(f, "unknown user"),
            Self::UnknownGroup => write!(f, "unknown group"),
            Self::UnknownWorkspace => write!(f, "unknown workspace"),
            Self::OwnershipInvariant(message) => {
                write!(f, "ownership invariant violated: {message}")
            }
            Self::GroupAlreadyOwnsWorkspace => write!(f, "group already owns a workspace"),
            Self::MergeConflict(message) => write!(f, "merge conflict: {message}"),
            Self::ConversationLeaseHeld {
                conversation_id,
                holder,
                expires_at_ms,
            } => write!(
                f,
                "conversation lease held (conversation={conversation_id}, holder={holder}, expires_at_ms={expires_at_ms})"
            ),
            Self::ConversationLeaseNotHeld {
                conversation_id,
                holder,
            } => match holder {
                Some(holder) => write!(
                    f,
                    "conversation lease not held (conversation={conversation_id}, holder={holder})"
                ),
                None => write!(
                    f,
                    "conversation lease not held (conversation={conversation_id}, no active lease)"
                ),
            },
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
