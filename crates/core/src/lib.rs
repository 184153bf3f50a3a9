#![forbid(unsafe_code)]

pub mod ids {
    /// Channel-namespaced identity string, e.g. `anon:1` or `email:x`.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct UserId(String);

    impl UserId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, true)?;
            let Some((namespace, subject)) = value.split_once(':') else {
                return Err(IdError::MissingNamespace);
            };
            if namespace.is_empty() || subject.is_empty() {
                return Err(IdError::MissingNamespace);
            }
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GroupId(String);

    impl GroupId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, false)?;
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct WorkspaceId(String);

    impl WorkspaceId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, false)?;
            Ok(Self(value))
        }
    }

    /// Conversation handles arrive from channel adapters and may carry a
    /// channel namespace of their own (`slack:C042/17`).
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ConversationId(String);

    impl ConversationId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_token(&value, true)?;
            Ok(Self(value))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdError {
        Empty,
        TooLong,
        MissingNamespace,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for IdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "identifier is empty"),
                Self::TooLong => write!(f, "identifier exceeds 128 chars"),
                Self::MissingNamespace => {
                    write!(f, "identifier must be namespace:subject")
                }
                Self::InvalidChar { ch, index } => {
                    write!(f, "invalid char {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for IdError {}

    fn validate_token(value: &str, allow_colon: bool) -> Result<(), IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > 128 {
            return Err(IdError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-' | '@' | '+') {
                continue;
            }
            if ch == ':' && allow_colon {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }
}

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum UserStatus {
        Active,
        Suspended,
    }

    impl UserStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Active => "active",
                Self::Suspended => "suspended",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "active" => Some(Self::Active),
                "suspended" => Some(Self::Suspended),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum WorkspaceKind {
        Individual,
        Group,
        Public,
    }

    impl WorkspaceKind {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Individual => "individual",
                Self::Group => "group",
                Self::Public => "public",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "individual" => Some(Self::Individual),
                "group" => Some(Self::Group),
                "public" => Some(Self::Public),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum WorkspaceStatus {
        Active,
        Archived,
    }

    impl WorkspaceStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Active => "active",
                Self::Archived => "archived",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "active" => Some(Self::Active),
                "archived" => Some(Self::Archived),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Action {
        Read,
        Write,
        Admin,
    }

    impl Action {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Read => "read",
                Self::Write => "write",
                Self::Admin => "admin",
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum GroupRole {
        Admin,
        Member,
    }

    impl GroupRole {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Admin => "admin",
                Self::Member => "member",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "admin" => Some(Self::Admin),
                "member" => Some(Self::Member),
                _ => None,
            }
        }

        /// Group admins stop at read+write; full control needs ownership or
        /// an explicit workspace admin grant.
        pub fn allows(self, action: Action) -> bool {
            match self {
                Self::Admin => matches!(action, Action::Read | Action::Write),
                Self::Member => matches!(action, Action::Read),
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MemberRole {
        Admin,
        Editor,
        Reader,
    }

    impl MemberRole {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Admin => "admin",
                Self::Editor => "editor",
                Self::Reader => "reader",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "admin" => Some(Self::Admin),
                "editor" => Some(Self::Editor),
                "reader" => Some(Self::Reader),
                _ => None,
            }
        }

        pub fn allows(self, action: Action) -> bool {
            match self {
                Self::Admin => true,
                Self::Editor => matches!(action, Action::Read | Action::Write),
                Self::Reader => matches!(action, Action::Read),
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Permission {
        Read,
        Write,
    }

    impl Permission {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Read => "read",
                Self::Write => "write",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "read" => Some(Self::Read),
                "write" => Some(Self::Write),
                _ => None,
            }
        }

        /// Resource grants never carry admin.
        pub fn covers(self, action: Action) -> bool {
            match self {
                Self::Write => matches!(action, Action::Read | Action::Write),
                Self::Read => matches!(action, Action::Read),
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum StorageKind {
        Files,
        Records,
        Search,
        Reminders,
    }

    impl StorageKind {
        pub const ALL: [StorageKind; 4] = [
            StorageKind::Files,
            StorageKind::Records,
            StorageKind::Search,
            StorageKind::Reminders,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                Self::Files => "files",
                Self::Records => "records",
                Self::Search => "search",
                Self::Reminders => "reminders",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "files" => Some(Self::Files),
                "records" => Some(Self::Records),
                "search" => Some(Self::Search),
                "reminders" => Some(Self::Reminders),
                _ => None,
            }
        }
    }

    /// A storage resource addressed by an ad-hoc grant.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ResourceRef {
        pub kind: StorageKind,
        pub resource_id: String,
    }
}

pub mod context {
    use crate::ids::{ConversationId, UserId, WorkspaceId};

    /// Immutable per-message context. Built once when a message arrives and
    /// threaded explicitly through every call; never stored in a global.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct RequestContext {
        user: UserId,
        workspace: Option<WorkspaceId>,
        conversation: Option<ConversationId>,
        explicit_workspace: Option<WorkspaceId>,
    }

    impl RequestContext {
        pub fn new(
            user: UserId,
            workspace: Option<WorkspaceId>,
            conversation: Option<ConversationId>,
        ) -> Self {
            Self {
                user,
                workspace,
                conversation,
                explicit_workspace: None,
            }
        }

        /// Returns a copy pinned to an explicitly chosen workspace. The
        /// explicit choice outranks anything ambient.
        pub fn with_explicit_workspace(&self, workspace: WorkspaceId) -> Self {
            let mut ctx = self.clone();
            ctx.explicit_workspace = Some(workspace);
            ctx
        }

        pub fn user(&self) -> &UserId {
            &self.user
        }

        pub fn workspace(&self) -> Option<&WorkspaceId> {
            self.workspace.as_ref()
        }

        pub fn conversation(&self) -> Option<&ConversationId> {
            self.conversation.as_ref()
        }

        pub fn explicit_workspace(&self) -> Option<&WorkspaceId> {
            self.explicit_workspace.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ids::{IdError, UserId};
    use super::model::{Action, GroupRole, MemberRole, Permission};

    #[test]
    fn user_id_requires_namespace() {
        assert!(UserId::try_new("email:x").is_ok());
        assert_eq!(UserId::try_new("email:"), Err(IdError::MissingNamespace));
        assert_eq!(UserId::try_new(":x"), Err(IdError::MissingNamespace));
        assert_eq!(UserId::try_new("plain"), Err(IdError::MissingNamespace));
        assert_eq!(UserId::try_new(""), Err(IdError::Empty));
    }

    #[test]
    fn user_id_rejects_whitespace() {
        match UserId::try_new("email:a b") {
            Err(IdError::InvalidChar { ch: ' ', index: 7 }) => {}
            other => panic!("expected InvalidChar, got {other:?}"),
        }
    }

    #[test]
    fn member_roles_are_monotonic() {
        for action in [Action::Read, Action::Write, Action::Admin] {
            if MemberRole::Reader.allows(action) {
                assert!(MemberRole::Editor.allows(action));
            }
            if MemberRole::Editor.allows(action) {
                assert!(MemberRole::Admin.allows(action));
            }
        }
    }

    #[test]
    fn group_admin_is_capped_below_admin_action() {
        assert!(GroupRole::Admin.allows(Action::Write));
        assert!(!GroupRole::Admin.allows(Action::Admin));
        assert!(GroupRole::Member.allows(Action::Read));
        assert!(!GroupRole::Member.allows(Action::Write));
    }

    #[test]
    fn write_permission_covers_read() {
        assert!(Permission::Write.covers(Action::Read));
        assert!(Permission::Write.covers(Action::Write));
        assert!(!Permission::Read.covers(Action::Write));
        assert!(!Permission::Write.covers(Action::Admin));
    }
}
