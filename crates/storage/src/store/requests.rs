#![forbid(unsafe_code)]

use ac_core::ids::{GroupId, UserId, WorkspaceId};
use ac_core::model::{
    Action, GroupRole, MemberRole, Permission, ResourceRef, UserStatus, WorkspaceKind,
    WorkspaceStatus,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRow {
    pub user_id: String,
    pub status: UserStatus,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRow {
    pub group_id: String,
    pub name: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMemberRow {
    pub group_id: String,
    pub user_id: String,
    pub role: GroupRole,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceRow {
    pub workspace_id: String,
    pub kind: WorkspaceKind,
    pub name: String,
    pub status: WorkspaceStatus,
    pub owner_user_id: Option<String>,
    pub owner_group_id: Option<String>,
    pub owner_system_tag: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceMemberRow {
    pub workspace_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub granted_by: String,
    pub granted_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclGrantRow {
    pub workspace_id: String,
    pub resource: ResourceRef,
    pub target_user_id: Option<String>,
    pub target_group_id: Option<String>,
    pub permission: Permission,
    pub granted_by: String,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationLease {
    pub conversation_id: String,
    pub holder: String,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRow {
    pub seq: i64,
    pub ts_ms: i64,
    pub workspace_id: Option<String>,
    pub user_id: Option<String>,
    pub event_type: String,
    pub payload_json: String,
}

impl EventRow {
    pub fn event_id(&self) -> String {
        format!("evt_{:016}", self.seq)
    }
}

/// Either side an ad-hoc grant can point at; exactly one, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantTarget {
    User(UserId),
    Group(GroupId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRequest {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub action: Action,
    pub resource: Option<ResourceRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceMemberAddRequest {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub granted_by: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclGrantRequest {
    pub workspace_id: WorkspaceId,
    pub resource: ResourceRef,
    pub target: GrantTarget,
    pub permission: Permission,
    pub granted_by: UserId,
    pub expires_at_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclRevokeRequest {
    pub workspace_id: WorkspaceId,
    pub resource: ResourceRef,
    pub target: GrantTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeRequest {
    pub source_id: UserId,
    pub target_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub canonical_user_id: String,
    /// The target's active workspace after the merge, when one exists.
    pub workspace_id: Option<String>,
    /// Set when the source's workspace was archived instead of reassigned.
    pub archived_workspace_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseClaimRequest {
    pub conversation_id: String,
    pub holder: String,
    pub ttl_ms: i64,
    pub force: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseRenewRequest {
    pub conversation_id: String,
    pub holder: String,
    pub ttl_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseReleaseRequest {
    pub conversation_id: String,
    pub holder: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEventsRequest {
    pub workspace_id: Option<WorkspaceId>,
    pub since_event_id: Option<String>,
    pub limit: usize,
}
