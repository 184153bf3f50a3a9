#![forbid(unsafe_code)]

mod config;
mod error;

pub use config::EngineConfig;
pub use error::EngineError;

pub use ac_core::context::RequestContext;
pub use ac_core::ids::{ConversationId, GroupId, UserId, WorkspaceId};
pub use ac_core::model::{
    Action, GroupRole, MemberRole, Permission, ResourceRef, StorageKind, UserStatus,
    WorkspaceKind, WorkspaceStatus,
};
pub use ac_storage::{
    AclGrantRequest, AclGrantRow, AclRevokeRequest, ConversationLease, EventRow, GrantTarget,
    GroupMemberRow, GroupRow, LeaseClaimRequest, LeaseReleaseRequest, LeaseRenewRequest,
    ListEventsRequest, MergeOutcome, MergeRequest, UserRow, WorkspaceMemberAddRequest,
    WorkspaceMemberRow, WorkspaceRow,
};

use ac_storage::{AccessRequest, SqliteStore, StoreError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// The authorization and routing engine the agent runtime links against.
/// One instance per process; every call is scoped by an explicit
/// [`RequestContext`], never by shared per-request globals.
#[derive(Debug)]
pub struct Engine {
    store: Mutex<SqliteStore>,
    config: EngineConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkspaceSummary {
    pub workspace_id: String,
    pub kind: String,
    pub name: String,
    pub status: String,
    pub created_at_ms: i64,
}

impl From<WorkspaceRow> for WorkspaceSummary {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            workspace_id: row.workspace_id,
            kind: row.kind.as_str().to_string(),
            name: row.name,
            status: row.status.as_str().to_string(),
            created_at_ms: row.created_at_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub action: String,
    pub workspace_id: String,
    pub resource_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub canonical_user_id: String,
    pub workspace_id: Option<String>,
    pub archived_workspace_id: Option<String>,
}

impl From<MergeOutcome> for MergeSummary {
    fn from(outcome: MergeOutcome) -> Self {
        Self {
            canonical_user_id: outcome.canonical_user_id,
            workspace_id: outcome.workspace_id,
            archived_workspace_id: outcome.archived_workspace_id,
        }
    }
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let store = SqliteStore::open(&config.storage_dir)?;
        Ok(Self {
            store: Mutex::new(store),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStore>, EngineError> {
        self.store.lock().map_err(|_| EngineError::StoreUnavailable)
    }

    /// Entry point per inbound message: the channel adapter hands over the
    /// authenticated identity and the conversation handle, and gets back the
    /// immutable context every subsequent call carries.
    pub fn session_begin(
        &self,
        raw_identity: &str,
        conversation_id: &str,
    ) -> Result<RequestContext, EngineError> {
        let user = UserId::try_new(raw_identity).map_err(EngineError::InvalidIdentity)?;
        let conversation =
            ConversationId::try_new(conversation_id).map_err(EngineError::InvalidIdentity)?;

        let mut store = self.store()?;
        let canonical = match store.resolve_canonical(&user) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => {
                store.ensure_user(&user)?;
                user.clone()
            }
            Err(err) => return Err(err.into()),
        };
        let workspace = store.ensure_conversation_workspace(&conversation, &canonical)?;

        Ok(RequestContext::new(
            canonical,
            Some(workspace),
            Some(conversation),
        ))
    }

    /// One resolution path shared by every storage kind: explicit choice,
    /// then ambient workspace, then the conversation binding. A missing
    /// context is an error, never a substitute root — the `kind` parameter
    /// labels the failure but can never change the answer.
    pub fn resolve_root(
        &self,
        kind: StorageKind,
        ctx: &RequestContext,
    ) -> Result<WorkspaceId, EngineError> {
        if let Some(workspace) = ctx.explicit_workspace() {
            let store = self.store()?;
            return match store.workspace_get(workspace)? {
                Some(_) => Ok(workspace.clone()),
                None => Err(EngineError::Store(StoreError::UnknownWorkspace)),
            };
        }
        if let Some(workspace) = ctx.workspace() {
            return Ok(workspace.clone());
        }
        if let Some(conversation) = ctx.conversation() {
            let store = self.store()?;
            if let Some(workspace) = store.conversation_binding_get(conversation)? {
                return Ok(workspace);
            }
        }
        Err(EngineError::NoContext { kind })
    }

    pub fn can_access(
        &self,
        user: &UserId,
        workspace: &WorkspaceId,
        action: Action,
        resource: Option<ResourceRef>,
    ) -> Result<bool, EngineError> {
        let store = self.store()?;
        Ok(store.can_access(&AccessRequest {
            user_id: user.clone(),
            workspace_id: workspace.clone(),
            action,
            resource,
        })?)
    }

    pub fn check_access(
        &self,
        kind: StorageKind,
        ctx: &RequestContext,
        action: Action,
        resource: Option<ResourceRef>,
    ) -> Result<AccessDecision, EngineError> {
        let workspace = self.resolve_root(kind, ctx)?;
        let resource_id = resource.as_ref().map(|r| r.resource_id.clone());
        let allowed = self.can_access(ctx.user(), &workspace, action, resource)?;
        Ok(AccessDecision {
            allowed,
            action: action.as_str().to_string(),
            workspace_id: workspace.as_str().to_string(),
            resource_id,
        })
    }

    /// Resolve + authorize in one step; storage backends call this before
    /// touching bytes and use the returned root.
    pub fn authorize(
        &self,
        kind: StorageKind,
        ctx: &RequestContext,
        action: Action,
        resource: Option<ResourceRef>,
    ) -> Result<WorkspaceId, EngineError> {
        let workspace = self.resolve_root(kind, ctx)?;
        let resource_id = resource.as_ref().map(|r| r.resource_id.clone());
        if self.can_access(ctx.user(), &workspace, action, resource)? {
            Ok(workspace)
        } else {
            Err(EngineError::PermissionDenied {
                action,
                resource: resource_id,
            })
        }
    }

    pub fn merge_identities(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<MergeSummary, EngineError> {
        let source_id = UserId::try_new(source_id).map_err(EngineError::InvalidIdentity)?;
        let target_id = UserId::try_new(target_id).map_err(EngineError::InvalidIdentity)?;
        let mut store = self.store()?;
        let outcome = store.merge_identities(MergeRequest {
            source_id,
            target_id,
        })?;
        Ok(outcome.into())
    }

    pub fn resolve_canonical(&self, id: &UserId) -> Result<UserId, EngineError> {
        let store = self.store()?;
        Ok(store.resolve_canonical(id)?)
    }

    pub fn user_set_status(
        &self,
        user: &UserId,
        status: UserStatus,
    ) -> Result<UserRow, EngineError> {
        let mut store = self.store()?;
        Ok(store.user_set_status(user, status)?)
    }

    pub fn describe_workspace(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<WorkspaceSummary>, EngineError> {
        let store = self.store()?;
        Ok(store.workspace_get(workspace)?.map(WorkspaceSummary::from))
    }

    pub fn create_group(&self, name: &str) -> Result<GroupRow, EngineError> {
        let mut store = self.store()?;
        Ok(store.create_group(name)?)
    }

    pub fn create_group_workspace(
        &self,
        group: &GroupId,
        name: &str,
    ) -> Result<WorkspaceId, EngineError> {
        let mut store = self.store()?;
        Ok(store.create_group_workspace(group, name)?)
    }

    pub fn ensure_public_workspace(&self) -> Result<WorkspaceId, EngineError> {
        let mut store = self.store()?;
        Ok(store.ensure_public_workspace(&self.config.public_workspace_name)?)
    }

    pub fn group_member_add(
        &self,
        group: &GroupId,
        user: &UserId,
        role: GroupRole,
    ) -> Result<GroupMemberRow, EngineError> {
        let mut store = self.store()?;
        Ok(store.group_member_add(group, user, role)?)
    }

    pub fn group_member_remove(
        &self,
        group: &GroupId,
        user: &UserId,
    ) -> Result<bool, EngineError> {
        let mut store = self.store()?;
        Ok(store.group_member_remove(group, user)?)
    }

    pub fn workspace_member_add(
        &self,
        request: WorkspaceMemberAddRequest,
    ) -> Result<WorkspaceMemberRow, EngineError> {
        let mut store = self.store()?;
        Ok(store.workspace_member_add(request)?)
    }

    pub fn workspace_member_remove(
        &self,
        workspace: &WorkspaceId,
        user: &UserId,
    ) -> Result<bool, EngineError> {
        let mut store = self.store()?;
        Ok(store.workspace_member_remove(workspace, user)?)
    }

    pub fn user_get(&self, user: &UserId) -> Result<Option<UserRow>, EngineError> {
        let store = self.store()?;
        Ok(store.user_get(user)?)
    }

    pub fn list_group_members(&self, group: &GroupId) -> Result<Vec<GroupMemberRow>, EngineError> {
        let store = self.store()?;
        Ok(store.list_group_members(group)?)
    }

    pub fn list_workspace_members(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMemberRow>, EngineError> {
        let store = self.store()?;
        Ok(store.list_workspace_members(workspace)?)
    }

    pub fn acl_list(
        &self,
        workspace: &WorkspaceId,
        resource: &ResourceRef,
    ) -> Result<Vec<AclGrantRow>, EngineError> {
        let store = self.store()?;
        Ok(store.acl_list(workspace, resource)?)
    }

    pub fn acl_grant(&self, request: AclGrantRequest) -> Result<AclGrantRow, EngineError> {
        let mut store = self.store()?;
        Ok(store.acl_grant(request)?)
    }

    pub fn acl_revoke(&self, request: AclRevokeRequest) -> Result<bool, EngineError> {
        let mut store = self.store()?;
        Ok(store.acl_revoke(request)?)
    }

    pub fn workspace_archive(&self, workspace: &WorkspaceId) -> Result<(), EngineError> {
        let mut store = self.store()?;
        Ok(store.workspace_archive(workspace)?)
    }

    pub fn conversation_lease_claim(
        &self,
        conversation: &ConversationId,
        holder: &str,
        force: bool,
    ) -> Result<ConversationLease, EngineError> {
        let mut store = self.store()?;
        Ok(store.conversation_lease_claim(LeaseClaimRequest {
            conversation_id: conversation.as_str().to_string(),
            holder: holder.to_string(),
            ttl_ms: self.config.lease_ttl_ms,
            force,
        })?)
    }

    pub fn conversation_lease_renew(
        &self,
        conversation: &ConversationId,
        holder: &str,
    ) -> Result<ConversationLease, EngineError> {
        let mut store = self.store()?;
        Ok(store.conversation_lease_renew(LeaseRenewRequest {
            conversation_id: conversation.as_str().to_string(),
            holder: holder.to_string(),
            ttl_ms: self.config.lease_ttl_ms,
        })?)
    }

    pub fn conversation_lease_release(
        &self,
        conversation: &ConversationId,
        holder: &str,
    ) -> Result<(), EngineError> {
        let mut store = self.store()?;
        Ok(store.conversation_lease_release(LeaseReleaseRequest {
            conversation_id: conversation.as_str().to_string(),
            holder: holder.to_string(),
        })?)
    }

    pub fn list_events(&self, request: ListEventsRequest) -> Result<Vec<EventRow>, EngineError> {
        let store = self.store()?;
        Ok(store.list_events(request)?)
    }
}
