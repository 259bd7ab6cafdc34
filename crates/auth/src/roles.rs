use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const MANAGER: Role = Role(Cow::Borrowed("manager"));
    pub const OPERATOR: Role = Role(Cow::Borrowed("operator"));
    pub const AUDITOR: Role = Role(Cow::Borrowed("auditor"));
    pub const VIEWER: Role = Role(Cow::Borrowed("viewer"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Built-in role → permission mapping.
///
/// Unknown roles grant nothing.
pub fn default_role_permissions(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "admin" => vec![Permission::WILDCARD],
        "manager" => vec![
            Permission::DOCUMENTS_READ,
            Permission::DOCUMENTS_WRITE,
            Permission::DOCUMENTS_CONFIRM,
            Permission::DOCUMENTS_CANCEL,
            Permission::COUNTS_WRITE,
            Permission::COUNTS_COMPLETE,
            Permission::STOCK_READ,
            Permission::AUDIT_READ,
        ],
        // Floor staff prepare documents and record counts; confirmation is a
        // manager decision.
        "operator" => vec![
            Permission::DOCUMENTS_READ,
            Permission::DOCUMENTS_WRITE,
            Permission::COUNTS_WRITE,
            Permission::STOCK_READ,
        ],
        "auditor" => vec![
            Permission::DOCUMENTS_READ,
            Permission::STOCK_READ,
            Permission::AUDIT_READ,
        ],
        "viewer" => vec![Permission::DOCUMENTS_READ, Permission::STOCK_READ],
        _ => vec![],
    }
}
