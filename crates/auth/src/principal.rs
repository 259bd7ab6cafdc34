use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use wms_core::{UserId, WarehouseId};

use crate::{Permission, Role};

/// Which warehouses a principal may act in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseScope {
    All,
    Only(HashSet<WarehouseId>),
}

impl WarehouseScope {
    pub fn contains(&self, warehouse_id: WarehouseId) -> bool {
        match self {
            WarehouseScope::All => true,
            WarehouseScope::Only(set) => set.contains(&warehouse_id),
        }
    }
}

/// A fully resolved actor for authorization decisions.
///
/// Construction is decoupled from transport: the request layer derives roles,
/// explicit grants and warehouse scope from whatever it authenticates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    pub warehouses: WarehouseScope,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self {
            user_id,
            roles,
            permissions: Vec::new(),
            warehouses: WarehouseScope::All,
        }
    }

    /// Convenience for tooling and tests: an all-powerful principal.
    pub fn system(user_id: UserId) -> Self {
        Self::new(user_id, vec![Role::ADMIN])
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn restricted_to(mut self, warehouses: impl IntoIterator<Item = WarehouseId>) -> Self {
        self.warehouses = WarehouseScope::Only(warehouses.into_iter().collect());
        self
    }
}
