use std::collections::HashSet;

use thiserror::Error;

use wms_core::WarehouseId;

use crate::{default_role_permissions, Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("warehouse {0} is outside the principal's scope")]
    WarehouseOutOfScope(WarehouseId),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal for `required` within `warehouse_id`.
///
/// Effective permissions are the explicit grants plus everything implied by
/// the principal's roles.
///
/// - No IO
/// - No panics
pub fn authorize(
    principal: &Principal,
    required: &Permission,
    warehouse_id: WarehouseId,
) -> Result<(), AuthzError> {
    if !principal.warehouses.contains(warehouse_id) {
        return Err(AuthzError::WarehouseOutOfScope(warehouse_id));
    }
    if has_permission(principal, required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Permission check that ignores warehouse scope.
pub fn has_permission(principal: &Principal, required: &Permission) -> bool {
    let role_perms: Vec<Permission> = principal
        .roles
        .iter()
        .flat_map(default_role_permissions)
        .collect();

    let perms: HashSet<&str> = principal
        .permissions
        .iter()
        .chain(role_perms.iter())
        .map(|p| p.as_str())
        .collect();

    perms.contains("*") || perms.contains(required.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use wms_core::UserId;

    #[test]
    fn has_permission_ignores_scope() {
        let p = Principal::new(UserId::new(), vec![Role::AUDITOR]).restricted_to(Vec::<WarehouseId>::new());
        assert!(has_permission(&p, &Permission::AUDIT_READ));
        assert!(!has_permission(&p, &Permission::DOCUMENTS_WRITE));
    }

    #[test]
    fn admin_wildcard_grants_everything() {
        let p = Principal::system(UserId::new());
        assert!(authorize(&p, &Permission::DOCUMENTS_CONFIRM, WarehouseId::new()).is_ok());
    }

    #[test]
    fn operator_cannot_confirm() {
        let p = Principal::new(UserId::new(), vec![Role::OPERATOR]);
        let wh = WarehouseId::new();
        assert!(authorize(&p, &Permission::DOCUMENTS_WRITE, wh).is_ok());
        assert_eq!(
            authorize(&p, &Permission::DOCUMENTS_CONFIRM, wh),
            Err(AuthzError::Forbidden("documents.confirm".to_string()))
        );
    }

    #[test]
    fn explicit_grant_supplements_roles() {
        let p = Principal::new(UserId::new(), vec![Role::OPERATOR])
            .with_permission(Permission::DOCUMENTS_CONFIRM);
        assert!(authorize(&p, &Permission::DOCUMENTS_CONFIRM, WarehouseId::new()).is_ok());
    }

    #[test]
    fn warehouse_scope_is_enforced_before_permissions() {
        let home = WarehouseId::new();
        let other = WarehouseId::new();
        let p = Principal::system(UserId::new()).restricted_to([home]);

        assert!(authorize(&p, &Permission::STOCK_READ, home).is_ok());
        assert_eq!(
            authorize(&p, &Permission::STOCK_READ, other),
            Err(AuthzError::WarehouseOutOfScope(other))
        );
    }

    #[test]
    fn unknown_role_grants_nothing() {
        let p = Principal::new(UserId::new(), vec![Role::new("intern")]);
        assert!(authorize(&p, &Permission::STOCK_READ, WarehouseId::new()).is_err());
    }
}
