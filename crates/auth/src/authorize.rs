use thiserror::Error;

use scf_core::{EntityId, Role, UserId};

use crate::Permission;

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    pub entity_id: Option<EntityId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {role} lacks permission '{permission}'")]
    Forbidden { role: Role, permission: String },
}

const BUYER: &[Permission] = &[
    Permission::INVOICE_READ,
    Permission::INVOICE_UPLOAD,
    Permission::INVOICE_RESPOND,
    Permission::INVOICE_DISPUTE,
    Permission::OFFER_CREATE,
    Permission::FUNDING_SELECT,
    Permission::PAYMENT_AUTHORIZE,
    Permission::BID_ACCEPT,
    Permission::CONTRACT_READ,
];

const SELLER: &[Permission] = &[
    Permission::INVOICE_READ,
    Permission::INVOICE_UPLOAD,
    Permission::INVOICE_RESPOND,
    Permission::INVOICE_DISPUTE,
    Permission::OFFER_RESPOND,
    Permission::FUNDING_SELECT,
    Permission::BID_ACCEPT,
    Permission::CONTRACT_READ,
];

const FINANCIER: &[Permission] = &[
    Permission::INVOICE_READ,
    Permission::MARKETPLACE_READ,
    Permission::BID_PLACE,
    Permission::DISBURSE,
    Permission::REPAYMENT_SETTLE,
    Permission::CONTRACT_READ,
];

const ADMIN: &[Permission] = &[Permission::WILDCARD];

/// Static role → permission policy.
pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Buyer => BUYER,
        Role::Seller => SELLER,
        Role::Financier => FINANCIER,
        Role::Admin => ADMIN,
    }
}

/// Authorize a principal for a single permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = permissions_for(principal.role)
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role,
            permission: required.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: UserId::new(),
            role,
            entity_id: Some(EntityId::new()),
        }
    }

    #[test]
    fn admin_wildcard_grants_everything() {
        let admin = principal(Role::Admin);
        assert!(authorize(&admin, &Permission::OPERATIONS).is_ok());
        assert!(authorize(&admin, &Permission::new("anything.at.all")).is_ok());
    }

    #[test]
    fn roles_only_get_their_own_actions() {
        assert!(authorize(&principal(Role::Financier), &Permission::BID_PLACE).is_ok());
        assert!(authorize(&principal(Role::Buyer), &Permission::BID_PLACE).is_err());
        assert!(authorize(&principal(Role::Seller), &Permission::OFFER_CREATE).is_err());
        assert_eq!(
            authorize(&principal(Role::Financier), &Permission::OPERATIONS),
            Err(AuthzError::Forbidden {
                role: Role::Financier,
                permission: "ops.manage".to_string()
            })
        );
    }
}
