//! Parties and the actors that act on their behalf.
//!
//! Role branching is a closed union: every decision that depends on who is
//! acting matches on [`Actor`] exhaustively.

use serde::{Deserialize, Serialize};

use scf_core::{DomainError, DomainResult, EntityId, Role, UserId};

/// A user acting for a business entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyActor {
    pub user_id: UserId,
    pub entity_id: EntityId,
}

/// The authenticated caller of a workflow operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    Buyer(PartyActor),
    Seller(PartyActor),
    Financier(PartyActor),
    Admin { user_id: UserId },
}

impl Actor {
    /// Build an actor from token claims. Non-admin roles must carry an entity.
    pub fn from_claims(user_id: UserId, role: Role, entity_id: Option<EntityId>) -> DomainResult<Self> {
        let party = |entity_id: Option<EntityId>| {
            entity_id
                .map(|entity_id| PartyActor { user_id, entity_id })
                .ok_or_else(|| DomainError::forbidden(format!("{role} principal has no entity")))
        };

        Ok(match role {
            Role::Buyer => Actor::Buyer(party(entity_id)?),
            Role::Seller => Actor::Seller(party(entity_id)?),
            Role::Financier => Actor::Financier(party(entity_id)?),
            Role::Admin => Actor::Admin { user_id },
        })
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Actor::Buyer(p) | Actor::Seller(p) | Actor::Financier(p) => p.user_id,
            Actor::Admin { user_id } => *user_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Actor::Buyer(_) => Role::Buyer,
            Actor::Seller(_) => Role::Seller,
            Actor::Financier(_) => Role::Financier,
            Actor::Admin { .. } => Role::Admin,
        }
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Actor::Buyer(p) | Actor::Seller(p) | Actor::Financier(p) => Some(p.entity_id),
            Actor::Admin { .. } => None,
        }
    }

    /// The invoice side this actor trades on, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            Actor::Buyer(_) => Some(Side::Buyer),
            Actor::Seller(_) => Some(Side::Seller),
            Actor::Financier(_) | Actor::Admin { .. } => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin { .. })
    }

    pub fn require_buyer(&self) -> DomainResult<&PartyActor> {
        match self {
            Actor::Buyer(p) => Ok(p),
            other => Err(DomainError::forbidden(format!("{} cannot act as buyer", other.role()))),
        }
    }

    pub fn require_seller(&self) -> DomainResult<&PartyActor> {
        match self {
            Actor::Seller(p) => Ok(p),
            other => Err(DomainError::forbidden(format!("{} cannot act as seller", other.role()))),
        }
    }

    pub fn require_financier(&self) -> DomainResult<&PartyActor> {
        match self {
            Actor::Financier(p) => Ok(p),
            other => Err(DomainError::forbidden(format!(
                "{} cannot act as financier",
                other.role()
            ))),
        }
    }

    pub fn require_admin(&self) -> DomainResult<UserId> {
        match self {
            Actor::Admin { user_id } => Ok(*user_id),
            other => Err(DomainError::forbidden(format!("{} is not an admin", other.role()))),
        }
    }
}

/// One side of an invoice (the trade counterparties).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buyer,
    Seller,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buyer => Side::Seller,
            Side::Seller => Side::Buyer,
        }
    }

    pub fn role(self) -> Role {
        match self {
            Side::Buyer => Role::Buyer,
            Side::Seller => Role::Seller,
        }
    }
}

/// Identity fields of a party as captured on a contract.
///
/// Contracts hold a copy taken at generation time; later profile edits never
/// reach an existing contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyProfile {
    pub entity_id: EntityId,
    pub legal_name: String,
    pub registration_number: String,
    pub address: String,
    pub contact_email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_admin_claims_require_an_entity() {
        let err = Actor::from_claims(UserId::new(), Role::Seller, None).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        let admin = Actor::from_claims(UserId::new(), Role::Admin, None).unwrap();
        assert!(admin.is_admin());
        assert_eq!(admin.entity_id(), None);
    }

    #[test]
    fn narrowing_rejects_other_roles() {
        let entity_id = EntityId::new();
        let actor = Actor::from_claims(UserId::new(), Role::Financier, Some(entity_id)).unwrap();

        assert_eq!(actor.require_financier().unwrap().entity_id, entity_id);
        assert!(actor.require_buyer().is_err());
        assert!(actor.require_admin().is_err());
        assert_eq!(actor.side(), None);
    }
}
