use scf_auth::{JwtClaims, Principal};
use scf_core::DomainResult;
use scf_financing::Actor;

/// Authenticated caller for a request.
///
/// Built once by the auth middleware; handlers read it from request
/// extensions and pass the [`Actor`] to the workflow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
    actor: Actor,
}

impl PrincipalContext {
    pub fn from_claims(claims: &JwtClaims) -> DomainResult<Self> {
        let actor = Actor::from_claims(claims.sub, claims.role, claims.entity_id)?;
        Ok(Self {
            principal: Principal {
                user_id: claims.sub,
                role: claims.role,
                entity_id: claims.entity_id,
            },
            actor,
        })
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}
