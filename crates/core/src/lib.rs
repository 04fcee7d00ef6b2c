//! `scf-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the financing
//! workflow, the auth boundary and the infrastructure layer (no IO).

pub mod entity;
pub mod error;
pub mod id;
pub mod role;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, EntityId, UserId};
pub use role::Role;
pub use value_object::{Percentage, ValueObject};
