//! Ether host -- runs an effect registry against a simulated world.
//!
//! This crate provides the pieces around an [`ether_core`] registry that a
//! game would otherwise supply:
//!
//! - [`world`]: an in-memory world with actors that can be unloaded and
//!   reloaded, and the two effect kinds the registry is used for.
//! - [`host`]: a fixed-timestep host that ticks effects and the registry and
//!   saves the registry document periodically.
//! - [`linking`]: portal pairing on top of entry claims.
//! - [`ward`]: spatial "is this block warded" queries.

#![deny(unsafe_code)]

pub mod host;
pub mod linking;
pub mod ward;
pub mod world;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::host::{HostConfig, HostDiagnostics, WorldHost};
    pub use crate::linking::{portal_type, Destination};
    pub use crate::ward::{blocks_at, ward_type};
    pub use crate::world::{ActorSpec, EffectKind, PortalState, SimActor, SimEffect, SimWorld};
    pub use ether_core::prelude::*;
}
