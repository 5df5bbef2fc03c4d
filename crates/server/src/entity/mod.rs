//! Arena entities.
//!
//! Players, bots and split cells share one [`Entity`] type whose
//! [`EntityKind`] says who drives it. Pellets are plain data.

mod cell;
mod pellet;

pub use cell::{Boost, DeathInfo, Entity, EntityKind, EntityStats, SizeLimits};
pub use pellet::Pellet;
