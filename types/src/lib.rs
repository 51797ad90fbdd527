//! Duelgrid domain types.
//!
//! Defines room/participant/battle state and the wire message contract shared by the
//! engine, the contract bridge, and the session service.

mod battle;
mod policy;
mod room;
mod wire;

pub use battle::*;
pub use policy::*;
pub use room::*;
pub use wire::*;

#[cfg(test)]
mod tests;
