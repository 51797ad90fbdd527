//! Duelgrid engine.
//!
//! Deterministic state machines for rooms, readiness/countdown, and turn
//! coordination. The session service drives these; the engine itself performs
//! no I/O.
//!
//! ## Determinism requirements
//! - No wall-clock time inside the engine; callers pass timestamps in.
//! - No ambient randomness; room-code generation draws from an injected `Rng`.
//! - No network or ledger calls; broadcasting and settlement are the caller's
//!   concern.

mod battle;
mod damage;
mod registry;
mod session;

pub use battle::{ActionOutcome, Battle, BattleError, TurnEnd};
pub use damage::{ComboScaledDamage, DamageModel, COMBO_BONUS_PERCENT};
pub use registry::{LeaveOutcome, RoomError, RoomRegistry, MAX_CODE_ATTEMPTS};
pub use session::{
    CountdownStep, DisconnectOutcome, ReadyOutcome, RoomSession, SessionError, COUNTDOWN_START,
};
