//! Player lifecycle state.
//!
//! `Inactive -> Active -> Stopping -> Inactive`. The lifecycle owns the only
//! writer; pump threads read the cell as their run condition. Within one
//! session the transitions are monotonic, so a pump that reads a stale
//! `Active` just runs one more iteration.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayerState {
    Inactive = 0,
    Active = 1,
    Stopping = 2,
}

impl PlayerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Active,
            2 => Self::Stopping,
            _ => Self::Inactive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Atomic holder for a [`PlayerState`], shared between the lifecycle and
/// the pump threads via `Arc`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: PlayerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> PlayerState {
        PlayerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: PlayerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is(&self, state: PlayerState) -> bool {
        self.get() == state
    }

    /// Move from `from` to `to` only if the cell currently holds `from`.
    /// Returns `false` (and leaves the cell untouched) otherwise.
    pub fn transition(&self, from: PlayerState, to: PlayerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PlayerState::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inactive() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), PlayerState::Inactive);
    }

    #[test]
    fn transition_requires_expected_state() {
        let cell = StateCell::default();
        assert!(!cell.transition(PlayerState::Active, PlayerState::Stopping));
        assert_eq!(cell.get(), PlayerState::Inactive);

        assert!(cell.transition(PlayerState::Inactive, PlayerState::Active));
        assert!(cell.transition(PlayerState::Active, PlayerState::Stopping));
        assert!(cell.is(PlayerState::Stopping));
    }

    #[test]
    fn labels() {
        assert_eq!(PlayerState::Inactive.to_string(), "inactive");
        assert_eq!(PlayerState::Active.label(), "active");
        assert_eq!(PlayerState::Stopping.label(), "stopping");
    }
}
