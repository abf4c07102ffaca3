//! # Engine State Machine
//!
//! Pure reducer from `(EngineState, Input)` to the next state plus the side
//! effects the orchestrator must carry out.
//!
//! ```text
//! Idle ──load──> NotPlaying ──playing──> Playing ──paused──> Paused
//!                                          │  ▲               │
//!                                   stalled│  │playing        │stalled
//!                                          ▼  │               ▼
//!                                         Stalled <───────────┘
//!
//! any ──fatal on current──> NotPlaying      any ──unload/reset──> Idle
//! ```

use bridge_traits::session::InterruptionKind;
use core_runtime::events::EngineState;

/// Something that may move the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// A new current item started loading.
    LoadRequested,
    BackendPlaying,
    BackendPaused,
    BackendStalled,
    /// Promotion onto an item that is not ready to play yet.
    SkipStalled,
    /// A failure on the current item was surfaced.
    Failed,
    /// Both slots were cleared.
    Cleared,
}

/// Collaborative-session synchronization for the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollabSync {
    Resume,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    NotifyStateChanged { from: EngineState, to: EngineState },
    Collab(CollabSync),
    CrossDeviceInterrupted(InterruptionKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: EngineState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: EngineState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    pub fn changed(&self, from: EngineState) -> bool {
        self.state != from
    }
}

pub fn reduce(state: EngineState, input: Input) -> Transition {
    use EngineState::*;

    let target = match (state, input) {
        (_, Input::Cleared) => Idle,
        (_, Input::LoadRequested) => NotPlaying,
        (_, Input::Failed) => NotPlaying,
        (Idle, _) => Idle,
        (_, Input::BackendPlaying) => Playing,
        (Playing | Stalled, Input::BackendPaused) => Paused,
        (Playing | Paused, Input::BackendStalled) => Stalled,
        (_, Input::SkipStalled) => Stalled,
        (current, _) => current,
    };

    if target == state {
        return Transition::unchanged(state);
    }

    let mut effects = vec![Effect::NotifyStateChanged {
        from: state,
        to: target,
    }];

    if target == Playing {
        effects.push(Effect::Collab(CollabSync::Resume));
    } else if state == Playing && matches!(target, Paused | Stalled | NotPlaying) {
        effects.push(Effect::Collab(CollabSync::Pause));
    }

    match (state, target) {
        (Playing, Paused) => effects.push(Effect::CrossDeviceInterrupted(InterruptionKind::Paused)),
        (Playing, Stalled) => {
            effects.push(Effect::CrossDeviceInterrupted(InterruptionKind::Stalled))
        }
        _ => {}
    }

    Transition {
        state: target,
        effects,
    }
}
