//! Hooks fired on circuit state transitions

use std::sync::Arc;

pub type TransitionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// State change reported to [`TransitionHooks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Opened,
    Closed,
    HalfOpened,
}

/// Closures invoked with the command key when a circuit changes state
///
/// Hooks run on the caller's thread after the circuit's state lock is
/// released, so they may read the same breaker (state, metrics, statistics).
#[derive(Clone, Default)]
pub struct TransitionHooks {
    pub on_open: Option<TransitionHook>,
    pub on_close: Option<TransitionHook>,
    pub on_half_open: Option<TransitionHook>,
}

impl TransitionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fire(&self, transition: Transition, command: &str) {
        let hook = match transition {
            Transition::Opened => &self.on_open,
            Transition::Closed => &self.on_close,
            Transition::HalfOpened => &self.on_half_open,
        };
        if let Some(hook) = hook {
            hook(command);
        }
    }
}

impl std::fmt::Debug for TransitionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
