//! Per-request pipeline state machine:
//! Received → Classified → Validated → CacheConsult → HitTerminal | Forwarding
//! → Responded | Errored. Cache write-back happens beside Forwarding and
//! does not have a state of its own.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Received,
    Classified,
    Validated,
    CacheConsult,
    HitTerminal,
    Forwarding,
    Responded,
    Errored,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "Received",
            PipelineState::Classified => "Classified",
            PipelineState::Validated => "Validated",
            PipelineState::CacheConsult => "CacheConsult",
            PipelineState::HitTerminal => "HitTerminal",
            PipelineState::Forwarding => "Forwarding",
            PipelineState::Responded => "Responded",
            PipelineState::Errored => "Errored",
        };
        f.write_str(name)
    }
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::HitTerminal | PipelineState::Responded | PipelineState::Errored
        )
    }

    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Classified, Validated)
                | (Validated, CacheConsult)
                | (CacheConsult, HitTerminal)
                | (CacheConsult, Forwarding)
                | (Forwarding, Responded)
        ) || (!self.is_terminal() && next == Errored)
    }
}

/// Tracks the state of one request. Not shared between requests.
#[derive(Debug)]
pub struct RequestStateMachine {
    state: PipelineState,
}

impl Default for RequestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Received,
        }
    }

    pub fn current(&self) -> PipelineState {
        self.state
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&mut self, next: PipelineState) -> Result<PipelineState, String> {
        let current = self.state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {current} -> {next}");
            warn!("{}", msg);
            return Err(msg);
        }
        self.state = next;
        debug!(from = %current, to = %next, "pipeline_transition");
        Ok(next)
    }

    /// Move to `Errored` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            let prev = self.state;
            self.state = PipelineState::Errored;
            debug!(from = %prev, "pipeline_errored");
        }
    }
}
