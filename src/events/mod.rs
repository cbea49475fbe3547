//! Observability events emitted by the engine
//!
//! Two event kinds: one per call (`CallResult`) and one per solver attempt
//! (`SolverAttempt`). Events go through an [`EventSink`]; the default sink
//! logs through tracing, and [`RecordingSink`] captures events for tests and
//! embedding hosts that need exact attempt ordering.

use crate::types::SolverOutcome;

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Events emitted during one orchestrated call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Terminal result of a call
    CallResult {
        call_id: Uuid,
        caller: Address,
        user: Address,
        winner: Option<Address>,
        auction_won: bool,
        timestamp: DateTime<Utc>,
    },

    /// One solver execution attempt, in the order attempts actually ran
    SolverAttempt {
        call_id: Uuid,
        solver: Address,
        /// Index into the submitted solver sequence
        index: usize,
        outcome: SolverOutcome,
        won: bool,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::CallResult { .. } => "call_result",
            EngineEvent::SolverAttempt { .. } => "solver_attempt",
        }
    }

    pub fn call_id(&self) -> Uuid {
        match self {
            EngineEvent::CallResult { call_id, .. } => *call_id,
            EngineEvent::SolverAttempt { call_id, .. } => *call_id,
        }
    }
}

/// Sink consuming engine events as they are emitted
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Default sink: structured log lines through tracing
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::CallResult {
                call_id,
                caller,
                user,
                winner,
                auction_won,
                ..
            } => {
                info!(
                    %call_id,
                    caller = ?caller,
                    user = ?user,
                    winner = ?winner,
                    auction_won,
                    "call result"
                );
            }
            EngineEvent::SolverAttempt {
                call_id,
                solver,
                index,
                outcome,
                won,
                ..
            } => {
                debug!(
                    %call_id,
                    solver = ?solver,
                    index,
                    outcome = %outcome,
                    won,
                    "solver attempt"
                );
            }
        }
    }
}

/// Sink that records every event in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("event sink poisoned").clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock().expect("event sink poisoned"))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().expect("event sink poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        let call_id = Uuid::new_v4();
        for index in 0..3 {
            sink.emit(EngineEvent::SolverAttempt {
                call_id,
                solver: Address::repeat_byte(index as u8),
                index,
                outcome: SolverOutcome::ExecutionReverted,
                won: false,
                timestamp: Utc::now(),
            });
        }
        let events = sink.take();
        let indices: Vec<usize> = events
            .iter()
            .map(|e| match e {
                EngineEvent::SolverAttempt { index, .. } => *index,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(sink.snapshot().is_empty());
    }
}
