//! Call-scoped phase lock
//!
//! Tracks the current phase and its single privileged owner for one
//! orchestrated call. The transition function is pure and forward-only;
//! `release` is the one terminal edge reachable from every phase. Candidate
//! rollback restores a snapshot rather than transitioning backward.

use crate::error::{EngineError, EngineResult};
use crate::types::CallConfig;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Phases of one orchestrated call, in strict forward order.
/// PreOps and PostOps are optional per call configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Unlocked,
    PreOps,
    UserOp,
    SolverAuction,
    Allocation,
    PostOps,
}

impl ExecutionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionPhase::Unlocked => "unlocked",
            ExecutionPhase::PreOps => "pre_ops",
            ExecutionPhase::UserOp => "user_op",
            ExecutionPhase::SolverAuction => "solver_auction",
            ExecutionPhase::Allocation => "allocation",
            ExecutionPhase::PostOps => "post_ops",
        }
    }
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pure transition function: (current phase, config, success flag) -> next.
///
/// The `solved` flag only matters leaving SolverAuction: a winner proceeds to
/// Allocation, otherwise Allocation is skipped. Phase failures never pass
/// through here; they release directly (`Lock::release`), which is the single
/// terminal edge reachable from every phase.
pub fn next_phase(current: ExecutionPhase, config: &CallConfig, solved: bool) -> ExecutionPhase {
    match current {
        ExecutionPhase::Unlocked => {
            if config.require_pre_ops {
                ExecutionPhase::PreOps
            } else {
                ExecutionPhase::UserOp
            }
        }
        ExecutionPhase::PreOps => ExecutionPhase::UserOp,
        ExecutionPhase::UserOp => ExecutionPhase::SolverAuction,
        ExecutionPhase::SolverAuction => {
            if solved {
                ExecutionPhase::Allocation
            } else if config.require_post_ops {
                ExecutionPhase::PostOps
            } else {
                ExecutionPhase::Unlocked
            }
        }
        ExecutionPhase::Allocation => {
            if config.require_post_ops {
                ExecutionPhase::PostOps
            } else {
                ExecutionPhase::Unlocked
            }
        }
        ExecutionPhase::PostOps => ExecutionPhase::Unlocked,
    }
}

/// Transient lock record for one orchestrated call. Never persisted.
#[derive(Debug, Clone)]
pub struct Lock {
    env: Address,
    owner: Address,
    phase: ExecutionPhase,
    simulation: bool,
    bid_find: bool,
    /// Winning solver identity, preserved through Allocation and PostOps
    winner: Option<Address>,
    solved: bool,
    solver_count: usize,
}

impl Lock {
    /// Build the initial (unlocked) state for a call
    pub fn new(
        env: Address,
        bundler: Address,
        config: &CallConfig,
        simulation: bool,
        solver_count: usize,
    ) -> Self {
        Self {
            env,
            owner: bundler,
            phase: ExecutionPhase::Unlocked,
            simulation,
            bid_find: config.ex_post_bids,
            winner: None,
            solved: false,
            solver_count,
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn environment(&self) -> Address {
        self.env
    }

    pub fn is_unlocked(&self) -> bool {
        self.phase == ExecutionPhase::Unlocked
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    pub fn is_bid_finding(&self) -> bool {
        self.bid_find
    }

    pub fn winner(&self) -> Option<Address> {
        self.winner
    }

    pub fn solved(&self) -> bool {
        self.solved
    }

    pub fn solver_count(&self) -> usize {
        self.solver_count
    }

    /// Enter the first phase of the call. Fails unless currently unlocked.
    pub fn begin(&mut self, config: &CallConfig) -> EngineResult<ExecutionPhase> {
        if self.phase != ExecutionPhase::Unlocked {
            return Err(EngineError::InvalidPhaseTransition {
                from: self.phase,
                to: next_phase(self.phase, config, true),
            });
        }
        self.phase = next_phase(ExecutionPhase::Unlocked, config, true);
        Ok(self.phase)
    }

    /// Move to the next phase. Forward-only: a computed backward edge is an
    /// internal invariant violation and is rejected.
    pub fn advance(&mut self, config: &CallConfig, solved: bool) -> EngineResult<ExecutionPhase> {
        let next = next_phase(self.phase, config, solved);
        if next != ExecutionPhase::Unlocked && next <= self.phase {
            return Err(EngineError::InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(next)
    }

    /// Check that `caller` is the identity authorized for the current phase
    pub fn authorize(&self, caller: Address) -> EngineResult<()> {
        if self.phase == ExecutionPhase::Unlocked || caller != self.owner {
            return Err(EngineError::UnauthorizedReentry {
                caller,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Hand phase ownership to a new privileged identity
    pub fn set_owner(&mut self, owner: Address) {
        self.owner = owner;
    }

    /// Record the winning solver; survives into Allocation and PostOps
    pub fn record_winner(&mut self, winner: Address) {
        self.winner = Some(winner);
        self.solved = true;
    }

    /// Terminal edge: release from any phase
    pub fn release(&mut self) {
        self.phase = ExecutionPhase::Unlocked;
    }

    /// Restore a previously cloned snapshot (candidate-scoped rollback)
    pub fn restore(&mut self, snapshot: Lock) {
        *self = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn full_phase_walk_with_all_hooks() {
        let cfg = CallConfig {
            require_pre_ops: true,
            require_post_ops: true,
            ..Default::default()
        };
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 2);
        assert!(lock.is_unlocked());

        assert_eq!(lock.begin(&cfg).unwrap(), ExecutionPhase::PreOps);
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::UserOp);
        assert_eq!(
            lock.advance(&cfg, true).unwrap(),
            ExecutionPhase::SolverAuction
        );
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::Allocation);
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::PostOps);
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::Unlocked);
        assert!(lock.is_unlocked());
    }

    #[test]
    fn optional_phases_skip_without_altering_neighbors() {
        let cfg = CallConfig::default();
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 0);
        assert_eq!(lock.begin(&cfg).unwrap(), ExecutionPhase::UserOp);
        assert_eq!(
            lock.advance(&cfg, true).unwrap(),
            ExecutionPhase::SolverAuction
        );
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::Allocation);
        // no post-ops configured: allocation releases directly
        assert_eq!(lock.advance(&cfg, true).unwrap(), ExecutionPhase::Unlocked);
    }

    #[test]
    fn release_is_reachable_from_every_phase() {
        let cfg = CallConfig {
            require_pre_ops: true,
            require_post_ops: true,
            ..Default::default()
        };
        for steps in 0..5 {
            let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 1);
            lock.begin(&cfg).unwrap();
            for _ in 0..steps {
                lock.advance(&cfg, true).unwrap();
            }
            lock.release();
            assert!(lock.is_unlocked());
        }
    }

    #[test]
    fn unsolved_auction_skips_allocation() {
        let cfg = CallConfig {
            require_post_ops: true,
            ..Default::default()
        };
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 1);
        lock.begin(&cfg).unwrap();
        lock.advance(&cfg, true).unwrap(); // -> solver auction
        assert_eq!(lock.advance(&cfg, false).unwrap(), ExecutionPhase::PostOps);

        let cfg = CallConfig::default();
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 1);
        lock.begin(&cfg).unwrap();
        lock.advance(&cfg, true).unwrap();
        assert_eq!(lock.advance(&cfg, false).unwrap(), ExecutionPhase::Unlocked);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let cfg = CallConfig::default();
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 0);
        lock.begin(&cfg).unwrap();
        assert!(matches!(
            lock.begin(&cfg),
            Err(EngineError::InvalidPhaseTransition { .. })
        ));
    }

    #[test]
    fn authorize_rejects_foreign_identity() {
        let cfg = CallConfig::default();
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 0);
        lock.begin(&cfg).unwrap();
        lock.set_owner(addr(2));
        assert!(lock.authorize(addr(2)).is_ok());
        let err = lock.authorize(addr(3)).unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedReentry { .. }));
    }

    #[test]
    fn authorize_fails_when_unlocked() {
        let cfg = CallConfig::default();
        let lock = Lock::new(addr(9), addr(1), &cfg, false, 0);
        assert!(lock.authorize(addr(1)).is_err());
    }

    #[test]
    fn winner_survives_snapshot_restore() {
        let cfg = CallConfig::default();
        let mut lock = Lock::new(addr(9), addr(1), &cfg, false, 2);
        lock.begin(&cfg).unwrap();
        lock.advance(&cfg, true).unwrap();
        let snapshot = lock.clone();
        lock.record_winner(addr(5));
        lock.advance(&cfg, true).unwrap();
        assert_eq!(lock.winner(), Some(addr(5)));
        lock.restore(snapshot);
        assert_eq!(lock.winner(), None);
        assert_eq!(lock.phase(), ExecutionPhase::SolverAuction);
    }
}
