//! Solver execution iterator
//!
//! Drives solver attempts until a winner is found, using either submission
//! order (sequential mode) or declared-bid order (ex-post bid-finding).
//! Every attempt runs isolated: staged value transfers and the lock are
//! checkpointed before the attempt and restored when it fails, so a losing
//! candidate leaks nothing into the next one.

pub mod sorter;

use crate::config::EngineConfig;
use crate::control::{DAppControl, ExecutionBackend};
use crate::engine::CallContext;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventSink};
use crate::metrics;
use crate::types::{AuctionResult, CallConfig, SolverOperation, SolverOutcome, UserOperation};

use chrono::Utc;
use ethers::types::{Bytes, U256};
use tracing::{debug, warn};

/// Runs the solver auction for one call
pub struct AuctionRunner<'a> {
    pub control: &'a dyn DAppControl,
    pub backend: &'a dyn ExecutionBackend,
    pub call_config: &'a CallConfig,
    pub engine_config: &'a EngineConfig,
    pub events: &'a dyn EventSink,
}

struct AttemptOutcome {
    outcome: SolverOutcome,
    bid: U256,
}

impl AttemptOutcome {
    fn failed(outcome: SolverOutcome) -> Self {
        Self {
            outcome,
            bid: U256::zero(),
        }
    }
}

impl<'a> AuctionRunner<'a> {
    /// Run attempts until the first real success. A failing candidate is
    /// non-fatal and advances the iteration; exhausting the sequence yields
    /// an unsolved result.
    pub fn run(
        &self,
        ctx: &mut CallContext,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        return_data: &Bytes,
    ) -> EngineResult<AuctionResult> {
        metrics::record_auction(self.call_config.ex_post_bids);

        let (order, reserves) = self.selection_order(ctx, solver_ops);
        let mut last_outcome = None;

        for (position, &index) in order.iter().enumerate() {
            let solver_op = &solver_ops[index];

            // the only cancellation path: stop before an attempt the budget
            // cannot cover
            if ctx.gas.remaining() < self.engine_config.solver_gas_floor {
                warn!(
                    call_id = %ctx.call_id(),
                    remaining = ctx.gas.remaining(),
                    floor = self.engine_config.solver_gas_floor,
                    skipped = order.len() - position,
                    "gas below solver floor, stopping auction"
                );
                self.emit_attempt(ctx, index, solver_op, SolverOutcome::InsufficientGasRemaining);
                last_outcome = Some(SolverOutcome::InsufficientGasRemaining);
                break;
            }

            let stage_mark = ctx.staging.checkpoint();
            let lock_snapshot = ctx.lock.clone();

            match self.attempt(ctx, user_op, solver_op, reserves[index], return_data) {
                Ok(attempt) if attempt.outcome == SolverOutcome::Won => {
                    self.emit_attempt(ctx, index, solver_op, SolverOutcome::Won);
                    metrics::record_auction_won();
                    return Ok(AuctionResult {
                        winning_index: Some(index),
                        winner: Some(solver_op.from),
                        winning_bid: attempt.bid,
                        allocation_ok: true,
                        return_data: return_data.clone(),
                        last_outcome: None,
                    });
                }
                Ok(attempt) => {
                    ctx.staging.rollback_to(stage_mark);
                    ctx.lock.restore(lock_snapshot);
                    debug!(
                        call_id = %ctx.call_id(),
                        index,
                        solver = ?solver_op.from,
                        outcome = %attempt.outcome,
                        "solver attempt failed, advancing"
                    );
                    self.emit_attempt(ctx, index, solver_op, attempt.outcome);
                    last_outcome = Some(attempt.outcome);
                }
                Err(err) => {
                    ctx.staging.rollback_to(stage_mark);
                    ctx.lock.restore(lock_snapshot);
                    return Err(err);
                }
            }
        }

        Ok(AuctionResult::unsolved(return_data.clone(), last_outcome))
    }

    /// Determine real-execution order and the per-candidate reserve bid.
    ///
    /// Sequential mode executes in submission order with each solver's
    /// declared bid as its reserve. Ex-post mode dry-queries the declared
    /// bid for every candidate first, excludes zero bids, and ranks the rest
    /// descending; no escrowed value moves during the dry pass.
    fn selection_order(
        &self,
        ctx: &CallContext,
        solver_ops: &[SolverOperation],
    ) -> (Vec<usize>, Vec<U256>) {
        if !self.call_config.ex_post_bids {
            let reserves = solver_ops.iter().map(|s| s.bid_amount).collect();
            return ((0..solver_ops.len()).collect(), reserves);
        }

        let bids: Vec<U256> = solver_ops
            .iter()
            .map(|s| self.control.bid_value(s))
            .collect();

        for (index, bid) in bids.iter().enumerate() {
            if bid.is_zero() {
                self.emit_attempt(ctx, index, &solver_ops[index], SolverOutcome::ZeroBid);
            }
        }

        (sorter::rank_bids(&bids), bids)
    }

    /// One isolated solver attempt: pre-solver hook, payload execution,
    /// realized-bid validation, post-solver hook, then value allocation.
    fn attempt(
        &self,
        ctx: &mut CallContext,
        user_op: &UserOperation,
        solver_op: &SolverOperation,
        reserve: U256,
        return_data: &Bytes,
    ) -> EngineResult<AttemptOutcome> {
        // the candidate solver owns the auction phase for this attempt
        ctx.lock.set_owner(solver_op.from);

        let hook_data = if self.call_config.forward_return_data {
            return_data.clone()
        } else {
            Bytes::default()
        };

        if self.call_config.require_pre_solver {
            if let Err(err) = self.control.pre_solver(ctx, solver_op, &hook_data) {
                return candidate_failure(err, SolverOutcome::PreSolverFailed);
            }
        }

        let allowance = solver_op
            .gas
            .min(self.engine_config.max_solver_gas)
            .min(ctx.gas.remaining());
        let receipt = self
            .backend
            .execute_solver(ctx.environment(), solver_op, allowance);
        ctx.gas.charge(receipt.gas_used.min(allowance));

        if !receipt.success {
            debug!(
                call_id = %ctx.call_id(),
                solver = ?solver_op.from,
                reason = receipt.revert_reason.as_deref().unwrap_or("unknown"),
                "solver execution reverted"
            );
            return Ok(AttemptOutcome::failed(SolverOutcome::ExecutionReverted));
        }

        if receipt.bid_token != self.control.bid_format(user_op) {
            return Ok(AttemptOutcome::failed(SolverOutcome::InvalidBidToken));
        }
        if receipt.bid_amount < reserve {
            return Ok(AttemptOutcome::failed(SolverOutcome::BidBelowReserve));
        }

        if self.call_config.require_post_solver {
            if let Err(err) = self.control.post_solver(ctx, solver_op, &hook_data) {
                return candidate_failure(err, SolverOutcome::PostSolverFailed);
            }
        }

        // hand control to the allocation hook; the winner identity recorded
        // here stays visible through post-ops
        ctx.lock.record_winner(solver_op.from);
        ctx.lock.advance(self.call_config, true)?;
        ctx.lock.set_owner(user_op.control);

        match self
            .control
            .allocate_value(ctx, receipt.bid_token, receipt.bid_amount, return_data)
        {
            Ok(()) => Ok(AttemptOutcome {
                outcome: SolverOutcome::Won,
                bid: receipt.bid_amount,
            }),
            Err(err) => {
                let mapped = match err.downcast::<EngineError>() {
                    Ok(engine_err) if engine_err.is_fatal() => return Err(engine_err),
                    Ok(engine_err) => engine_err.to_string(),
                    Err(other) => other.to_string(),
                };
                if self.call_config.allow_allocate_value_failure {
                    Ok(AttemptOutcome::failed(SolverOutcome::AllocationFailed))
                } else {
                    Err(EngineError::AllocationFailed { reason: mapped })
                }
            }
        }
    }

    fn emit_attempt(
        &self,
        ctx: &CallContext,
        index: usize,
        solver_op: &SolverOperation,
        outcome: SolverOutcome,
    ) {
        metrics::record_solver_attempt(outcome.name());
        self.events.emit(EngineEvent::SolverAttempt {
            call_id: ctx.call_id(),
            solver: solver_op.from,
            index,
            outcome,
            won: outcome == SolverOutcome::Won,
            timestamp: Utc::now(),
        });
    }
}

/// A failing hook aborts only this candidate unless it carries a fatal
/// engine error (unauthorized re-entry foremost).
fn candidate_failure(err: anyhow::Error, outcome: SolverOutcome) -> EngineResult<AttemptOutcome> {
    match err.downcast::<EngineError>() {
        Ok(engine_err) if engine_err.is_fatal() => Err(engine_err),
        _ => Ok(AttemptOutcome::failed(outcome)),
    }
}
