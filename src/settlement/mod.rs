//! Settlement and value accounting
//!
//! Converts the outcome of a call into escrow mutations: staged transfers
//! are applied all-or-nothing, the consuming party is charged for compute,
//! and surplus attached value returns to the caller. This is the only place
//! escrow balances move, and it runs exactly once per call.

use crate::config::EngineConfig;
use crate::engine::CallContext;
use crate::error::EngineResult;
use crate::escrow::EscrowLedger;
use crate::metrics;
use crate::types::AuctionResult;

use ethers::types::{Address, U256};
use tracing::{debug, warn};

/// Net result of settling one call
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Party charged for consumed compute
    pub payer: Address,
    /// Total charged, in wei
    pub gas_charged: U256,
    /// Surplus attached value returned to the caller
    pub refund: U256,
}

/// Settle a completed call.
///
/// The winning solver pays for compute out of its escrow bond; without a
/// winner the caller pays out of the attached value. The charge is capped by
/// what the payer actually has, so settlement itself cannot overdraw, and
/// total disbursement never exceeds value received plus pre-existing escrow.
pub fn settle(
    ledger: &mut EscrowLedger,
    ctx: &CallContext,
    result: &AuctionResult,
    max_fee_per_gas: U256,
    config: &EngineConfig,
) -> EngineResult<Settlement> {
    let rate = config.effective_gas_price(max_fee_per_gas);
    let gas_cost = U256::from(ctx.gas_used()) * rate;

    // apply staged transfers first; a conservation violation fails the call
    // before anything else moves
    let mut pot_remaining = ledger.apply(ctx.staging.entries(), ctx.attached_value())?;

    let (payer, charged) = match result.winner {
        Some(winner) => {
            let bond = ledger.balance_of(winner);
            let charge = gas_cost.min(bond);
            if charge < gas_cost {
                warn!(
                    call_id = %ctx.call_id(),
                    solver = ?winner,
                    bond = %bond,
                    owed = %gas_cost,
                    "winner bond does not cover gas, clipping charge"
                );
            }
            ledger.debit(winner, charge)?;
            (winner, charge)
        }
        None => {
            let charge = gas_cost.min(pot_remaining);
            pot_remaining -= charge;
            (ctx.caller(), charge)
        }
    };
    ledger.credit(config.fee_recipient, charged);

    // surplus attached value goes back to the caller
    if !pot_remaining.is_zero() {
        ledger.credit(ctx.caller(), pot_remaining);
        metrics::record_refund();
    }

    metrics::record_gas_charged(ctx.gas_used());
    metrics::record_escrow_total(u256_to_f64(ledger.total()));

    debug!(
        call_id = %ctx.call_id(),
        payer = ?payer,
        gas_charged = %charged,
        refund = %pot_remaining,
        "call settled"
    );

    Ok(Settlement {
        payer,
        gas_charged: charged,
        refund: pot_remaining,
    })
}

/// Refund the attached value to the caller after a failed call. No staged
/// transfer applies and no gas is charged; the caller simply gets back what
/// the engine received.
pub fn refund_on_failure(ledger: &mut EscrowLedger, caller: Address, attached_value: U256) {
    if attached_value.is_zero() {
        return;
    }
    ledger.credit(caller, attached_value);
    metrics::record_refund();
    debug!(caller = ?caller, amount = %attached_value, "refunded attached value after failure");
}

fn u256_to_f64(v: U256) -> f64 {
    // precision loss is fine for a gauge
    v.min(U256::from(u128::MAX)).as_u128() as f64
}
