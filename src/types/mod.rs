//! Operation bundle types and call configuration
//!
//! Defines the three signed operations that make up one orchestrated call
//! (user, solvers, dapp) plus the capability flags that gate optional phases.

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// The end user's signed intent. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOperation {
    /// User identity
    pub from: Address,
    /// Target contract for the user call
    pub to: Address,
    /// Value carried by the user call
    pub value: U256,
    /// Gas limit for the user call
    pub gas: u64,
    /// Fee ceiling the user is willing to pay per gas unit
    pub max_fee_per_gas: U256,
    pub nonce: u64,
    pub deadline: u64,
    /// DApp control identity whose hooks govern this call
    pub control: Address,
    /// Opaque call payload
    pub data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Keccak hash identifying this operation
    pub fn hash(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.from.as_bytes());
        hasher.update(self.to.as_bytes());
        hasher.update(u256_bytes(self.value));
        hasher.update(self.gas.to_be_bytes());
        hasher.update(u256_bytes(self.max_fee_per_gas));
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.deadline.to_be_bytes());
        hasher.update(self.control.as_bytes());
        hasher.update(&self.data);
        H256::from_slice(&hasher.finalize())
    }
}

/// One competing solver offer. The position of an operation within the
/// submitted sequence is semantically meaningful: it is the default
/// selection order, independent of bid value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOperation {
    /// Solver identity
    pub from: Address,
    /// Target contract for the solver call
    pub to: Address,
    /// Token the bid is denominated in
    pub bid_token: Address,
    /// Declared bid; doubles as the solver's binding reserve
    pub bid_amount: U256,
    /// Gas limit for the solver call
    pub gas: u64,
    /// Opaque call payload
    pub data: Bytes,
    pub signature: Bytes,
}

/// Authorization record tying a user+solver bundle to a dapp control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DAppOperation {
    /// Auctioneer identity signing off on the bundle
    pub from: Address,
    /// DApp control the bundle is authorized for
    pub control: Address,
    pub nonce: u64,
    pub deadline: u64,
    /// Hash of the user operation this bundle fulfills
    pub user_op_hash: H256,
    pub signature: Bytes,
}

/// Capability flags describing which optional phases exist and how failures
/// are tolerated. Set once at dapp-control registration; immutable afterward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub require_pre_ops: bool,
    pub require_post_ops: bool,
    pub require_pre_solver: bool,
    pub require_post_solver: bool,
    /// Append the user call's return data to the data handed to later hooks
    pub track_user_return_data: bool,
    /// Forward accumulated return data to the solver-phase hooks
    pub forward_return_data: bool,
    /// Tolerate a bundle carrying zero solver operations
    pub allow_zero_solvers: bool,
    /// Fail the call when no solver wins
    pub require_fulfillment: bool,
    /// A failing value allocation aborts only the candidate, not the call
    pub allow_allocate_value_failure: bool,
    /// Rank solvers by declared bid before real execution (ex-post mode)
    pub ex_post_bids: bool,
    /// The user may act as auctioneer for their own bundle
    pub user_auctioneer: bool,
    /// Any included solver may act as auctioneer
    pub solver_auctioneer: bool,
    /// Any identity at all may act as auctioneer
    pub unknown_auctioneer: bool,
}

impl CallConfig {
    /// Keccak hash over the flag encoding; keys environment derivation
    pub fn hash(&self) -> H256 {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        H256::from_slice(&hasher.finalize())
    }

    /// Check the dapp operation's signer against the auctioneer trust rules
    pub fn accepts_auctioneer(
        &self,
        auctioneer: Address,
        user: Address,
        solver_ops: &[SolverOperation],
    ) -> bool {
        if self.unknown_auctioneer {
            return true;
        }
        if self.user_auctioneer && auctioneer == user {
            return true;
        }
        if self.solver_auctioneer && solver_ops.iter().any(|s| s.from == auctioneer) {
            return true;
        }
        false
    }
}

/// Pre-flight validation verdict from the external Verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Valid,
    InvalidSignature,
    UserNonceInvalid,
    DAppNonceInvalid,
    DeadlineExpired,
    TooManySolvers,
    InvalidControl,
    ValueMismatch,
    InvalidAuctioneer,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Reason code for logs and error surfaces
    pub fn name(&self) -> &'static str {
        match self {
            ValidationResult::Valid => "valid",
            ValidationResult::InvalidSignature => "invalid_signature",
            ValidationResult::UserNonceInvalid => "user_nonce_invalid",
            ValidationResult::DAppNonceInvalid => "dapp_nonce_invalid",
            ValidationResult::DeadlineExpired => "deadline_expired",
            ValidationResult::TooManySolvers => "too_many_solvers",
            ValidationResult::InvalidControl => "invalid_control",
            ValidationResult::ValueMismatch => "value_mismatch",
            ValidationResult::InvalidAuctioneer => "invalid_auctioneer",
        }
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-attempt outcome code, recorded for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverOutcome {
    Won,
    ZeroBid,
    InvalidBidToken,
    BidBelowReserve,
    ExecutionReverted,
    InsufficientGasRemaining,
    PreSolverFailed,
    PostSolverFailed,
    AllocationFailed,
}

impl SolverOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            SolverOutcome::Won => "won",
            SolverOutcome::ZeroBid => "zero_bid",
            SolverOutcome::InvalidBidToken => "invalid_bid_token",
            SolverOutcome::BidBelowReserve => "bid_below_reserve",
            SolverOutcome::ExecutionReverted => "execution_reverted",
            SolverOutcome::InsufficientGasRemaining => "insufficient_gas_remaining",
            SolverOutcome::PreSolverFailed => "pre_solver_failed",
            SolverOutcome::PostSolverFailed => "post_solver_failed",
            SolverOutcome::AllocationFailed => "allocation_failed",
        }
    }
}

impl std::fmt::Display for SolverOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of the solver auction for one call
#[derive(Debug, Clone)]
pub struct AuctionResult {
    /// Index into the submitted solver sequence; None when no solver won
    pub winning_index: Option<usize>,
    /// Winning solver identity
    pub winner: Option<Address>,
    /// Realized winning bid
    pub winning_bid: U256,
    /// Whether the value-allocation hook ran to completion
    pub allocation_ok: bool,
    /// Return data accumulated through the winning attempt
    pub return_data: Bytes,
    /// Outcome of the final attempt when no solver won; diagnostic for
    /// simulation callers
    pub last_outcome: Option<SolverOutcome>,
}

impl AuctionResult {
    /// An auction that found no winner
    pub fn unsolved(return_data: Bytes, last_outcome: Option<SolverOutcome>) -> Self {
        Self {
            winning_index: None,
            winner: None,
            winning_bid: U256::zero(),
            allocation_ok: false,
            return_data,
            last_outcome,
        }
    }

    pub fn solved(&self) -> bool {
        self.winning_index.is_some()
    }
}

/// Receipt from executing one opaque payload in the isolated environment
#[derive(Debug, Clone, Default)]
pub struct ExecutionReceipt {
    pub success: bool,
    pub gas_used: u64,
    /// Token the realized bid was paid in
    pub bid_token: Address,
    /// Realized bid amount observed after execution
    pub bid_amount: U256,
    pub return_data: Bytes,
    pub revert_reason: Option<String>,
}

/// Call-wide compute budget, snapshotted at lock initialization.
///
/// Charged gas never exceeds the snapshot: `charge` clamps at the limit.
#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    /// Record consumed gas, clamped to the remaining budget
    pub fn charge(&mut self, amount: u64) {
        self.used = (self.used + amount).min(self.limit);
    }
}

/// Final outcome of one orchestrated call
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub call_id: uuid::Uuid,
    pub auction_won: bool,
    pub winning_index: Option<usize>,
    pub winner: Option<Address>,
    /// Gas consumed against the pre-committed budget
    pub gas_used: u64,
    /// Surplus attached value returned to the caller
    pub refund: U256,
}

fn u256_bytes(v: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    buf
}
