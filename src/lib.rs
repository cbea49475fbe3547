//! Maestro: an atomic intent-auction execution engine.
//!
//! One call to [`AuctionEngine::run`] carries a user operation, a sequence of
//! competing solver operations, and a dapp authorization through a fixed
//! phase pipeline: optional pre-ops, the user operation, a solver auction
//! with per-candidate isolation, value allocation for the winner, optional
//! post-ops, and settlement. The whole pipeline is atomic: any failure after
//! value receipt refunds the caller and releases every lock.
//!
//! External collaborators plug in through three seams: [`DAppControl`]
//! (application hooks), [`Verifier`] (bundle pre-flight), and
//! [`ExecutionBackend`] (opaque payload execution).

pub mod auction;
pub mod config;
pub mod control;
pub mod engine;
pub mod environment;
pub mod error;
pub mod escrow;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod settlement;
pub mod types;

pub use config::{EngineConfig, Settings};
pub use control::{ControlRegistry, DAppControl, ExecutionBackend, Verifier};
pub use engine::{AuctionEngine, CallContext};
pub use environment::{EnvironmentFactory, EnvironmentHandle};
pub use error::{EngineError, EngineResult};
pub use escrow::{EscrowLedger, Party, StagedTransfer, ValueStaging};
pub use events::{EngineEvent, EventSink, RecordingSink, TracingSink};
pub use lock::{next_phase, ExecutionPhase, Lock};
pub use types::{
    AuctionResult, CallConfig, CallOutcome, DAppOperation, ExecutionReceipt, GasMeter,
    SolverOperation, SolverOutcome, UserOperation, ValidationResult,
};

/// Install the default tracing subscriber for embedding binaries.
/// `RUST_LOG` overrides the built-in filter.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,maestro_engine=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
