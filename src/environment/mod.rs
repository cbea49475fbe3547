//! Isolated per-(user, dapp-control) execution environments
//!
//! Environments are opaque capability handles created lazily and memoized by
//! identity pair; the handle address is derived deterministically from the
//! (user, control, config) triple so repeated lookups agree.

use crate::types::CallConfig;

use dashmap::DashMap;
use ethers::types::{Address, H256};
use sha3::{Digest, Keccak256};
use tracing::debug;

/// Opaque handle for one isolated execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Deterministic environment address
    pub address: Address,
    pub user: Address,
    pub control: Address,
    pub config_hash: H256,
}

/// Keyed, memoizing factory for execution environments
#[derive(Debug, Default)]
pub struct EnvironmentFactory {
    environments: DashMap<(Address, Address), EnvironmentHandle>,
}

impl EnvironmentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the environment for (user, control), creating it on first use
    pub fn get_or_create(
        &self,
        user: Address,
        control: Address,
        config: &CallConfig,
    ) -> EnvironmentHandle {
        self.environments
            .entry((user, control))
            .or_insert_with(|| {
                let config_hash = config.hash();
                let address = derive_address(user, control, config_hash);
                debug!(
                    user = ?user,
                    control = ?control,
                    environment = ?address,
                    "created execution environment"
                );
                EnvironmentHandle {
                    address,
                    user,
                    control,
                    config_hash,
                }
            })
            .clone()
    }

    /// Look up an existing environment without creating one
    pub fn lookup(&self, user: Address, control: Address) -> Option<EnvironmentHandle> {
        self.environments.get(&(user, control)).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

/// keccak(user || control || config hash), truncated to an address
fn derive_address(user: Address, control: Address, config_hash: H256) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update(user.as_bytes());
    hasher.update(control.as_bytes());
    hasher.update(config_hash.as_bytes());
    let digest = hasher.finalize();
    Address::from_slice(&digest[12..32])
}
