//! Configuration management for the Maestro engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on solver operations accepted per call
    pub max_solvers_per_call: usize,
    /// Minimum gas that must remain before another solver attempt is started
    pub solver_gas_floor: u64,
    /// Cap on any single solver's declared gas limit when snapshotting the
    /// call-wide budget
    pub max_solver_gas: u64,
    /// Base charge rate in gwei per gas unit
    pub base_gas_price_gwei: u64,
    /// Buffer percentage applied to the base rate (e.g. 10 = 10% buffer)
    pub gas_price_buffer_percent: u64,
    /// Escrow account credited with gas charges
    pub fee_recipient: Address,
}

impl EngineConfig {
    /// Effective charge rate in wei per gas unit: the buffered base rate,
    /// never above the user's declared fee ceiling.
    pub fn effective_gas_price(&self, max_fee_per_gas: U256) -> U256 {
        let base = U256::from(self.base_gas_price_gwei) * U256::exp10(9);
        let buffered = base + base * self.gas_price_buffer_percent / 100;
        buffered.min(max_fee_per_gas)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_solvers_per_call: 32,
            solver_gas_floor: 50_000,
            max_solver_gas: 1_000_000,
            base_gas_price_gwei: 10,
            gas_price_buffer_percent: 10,
            fee_recipient: Address::zero(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("MAESTRO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.engine.max_solvers_per_call == 0 {
            anyhow::bail!("max_solvers_per_call must be at least 1");
        }
        if self.engine.max_solver_gas < self.engine.solver_gas_floor {
            anyhow::bail!("max_solver_gas must cover the solver gas floor");
        }
        if self.engine.gas_price_buffer_percent > 100 {
            anyhow::bail!("gas_price_buffer_percent must be at most 100");
        }
        if self.engine.fee_recipient == Address::zero() {
            tracing::warn!("fee_recipient is unset - gas charges accrue to the zero account");
        }
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("MAESTRO_TEST_VAR", "0x1111111111111111111111111111111111111111");
        let input = "fee_recipient = \"${MAESTRO_TEST_VAR}\"";
        let result = substitute_env_vars(input);
        assert_eq!(
            result,
            "fee_recipient = \"0x1111111111111111111111111111111111111111\""
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[engine]
max_solvers_per_call = 16
solver_gas_floor = 40000
max_solver_gas = 800000
base_gas_price_gwei = 5
gas_price_buffer_percent = 20
fee_recipient = "0x2222222222222222222222222222222222222222"
"#
        )
        .unwrap();
        env::set_var("MAESTRO_CONFIG", file.path());

        let settings = Settings::load().unwrap();
        assert_eq!(settings.engine.max_solvers_per_call, 16);
        assert_eq!(settings.engine.solver_gas_floor, 40_000);
        env::remove_var("MAESTRO_CONFIG");
    }

    #[test]
    fn test_effective_gas_price_respects_user_ceiling() {
        let cfg = EngineConfig {
            base_gas_price_gwei: 10,
            gas_price_buffer_percent: 10,
            ..Default::default()
        };
        let gwei = U256::exp10(9);
        // buffered base = 11 gwei
        assert_eq!(cfg.effective_gas_price(U256::from(100) * gwei), gwei * 11);
        assert_eq!(cfg.effective_gas_price(gwei * 7), gwei * 7);
    }

    #[test]
    fn test_validation_rejects_bad_floor() {
        let settings = Settings {
            engine: EngineConfig {
                solver_gas_floor: 10,
                max_solver_gas: 5,
                ..Default::default()
            },
        };
        assert!(settings.validate().is_err());
    }
}
