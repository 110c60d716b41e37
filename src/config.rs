//! Environment-backed configuration (spec §4.12). Required trading
//! credentials are fatal-on-missing at startup; everything else has a
//! sensible default, mirroring the teacher's `main.rs` env-loading block.

#[derive(Debug, Clone)]
pub struct Credentials {
    pub account_address: String,
    pub private_key: String,
}

impl Credentials {
    /// Reads `{PREFIX}_ADDRESS` / `{PREFIX}_PRIVATE_KEY`. Fatal-on-missing:
    /// a strategy cannot run without a signer, so there is no sensible
    /// default, matching the teacher's `.expect("HL_PRIVATE_KEY must be set")`.
    pub fn from_env(prefix: &str) -> Self {
        let account_address = std::env::var(format!("{prefix}_ADDRESS"))
            .unwrap_or_else(|_| panic!("{prefix}_ADDRESS must be set"));
        let private_key = std::env::var(format!("{prefix}_PRIVATE_KEY"))
            .unwrap_or_else(|_| panic!("{prefix}_PRIVATE_KEY must be set"));
        Self { account_address, private_key }
    }
}

/// `true`/`1` → true, `false`/`0` → false, unset → `default`. Mirrors the
/// teacher's `MM_SHADOW_MODE` boolean-env parsing in `main.rs`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v != "false" && v != "0",
        Err(_) => default,
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_defaults_when_unset() {
        std::env::remove_var("PERPGRID_TEST_FLAG_UNSET");
        assert!(env_flag("PERPGRID_TEST_FLAG_UNSET", true));
        assert!(!env_flag("PERPGRID_TEST_FLAG_UNSET_2", false));
    }

    #[test]
    fn env_flag_parses_false_and_zero() {
        std::env::set_var("PERPGRID_TEST_FLAG_A", "false");
        std::env::set_var("PERPGRID_TEST_FLAG_B", "0");
        assert!(!env_flag("PERPGRID_TEST_FLAG_A", true));
        assert!(!env_flag("PERPGRID_TEST_FLAG_B", true));
        std::env::remove_var("PERPGRID_TEST_FLAG_A");
        std::env::remove_var("PERPGRID_TEST_FLAG_B");
    }
}
