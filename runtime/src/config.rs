//! Harness configuration.
//!
//! Every duration the harness waits for is configuration, not protocol.
//! Defaults match a slow shared demo storefront; tests usually shrink them.
//!
//! # Example
//!
//! ```
//! use checkout_harness_runtime::config::HarnessConfig;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::from_lookup(|key| match key {
//!     "HARNESS_POLL_INTERVAL_MS" => Some("500".to_string()),
//!     _ => None,
//! })?;
//!
//! assert_eq!(config.polling.interval, Duration::from_millis(500));
//! assert_eq!(config.timeouts.submit_order, Duration::from_secs(60));
//! # Ok(())
//! # }
//! ```

use checkout_harness_core::error::ConfigError;
use checkout_harness_core::types::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Per-call timeouts for capability calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Adding an item to the cart
    pub add_item: Duration,
    /// Placing the order (server-side processing is slow)
    pub submit_order: Duration,
    /// Reading the order history or one order
    pub list_orders: Duration,
    /// Address, method selection, cart view, cancel, reload
    pub navigation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            add_item: Duration::from_secs(15),
            submit_order: Duration::from_secs(60),
            list_orders: Duration::from_secs(15),
            navigation: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Validate timeouts
    ///
    /// # Errors
    ///
    /// Returns error if a timeout is zero or the submit timeout is shorter
    /// than the add-item timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [
            ("add_item", self.add_item),
            ("submit_order", self.submit_order),
            ("list_orders", self.list_orders),
            ("navigation", self.navigation),
        ];
        if let Some((name, _)) = all.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::Validation(format!("{name} timeout must be > 0")));
        }
        if self.submit_order < self.add_item {
            return Err(ConfigError::Validation(
                "submit_order timeout must not be shorter than add_item timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ledger polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Pause between polls
    pub interval: Duration,
    /// Overall budget after which a scenario is inconclusive
    pub deadline: Duration,
    /// Wait after an interruption before reading the ledger
    pub settle_delay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(180),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl PollingConfig {
    /// Validate polling configuration
    ///
    /// # Errors
    ///
    /// Returns error if the interval is zero or the deadline shorter than one interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Validation("poll interval must be > 0".to_string()));
        }
        if self.deadline < self.interval {
            return Err(ConfigError::Validation(format!(
                "poll deadline ({:?}) must be at least one interval ({:?})",
                self.deadline, self.interval
            )));
        }
        Ok(())
    }

    /// Upper bound on polls before the deadline
    #[must_use]
    pub fn max_polls(&self) -> u128 {
        self.deadline.as_millis() / self.interval.as_millis().max(1)
    }
}

/// Race release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Dispatch spread above which a warning is logged
    pub max_release_skew: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            max_release_skew: Duration::from_millis(250),
        }
    }
}

/// Local retry of transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Pause before each retry
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_millis(500),
        }
    }
}

/// Email and password for a storefront account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login email
    pub email: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// The customer identity for these credentials
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::customer(self.email.clone(), self.password.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a real transport adapter should connect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorefrontConfig {
    /// Storefront base URL
    pub base_url: Option<String>,
    /// Admin panel URL
    pub admin_url: Option<String>,
    /// Customer account
    pub customer: Option<Credentials>,
    /// Admin account
    pub admin: Option<Credentials>,
}

/// Complete harness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Per-call timeouts
    pub timeouts: TimeoutConfig,
    /// Ledger polling
    pub polling: PollingConfig,
    /// Race release
    pub race: RaceConfig,
    /// Transient retry
    pub retry: RetryConfig,
    /// Storefront location and accounts
    pub storefront: StorefrontConfig,
}

impl HarnessConfig {
    /// Load from process environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a variable does not parse or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, starting from defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value does not parse or the result is invalid
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let millis = |key: &str, target: &mut Duration| -> Result<(), ConfigError> {
            if let Some(raw) = lookup(key) {
                let value = raw.trim().parse::<u64>().map_err(|e| ConfigError::Parse {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                *target = Duration::from_millis(value);
            }
            Ok(())
        };

        millis("HARNESS_ADD_ITEM_TIMEOUT_MS", &mut config.timeouts.add_item)?;
        millis("HARNESS_SUBMIT_TIMEOUT_MS", &mut config.timeouts.submit_order)?;
        millis("HARNESS_LIST_ORDERS_TIMEOUT_MS", &mut config.timeouts.list_orders)?;
        millis("HARNESS_NAVIGATION_TIMEOUT_MS", &mut config.timeouts.navigation)?;
        millis("HARNESS_POLL_INTERVAL_MS", &mut config.polling.interval)?;
        millis("HARNESS_POLL_DEADLINE_MS", &mut config.polling.deadline)?;
        millis("HARNESS_SETTLE_DELAY_MS", &mut config.polling.settle_delay)?;
        millis("HARNESS_MAX_RELEASE_SKEW_MS", &mut config.race.max_release_skew)?;
        millis("HARNESS_RETRY_DELAY_MS", &mut config.retry.delay)?;

        if let Some(raw) = lookup("HARNESS_RETRY_COUNT") {
            config.retry.max_retries = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Parse {
                    key: "HARNESS_RETRY_COUNT".to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        config.storefront.base_url = lookup("STOREFRONT_BASE_URL");
        config.storefront.admin_url = lookup("STOREFRONT_ADMIN_URL");
        config.storefront.customer = credentials(&lookup, "STOREFRONT_EMAIL", "STOREFRONT_PASSWORD");
        config.storefront.admin =
            credentials(&lookup, "STOREFRONT_ADMIN_EMAIL", "STOREFRONT_ADMIN_PASSWORD");

        config.validate()?;
        Ok(config)
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any section is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts.validate()?;
        self.polling.validate()?;
        if self.timeouts.submit_order > self.polling.deadline {
            return Err(ConfigError::Validation(format!(
                "submit_order timeout ({:?}) must fit within the poll deadline ({:?})",
                self.timeouts.submit_order, self.polling.deadline
            )));
        }
        if self.race.max_release_skew.is_zero() {
            return Err(ConfigError::Validation("max_release_skew must be > 0".to_string()));
        }
        Ok(())
    }
}

fn credentials<F>(lookup: &F, email_key: &str, password_key: &str) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    Some(Credentials {
        email: lookup(email_key)?,
        password: lookup(password_key)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.max_polls(), 90);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn reads_overrides_and_credentials() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("HARNESS_POLL_INTERVAL_MS", "250"),
            ("HARNESS_POLL_DEADLINE_MS", "5000"),
            ("HARNESS_ADD_ITEM_TIMEOUT_MS", "2000"),
            ("HARNESS_SUBMIT_TIMEOUT_MS", "5000"),
            ("HARNESS_RETRY_COUNT", "2"),
            ("STOREFRONT_BASE_URL", "https://shop.example"),
            ("STOREFRONT_EMAIL", "buyer@example.com"),
            ("STOREFRONT_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.polling.interval, Duration::from_millis(250));
        assert_eq!(config.polling.deadline, Duration::from_secs(5));
        assert_eq!(config.timeouts.submit_order, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.storefront.base_url.as_deref(), Some("https://shop.example"));
        assert_eq!(config.storefront.customer.as_ref().unwrap().email, "buyer@example.com");
        assert!(config.storefront.admin.is_none());
    }

    #[test]
    fn password_is_not_printed() {
        let creds = Credentials {
            email: "a@b.c".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = HarnessConfig::from_lookup(lookup_from(&[("HARNESS_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref key, .. } if key == "HARNESS_POLL_INTERVAL_MS"));
    }

    #[test]
    fn rejects_zero_interval_and_short_deadline() {
        let err = HarnessConfig::from_lookup(lookup_from(&[("HARNESS_POLL_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let mut config = HarnessConfig::default();
        config.polling.deadline = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_submit_timeout_beyond_the_deadline() {
        let mut config = HarnessConfig::default();
        config.polling.deadline = Duration::from_secs(30);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("submit_order")));

        config.timeouts.submit_order = Duration::from_secs(30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_submit_timeout_shorter_than_add_item() {
        let mut config = HarnessConfig::default();
        config.timeouts.submit_order = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }
}
