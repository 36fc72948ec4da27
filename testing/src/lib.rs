//! # Checkout Harness Testing
//!
//! Testing utilities for the checkout verification harness.
//!
//! This crate provides:
//! - A simulated storefront with switchable defects ([`storefront`])
//! - Deterministic clocks ([`mocks`])
//! - A Given-When-Then helper for the checkout reducer ([`ReducerTest`])
//! - A short-timeout harness configuration and tracing setup for tests
//!
//! ## Example
//!
//! ```ignore
//! use checkout_harness_testing::{fast_config, init_tracing, storefront::*};
//!
//! #[tokio::test(start_paused = true)]
//! async fn one_order_per_checkout() {
//!     init_tracing();
//!     let shop = SimulatedStorefront::new(StorefrontBehavior::default())
//!         .with_product("hoodie", Money::from_cents(4500), 10)
//!         .with_account("buyer@example.com", "secret");
//!     let runner = ScenarioRunner::new(Arc::new(shop), Arc::new(SystemClock::new()), fast_config())?;
//!     // ...
//! }
//! ```

use checkout_harness_core::environment::Clock;
use checkout_harness_runtime::config::{HarnessConfig, PollingConfig, RetryConfig, TimeoutConfig};
use chrono::{DateTime, Utc};
use std::time::Duration;


/// In-memory storefront
pub mod storefront;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use checkout_harness_testing::mocks::FixedClock;
    /// use checkout_harness_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Harness configuration scaled down for the simulated storefront.
///
/// Polls every 500ms for at most 30s, gives up on a submit call after 10s,
/// settles for 500ms after an interrupt and retries once after 100ms.
#[must_use]
pub fn fast_config() -> HarnessConfig {
    HarnessConfig {
        timeouts: TimeoutConfig {
            add_item: Duration::from_secs(5),
            submit_order: Duration::from_secs(10),
            list_orders: Duration::from_secs(5),
            navigation: Duration::from_secs(5),
        },
        polling: PollingConfig {
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
        },
        retry: RetryConfig {
            max_retries: 1,
            delay: Duration::from_millis(100),
        },
        ..HarnessConfig::default()
    }
}

/// Installs a test-writer subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
pub use reducer_test::ReducerTest;
pub use storefront::{SimulatedSession, SimulatedStorefront, StorefrontBehavior};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn fast_config_is_valid() {
        assert!(fast_config().validate().is_ok());
    }
}
