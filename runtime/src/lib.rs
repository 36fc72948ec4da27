//! # Checkout Harness Runtime
//!
//! Drives checkout actors against a storefront and judges what they produced.
//!
//! This crate owns everything that awaits the outside world: sessions wrapped
//! with timeouts and retry, actors executing the checkout reducer's effects,
//! interrupt injection, concurrent release, and the scenarios that tie them
//! together.
//!
//! ## Core Components
//!
//! - **Actor**: one isolated session running the checkout state machine
//! - **Interrupt injector**: abandons an in-flight submission client-side
//! - **Concurrency orchestrator**: barrier, baselines, near-simultaneous release
//! - **Admin actor**: stock and price changes with automatic restore
//! - **Scenario runner**: the five scenarios, each producing a [`scenario::ScenarioReport`]
//!
//! ## Example
//!
//! ```ignore
//! use checkout_harness_runtime::actor::CheckoutPlan;
//! use checkout_harness_runtime::config::{Credentials, HarnessConfig};
//! use checkout_harness_core::types::Identity;
//! use checkout_harness_runtime::scenario::ScenarioRunner;
//! use checkout_harness_core::environment::SystemClock;
//!
//! let config = HarnessConfig::from_env()?;
//! let identity = config.storefront.customer.as_ref().map(Credentials::identity).unwrap_or_else(|| Identity::guest("demo"));
//! let runner = ScenarioRunner::new(storefront, Arc::new(SystemClock::new()), config)?;
//!
//! let report = runner.single_submission(identity, &plan).await?;
//! assert!(report.outcome.is_pass(), "{}", report.to_json()?);
//! ```

/// Actors: one session, one checkout state machine
pub mod actor;

/// The admin peer changing stock and prices mid checkout
pub mod admin;

/// Harness configuration from defaults and environment variables
pub mod config;

/// Timeout and retry decorator around a storefront session
pub mod guarded;

/// Interrupt injection into in-flight submissions
pub mod injector;

/// Metrics recorded through the `metrics` facade
pub mod metrics;

/// Concurrent release of several actors
pub mod orchestrator;

/// Retry with backoff and deadline-bounded polling
pub mod retry;

/// Scenario drivers and reports
pub mod scenario;

pub use actor::{Actor, CheckoutPlan, RecoveryDecision};
pub use admin::AdminActor;
pub use config::HarnessConfig;
pub use scenario::{ScenarioReport, ScenarioRunner};
