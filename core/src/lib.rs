//! # Checkout Harness Core
//!
//! Core traits and types for verifying exactly-once order placement against an
//! external storefront.
//!
//! This crate is deliberately free of I/O. Everything that awaits the outside
//! world lives in `checkout-harness-runtime`; this crate only describes it.
//!
//! ## Core Concepts
//!
//! - **Capability client**: the narrow interface to the storefront under test
//!   ([`client::CheckoutClient`], [`client::Storefront`], [`client::AdminClient`])
//! - **Checkout machine**: one actor's progress through checkout, expressed as a
//!   [`reducer::Reducer`] returning [`effect::Effect`] descriptions
//! - **Ledger snapshot**: an immutable capture of the visible order history
//! - **Duplicate detector**: set-difference of two ledgers plus content comparison
//! - **Outcome taxonomy**: harness aborts, assertion violations and inconclusive
//!   results kept apart ([`error`])
//!
//! ## Example
//!
//! ```
//! use checkout_harness_core::detector;
//! use checkout_harness_core::ledger::OrderLedgerSnapshot;
//! use checkout_harness_core::types::{OrderId, OrderSummary};
//! use chrono::Utc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let before = OrderLedgerSnapshot::new("before", Utc::now(), vec![
//!     OrderSummary::new(OrderId::new("41"), "$10.00", 0),
//! ])?;
//! let after = OrderLedgerSnapshot::new("after", Utc::now(), vec![
//!     OrderSummary::new(OrderId::new("42"), "$19.99", 0),
//!     OrderSummary::new(OrderId::new("41"), "$10.00", 1),
//! ])?;
//!
//! let result = detector::compare(&before, &after);
//! assert_eq!(result.new_order_count, 1);
//! assert!(result.duplicate_pairs.is_empty());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Capability client traits - the only boundary to the storefront under test
pub mod client;

/// Duplicate detection over ledger snapshots
pub mod detector;

/// Harness errors, assertion violations and scenario outcomes
pub mod error;

/// Order ledger snapshots
pub mod ledger;

/// The checkout state machine as a reducer
pub mod machine;

/// Identifiers, money, carts and order summaries
pub mod types;

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all transition logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the caller
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values, not execution.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are returned from reducers and
    /// executed by whoever drives the reducer (the runtime `Actor`).
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects one after another
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap a future producing an optional action
        pub fn future<F>(future: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }

        /// Whether this effect does nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All time reads in the harness go through these traits so that polling and
/// deadlines can be driven by virtual time in tests.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// A clock that can also wait.
    ///
    /// Poll loops and the interrupt injector sleep through this trait, never
    /// through `tokio::time` directly.
    pub trait Timer: Clock {
        /// Suspend for `duration`
        fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
    }

    /// Production clock backed by tokio's monotonic timer.
    ///
    /// A wall-clock reading is anchored to a `tokio::time::Instant` at
    /// construction; `now()` adds the monotonic elapsed time to it. Under
    /// paused tokio time (`#[tokio::test(start_paused = true)]`) `now()`
    /// therefore advances with virtual time.
    #[derive(Debug, Clone, Copy)]
    pub struct SystemClock {
        wall_anchor: DateTime<Utc>,
        mono_anchor: tokio::time::Instant,
    }

    impl SystemClock {
        /// Create a clock anchored at the current instant
        #[must_use]
        pub fn new() -> Self {
            Self {
                wall_anchor: Utc::now(),
                mono_anchor: tokio::time::Instant::now(),
            }
        }
    }

    impl Default for SystemClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = self.mono_anchor.elapsed();
            chrono::Duration::from_std(elapsed)
                .map_or(self.wall_anchor, |delta| self.wall_anchor + delta)
        }
    }

    impl Timer for SystemClock {
        fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(tokio::time::sleep(duration))
        }
    }

    // Lets a shared `Arc<dyn Timer>` be handed out where only a clock is needed.
    impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock, Timer};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn system_clock_follows_paused_time() {
        let clock = SystemClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(90)).await;

        let elapsed = clock.now() - start;
        assert_eq!(elapsed.num_seconds(), 90);
    }
}
