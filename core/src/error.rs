//! Error and outcome taxonomy.
//!
//! Three things are kept strictly apart:
//!
//! - [`HarnessError`]: the harness itself could not do its job. The scenario
//!   aborts early and draws no conclusion about the storefront.
//! - [`AssertionViolation`]: a confirmed defect in the storefront.
//! - [`ScenarioOutcome`]: the verdict of a scenario, which may also be
//!   `Inconclusive` or `SkippedWithDocumentation`, neither a pass nor a fail.

use crate::client::ClientError;
use crate::ledger::{LedgerError, LedgerInconsistency};
use crate::types::{ActorLabel, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// A value failed validation
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// A value could not be parsed
    #[error("failed to parse {key}: {reason}")]
    Parse {
        /// Variable or field name
        key: String,
        /// What was wrong
        reason: String,
    },
}

/// The harness could not perform the scenario
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// An actor could not reach the pre-submission barrier
    #[error("setup failed for {actor}: {reason}")]
    SetupFailed {
        /// Failing actor
        actor: ActorLabel,
        /// What went wrong
        reason: String,
    },

    /// The interrupt could not be injected; says nothing about duplicates
    #[error("interrupt injection failed for {actor}: {reason}")]
    InjectionFailed {
        /// Affected actor
        actor: ActorLabel,
        /// What went wrong
        reason: String,
    },

    /// A capability call failed after its local retry
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A ledger capture was unusable
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// Builds a setup failure
    #[must_use]
    pub fn setup(actor: &ActorLabel, reason: impl Into<String>) -> Self {
        Self::SetupFailed {
            actor: actor.clone(),
            reason: reason.into(),
        }
    }

    /// Builds an injection failure
    #[must_use]
    pub fn injection(actor: &ActorLabel, reason: impl Into<String>) -> Self {
        Self::InjectionFailed {
            actor: actor.clone(),
            reason: reason.into(),
        }
    }
}

/// A confirmed storefront defect
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AssertionViolation {
    /// More than one content-identical order for one logical attempt
    #[error("duplicate orders: {pairs:?}")]
    DuplicateOrders {
        /// Content-identical pairs
        pairs: Vec<(OrderId, OrderId)>,
    },

    /// No order appeared after an attempt that should have created one
    #[error("order lost: no new order at checkpoint '{checkpoint}'")]
    OrderLost {
        /// Checkpoint of the final capture
        checkpoint: String,
    },

    /// The number of new orders is outside what the scenario allows
    #[error("expected {expected} new order(s), found {actual}")]
    UnexpectedOrderCount {
        /// Expected count (or upper bound)
        expected: usize,
        /// Observed count
        actual: usize,
    },

    /// Two distinct actors were handed the same order id
    #[error("order {order_id} claimed by several actors: {actors:?}")]
    ConflatedOrderId {
        /// The shared id
        order_id: OrderId,
        /// Actors that observed it
        actors: Vec<ActorLabel>,
    },

    /// A later ledger capture rewrote history
    #[error(transparent)]
    LedgerInconsistency(#[from] LedgerInconsistency),

    /// Actor state contradicts the ledger
    #[error("state inconsistency: {0}")]
    StateInconsistency(String),
}

impl AssertionViolation {
    /// Too few orders may only mean the ledger has not caught up yet.
    ///
    /// True for violations a later capture could still clear; every other
    /// violation is confirmed by what was already observed.
    #[must_use]
    pub const fn awaits_ledger(&self) -> bool {
        match self {
            Self::OrderLost { .. } => true,
            Self::UnexpectedOrderCount { expected, actual } => *actual < *expected,
            _ => false,
        }
    }
}

/// Verdict of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// The property held
    Pass,
    /// The property was violated
    Violation {
        /// Every violation found
        violations: Vec<AssertionViolation>,
    },
    /// The property could not be resolved before the deadline
    Inconclusive {
        /// Why
        reason: String,
    },
    /// Preconditions absent in the shared environment; the expected behaviour is documented instead
    SkippedWithDocumentation {
        /// The documented expectation
        note: String,
    },
}

impl ScenarioOutcome {
    /// `Pass` when `violations` is empty, `Violation` otherwise
    #[must_use]
    pub fn from_violations(violations: Vec<AssertionViolation>) -> Self {
        if violations.is_empty() {
            Self::Pass
        } else {
            Self::Violation { violations }
        }
    }

    /// Whether this outcome fails a test
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }

    /// Whether the property held
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// The violations, if any
    #[must_use]
    pub fn violations(&self) -> &[AssertionViolation] {
        match self {
            Self::Violation { violations } => violations,
            _ => &[],
        }
    }

    /// Label used for the `outcome` metrics dimension
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Violation { .. } => "violation",
            Self::Inconclusive { .. } => "inconclusive",
            Self::SkippedWithDocumentation { .. } => "skipped",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn only_violations_fail() {
        assert!(!ScenarioOutcome::Pass.is_failure());
        assert!(
            !ScenarioOutcome::Inconclusive {
                reason: "deadline".into()
            }
            .is_failure()
        );
        assert!(
            !ScenarioOutcome::SkippedWithDocumentation {
                note: "no orders".into()
            }
            .is_failure()
        );
        assert!(ScenarioOutcome::from_violations(vec![AssertionViolation::OrderLost {
            checkpoint: "after".into()
        }])
        .is_failure());
    }

    #[test]
    fn only_missing_orders_await_the_ledger() {
        assert!(AssertionViolation::OrderLost { checkpoint: "after".into() }.awaits_ledger());
        assert!(AssertionViolation::UnexpectedOrderCount { expected: 2, actual: 1 }.awaits_ledger());
        assert!(!AssertionViolation::UnexpectedOrderCount { expected: 0, actual: 1 }.awaits_ledger());
        assert!(!AssertionViolation::DuplicateOrders { pairs: Vec::new() }.awaits_ledger());
        assert!(!AssertionViolation::StateInconsistency("x".into()).awaits_ledger());
    }

    #[test]
    fn empty_violation_list_is_a_pass() {
        assert_eq!(ScenarioOutcome::from_violations(Vec::new()), ScenarioOutcome::Pass);
    }

    #[test]
    fn outcome_serializes_with_a_kind_tag() {
        let json = serde_json::to_value(ScenarioOutcome::Inconclusive {
            reason: "deadline".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "inconclusive");
        assert_eq!(json["reason"], "deadline");
    }

    #[test]
    fn harness_errors_wrap_client_errors() {
        let err: HarnessError = ClientError::SessionClosed.into();
        assert_eq!(err.to_string(), "session is closed");
    }
}
