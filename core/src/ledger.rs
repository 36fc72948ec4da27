//! Order ledger snapshots.
//!
//! A snapshot is an immutable capture of the order history visible to one
//! session, most recent first, taken at a named checkpoint. Snapshots are only
//! ever compared, never mutated.

use crate::types::{OrderId, OrderSummary};
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised while building or comparing ledger snapshots
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerError {
    /// The same identifier appeared twice in one capture
    #[error("order {0} appears more than once in a single ledger capture")]
    DuplicateIdentifier(OrderId),

    /// A row's position does not match its index
    #[error("order {order_id} reports position {reported} but sits at index {actual}")]
    PositionMismatch {
        /// Offending order
        order_id: OrderId,
        /// Position carried by the summary
        reported: usize,
        /// Index in the capture
        actual: usize,
    },

    /// A later capture contradicts an earlier one
    #[error("ledger inconsistency: {0}")]
    Inconsistent(LedgerInconsistency),
}

/// How a later snapshot contradicts an earlier one
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerInconsistency {
    /// An order seen earlier is missing later
    #[error("order {order_id} seen at '{earlier}' is missing at '{later}'")]
    OrderVanished {
        /// The missing order
        order_id: OrderId,
        /// Checkpoint where it was seen
        earlier: String,
        /// Checkpoint where it is missing
        later: String,
    },

    /// An order's total changed between captures
    #[error("order {order_id} total changed from '{before}' to '{after}'")]
    TotalAltered {
        /// The altered order
        order_id: OrderId,
        /// Earlier total
        before: String,
        /// Later total
        after: String,
    },
}

/// Immutable capture of an order history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLedgerSnapshot {
    checkpoint: String,
    captured_at: DateTime<Utc>,
    orders: Vec<OrderSummary>,
}

impl OrderLedgerSnapshot {
    /// Builds a snapshot, validating unique identifiers and positions.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateIdentifier`] or
    /// [`LedgerError::PositionMismatch`].
    pub fn new(
        checkpoint: impl Into<String>,
        captured_at: DateTime<Utc>,
        orders: Vec<OrderSummary>,
    ) -> Result<Self, LedgerError> {
        let mut seen = HashSet::with_capacity(orders.len());
        for (index, order) in orders.iter().enumerate() {
            if !seen.insert(&order.order_id) {
                return Err(LedgerError::DuplicateIdentifier(order.order_id.clone()));
            }
            if order.position_from_most_recent != index {
                return Err(LedgerError::PositionMismatch {
                    order_id: order.order_id.clone(),
                    reported: order.position_from_most_recent,
                    actual: index,
                });
            }
        }

        Ok(Self {
            checkpoint: checkpoint.into(),
            captured_at,
            orders,
        })
    }

    /// Builds a snapshot from summaries in most-recent-first order, assigning
    /// positions from their index.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateIdentifier`] if an identifier repeats.
    pub fn from_recent_first(
        checkpoint: impl Into<String>,
        captured_at: DateTime<Utc>,
        orders: Vec<OrderSummary>,
    ) -> Result<Self, LedgerError> {
        let orders = orders
            .into_iter()
            .enumerate()
            .map(|(index, mut order)| {
                order.position_from_most_recent = index;
                order
            })
            .collect();
        Self::new(checkpoint, captured_at, orders)
    }

    /// A snapshot with no orders
    #[must_use]
    pub fn empty(checkpoint: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            captured_at,
            orders: Vec::new(),
        }
    }

    /// The same orders under another checkpoint name
    #[must_use]
    pub fn relabel(&self, checkpoint: impl Into<String>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            captured_at: self.captured_at,
            orders: self.orders.clone(),
        }
    }

    /// Checkpoint name
    #[must_use]
    pub fn checkpoint(&self) -> &str {
        &self.checkpoint
    }

    /// Capture time
    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Orders, most recent first
    #[must_use]
    pub fn orders(&self) -> &[OrderSummary] {
        &self.orders
    }

    /// Number of visible orders
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no order is visible
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// The most recent order
    #[must_use]
    pub fn head(&self) -> Option<&OrderSummary> {
        self.orders.first()
    }

    /// Whether the identifier is present
    #[must_use]
    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.orders.iter().any(|o| &o.order_id == order_id)
    }

    /// Looks up one order
    #[must_use]
    pub fn get(&self, order_id: &OrderId) -> Option<&OrderSummary> {
        self.orders.iter().find(|o| &o.order_id == order_id)
    }

    /// Identifiers as a set
    #[must_use]
    pub fn id_set(&self) -> HashSet<&OrderId> {
        self.orders.iter().map(|o| &o.order_id).collect()
    }

    /// Orders present here but absent from `baseline`, in this snapshot's order.
    ///
    /// Set difference by identifier; positions are ignored because unrelated
    /// activity may shift them.
    #[must_use]
    pub fn new_since(&self, baseline: &Self) -> Vec<&OrderSummary> {
        let known = baseline.id_set();
        self.orders
            .iter()
            .filter(|o| !known.contains(&o.order_id))
            .collect()
    }

    /// Checks that this snapshot does not retroactively alter `earlier`.
    ///
    /// Every earlier order must still be present with the same displayed total.
    /// Status changes are allowed.
    ///
    /// # Errors
    ///
    /// Returns every inconsistency found, in the earlier snapshot's order.
    pub fn verify_extends(&self, earlier: &Self) -> Result<(), Vec<LedgerInconsistency>> {
        let current: HashMap<&OrderId, &OrderSummary> =
            self.orders.iter().map(|o| (&o.order_id, o)).collect();

        let problems: Vec<LedgerInconsistency> = earlier
            .orders
            .iter()
            .filter_map(|old| match current.get(&old.order_id) {
                None => Some(LedgerInconsistency::OrderVanished {
                    order_id: old.order_id.clone(),
                    earlier: earlier.checkpoint.clone(),
                    later: self.checkpoint.clone(),
                }),
                Some(new) if !old.same_total(new) => Some(LedgerInconsistency::TotalAltered {
                    order_id: old.order_id.clone(),
                    before: old.total_observed.clone(),
                    after: new.total_observed.clone(),
                }),
                Some(_) => None,
            })
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ledger(checkpoint: &str, rows: &[(&str, &str)]) -> OrderLedgerSnapshot {
        OrderLedgerSnapshot::from_recent_first(
            checkpoint,
            at(),
            rows.iter()
                .map(|(id, total)| OrderSummary::new(OrderId::new(*id), *total, 0))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let err = OrderLedgerSnapshot::from_recent_first(
            "x",
            at(),
            vec![
                OrderSummary::new(OrderId::new("1"), "$1.00", 0),
                OrderSummary::new(OrderId::new("1"), "$1.00", 1),
            ],
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateIdentifier(OrderId::new("1")));
    }

    #[test]
    fn rejects_inconsistent_positions() {
        let err = OrderLedgerSnapshot::new(
            "x",
            at(),
            vec![OrderSummary::new(OrderId::new("1"), "$1.00", 3)],
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::PositionMismatch { reported: 3, actual: 0, .. }));
    }

    #[test]
    fn new_since_is_a_set_difference() {
        let before = ledger("before", &[("b", "$2.00"), ("a", "$1.00")]);
        // Unrelated activity reordered the old rows.
        let after = ledger("after", &[("c", "$3.00"), ("a", "$1.00"), ("b", "$2.00")]);

        let new: Vec<&str> = after
            .new_since(&before)
            .iter()
            .map(|o| o.order_id.as_str())
            .collect();
        assert_eq!(new, vec!["c"]);
    }

    #[test]
    fn verify_extends_accepts_growth_and_status_change() {
        let before = ledger("before", &[("a", "$1.00")]);
        let after = OrderLedgerSnapshot::from_recent_first(
            "after",
            at(),
            vec![
                OrderSummary::new(OrderId::new("b"), "$2.00", 0),
                OrderSummary::new(OrderId::new("a"), "1.00 USD", 1).with_status(OrderStatus::Cancelled),
            ],
        )
        .unwrap();

        assert!(after.verify_extends(&before).is_ok());
    }

    #[test]
    fn verify_extends_reports_vanished_and_altered_orders() {
        let before = ledger("before", &[("b", "$2.00"), ("a", "$1.00")]);
        let after = ledger("after", &[("b", "$2.50")]);

        let problems = after.verify_extends(&before).unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], LedgerInconsistency::TotalAltered { .. }));
        assert!(matches!(problems[1], LedgerInconsistency::OrderVanished { .. }));
    }
}
