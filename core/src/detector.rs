//! Duplicate detection over ledger snapshots.
//!
//! New orders are the set difference of identifiers between two snapshots.
//! Positions are never used: unrelated activity on the same account may shift
//! them. Two new orders are a duplicate pair when their normalised totals and
//! their line-item sets are equal.
//!
//! Results are advisory. [`ComparisonResult::assess`] interprets a result
//! against what the scenario expected; the caller decides what fails.

use crate::ledger::OrderLedgerSnapshot;
use crate::machine::CheckoutState;
use crate::types::{ActorLabel, LineItem, OrderId, OrderSummary};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What the detector derived from a before/after pair
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Number of orders present after but not before
    pub new_order_count: usize,
    /// Their identifiers, sorted
    pub order_ids: Vec<OrderId>,
    /// Content-identical pairs of new orders
    pub duplicate_pairs: Vec<(OrderId, OrderId)>,
    /// Pairs with equal totals whose line items are unknown on at least one side
    pub suspect_pairs: Vec<(OrderId, OrderId)>,
}

/// What a scenario expects to have been created
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expectation {
    /// One logical checkout attempt, possibly retried
    SingleOrder,
    /// Up to `n` concurrent attempts on one account; any count from one to
    /// `n` is acceptable as long as no two orders are content-identical
    Concurrent(usize),
    /// Exactly `n` independent orders (different accounts)
    Distinct(usize),
    /// The storefront was expected to refuse every attempt
    NoOrder,
}

/// Interpretation of a [`ComparisonResult`] against an [`Expectation`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assessment {
    /// Exactly one order for one logical attempt
    Idempotent,
    /// At least one content-identical pair
    Duplicated,
    /// An order was expected but none appeared
    OrderLost,
    /// Several legitimate, unrelated orders
    DistinctOrders,
    /// Nothing was created, as expected
    NothingCreated,
    /// Any other count
    UnexpectedCount,
}

impl Assessment {
    /// Whether this assessment confirms a defect
    #[must_use]
    pub const fn is_violation(self) -> bool {
        matches!(self, Self::Duplicated | Self::OrderLost | Self::UnexpectedCount)
    }
}

impl ComparisonResult {
    /// Interprets the result.
    ///
    /// Duplicates dominate: a content-identical pair is reported as
    /// [`Assessment::Duplicated`] whatever was expected.
    #[must_use]
    pub fn assess(&self, expectation: Expectation) -> Assessment {
        if !self.duplicate_pairs.is_empty() {
            return Assessment::Duplicated;
        }

        let count = self.new_order_count;
        match expectation {
            Expectation::SingleOrder => match count {
                0 => Assessment::OrderLost,
                1 => Assessment::Idempotent,
                _ => Assessment::UnexpectedCount,
            },
            Expectation::Concurrent(max) => match count {
                0 => Assessment::OrderLost,
                1 => Assessment::Idempotent,
                n if n <= max => Assessment::DistinctOrders,
                _ => Assessment::UnexpectedCount,
            },
            Expectation::Distinct(expected) => match count {
                0 if expected > 0 => Assessment::OrderLost,
                n if n == expected => Assessment::DistinctOrders,
                _ => Assessment::UnexpectedCount,
            },
            Expectation::NoOrder => match count {
                0 => Assessment::NothingCreated,
                _ => Assessment::UnexpectedCount,
            },
        }
    }

    /// Whether `id` is among the new orders
    #[must_use]
    pub fn contains(&self, id: &OrderId) -> bool {
        self.order_ids.binary_search(id).is_ok()
    }
}

/// Compares two captures of one ledger
#[must_use]
pub fn compare(before: &OrderLedgerSnapshot, after: &OrderLedgerSnapshot) -> ComparisonResult {
    from_new_orders(after.new_since(before))
}

/// Compares per-actor captures of a single shared account.
///
/// The new orders of every pair are united and deduplicated by identifier, so
/// an order seen by both sessions is counted once.
#[must_use]
pub fn compare_shared<'a, I>(captures: I) -> ComparisonResult
where
    I: IntoIterator<Item = (&'a OrderLedgerSnapshot, &'a OrderLedgerSnapshot)>,
{
    let mut seen = HashSet::new();
    let mut union = Vec::new();
    for (before, after) in captures {
        for order in after.new_since(before) {
            if seen.insert(&order.order_id) {
                union.push(order);
            }
        }
    }
    from_new_orders(union)
}

/// Whether two orders have the same normalised total and the same line items.
///
/// Unknown line items on either side never count as a duplicate.
#[must_use]
pub fn is_content_duplicate(a: &OrderSummary, b: &OrderSummary) -> bool {
    if !a.same_total(b) {
        return false;
    }
    match (&a.line_items, &b.line_items) {
        (Some(left), Some(right)) => sorted(left) == sorted(right),
        _ => false,
    }
}

/// Order ids claimed as `Succeeded` by more than one actor
#[must_use]
pub fn conflated_ids(outcomes: &[(ActorLabel, CheckoutState)]) -> Vec<(OrderId, Vec<ActorLabel>)> {
    let mut claims: BTreeMap<&OrderId, Vec<ActorLabel>> = BTreeMap::new();
    for (actor, state) in outcomes {
        if let Some(id) = state.order_id() {
            claims.entry(id).or_default().push(actor.clone());
        }
    }
    claims
        .into_iter()
        .filter(|(_, actors)| actors.len() > 1)
        .map(|(id, actors)| (id.clone(), actors))
        .collect()
}

fn from_new_orders(mut new_orders: Vec<&OrderSummary>) -> ComparisonResult {
    new_orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));

    let mut duplicate_pairs = Vec::new();
    let mut suspect_pairs = Vec::new();
    for (i, a) in new_orders.iter().enumerate() {
        for b in &new_orders[i + 1..] {
            let pair = (a.order_id.clone(), b.order_id.clone());
            if is_content_duplicate(a, b) {
                duplicate_pairs.push(pair);
            } else if a.same_total(b) && (a.line_items.is_none() || b.line_items.is_none()) {
                suspect_pairs.push(pair);
            }
        }
    }

    ComparisonResult {
        new_order_count: new_orders.len(),
        order_ids: new_orders.iter().map(|o| o.order_id.clone()).collect(),
        duplicate_pairs,
        suspect_pairs,
    }
}

fn sorted(items: &[LineItem]) -> Vec<&LineItem> {
    let mut items: Vec<&LineItem> = items.iter().collect();
    items.sort();
    items
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Money;
    use crate::{DateTime, Utc};
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn order(id: &str, total: &str, items: Option<&[(&str, u32, i64)]>) -> OrderSummary {
        let summary = OrderSummary::new(OrderId::new(id), total, 0);
        match items {
            Some(items) => summary.with_line_items(
                items
                    .iter()
                    .map(|(p, q, c)| LineItem::new(*p, *q, Money::from_cents(*c)))
                    .collect(),
            ),
            None => summary,
        }
    }

    fn ledger(orders: Vec<OrderSummary>) -> OrderLedgerSnapshot {
        OrderLedgerSnapshot::from_recent_first("test", at(), orders).unwrap()
    }

    const HOODIE: &[(&str, u32, i64)] = &[("hoodie", 1, 1999)];

    #[test]
    fn single_new_order_is_idempotent() {
        let before = ledger(vec![order("10", "$5.00", None)]);
        let after = ledger(vec![order("11", "$19.99", Some(HOODIE)), order("10", "$5.00", None)]);

        let result = compare(&before, &after);
        assert_eq!(result.new_order_count, 1);
        assert_eq!(result.order_ids, vec![OrderId::new("11")]);
        assert!(result.duplicate_pairs.is_empty());
        assert_eq!(result.assess(Expectation::SingleOrder), Assessment::Idempotent);
    }

    #[test]
    fn identical_orders_form_a_duplicate_pair() {
        let before = ledger(vec![]);
        let after = ledger(vec![
            order("12", "$19.99", Some(HOODIE)),
            order("11", "19.99 USD", Some(HOODIE)),
        ]);

        let result = compare(&before, &after);
        assert_eq!(
            result.duplicate_pairs,
            vec![(OrderId::new("11"), OrderId::new("12"))]
        );
        assert_eq!(result.assess(Expectation::Concurrent(2)), Assessment::Duplicated);
        assert!(Assessment::Duplicated.is_violation());
    }

    #[test]
    fn different_totals_are_distinct_orders() {
        let after = ledger(vec![
            order("12", "$19.99", Some(HOODIE)),
            order("11", "$25.00", Some(&[("mug", 1, 2500)])),
        ]);

        let result = compare(&ledger(vec![]), &after);
        assert!(result.duplicate_pairs.is_empty());
        assert!(result.suspect_pairs.is_empty());
        assert_eq!(result.assess(Expectation::Concurrent(2)), Assessment::DistinctOrders);
        assert_eq!(result.assess(Expectation::Distinct(2)), Assessment::DistinctOrders);
        assert_eq!(result.assess(Expectation::SingleOrder), Assessment::UnexpectedCount);
    }

    #[test]
    fn unknown_items_with_equal_totals_are_suspect_not_duplicate() {
        let after = ledger(vec![order("2", "$19.99", None), order("1", "$19.99", Some(HOODIE))]);

        let result = compare(&ledger(vec![]), &after);
        assert!(result.duplicate_pairs.is_empty());
        assert_eq!(result.suspect_pairs, vec![(OrderId::new("1"), OrderId::new("2"))]);
    }

    #[test]
    fn zero_new_orders() {
        let before = ledger(vec![order("1", "$1.00", None)]);
        let result = compare(&before, &before.relabel("after"));

        assert_eq!(result.new_order_count, 0);
        assert_eq!(result.assess(Expectation::SingleOrder), Assessment::OrderLost);
        assert_eq!(result.assess(Expectation::NoOrder), Assessment::NothingCreated);
        assert!(!Assessment::NothingCreated.is_violation());
    }

    #[test]
    fn shared_comparison_counts_each_order_once() {
        let before = ledger(vec![order("1", "$1.00", None)]);
        let seen_by_a = ledger(vec![order("3", "$2.00", None), order("1", "$1.00", None)]);
        let seen_by_b = ledger(vec![
            order("4", "$3.00", None),
            order("3", "$2.00", None),
            order("1", "$1.00", None),
        ]);

        let result = compare_shared([(&before, &seen_by_a), (&before, &seen_by_b)]);
        assert_eq!(result.new_order_count, 2);
        assert_eq!(result.order_ids, vec![OrderId::new("3"), OrderId::new("4")]);
    }

    #[test]
    fn conflated_ids_are_reported() {
        let outcomes = vec![
            (ActorLabel::new("a"), CheckoutState::Succeeded(OrderId::new("9"))),
            (ActorLabel::new("b"), CheckoutState::Succeeded(OrderId::new("9"))),
            (ActorLabel::new("c"), CheckoutState::Interrupted),
        ];

        let conflated = conflated_ids(&outcomes);
        assert_eq!(conflated.len(), 1);
        assert_eq!(conflated[0].0, OrderId::new("9"));
        assert_eq!(conflated[0].1.len(), 2);
    }

    proptest! {
        #[test]
        fn reordering_after_does_not_change_the_result(
            (rows, shuffled) in prop::collection::btree_map(0u32..40, 1i64..5, 0..12)
                .prop_flat_map(|rows| {
                    let rows: Vec<(u32, i64)> = rows.into_iter().collect();
                    (Just(rows.clone()), Just(rows).prop_shuffle())
                })
        ) {
            let build = |rows: &[(u32, i64)]| {
                let orders = rows
                    .iter()
                    .map(|(id, cents)| {
                        let total = Money::from_cents(*cents);
                        OrderSummary::new(OrderId::new(id.to_string()), total.to_string(), 0)
                            .with_line_items(vec![LineItem::new("p", 1, total)])
                    })
                    .collect();
                ledger(orders)
            };
            let before = ledger(vec![]);

            let a = compare(&before, &build(&rows));
            let b = compare(&before, &build(&shuffled));

            prop_assert_eq!(a.new_order_count, b.new_order_count);
            prop_assert_eq!(a.duplicate_pairs, b.duplicate_pairs);
        }
    }
}
