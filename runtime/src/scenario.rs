//! Scenario drivers.
//!
//! Each scenario opens its own sessions, drives them, captures ledgers and
//! turns the detector's findings into a [`ScenarioReport`]. Sessions are
//! closed and admin changes restored on every exit path, including harness
//! errors. Harness errors (`SetupFailed`, `InjectionFailed`, unreadable
//! ledgers) abort the scenario and are returned as `Err`; they never become a
//! pass.

use crate::actor::{Actor, CheckoutPlan, RecoveryDecision, close_all};
use crate::admin::AdminActor;
use crate::config::HarnessConfig;
use crate::injector::{InterruptInjector, InterruptReport};
use crate::metrics::{HarnessMetrics, register_metrics};
use crate::orchestrator::{ConcurrencyOrchestrator, RaceReport};
use checkout_harness_core::client::{ClientError, Storefront};
use checkout_harness_core::detector::{self, ComparisonResult, Expectation};
use checkout_harness_core::environment::Timer;
use checkout_harness_core::error::{AssertionViolation, HarnessError, ScenarioOutcome};
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::CheckoutState;
use checkout_harness_core::types::{ActorLabel, Identity, Money, OrderStatus, ProductRef};
use checkout_harness_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Serialisable result of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub name: String,
    /// Verdict
    pub outcome: ScenarioOutcome,
    /// Detector findings, when ledgers were compared
    pub comparison: Option<ComparisonResult>,
    /// Human-readable observations
    pub notes: Vec<String>,
    /// Wall time spent
    pub duration: Duration,
    /// Race details, for concurrent scenarios
    pub race: Option<RaceReport>,
    /// Interrupt details, for interrupted scenarios
    pub interrupt: Option<InterruptReport>,
}

impl ScenarioReport {
    /// Pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Default)]
struct Verdict {
    outcome: Option<ScenarioOutcome>,
    comparison: Option<ComparisonResult>,
    notes: Vec<String>,
    race: Option<RaceReport>,
    interrupt: Option<InterruptReport>,
}

impl Verdict {
    fn skipped(note: impl Into<String>) -> Self {
        Self {
            outcome: Some(ScenarioOutcome::SkippedWithDocumentation { note: note.into() }),
            ..Self::default()
        }
    }

    /// Confirmed violations take precedence over `Inconclusive`.
    fn add_violations(&mut self, extra: Vec<AssertionViolation>) {
        if extra.is_empty() {
            return;
        }
        match &mut self.outcome {
            Some(ScenarioOutcome::Violation { violations }) => violations.extend(extra),
            Some(ScenarioOutcome::SkippedWithDocumentation { .. }) => {},
            _ => self.outcome = Some(ScenarioOutcome::Violation { violations: extra }),
        }
    }

    fn outcome(&self) -> ScenarioOutcome {
        self.outcome.clone().unwrap_or(ScenarioOutcome::Pass)
    }
}

/// Runs scenarios against one storefront
pub struct ScenarioRunner {
    storefront: Arc<dyn Storefront>,
    timer: Arc<dyn Timer>,
    config: HarnessConfig,
}

impl ScenarioRunner {
    /// Creates a runner
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if `config` is invalid.
    pub fn new(
        storefront: Arc<dyn Storefront>,
        timer: Arc<dyn Timer>,
        config: HarnessConfig,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        register_metrics();
        Ok(Self {
            storefront,
            timer,
            config,
        })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Opens one actor session
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if the session cannot be opened.
    pub async fn open_actor(&self, label: &str, identity: Identity) -> Result<Actor, HarnessError> {
        Actor::open(
            self.storefront.as_ref(),
            ActorLabel::new(label),
            identity,
            Arc::clone(&self.timer),
            &self.config,
        )
        .await
    }

    /// One actor, one submission, no interruption: exactly one new order.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario.
    pub async fn single_submission(
        &self,
        identity: Identity,
        plan: &CheckoutPlan,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "single_submission";
        let started = self.timer.now();

        let mut actor = match self.open_actor("customer", identity).await {
            Ok(actor) => actor,
            Err(error) => return self.finish(NAME, started, Err(error)),
        };
        let result: Result<Verdict, HarnessError> = async {
            actor.prepare(plan).await?;
            let baseline = actor.capture_ledger("before submission").await?;
            let settled = actor.submit_and_settle(baseline.clone()).await?;
            let (verdict, _) = self.conclude_single(&actor, &baseline, settled, Vec::new()).await?;
            Ok(verdict)
        }
        .instrument(tracing::info_span!("scenario", name = NAME))
        .await;

        release(std::slice::from_mut(&mut actor)).await;
        self.finish(NAME, started, result)
    }

    /// Submit, interrupt after `delay`, recover, resubmit if needed: still
    /// exactly one new order across both attempts.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario,
    /// including [`HarnessError::InjectionFailed`].
    pub async fn interrupted_resubmission(
        &self,
        identity: Identity,
        plan: &CheckoutPlan,
        delay: Duration,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "interrupted_resubmission";
        let started = self.timer.now();

        let mut actor = match self.open_actor("customer", identity).await {
            Ok(actor) => actor,
            Err(error) => return self.finish(NAME, started, Err(error)),
        };
        let result: Result<Verdict, HarnessError> = self
            .run_interrupted(&mut actor, plan, delay)
            .instrument(tracing::info_span!("scenario", name = NAME, delay_ms = delay.as_millis()))
            .await;

        release(std::slice::from_mut(&mut actor)).await;
        self.finish(NAME, started, result)
    }

    async fn run_interrupted(
        &self,
        actor: &mut Actor,
        plan: &CheckoutPlan,
        delay: Duration,
    ) -> Result<Verdict, HarnessError> {
        actor.prepare(plan).await?;
        let baseline = actor.capture_ledger("before submission").await?;

        let injector = InterruptInjector::new(Arc::clone(&self.timer), &self.config.retry);
        let interrupt = injector.interrupt_after(actor, baseline.clone(), delay).await?;

        let mut notes = Vec::new();
        let settled = match actor.recover().await? {
            RecoveryDecision::AlreadyCompleted(id) => {
                notes.push(format!("interrupted attempt completed as order {id}; not resubmitted"));
                true
            },
            RecoveryDecision::Resume => {
                notes.push("no order after the interruption; checkout resubmitted".to_string());
                actor.complete_details(plan).await?;
                actor.submit_and_settle(baseline.clone()).await?
            },
            RecoveryDecision::CartClearedWithoutOrder => {
                notes.push("cart cleared without a visible order; polling for it".to_string());
                if let Some(id) = actor.await_late_order().await? {
                    notes.push(format!("order {id} appeared late"));
                }
                true
            },
        };

        let (mut verdict, _) = self.conclude_single(actor, &baseline, settled, notes).await?;
        verdict.interrupt = Some(interrupt);
        Ok(verdict)
    }

    /// Several actors released together.
    ///
    /// Actors sharing an account may produce up to one order each, but no two
    /// content-identical orders; actors on separate accounts must each
    /// produce exactly one. No order id may be claimed by two actors.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario.
    pub async fn concurrent_submission(
        &self,
        participants: Vec<(Identity, CheckoutPlan)>,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "concurrent_submission";
        let started = self.timer.now();

        let mut actors = Vec::with_capacity(participants.len());
        let mut plans = Vec::with_capacity(participants.len());
        for (index, (identity, plan)) in participants.into_iter().enumerate() {
            match self.open_actor(&format!("actor-{}", index + 1), identity).await {
                Ok(actor) => {
                    actors.push(actor);
                    plans.push(plan);
                },
                Err(error) => {
                    release(&mut actors).await;
                    return self.finish(NAME, started, Err(error));
                },
            }
        }

        let result: Result<Verdict, HarnessError> = self
            .run_concurrent(&mut actors, &plans)
            .instrument(tracing::info_span!("scenario", name = NAME))
            .await;

        release(&mut actors).await;
        self.finish(NAME, started, result)
    }

    async fn run_concurrent(
        &self,
        actors: &mut [Actor],
        plans: &[CheckoutPlan],
    ) -> Result<Verdict, HarnessError> {
        let orchestrator = ConcurrencyOrchestrator::new(
            Arc::clone(&self.timer),
            self.config.polling,
            self.config.race,
        );
        let race = orchestrator.run(actors, plans).await?;

        let mut afters = Vec::with_capacity(actors.len());
        for (actor, (_, baseline)) in actors.iter().zip(&race.baselines) {
            let after = actor.capture_ledger("after race").await?;
            afters.push(actor.enrich_new_orders(&after, baseline).await?);
        }

        let mut accounts: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, actor) in actors.iter().enumerate() {
            accounts.entry(actor.identity().account_key()).or_default().push(index);
        }

        let mut violations = Vec::new();
        let mut notes = Vec::new();
        let mut results = Vec::with_capacity(accounts.len());
        for members in accounts.values() {
            let captures: Vec<(&OrderLedgerSnapshot, &OrderLedgerSnapshot)> = members
                .iter()
                .map(|&i| (&race.baselines[i].1, &afters[i]))
                .collect();
            let (result, expectation) = match captures.as_slice() {
                [(before, after)] => (detector::compare(before, after), Expectation::SingleOrder),
                _ => (
                    detector::compare_shared(captures.iter().copied()),
                    Expectation::Concurrent(members.len()),
                ),
            };

            violations.extend(judge(expectation, &result, "after race"));
            for &i in members {
                violations.extend(history_violations(&afters[i], &race.baselines[i].1));
                violations.extend(state_violations(&actors[i], &result));
            }
            let labels: Vec<String> = members.iter().map(|&i| actors[i].label().to_string()).collect();
            notes.push(format!(
                "{} new order(s) for the account shared by {}",
                result.new_order_count,
                labels.join(", ")
            ));
            results.push(result);
        }

        // Sessions on one account may legitimately share the order their
        // common cart became; only ids crossing accounts are conflated.
        let account_of: BTreeMap<&ActorLabel, String> = actors
            .iter()
            .map(|actor| (actor.label(), actor.identity().account_key()))
            .collect();
        for (order_id, claimants) in detector::conflated_ids(&race.outcomes) {
            let accounts: BTreeSet<&String> = claimants.iter().filter_map(|l| account_of.get(l)).collect();
            if accounts.len() > 1 {
                violations.push(AssertionViolation::ConflatedOrderId {
                    order_id,
                    actors: claimants,
                });
            }
        }

        notes.push(format!(
            "release skew {} ms, race {:?}",
            race.release_skew.as_millis(),
            race.classification
        ));

        let mut verdict = Verdict {
            comparison: Some(merge(results)),
            notes,
            ..Verdict::default()
        };
        if race.timed_out() {
            // Missing orders prove nothing before every actor settled.
            violations.retain(|v| !v.awaits_ledger());
            verdict.outcome = Some(ScenarioOutcome::Inconclusive {
                reason: format!(
                    "not every actor settled within {:?}",
                    self.config.polling.deadline
                ),
            });
        }
        verdict.race = Some(race);
        verdict.add_violations(violations);
        Ok(verdict)
    }

    /// The admin raises or lowers a price after the customer reached
    /// `MethodsSelected`; one order is still expected, and whether its total
    /// reflects the new price is noted.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario or
    /// could not restore the original price.
    pub async fn price_change_mid_checkout(
        &self,
        admin: &mut AdminActor,
        identity: Identity,
        plan: &CheckoutPlan,
        product: &ProductRef,
        new_price: Money,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "price_change_mid_checkout";
        let started = self.timer.now();

        let mut actor = match self.open_actor("customer", identity).await {
            Ok(actor) => actor,
            Err(error) => return self.finish(NAME, started, Err(error)),
        };
        let result: Result<Verdict, HarnessError> = async {
            actor.prepare(plan).await?;
            let cart = actor.machine().cart.clone();
            let baseline = actor.capture_ledger("before submission").await?;

            admin.set_price(product, new_price).await?;
            let settled = actor.submit_and_settle(baseline.clone()).await?;
            let (mut verdict, after) = self.conclude_single(&actor, &baseline, settled, Vec::new()).await?;

            let old_total = cart.total();
            let new_total: Money = cart
                .lines()
                .map(|line| {
                    if &line.product == product {
                        new_price.times(line.quantity)
                    } else {
                        line.total()
                    }
                })
                .sum();
            let charged = verdict
                .comparison
                .as_ref()
                .and_then(|c| match c.order_ids.as_slice() {
                    [id] => after.get(id).and_then(|o| o.normalized_total()),
                    _ => None,
                });
            verdict.notes.push(match charged {
                Some(total) if total == new_total => format!("order total {total} reflects the new price"),
                Some(total) if total == old_total => {
                    format!("price drift: order charged {total}, the price when the cart was filled")
                },
                Some(total) => format!(
                    "price drift: order charged {total}, expected {new_total} (cart showed {old_total})"
                ),
                None => "no single order to check the price against".to_string(),
            });
            Ok(verdict)
        }
        .instrument(tracing::info_span!("scenario", name = NAME))
        .await;

        release(std::slice::from_mut(&mut actor)).await;
        let restored = admin.restore().await;
        self.finish(NAME, started, result.and_then(|v| restored.map(|()| v)))
    }

    /// The admin zeroes the stock after the customer reached
    /// `MethodsSelected`; the submission must fail and create no order.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario or
    /// could not restore the original stock.
    pub async fn stock_zeroed_mid_checkout(
        &self,
        admin: &mut AdminActor,
        identity: Identity,
        plan: &CheckoutPlan,
        product: &ProductRef,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "stock_zeroed_mid_checkout";
        let started = self.timer.now();

        let mut actor = match self.open_actor("customer", identity).await {
            Ok(actor) => actor,
            Err(error) => return self.finish(NAME, started, Err(error)),
        };
        let result: Result<Verdict, HarnessError> = async {
            actor.prepare(plan).await?;
            let baseline = actor.capture_ledger("before submission").await?;

            admin.set_stock(product, 0).await?;
            let settled = actor.submit_and_settle(baseline.clone()).await?;

            let after = actor.capture_ledger("after submission").await?;
            let comparison = detector::compare(&baseline, &after);
            let mut verdict = Verdict::default();
            if settled {
                let mut violations = history_violations(&after, &baseline);
                violations.extend(judge(Expectation::NoOrder, &comparison, after.checkpoint()));
                violations.extend(state_violations(&actor, &comparison));
                verdict.add_violations(violations);
            } else {
                verdict.outcome = Some(inconclusive(&actor, &self.config));
            }
            match actor.state() {
                CheckoutState::Failed(reason) => verdict.notes.push(format!("submission refused: {reason}")),
                other => verdict.notes.push(format!("expected a refused submission, actor is {other}")),
            }
            verdict.comparison = Some(comparison);
            Ok(verdict)
        }
        .instrument(tracing::info_span!("scenario", name = NAME))
        .await;

        release(std::slice::from_mut(&mut actor)).await;
        let restored = admin.restore().await;
        self.finish(NAME, started, result.and_then(|v| restored.map(|()| v)))
    }

    /// Cancels the most recent cancellable order, checks it stays listed with
    /// the same total, then checks out once more and expects exactly one new
    /// order. Without a cancellable order the scenario documents the expected
    /// behaviour instead.
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] if the harness could not run the scenario.
    pub async fn cancel_then_reorder(
        &self,
        identity: Identity,
        plan: &CheckoutPlan,
    ) -> Result<ScenarioReport, HarnessError> {
        const NAME: &str = "cancel_then_reorder";
        const EXPECTED: &str = "a cancelled order stays in the history with its total unchanged, \
                                and a fresh checkout afterwards creates exactly one new order";
        let started = self.timer.now();

        let mut actor = match self.open_actor("customer", identity).await {
            Ok(actor) => actor,
            Err(error) => return self.finish(NAME, started, Err(error)),
        };
        let result: Result<Verdict, HarnessError> = async {
            let before = actor.capture_ledger("before cancel").await?;
            let Some(target) = before.orders().iter().find(|o| o.status.is_cancellable()) else {
                return Ok(Verdict::skipped(format!(
                    "no cancellable order in the history; expected: {EXPECTED}"
                )));
            };
            let target_id = target.order_id.clone();

            match actor.client().cancel_order(&target_id).await {
                Ok(_) => {},
                Err(ClientError::NotCancellable(_)) => {
                    return Ok(Verdict::skipped(format!(
                        "order {target_id} could not be cancelled; expected: {EXPECTED}"
                    )));
                },
                Err(error) => return Err(error.into()),
            }

            let after_cancel = actor.capture_ledger("after cancel").await?;
            let mut violations = history_violations(&after_cancel, &before);
            let mut notes = Vec::new();
            match after_cancel.get(&target_id).map(|o| &o.status) {
                Some(OrderStatus::Cancelled) => notes.push(format!("order {target_id} cancelled")),
                Some(status) => notes.push(format!("order {target_id} still {status:?} after cancel")),
                None => violations.push(AssertionViolation::StateInconsistency(format!(
                    "order {target_id} disappeared after cancel"
                ))),
            }

            actor.prepare(plan).await?;
            let settled = actor.submit_and_settle(after_cancel.clone()).await?;
            let (mut verdict, _) = self.conclude_single(&actor, &after_cancel, settled, notes).await?;
            verdict.add_violations(violations);
            Ok(verdict)
        }
        .instrument(tracing::info_span!("scenario", name = NAME))
        .await;

        release(std::slice::from_mut(&mut actor)).await;
        self.finish(NAME, started, result)
    }

    /// Final capture and judgement for one logical attempt
    async fn conclude_single(
        &self,
        actor: &Actor,
        baseline: &OrderLedgerSnapshot,
        settled: bool,
        notes: Vec<String>,
    ) -> Result<(Verdict, OrderLedgerSnapshot), HarnessError> {
        let after = actor.capture_ledger("after submission").await?;
        let after = actor.enrich_new_orders(&after, baseline).await?;
        let comparison = detector::compare(baseline, &after);
        log_id_ordering(baseline, &comparison);

        let mut verdict = Verdict {
            notes,
            ..Verdict::default()
        };
        if settled {
            let mut violations = history_violations(&after, baseline);
            violations.extend(judge(Expectation::SingleOrder, &comparison, after.checkpoint()));
            violations.extend(state_violations(actor, &comparison));
            verdict.add_violations(violations);
        } else {
            verdict.outcome = Some(inconclusive(actor, &self.config));
        }
        if let CheckoutState::Failed(reason) = actor.state() {
            verdict.notes.push(format!("checkout failed: {reason}"));
        }
        if !comparison.suspect_pairs.is_empty() {
            verdict.notes.push(format!(
                "orders with equal totals but unknown items: {:?}",
                comparison.suspect_pairs
            ));
        }
        verdict.comparison = Some(comparison);
        Ok((verdict, after))
    }

    fn finish(
        &self,
        name: &str,
        started: DateTime<Utc>,
        result: Result<Verdict, HarnessError>,
    ) -> Result<ScenarioReport, HarnessError> {
        let verdict = match result {
            Ok(verdict) => verdict,
            Err(error) => {
                HarnessMetrics::record_scenario("aborted");
                tracing::error!(scenario = name, %error, "scenario aborted");
                return Err(error);
            },
        };

        let outcome = verdict.outcome();
        HarnessMetrics::record_scenario(outcome.label());
        if let Some(comparison) = &verdict.comparison {
            HarnessMetrics::record_duplicates(comparison.duplicate_pairs.len());
        }
        let duration = (self.timer.now() - started).to_std().unwrap_or_default();
        tracing::info!(
            scenario = name,
            outcome = outcome.label(),
            duration_ms = duration.as_millis(),
            "scenario finished"
        );

        Ok(ScenarioReport {
            name: name.to_string(),
            outcome,
            comparison: verdict.comparison,
            notes: verdict.notes,
            duration,
            race: verdict.race,
            interrupt: verdict.interrupt,
        })
    }
}

async fn release(actors: &mut [Actor]) {
    if let Err(error) = close_all(actors).await {
        tracing::warn!(%error, "not every session closed cleanly");
    }
}

fn inconclusive(actor: &Actor, config: &HarnessConfig) -> ScenarioOutcome {
    ScenarioOutcome::Inconclusive {
        reason: format!(
            "{} still {} after {:?}",
            actor.label(),
            actor.state(),
            config.polling.deadline
        ),
    }
}

/// Violations implied by the detector's assessment
fn judge(expectation: Expectation, result: &ComparisonResult, checkpoint: &str) -> Vec<AssertionViolation> {
    use detector::Assessment;

    let expected = match expectation {
        Expectation::SingleOrder => 1,
        Expectation::Concurrent(n) | Expectation::Distinct(n) => n,
        Expectation::NoOrder => 0,
    };
    match result.assess(expectation) {
        Assessment::Duplicated => vec![AssertionViolation::DuplicateOrders {
            pairs: result.duplicate_pairs.clone(),
        }],
        Assessment::OrderLost => vec![AssertionViolation::OrderLost {
            checkpoint: checkpoint.to_string(),
        }],
        Assessment::UnexpectedCount => vec![AssertionViolation::UnexpectedOrderCount {
            expected,
            actual: result.new_order_count,
        }],
        Assessment::Idempotent | Assessment::DistinctOrders | Assessment::NothingCreated => Vec::new(),
    }
}

fn history_violations(later: &OrderLedgerSnapshot, earlier: &OrderLedgerSnapshot) -> Vec<AssertionViolation> {
    later
        .verify_extends(earlier)
        .err()
        .unwrap_or_default()
        .into_iter()
        .map(AssertionViolation::from)
        .collect()
}

/// An actor claiming an order the ledger does not show as new
fn state_violations(actor: &Actor, result: &ComparisonResult) -> Vec<AssertionViolation> {
    match actor.state() {
        CheckoutState::Succeeded(id) if !result.contains(id) => {
            vec![AssertionViolation::StateInconsistency(format!(
                "{} reports order {id}, which is not among the new orders",
                actor.label()
            ))]
        },
        _ => Vec::new(),
    }
}

/// Several per-account results as one
fn merge(results: Vec<ComparisonResult>) -> ComparisonResult {
    let mut merged = ComparisonResult::default();
    for result in results {
        merged.new_order_count += result.new_order_count;
        merged.order_ids.extend(result.order_ids);
        merged.duplicate_pairs.extend(result.duplicate_pairs);
        merged.suspect_pairs.extend(result.suspect_pairs);
    }
    merged.order_ids.sort();
    merged
}

/// Identifiers are opaque; numeric order is only logged as a curiosity.
fn log_id_ordering(baseline: &OrderLedgerSnapshot, result: &ComparisonResult) {
    let newest_known = baseline
        .orders()
        .iter()
        .filter_map(|o| o.order_id.as_str().parse::<u64>().ok())
        .max();
    let Some(newest_known) = newest_known else {
        return;
    };
    for id in &result.order_ids {
        if let Ok(numeric) = id.as_str().parse::<u64>() {
            if numeric <= newest_known {
                tracing::debug!(order = %id, newest_known, "new order id is not numerically greater than existing ids");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_harness_core::types::OrderId;

    fn result(count: usize, dups: usize) -> ComparisonResult {
        ComparisonResult {
            new_order_count: count,
            order_ids: (0..count).map(|i| OrderId::new(i.to_string())).collect(),
            duplicate_pairs: (0..dups)
                .map(|i| (OrderId::new(format!("{i}a")), OrderId::new(format!("{i}b"))))
                .collect(),
            suspect_pairs: Vec::new(),
        }
    }

    #[test]
    fn judge_maps_assessments_to_violations() {
        assert!(judge(Expectation::SingleOrder, &result(1, 0), "after").is_empty());
        assert_eq!(
            judge(Expectation::SingleOrder, &result(0, 0), "after"),
            vec![AssertionViolation::OrderLost {
                checkpoint: "after".into()
            }]
        );
        assert_eq!(
            judge(Expectation::NoOrder, &result(1, 0), "after"),
            vec![AssertionViolation::UnexpectedOrderCount {
                expected: 0,
                actual: 1
            }]
        );
        assert!(matches!(
            judge(Expectation::Concurrent(2), &result(2, 1), "after").as_slice(),
            [AssertionViolation::DuplicateOrders { .. }]
        ));
    }

    #[test]
    fn merge_sums_counts_and_sorts_ids() {
        let mut a = result(1, 0);
        a.order_ids = vec![OrderId::new("b")];
        let mut b = result(1, 0);
        b.order_ids = vec![OrderId::new("a")];

        let merged = merge(vec![a, b]);
        assert_eq!(merged.new_order_count, 2);
        assert_eq!(merged.order_ids, vec![OrderId::new("a"), OrderId::new("b")]);
    }

    #[test]
    fn violations_override_inconclusive() {
        let mut verdict = Verdict {
            outcome: Some(ScenarioOutcome::Inconclusive {
                reason: "deadline".into(),
            }),
            ..Verdict::default()
        };
        verdict.add_violations(vec![AssertionViolation::StateInconsistency("x".into())]);
        assert!(verdict.outcome().is_failure());

        let mut passing = Verdict::default();
        passing.add_violations(Vec::new());
        assert!(passing.outcome().is_pass());
    }
}
