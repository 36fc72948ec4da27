//! Near-simultaneous release of several actors.
//!
//! The orchestrator drives every actor to `MethodsSelected` in parallel and
//! waits for all of them (a barrier), captures one baseline ledger per actor,
//! then dispatches every `submit_order()` without waiting on the others and
//! polls until all actors have settled or the deadline elapses.
//!
//! Dispatch is concurrent, not simultaneous: the storefront sees unordered
//! submissions within a small window, and the measured spread is reported.

use crate::actor::{Actor, CheckoutPlan};
use crate::config::{PollingConfig, RaceConfig};
use crate::metrics::HarnessMetrics;
use crate::retry::{PollOutcome, poll_until};
use checkout_harness_core::environment::Timer;
use checkout_harness_core::error::HarnessError;
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::CheckoutState;
use checkout_harness_core::types::ActorLabel;
use checkout_harness_core::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a race ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceClassification {
    /// Every actor succeeded
    AllSucceeded,
    /// Some but not all actors succeeded
    SomeSucceeded,
    /// No actor succeeded
    NoneSucceeded,
    /// The deadline elapsed before every actor settled
    TimedOut,
}

/// Observations from one concurrent release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceReport {
    /// Ledger per actor captured before release
    pub baselines: Vec<(ActorLabel, OrderLedgerSnapshot)>,
    /// State per actor when the race ended
    pub outcomes: Vec<(ActorLabel, CheckoutState)>,
    /// When each actor's submit call was dispatched
    pub dispatched_at: Vec<(ActorLabel, DateTime<Utc>)>,
    /// Spread between the first and last dispatch
    pub release_skew: Duration,
    /// Overall classification
    pub classification: RaceClassification,
}

impl RaceReport {
    /// Whether the deadline elapsed
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.classification == RaceClassification::TimedOut
    }

    /// Number of actors that succeeded
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, state)| matches!(state, CheckoutState::Succeeded(_)))
            .count()
    }
}

/// Coordinates concurrent submissions
pub struct ConcurrencyOrchestrator {
    timer: Arc<dyn Timer>,
    polling: PollingConfig,
    race: RaceConfig,
}

impl ConcurrencyOrchestrator {
    /// Creates an orchestrator
    #[must_use]
    pub fn new(timer: Arc<dyn Timer>, polling: PollingConfig, race: RaceConfig) -> Self {
        Self {
            timer,
            polling,
            race,
        }
    }

    /// Brings every actor to the barrier, releases them and polls them to a stable state.
    ///
    /// Sessions are not closed here; the caller owns the actors.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if fewer than two actors are given,
    /// plans and actors do not pair up, or any actor fails before the barrier.
    pub async fn run(
        &self,
        actors: &mut [Actor],
        plans: &[CheckoutPlan],
    ) -> Result<RaceReport, HarnessError> {
        let first = actors
            .first()
            .map(|a| a.label().clone())
            .unwrap_or_else(|| ActorLabel::new("orchestrator"));
        if actors.len() < 2 {
            return Err(HarnessError::setup(&first, "a race needs at least two actors"));
        }
        if plans.len() != actors.len() {
            return Err(HarnessError::setup(&first, "one checkout plan per actor is required"));
        }

        // Barrier: every actor at MethodsSelected, or the scenario aborts.
        let prepared = join_all(actors.iter_mut().zip(plans).map(|(actor, plan)| actor.prepare(plan))).await;
        prepared.into_iter().collect::<Result<Vec<()>, _>>()?;
        tracing::info!(actors = actors.len(), "all actors at the pre-submission barrier");

        let captured = join_all(actors.iter().map(|actor| actor.capture_ledger("before race"))).await;
        let baselines: Vec<OrderLedgerSnapshot> = captured.into_iter().collect::<Result<_, _>>()?;

        let receivers: Vec<_> = actors.iter().map(Actor::subscribe).collect();
        let mut submissions = Vec::with_capacity(actors.len());
        for (actor, baseline) in actors.iter_mut().zip(&baselines) {
            submissions.push(actor.place_order(baseline.clone())?);
        }

        let dispatched: Mutex<Vec<(ActorLabel, DateTime<Utc>)>> = Mutex::new(Vec::new());
        let timer = self.timer.as_ref();

        let settled_in_time = {
            let race = join_all(actors.iter_mut().zip(submissions).map(|(actor, submission)| {
                let dispatched = &dispatched;
                async move {
                    if let Ok(mut log) = dispatched.lock() {
                        log.push((actor.label().clone(), timer.now()));
                    }
                    actor.complete(submission).await;
                    actor.settle().await
                }
            }));
            let watchdog = poll_until(timer, self.polling.interval, self.polling.deadline, || {
                let all_settled = receivers.iter().all(|rx| rx.borrow().is_settled());
                async move { all_settled.then_some(()) }
            });
            tokio::pin!(race);

            tokio::select! {
                settled = &mut race => settled.into_iter().all(|ok| ok),
                outcome = watchdog => match outcome {
                    PollOutcome::Ready(()) => race.await.into_iter().all(|ok| ok),
                    PollOutcome::DeadlineElapsed { polls, elapsed } => {
                        tracing::warn!(polls, elapsed_ms = elapsed.as_millis(), "race deadline elapsed");
                        false
                    },
                },
            }
        };

        let dispatched_at = dispatched.into_inner().unwrap_or_default();
        let release_skew = skew(&dispatched_at);
        HarnessMetrics::record_release_skew(release_skew);
        if release_skew > self.race.max_release_skew {
            tracing::warn!(
                skew_ms = release_skew.as_millis(),
                limit_ms = self.race.max_release_skew.as_millis(),
                "release spread exceeds the configured window"
            );
        }

        let outcomes: Vec<(ActorLabel, CheckoutState)> = actors
            .iter()
            .map(|actor| (actor.label().clone(), actor.state().clone()))
            .collect();
        let classification = classify(settled_in_time, &outcomes);
        tracing::info!(?classification, skew_ms = release_skew.as_millis(), "race finished");

        Ok(RaceReport {
            baselines: actors
                .iter()
                .map(|a| a.label().clone())
                .zip(baselines)
                .collect(),
            outcomes,
            dispatched_at,
            release_skew,
            classification,
        })
    }
}

fn skew(dispatched: &[(ActorLabel, DateTime<Utc>)]) -> Duration {
    let instants = dispatched.iter().map(|(_, at)| *at);
    match (instants.clone().min(), instants.max()) {
        (Some(first), Some(last)) => (last - first).to_std().unwrap_or_default(),
        _ => Duration::ZERO,
    }
}

fn classify(settled_in_time: bool, outcomes: &[(ActorLabel, CheckoutState)]) -> RaceClassification {
    if !settled_in_time || outcomes.iter().any(|(_, s)| !s.is_settled()) {
        return RaceClassification::TimedOut;
    }
    let succeeded = outcomes
        .iter()
        .filter(|(_, s)| matches!(s, CheckoutState::Succeeded(_)))
        .count();
    match succeeded {
        0 => RaceClassification::NoneSucceeded,
        n if n == outcomes.len() => RaceClassification::AllSucceeded,
        _ => RaceClassification::SomeSucceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_harness_core::types::OrderId;

    fn label(name: &str) -> ActorLabel {
        ActorLabel::new(name)
    }

    #[test]
    fn classification_follows_outcomes() {
        let both = [
            (label("a"), CheckoutState::Succeeded(OrderId::new("1"))),
            (label("b"), CheckoutState::Succeeded(OrderId::new("2"))),
        ];
        assert_eq!(classify(true, &both), RaceClassification::AllSucceeded);

        let one = [
            (label("a"), CheckoutState::Succeeded(OrderId::new("1"))),
            (label("b"), CheckoutState::Failed("empty cart".into())),
        ];
        assert_eq!(classify(true, &one), RaceClassification::SomeSucceeded);

        let none = [
            (label("a"), CheckoutState::Interrupted),
            (label("b"), CheckoutState::Failed("x".into())),
        ];
        assert_eq!(classify(true, &none), RaceClassification::NoneSucceeded);

        let stuck = [
            (label("a"), CheckoutState::Submitting),
            (label("b"), CheckoutState::Succeeded(OrderId::new("2"))),
        ];
        assert_eq!(classify(true, &stuck), RaceClassification::TimedOut);
        assert_eq!(classify(false, &both), RaceClassification::TimedOut);
    }

    #[test]
    fn skew_is_the_dispatch_spread() {
        let t0 = Utc::now();
        let dispatched = vec![
            (label("a"), t0 + chrono::Duration::milliseconds(40)),
            (label("b"), t0),
            (label("c"), t0 + chrono::Duration::milliseconds(15)),
        ];
        assert_eq!(skew(&dispatched), Duration::from_millis(40));
        assert_eq!(skew(&[]), Duration::ZERO);
    }
}
