//! Interrupt injection into an in-flight submission.
//!
//! The injector starts `submit_order()` in the background, waits a delay
//! measured from the moment the call was started, then reloads the session.
//! Only the client-side wait is abandoned; the storefront keeps processing
//! whatever it already received. Afterwards the actor is `Interrupted` no
//! matter what the call may have returned: deciding what happened is the
//! actor's job, from the ledger.

use crate::actor::Actor;
use crate::config::RetryConfig;
use crate::metrics::HarnessMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use checkout_harness_core::environment::Timer;
use checkout_harness_core::error::HarnessError;
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::{CheckoutAction, CheckoutState, SubmitResult};
use checkout_harness_core::types::ActorLabel;
use checkout_harness_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What happened around one injected interrupt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptReport {
    /// Interrupted actor
    pub actor: ActorLabel,
    /// Delay between starting the submit call and reloading
    pub delay: Duration,
    /// When the submit call was started
    pub submitted_at: DateTime<Utc>,
    /// The submit call had already returned when the delay elapsed
    pub call_finished_first: bool,
    /// What the call returned, if it finished first; informational only
    pub observed: Option<SubmitResult>,
}

/// Perturbs in-flight submissions
pub struct InterruptInjector {
    timer: Arc<dyn Timer>,
    reload_retry: RetryPolicy,
}

impl InterruptInjector {
    /// Creates an injector retrying a failed reload per `retry`
    #[must_use]
    pub fn new(timer: Arc<dyn Timer>, retry: &RetryConfig) -> Self {
        Self {
            timer,
            reload_retry: RetryPolicy::builder()
                .max_retries(retry.max_retries)
                .initial_delay(retry.delay)
                .build(),
        }
    }

    /// Submits, waits `delay`, reloads, and leaves the actor `Interrupted`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if the actor is not at
    /// `MethodsSelected`, and [`HarnessError::InjectionFailed`] if the reload
    /// fails twice.
    pub async fn interrupt_after(
        &self,
        actor: &mut Actor,
        baseline: OrderLedgerSnapshot,
        delay: Duration,
    ) -> Result<InterruptReport, HarnessError> {
        let submission = actor.place_order(baseline)?;
        let submitted_at = self.timer.now();
        let handle = tokio::spawn(submission.into_future());
        tracing::info!(actor = %actor.label(), delay_ms = delay.as_millis(), "submission started, interrupt scheduled");

        self.timer.sleep(delay).await;

        let call_finished_first = handle.is_finished();
        let observed = if call_finished_first {
            match handle.await {
                Ok(Some(CheckoutAction::SubmitReturned(result))) => Some(result),
                _ => None,
            }
        } else {
            handle.abort();
            None
        };

        let client = Arc::clone(actor.client());
        retry_with_predicate(
            &self.reload_retry,
            self.timer.as_ref(),
            "reload",
            || client.reload(),
            |_| true,
        )
        .await
        .map_err(|e| HarnessError::injection(actor.label(), format!("reload failed: {e}")))?;

        let state = actor.interrupt().await.clone();
        if state != CheckoutState::Interrupted {
            return Err(HarnessError::injection(
                actor.label(),
                format!("actor did not enter interrupted state, found {state}"),
            ));
        }
        HarnessMetrics::record_interrupt();
        tracing::info!(actor = %actor.label(), call_finished_first, ?observed, "interrupt injected");

        Ok(InterruptReport {
            actor: actor.label().clone(),
            delay,
            submitted_at,
            call_finished_first,
            observed,
        })
    }
}
