//! One independent storefront session driving one checkout.
//!
//! An [`Actor`] is a miniature store: it owns a [`CheckoutMachine`], runs the
//! [`CheckoutReducer`] on every action and executes the returned effects
//! inline, feeding produced actions back until the queue is empty. Steps of a
//! single actor are therefore strictly sequential.
//!
//! The current [`CheckoutState`] is also published on a `watch` channel so
//! the orchestrator can observe actors while their submissions are in flight.

use crate::config::{HarnessConfig, PollingConfig};
use crate::guarded::GuardedClient;
use crate::metrics::HarnessMetrics;
use crate::retry::{PollOutcome, poll_until};
use checkout_harness_core::client::{CheckoutClient, Storefront};
use checkout_harness_core::effect::Effect;
use checkout_harness_core::environment::{Clock, Timer};
use checkout_harness_core::error::HarnessError;
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::{
    CheckoutAction, CheckoutEnvironment, CheckoutMachine, CheckoutReducer, CheckoutState,
};
use checkout_harness_core::reducer::Reducer;
use checkout_harness_core::types::{
    ActorLabel, Address, CartSnapshot, Identity, MethodId, OrderId, SelectorPolicy,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything needed to bring an actor to `MethodsSelected`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlan {
    /// One add-to-cart per policy, in order
    pub items: Vec<SelectorPolicy>,
    /// Address to submit
    pub address: Address,
    /// Shipping preference order
    pub shipping: Vec<MethodId>,
    /// Payment preference order
    pub payment: Vec<MethodId>,
}

impl CheckoutPlan {
    /// One item chosen by `policy`, a minimal address, and the given methods
    #[must_use]
    pub fn single_item(
        policy: SelectorPolicy,
        email: impl Into<String>,
        shipping: Vec<MethodId>,
        payment: Vec<MethodId>,
    ) -> Self {
        Self {
            items: vec![policy],
            address: Address::minimal(email),
            shipping,
            payment,
        }
    }
}

/// An order submission created but not yet awaited.
///
/// Dropping or aborting it abandons the client-side wait only.
pub struct Submission {
    future: Pin<Box<dyn Future<Output = Option<CheckoutAction>> + Send>>,
}

impl Submission {
    /// The underlying call, for spawning
    #[must_use]
    pub fn into_future(self) -> Pin<Box<dyn Future<Output = Option<CheckoutAction>> + Send>> {
        self.future
    }
}

/// What an interrupted actor found when it looked again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// The interrupted submission did create an order; do not re-checkout
    AlreadyCompleted(OrderId),
    /// No order and the cart is still filled; re-drive checkout
    Resume,
    /// No order and the cart is empty; the order may still surface late
    CartClearedWithoutOrder,
}

/// One isolated session and its checkout state machine
pub struct Actor {
    label: ActorLabel,
    identity: Identity,
    client: Arc<dyn CheckoutClient>,
    timer: Arc<dyn Timer>,
    polling: PollingConfig,
    reducer: CheckoutReducer,
    env: CheckoutEnvironment,
    machine: CheckoutMachine,
    state_tx: watch::Sender<CheckoutState>,
    closed: bool,
}

impl Actor {
    /// Opens a session for `identity` and wraps it with timeouts and retry
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if the session cannot be opened.
    pub async fn open(
        storefront: &dyn Storefront,
        label: ActorLabel,
        identity: Identity,
        timer: Arc<dyn Timer>,
        config: &HarnessConfig,
    ) -> Result<Self, HarnessError> {
        let session = storefront
            .open_session(&identity)
            .await
            .map_err(|e| HarnessError::setup(&label, format!("cannot open session: {e}")))?;
        tracing::info!(actor = %label, account = %identity.account_key(), "session opened");

        let client: Arc<dyn CheckoutClient> = Arc::new(GuardedClient::new(
            label.clone(),
            session,
            Arc::clone(&timer),
            config.timeouts,
            &config.retry,
        ));
        let clock: Arc<dyn Clock> = Arc::new(Arc::clone(&timer));
        let (state_tx, _) = watch::channel(CheckoutState::Empty);

        Ok(Self {
            env: CheckoutEnvironment::new(Arc::clone(&client), clock),
            label,
            identity,
            client,
            timer,
            polling: config.polling,
            reducer: CheckoutReducer::new(),
            machine: CheckoutMachine::new(),
            state_tx,
            closed: false,
        })
    }

    /// Actor name
    #[must_use]
    pub const fn label(&self) -> &ActorLabel {
        &self.label
    }

    /// Who this actor is logged in as
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &CheckoutState {
        &self.machine.state
    }

    /// Full machine, for reports and assertions
    #[must_use]
    pub const fn machine(&self) -> &CheckoutMachine {
        &self.machine
    }

    /// The guarded session
    #[must_use]
    pub const fn client(&self) -> &Arc<dyn CheckoutClient> {
        &self.client
    }

    /// Observes state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutState> {
        self.state_tx.subscribe()
    }

    /// Reduces `action` and runs every resulting effect to completion
    pub async fn send(&mut self, action: CheckoutAction) -> &CheckoutState {
        let mut actions = VecDeque::from([action]);

        while let Some(action) = actions.pop_front() {
            let effects = self.reducer.reduce(&mut self.machine, action, &self.env);
            self.publish();

            let mut work: VecDeque<Effect<CheckoutAction>> = effects.into_iter().collect();
            while let Some(effect) = work.pop_front() {
                match effect {
                    Effect::None => {},
                    Effect::Sequential(inner) => {
                        for effect in inner.into_iter().rev() {
                            work.push_front(effect);
                        }
                    },
                    Effect::Future(future) => {
                        if let Some(next) = future.await {
                            actions.push_back(next);
                        }
                    },
                }
            }
        }

        &self.machine.state
    }

    fn publish(&self) {
        let state = &self.machine.state;
        self.state_tx.send_if_modified(|current| {
            if current == state {
                false
            } else {
                tracing::debug!(actor = %self.label, from = %current, to = %state, "state changed");
                *current = state.clone();
                true
            }
        });
    }

    /// Adds the plan's items, enters the address and selects methods.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if any step fails.
    pub async fn prepare(&mut self, plan: &CheckoutPlan) -> Result<(), HarnessError> {
        for policy in &plan.items {
            self.send(CheckoutAction::AddItem(policy.clone())).await;
            self.expect_setup_state(&CheckoutState::ItemsInCart)?;
        }
        self.complete_details(plan).await
    }

    /// Enters the address and selects methods; the cart must already be filled
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if any step fails.
    pub async fn complete_details(&mut self, plan: &CheckoutPlan) -> Result<(), HarnessError> {
        self.send(CheckoutAction::EnterAddress(plan.address.clone())).await;
        self.expect_setup_state(&CheckoutState::AddressEntered)?;

        self.send(CheckoutAction::SelectMethods {
            shipping: plan.shipping.clone(),
            payment: plan.payment.clone(),
        })
        .await;
        self.expect_setup_state(&CheckoutState::MethodsSelected)?;

        tracing::info!(actor = %self.label, cart_total = %self.machine.cart.total(), "ready to submit");
        Ok(())
    }

    fn expect_setup_state(&self, expected: &CheckoutState) -> Result<(), HarnessError> {
        if &self.machine.state == expected {
            return Ok(());
        }
        let reason = self
            .machine
            .last_error
            .clone()
            .unwrap_or_else(|| format!("expected {expected}, found {}", self.machine.state));
        Err(HarnessError::setup(&self.label, reason))
    }

    /// Captures the visible order history under `checkpoint`
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the read fails after its retry.
    pub async fn capture_ledger(&self, checkpoint: &str) -> Result<OrderLedgerSnapshot, HarnessError> {
        let ledger = self.client.list_orders().await?;
        Ok(ledger.relabel(checkpoint))
    }

    /// Fills in line items of orders new since `baseline` from their detail view.
    ///
    /// Orders whose detail cannot be read keep unknown line items.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Ledger`] if the enriched capture is inconsistent.
    pub async fn enrich_new_orders(
        &self,
        after: &OrderLedgerSnapshot,
        baseline: &OrderLedgerSnapshot,
    ) -> Result<OrderLedgerSnapshot, HarnessError> {
        let known = baseline.id_set();
        let mut orders = Vec::with_capacity(after.len());

        for order in after.orders() {
            if known.contains(&order.order_id) || order.line_items.is_some() {
                orders.push(order.clone());
                continue;
            }
            match self.client.get_order_detail(&order.order_id).await {
                Ok(detail) => match detail.line_items {
                    Some(items) => orders.push(order.clone().with_line_items(items)),
                    None => orders.push(order.clone()),
                },
                Err(error) => {
                    tracing::debug!(actor = %self.label, order = %order.order_id, %error, "order detail unavailable");
                    orders.push(order.clone());
                },
            }
        }

        Ok(OrderLedgerSnapshot::new(
            after.checkpoint(),
            after.captured_at(),
            orders,
        )?)
    }

    /// Enters `Submitting` and returns the submit call without awaiting it
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if the actor is not at `MethodsSelected`.
    pub fn place_order(&mut self, baseline: OrderLedgerSnapshot) -> Result<Submission, HarnessError> {
        let effects = self
            .reducer
            .reduce(&mut self.machine, CheckoutAction::PlaceOrder { baseline }, &self.env);
        self.publish();

        if self.machine.state != CheckoutState::Submitting {
            return Err(self.setup_error("cannot place order"));
        }

        effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::Future(future) => Some(Submission { future }),
                _ => None,
            })
            .ok_or_else(|| self.setup_error("placing the order produced no submission"))
    }

    fn setup_error(&self, what: &str) -> HarnessError {
        let detail = self
            .machine
            .last_error
            .clone()
            .unwrap_or_else(|| format!("state is {}", self.machine.state));
        HarnessError::setup(&self.label, format!("{what}: {detail}"))
    }

    /// Awaits a submission and feeds its result back, which triggers reconciliation
    pub async fn complete(&mut self, submission: Submission) -> &CheckoutState {
        match submission.future.await {
            Some(action) => self.send(action).await,
            None => &self.machine.state,
        }
    }

    /// Re-reads the ledger every poll interval while the actor is still
    /// `Submitting`, or `Interrupted` by a submit call that never answered.
    ///
    /// The deadline runs from the moment the order was placed, so a slow
    /// submit call counts against it. Checks state, then the deadline, then
    /// sleeps. Returns whether the actor settled before the deadline.
    pub async fn settle(&mut self) -> bool {
        let started = self.machine.submitted_at.unwrap_or_else(|| self.timer.now());
        loop {
            if self.machine.state.is_settled() && !self.machine.awaiting_unanswered_submission() {
                if let Some(at) = self.machine.submitted_at {
                    if let Ok(elapsed) = (self.timer.now() - at).to_std() {
                        HarnessMetrics::record_submission(elapsed);
                    }
                }
                return true;
            }
            let elapsed = (self.timer.now() - started).to_std().unwrap_or_default();
            if elapsed >= self.polling.deadline {
                tracing::warn!(actor = %self.label, state = %self.machine.state, "actor did not settle before the deadline");
                return false;
            }
            self.timer.sleep(self.polling.interval).await;
            self.send(CheckoutAction::Reconcile).await;
        }
    }

    /// Places the order, awaits it and settles
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if the actor is not at `MethodsSelected`.
    pub async fn submit_and_settle(&mut self, baseline: OrderLedgerSnapshot) -> Result<bool, HarnessError> {
        let submission = self.place_order(baseline)?;
        self.complete(submission).await;
        Ok(self.settle().await)
    }

    /// Marks the in-flight submission as abandoned
    pub(crate) async fn interrupt(&mut self) -> &CheckoutState {
        self.send(CheckoutAction::Interrupt).await
    }

    /// Decides how to continue after an interruption.
    ///
    /// Waits the settle delay, reconciles against a fresh ledger and, if no
    /// order appeared, looks at the cart. On [`RecoveryDecision::Resume`] the
    /// actor is back in `ItemsInCart`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the ledger or cart cannot be read.
    pub async fn recover(&mut self) -> Result<RecoveryDecision, HarnessError> {
        self.timer.sleep(self.polling.settle_delay).await;

        let ledger = self.capture_ledger("after interruption").await?;
        self.send(CheckoutAction::LedgerObserved(ledger)).await;
        if let CheckoutState::Succeeded(id) = &self.machine.state {
            tracing::info!(actor = %self.label, order = %id, "interrupted submission completed server-side");
            return Ok(RecoveryDecision::AlreadyCompleted(id.clone()));
        }

        let cart = self.client.view_cart().await?;
        if cart.is_empty() {
            tracing::warn!(actor = %self.label, "cart cleared but no order visible");
            return Ok(RecoveryDecision::CartClearedWithoutOrder);
        }

        self.send(CheckoutAction::Resume { cart }).await;
        Ok(RecoveryDecision::Resume)
    }

    /// Polls the ledger until an order new since the submission baseline
    /// shows up, or the deadline elapses.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::SetupFailed`] if no submission baseline exists.
    pub async fn await_late_order(&mut self) -> Result<Option<OrderId>, HarnessError> {
        let Some(baseline) = self.machine.baseline.clone() else {
            return Err(self.setup_error("no submission to wait for"));
        };

        let this = &*self;
        let baseline = &baseline;
        let outcome = poll_until(
            this.timer.as_ref(),
            this.polling.interval,
            this.polling.deadline,
            move || async move {
                let ledger = this.capture_ledger("late order poll").await.ok()?;
                let found = !ledger.new_since(baseline).is_empty();
                found.then_some(ledger)
            },
        )
        .await;

        match outcome {
            PollOutcome::Ready(ledger) => {
                self.send(CheckoutAction::LedgerObserved(ledger)).await;
                Ok(self.machine.state.order_id().cloned())
            },
            PollOutcome::DeadlineElapsed { polls, .. } => {
                tracing::warn!(actor = %self.label, polls, "no order appeared before the deadline");
                Ok(None)
            },
        }
    }

    /// The cart as the storefront shows it now
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the read fails.
    pub async fn view_cart(&self) -> Result<CartSnapshot, HarnessError> {
        Ok(self.client.view_cart().await?)
    }

    /// Releases the session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the storefront refuses to close.
    pub async fn close(&mut self) -> Result<(), HarnessError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client.close().await?;
        tracing::debug!(actor = %self.label, "session closed");
        Ok(())
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(actor = %self.label, "actor dropped with an open session");
        }
    }
}

/// Closes every actor, logging failures. Returns the first error.
///
/// # Errors
///
/// Returns the first close failure after attempting all.
pub async fn close_all(actors: &mut [Actor]) -> Result<(), HarnessError> {
    let mut first = None;
    for actor in actors.iter_mut() {
        if let Err(error) = actor.close().await {
            tracing::warn!(actor = %actor.label(), %error, "failed to close session");
            first.get_or_insert(error);
        }
    }
    first.map_or(Ok(()), Err)
}
