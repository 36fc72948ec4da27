//! Timeouts and local retry around a raw storefront session.
//!
//! [`GuardedClient`] wraps any [`CheckoutClient`]: every call is bounded by
//! its configured timeout, and calls that are safe to repeat are retried once
//! on a transient failure. `add_item_to_cart`, `submit_order` and
//! `cancel_order` are never retried here; repeating them could itself create
//! the duplicates the harness is looking for.

use crate::config::{RetryConfig, TimeoutConfig};
use crate::retry::{RetryPolicy, retry_with_predicate};
use checkout_harness_core::client::{CheckoutClient, ClientError, ClientFuture};
use checkout_harness_core::environment::Timer;
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::CheckoutState;
use checkout_harness_core::types::{
    ActorLabel, Address, CartSnapshot, MethodId, OrderId, OrderSummary, SelectorPolicy,
};
use futures::future::{Either, select};
use std::sync::Arc;
use std::time::Duration;

/// Awaits `call`, failing with [`ClientError::Timeout`] after `after`
///
/// # Errors
///
/// Returns the call's own error, or a timeout.
pub async fn within<T>(
    timer: &dyn Timer,
    operation: &str,
    after: Duration,
    call: ClientFuture<'_, T>,
) -> Result<T, ClientError> {
    match select(call, timer.sleep(after)).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(ClientError::timeout(operation, after)),
    }
}

/// A session with per-call timeouts and one local retry for idempotent calls
pub struct GuardedClient {
    inner: Arc<dyn CheckoutClient>,
    timer: Arc<dyn Timer>,
    timeouts: TimeoutConfig,
    retry: RetryPolicy,
    actor: ActorLabel,
}

impl GuardedClient {
    /// Wraps `inner`
    #[must_use]
    pub fn new(
        actor: ActorLabel,
        inner: Arc<dyn CheckoutClient>,
        timer: Arc<dyn Timer>,
        timeouts: TimeoutConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            inner,
            timer,
            timeouts,
            retry: RetryPolicy::builder()
                .max_retries(retry.max_retries)
                .initial_delay(retry.delay)
                .build(),
            actor,
        }
    }

    /// The unwrapped session
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn CheckoutClient> {
        &self.inner
    }

    async fn once<'a, T>(
        &'a self,
        operation: &'static str,
        after: Duration,
        call: ClientFuture<'a, T>,
    ) -> Result<T, ClientError> {
        tracing::debug!(actor = %self.actor, operation, "capability call");
        let result = within(self.timer.as_ref(), operation, after, call).await;
        if let Err(error) = &result {
            tracing::debug!(actor = %self.actor, operation, %error, "capability call failed");
        }
        result
    }

    async fn idempotent<'a, T, F>(
        &'a self,
        operation: &'static str,
        after: Duration,
        mut call: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> ClientFuture<'a, T>,
    {
        retry_with_predicate(
            &self.retry,
            self.timer.as_ref(),
            operation,
            || self.once(operation, after, call()),
            ClientError::is_transient,
        )
        .await
    }
}

impl CheckoutClient for GuardedClient {
    fn add_item_to_cart<'a>(&'a self, policy: &'a SelectorPolicy) -> ClientFuture<'a, CartSnapshot> {
        Box::pin(self.once("add_item_to_cart", self.timeouts.add_item, self.inner.add_item_to_cart(policy)))
    }

    fn view_cart(&self) -> ClientFuture<'_, CartSnapshot> {
        let inner = &self.inner;
        Box::pin(self.idempotent("view_cart", self.timeouts.navigation, move || inner.view_cart()))
    }

    fn submit_address<'a>(&'a self, address: &'a Address) -> ClientFuture<'a, CheckoutState> {
        let inner = &self.inner;
        Box::pin(self.idempotent("submit_address", self.timeouts.navigation, move || {
            inner.submit_address(address)
        }))
    }

    fn select_shipping_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState> {
        let inner = &self.inner;
        Box::pin(self.idempotent("select_shipping_method", self.timeouts.navigation, move || {
            inner.select_shipping_method(preference)
        }))
    }

    fn select_payment_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState> {
        let inner = &self.inner;
        Box::pin(self.idempotent("select_payment_method", self.timeouts.navigation, move || {
            inner.select_payment_method(preference)
        }))
    }

    fn submit_order(&self) -> ClientFuture<'_, CheckoutState> {
        Box::pin(self.once("submit_order", self.timeouts.submit_order, self.inner.submit_order()))
    }

    fn list_orders(&self) -> ClientFuture<'_, OrderLedgerSnapshot> {
        let inner = &self.inner;
        Box::pin(self.idempotent("list_orders", self.timeouts.list_orders, move || inner.list_orders()))
    }

    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, CheckoutState> {
        Box::pin(self.once("cancel_order", self.timeouts.navigation, self.inner.cancel_order(order_id)))
    }

    fn get_order_detail<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, OrderSummary> {
        let inner = &self.inner;
        Box::pin(self.idempotent("get_order_detail", self.timeouts.list_orders, move || {
            inner.get_order_detail(order_id)
        }))
    }

    fn reload(&self) -> ClientFuture<'_, ()> {
        Box::pin(self.once("reload", self.timeouts.navigation, self.inner.reload()))
    }

    fn close(&self) -> ClientFuture<'_, ()> {
        Box::pin(self.once("close", self.timeouts.navigation, self.inner.close()))
    }
}
