//! Capability traits for the storefront under test.
//!
//! The storefront is an opaque collaborator. The harness sees it only through
//! these traits, whatever transport fulfils them (browser automation, HTTP,
//! or the in-memory simulation used in tests).
//!
//! # Dyn Compatibility
//!
//! These traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so that sessions can be held as `Arc<dyn CheckoutClient>` and
//! captured by effects.

use crate::ledger::OrderLedgerSnapshot;
use crate::machine::CheckoutState;
use crate::types::{
    Address, CartSnapshot, Identity, MethodId, Money, OrderId, OrderSummary, ProductRef,
    SelectorPolicy,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by capability calls
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Which kind of checkout method was being selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Shipping method
    Shipping,
    /// Payment method
    Payment,
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shipping => write!(f, "shipping"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

/// Capability-call failures
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ClientError {
    /// No product could be added under the selector policy
    #[error("no available item to add to the cart")]
    NoAvailableItem,

    /// The storefront refused the address
    #[error("address rejected: {0}")]
    AddressRejected(String),

    /// None of the preferred methods is offered
    #[error("no {kind} method available from the preference list")]
    NoMethodAvailable {
        /// Shipping or payment
        kind: MethodKind,
    },

    /// The storefront explicitly refused to place the order
    #[error("order submission rejected: {0}")]
    SubmissionRejected(String),

    /// Unknown order
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order can no longer be cancelled
    #[error("order {0} cannot be cancelled")]
    NotCancellable(OrderId),

    /// The call did not reach a stable state in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Capability name
        operation: String,
        /// Elapsed budget
        after: Duration,
    },

    /// Navigation, reload or transport failure
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The session was already closed
    #[error("session is closed")]
    SessionClosed,

    /// The storefront answered with something unreadable
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Whether one local retry is allowed before escalating
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Navigation(_))
    }

    /// Builds a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

/// One isolated storefront session (its own cookies and storage).
///
/// Every call blocks until the storefront reaches a stable, observable state or
/// fails explicitly. Only [`view_cart`](Self::view_cart),
/// [`list_orders`](Self::list_orders) and
/// [`get_order_detail`](Self::get_order_detail) are idempotent.
pub trait CheckoutClient: Send + Sync {
    /// Adds one product chosen by `policy`; returns the cart afterwards
    fn add_item_to_cart<'a>(&'a self, policy: &'a SelectorPolicy) -> ClientFuture<'a, CartSnapshot>;

    /// Reads the cart
    fn view_cart(&self) -> ClientFuture<'_, CartSnapshot>;

    /// Submits the address; fails with `AddressRejected` if fields are missing
    fn submit_address<'a>(&'a self, address: &'a Address) -> ClientFuture<'a, CheckoutState>;

    /// Picks the first available shipping method in preference order
    fn select_shipping_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState>;

    /// Picks the first available payment method in preference order
    fn select_payment_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState>;

    /// Triggers order placement.
    ///
    /// The returned state is what the client observed, not a guarantee about
    /// what the server did.
    fn submit_order(&self) -> ClientFuture<'_, CheckoutState>;

    /// Captures the visible order history, most recent first
    fn list_orders(&self) -> ClientFuture<'_, OrderLedgerSnapshot>;

    /// Cancels an order
    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, CheckoutState>;

    /// Reads one order including its line items
    fn get_order_detail<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, OrderSummary>;

    /// Reloads the session, abandoning any in-flight request client-side.
    ///
    /// The server-side work of an abandoned request is not cancelled.
    fn reload(&self) -> ClientFuture<'_, ()>;

    /// Releases the session
    fn close(&self) -> ClientFuture<'_, ()>;
}

/// Opens isolated sessions against the storefront
pub trait Storefront: Send + Sync {
    /// Opens a fresh session logged in as `identity`
    fn open_session<'a>(&'a self, identity: &'a Identity) -> ClientFuture<'a, Arc<dyn CheckoutClient>>;
}

/// Privileged capabilities used by the admin peer
pub trait AdminClient: Send + Sync {
    /// Current stock of a product
    fn stock_of<'a>(&'a self, product: &'a ProductRef) -> ClientFuture<'a, u32>;

    /// Sets the stock of a product
    fn set_stock<'a>(&'a self, product: &'a ProductRef, quantity: u32) -> ClientFuture<'a, ()>;

    /// Current unit price of a product
    fn price_of<'a>(&'a self, product: &'a ProductRef) -> ClientFuture<'a, Money>;

    /// Sets the unit price of a product
    fn set_price<'a>(&'a self, product: &'a ProductRef, price: Money) -> ClientFuture<'a, ()>;
}
