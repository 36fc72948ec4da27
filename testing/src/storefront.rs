//! In-memory storefront for exercising the harness
//!
//! [`SimulatedStorefront`] behaves like a small shop behind a network:
//! - every call pays a fixed latency
//! - `submit_order` needs [`StorefrontBehavior::transit`] to reach the server;
//!   abandoning the call earlier means the server never saw it
//! - once received, the order is processed by a detached task, so abandoning
//!   the client-side wait never cancels server-side work
//! - orders may become visible in the history only after a lag
//!
//! Faults are switched on through [`StorefrontBehavior`]. Time comes from
//! `tokio::time`, so `#[tokio::test(start_paused = true)]` runs scenarios
//! spanning minutes in milliseconds.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use checkout_harness_core::client::{
    AdminClient, CheckoutClient, ClientError, ClientFuture, MethodKind, Storefront,
};
use checkout_harness_core::environment::{Clock, SystemClock};
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::CheckoutState;
use checkout_harness_core::types::{
    Address, CartSnapshot, Identity, LineItem, MethodId, Money, OrderId, OrderStatus, OrderSummary,
    ProductRef, SelectorPolicy,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Timing and fault switches of a [`SimulatedStorefront`]
#[derive(Debug, Clone)]
pub struct StorefrontBehavior {
    /// Round trip of every ordinary call
    pub latency: Duration,
    /// Time for a submission to reach the server
    pub transit: Duration,
    /// Server-side time to turn a received submission into an order
    pub processing: Duration,
    /// Delay before a created order shows up in the history
    pub ledger_lag: Duration,
    /// Defect: every submission creates an order and the cart is kept
    pub duplicate_resubmissions: bool,
    /// Defect: the cart is emptied but no order is recorded
    pub lose_orders: bool,
    /// Defect: concurrently processed submissions receive the same id
    pub reuse_ids_under_race: bool,
    /// `submit_order` never answers; the server still processes
    pub stall_submissions: bool,
    /// Number of reloads that fail before reloads succeed again
    pub failing_reloads: u32,
    /// Sessions of one account share the server-side cart
    pub shared_account_carts: bool,
    /// Seed for random, non-monotonic order ids; sequential ids when `None`
    pub id_seed: Option<u64>,
}

impl Default for StorefrontBehavior {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            transit: Duration::from_millis(100),
            processing: Duration::from_secs(1),
            ledger_lag: Duration::ZERO,
            duplicate_resubmissions: false,
            lose_orders: false,
            reuse_ids_under_race: false,
            stall_submissions: false,
            failing_reloads: 0,
            shared_account_carts: true,
            id_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Product {
    price: Money,
    stock: u32,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    summary: OrderSummary,
    visible_at: Instant,
}

type Completion = Option<Result<OrderId, String>>;

struct ServerState {
    catalogue: BTreeMap<ProductRef, Product>,
    accounts: HashMap<String, String>,
    carts: HashMap<String, Vec<LineItem>>,
    // Oldest first
    orders: HashMap<String, Vec<StoredOrder>>,
    in_flight: HashMap<String, watch::Receiver<Completion>>,
    issued: HashSet<OrderId>,
    next_id: u64,
    rng: Option<StdRng>,
    reload_failures_left: u32,
    open_sessions: usize,
    submissions_received: usize,
    shipping: Vec<MethodId>,
    payment: Vec<MethodId>,
}

impl ServerState {
    fn issue_id(&mut self) -> OrderId {
        loop {
            let candidate = match self.rng.as_mut() {
                Some(rng) => rng.gen_range(1_000..1_000_000_u64),
                None => {
                    self.next_id += 1;
                    self.next_id
                },
            };
            let id = OrderId::new(candidate.to_string());
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    fn cart_snapshot(&self, cart_key: &str) -> Result<CartSnapshot, ClientError> {
        let lines = self.carts.get(cart_key).cloned().unwrap_or_default();
        CartSnapshot::from_lines(lines).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    fn visible_orders(&self, account: &str) -> impl Iterator<Item = &StoredOrder> {
        let now = Instant::now();
        self.orders
            .get(account)
            .into_iter()
            .flatten()
            .filter(move |order| order.visible_at <= now)
    }
}

struct Inner {
    behavior: StorefrontBehavior,
    state: Mutex<ServerState>,
    clock: SystemClock,
    session_counter: AtomicU64,
}

impl Inner {
    async fn pause(&self) {
        tokio::time::sleep(self.behavior.latency).await;
    }

    /// Server-side handling of one received submission
    async fn process_submission(self: Arc<Self>, account: String, cart_key: String) -> Result<OrderId, String> {
        enum Admission {
            Join(watch::Receiver<Completion>),
            Process {
                lines: Vec<LineItem>,
                done: watch::Sender<Completion>,
                reserved: Option<OrderId>,
            },
        }

        let admission = {
            let mut state = self.state.lock().unwrap();
            state.submissions_received += 1;

            if let Some(pending) = state.in_flight.get(&cart_key) {
                Admission::Join(pending.clone())
            } else {
                let cart = state.carts.get(&cart_key).cloned().unwrap_or_default();
                if cart.is_empty() {
                    return Err("cart is empty".to_string());
                }
                let mut lines = Vec::with_capacity(cart.len());
                for line in cart {
                    let product = state
                        .catalogue
                        .get(&line.product)
                        .copied()
                        .ok_or_else(|| format!("{} is no longer sold", line.product))?;
                    if product.stock < line.quantity {
                        return Err(format!("{} is out of stock", line.product));
                    }
                    lines.push(LineItem {
                        unit_price: product.price,
                        ..line
                    });
                }

                let (done, pending) = watch::channel(None);
                if !self.behavior.duplicate_resubmissions {
                    state.in_flight.insert(cart_key.clone(), pending);
                }
                let reserved = self
                    .behavior
                    .reuse_ids_under_race
                    .then(|| OrderId::new((state.next_id + 1).to_string()));
                Admission::Process { lines, done, reserved }
            }
        };

        let (lines, done, reserved) = match admission {
            Admission::Join(mut pending) => {
                let completion = match pending.wait_for(Option::is_some).await {
                    Ok(value) => value.clone(),
                    Err(_) => None,
                };
                return completion.unwrap_or_else(|| Err("submission abandoned".to_string()));
            },
            Admission::Process { lines, done, reserved } => (lines, done, reserved),
        };

        tokio::time::sleep(self.behavior.processing).await;

        let mut state = self.state.lock().unwrap();
        for line in &lines {
            if let Some(product) = state.catalogue.get_mut(&line.product) {
                product.stock = product.stock.saturating_sub(line.quantity);
            }
        }
        let order_id = match reserved {
            Some(id) => {
                state.next_id += 1;
                state.issued.insert(id.clone());
                id
            },
            None => state.issue_id(),
        };
        if !self.behavior.lose_orders {
            let total: Money = lines.iter().map(LineItem::total).sum();
            let summary = OrderSummary::new(order_id.clone(), total.to_string(), 0).with_line_items(lines);
            state.orders.entry(account).or_default().push(StoredOrder {
                summary,
                visible_at: Instant::now() + self.behavior.ledger_lag,
            });
        }
        if !self.behavior.duplicate_resubmissions {
            state.carts.remove(&cart_key);
        }
        state.in_flight.remove(&cart_key);
        drop(state);

        done.send_replace(Some(Ok(order_id.clone())));
        Ok(order_id)
    }
}

/// A storefront living in memory
///
/// # Example
///
/// ```
/// use checkout_harness_testing::storefront::{SimulatedStorefront, StorefrontBehavior};
/// use checkout_harness_core::types::Money;
///
/// let shop = SimulatedStorefront::new(StorefrontBehavior::default())
///     .with_product("hoodie", Money::from_cents(4500), 10)
///     .with_account("buyer@example.com", "secret");
/// assert_eq!(shop.open_sessions(), 0);
/// ```
#[derive(Clone)]
pub struct SimulatedStorefront {
    inner: Arc<Inner>,
}

impl SimulatedStorefront {
    /// An empty shop offering `flat_rate`/`free_shipping` and `cod`/`bank_transfer`
    #[must_use]
    pub fn new(behavior: StorefrontBehavior) -> Self {
        let rng = behavior.id_seed.map(StdRng::seed_from_u64);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ServerState {
                    catalogue: BTreeMap::new(),
                    accounts: HashMap::new(),
                    carts: HashMap::new(),
                    orders: HashMap::new(),
                    in_flight: HashMap::new(),
                    issued: HashSet::new(),
                    next_id: 1_000,
                    rng,
                    reload_failures_left: behavior.failing_reloads,
                    open_sessions: 0,
                    submissions_received: 0,
                    shipping: vec![MethodId::new("flat_rate"), MethodId::new("free_shipping")],
                    payment: vec![MethodId::new("cod"), MethodId::new("bank_transfer")],
                }),
                behavior,
                clock: SystemClock::new(),
                session_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Adds a product to the catalogue
    #[must_use]
    pub fn with_product(self, product: &str, price: Money, stock: u32) -> Self {
        self.inner
            .state
            .lock()
            .unwrap()
            .catalogue
            .insert(ProductRef::new(product), Product { price, stock });
        self
    }

    /// Registers a customer account
    #[must_use]
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.inner
            .state
            .lock()
            .unwrap()
            .accounts
            .insert(email.to_lowercase(), password.to_string());
        self
    }

    /// Seeds the order history of `identity` with an already placed order
    #[must_use]
    pub fn with_order(self, identity: &Identity, lines: Vec<LineItem>, status: OrderStatus) -> Self {
        {
            let mut state = self.inner.state.lock().unwrap();
            let order_id = state.issue_id();
            let total: Money = lines.iter().map(LineItem::total).sum();
            let summary = OrderSummary::new(order_id, total.to_string(), 0)
                .with_line_items(lines)
                .with_status(status);
            state
                .orders
                .entry(identity.account_key())
                .or_default()
                .push(StoredOrder {
                    summary,
                    visible_at: Instant::now(),
                });
        }
        self
    }

    /// Replaces the offered shipping methods
    #[must_use]
    pub fn with_shipping_methods(self, methods: &[&str]) -> Self {
        self.inner.state.lock().unwrap().shipping = methods.iter().map(|m| MethodId::new(*m)).collect();
        self
    }

    /// Opens a session without network latency
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Navigation`] if a customer login is rejected.
    pub fn connect(&self, identity: &Identity) -> Result<Arc<SimulatedSession>, ClientError> {
        let mut state = self.inner.state.lock().unwrap();
        if let Identity::Customer { email, password } = identity {
            if state.accounts.get(&email.to_lowercase()) != Some(password) {
                return Err(ClientError::Navigation(format!("login rejected for {email}")));
            }
        }
        state.open_sessions += 1;

        let account = identity.account_key();
        let number = self.inner.session_counter.fetch_add(1, Ordering::Relaxed);
        let cart_key = if self.inner.behavior.shared_account_carts {
            account.clone()
        } else {
            format!("{account}#{number}")
        };
        Ok(Arc::new(SimulatedSession {
            inner: Arc::clone(&self.inner),
            account,
            cart_key,
            details: Mutex::new(Details::default()),
            closed: AtomicBool::new(false),
        }))
    }

    /// Every order recorded for `identity`, visible or not, most recent first
    #[must_use]
    pub fn orders_of(&self, identity: &Identity) -> Vec<OrderSummary> {
        let state = self.inner.state.lock().unwrap();
        state
            .orders
            .get(&identity.account_key())
            .into_iter()
            .flatten()
            .rev()
            .map(|order| order.summary.clone())
            .collect()
    }

    /// Submissions that reached the server
    #[must_use]
    pub fn submissions_received(&self) -> usize {
        self.inner.state.lock().unwrap().submissions_received
    }

    /// Sessions opened and not yet closed
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.state.lock().unwrap().open_sessions
    }

    fn product<T>(&self, product: &ProductRef, read: impl FnOnce(&mut Product) -> T) -> Result<T, ClientError> {
        let mut state = self.inner.state.lock().unwrap();
        state
            .catalogue
            .get_mut(product)
            .map(read)
            .ok_or_else(|| ClientError::Malformed(format!("unknown product {product}")))
    }
}

impl Storefront for SimulatedStorefront {
    fn open_session<'a>(&'a self, identity: &'a Identity) -> ClientFuture<'a, Arc<dyn CheckoutClient>> {
        Box::pin(async move {
            self.inner.pause().await;
            let session: Arc<dyn CheckoutClient> = self.connect(identity)?;
            Ok(session)
        })
    }
}

impl AdminClient for SimulatedStorefront {
    fn stock_of<'a>(&'a self, product: &'a ProductRef) -> ClientFuture<'a, u32> {
        Box::pin(async move {
            self.inner.pause().await;
            self.product(product, |p| p.stock)
        })
    }

    fn set_stock<'a>(&'a self, product: &'a ProductRef, quantity: u32) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.inner.pause().await;
            self.product(product, |p| p.stock = quantity)
        })
    }

    fn price_of<'a>(&'a self, product: &'a ProductRef) -> ClientFuture<'a, Money> {
        Box::pin(async move {
            self.inner.pause().await;
            self.product(product, |p| p.price)
        })
    }

    fn set_price<'a>(&'a self, product: &'a ProductRef, price: Money) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.inner.pause().await;
            self.product(product, |p| p.price = price)
        })
    }
}

// Checkout page state; a reload forgets it.
#[derive(Debug, Default)]
struct Details {
    address: bool,
    shipping: Option<MethodId>,
    payment: Option<MethodId>,
}

/// One session of a [`SimulatedStorefront`]
pub struct SimulatedSession {
    inner: Arc<Inner>,
    account: String,
    cart_key: String,
    details: Mutex<Details>,
    closed: AtomicBool,
}

impl SimulatedSession {
    async fn enter(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::SessionClosed);
        }
        self.inner.pause().await;
        Ok(())
    }

    fn choose(offered: &[MethodId], preference: &[MethodId], kind: MethodKind) -> Result<MethodId, ClientError> {
        let chosen = if preference.is_empty() {
            offered.first()
        } else {
            preference.iter().find(|m| offered.contains(m))
        };
        chosen.cloned().ok_or(ClientError::NoMethodAvailable { kind })
    }

    fn find_order(&self, order_id: &OrderId) -> Option<OrderSummary> {
        let state = self.inner.state.lock().unwrap();
        state
            .visible_orders(&self.account)
            .find(|order| &order.summary.order_id == order_id)
            .map(|order| order.summary.clone())
    }
}

impl CheckoutClient for SimulatedSession {
    fn add_item_to_cart<'a>(&'a self, policy: &'a SelectorPolicy) -> ClientFuture<'a, CartSnapshot> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.inner.state.lock().unwrap();

            let mut purchasable = state.catalogue.iter().filter(|(_, p)| p.stock > 0);
            let (product, price) = match policy {
                SelectorPolicy::FirstAvailable => purchasable.next(),
                SelectorPolicy::Product(wanted) => purchasable.find(|(r, _)| *r == wanted),
                SelectorPolicy::FirstAvailableExcept(excluded) => {
                    purchasable.find(|(r, _)| !excluded.contains(r))
                },
            }
            .map(|(r, p)| (r.clone(), p.price))
            .ok_or(ClientError::NoAvailableItem)?;

            let cart = state.carts.entry(self.cart_key.clone()).or_default();
            match cart.iter_mut().find(|line| line.product == product) {
                Some(line) => line.quantity += 1,
                None => cart.push(LineItem {
                    product,
                    quantity: 1,
                    unit_price: price,
                }),
            }
            state.cart_snapshot(&self.cart_key)
        })
    }

    fn view_cart(&self) -> ClientFuture<'_, CartSnapshot> {
        Box::pin(async move {
            self.enter().await?;
            self.inner.state.lock().unwrap().cart_snapshot(&self.cart_key)
        })
    }

    fn submit_address<'a>(&'a self, address: &'a Address) -> ClientFuture<'a, CheckoutState> {
        Box::pin(async move {
            self.enter().await?;
            let missing = address.missing_fields();
            if !missing.is_empty() {
                return Err(ClientError::AddressRejected(format!("missing {}", missing.join(", "))));
            }
            self.details.lock().unwrap().address = true;
            Ok(CheckoutState::AddressEntered)
        })
    }

    fn select_shipping_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState> {
        Box::pin(async move {
            self.enter().await?;
            let offered = self.inner.state.lock().unwrap().shipping.clone();
            let method = Self::choose(&offered, preference, MethodKind::Shipping)?;
            self.details.lock().unwrap().shipping = Some(method);
            Ok(CheckoutState::AddressEntered)
        })
    }

    fn select_payment_method<'a>(&'a self, preference: &'a [MethodId]) -> ClientFuture<'a, CheckoutState> {
        Box::pin(async move {
            self.enter().await?;
            let offered = self.inner.state.lock().unwrap().payment.clone();
            let method = Self::choose(&offered, preference, MethodKind::Payment)?;
            self.details.lock().unwrap().payment = Some(method);
            Ok(CheckoutState::MethodsSelected)
        })
    }

    fn submit_order(&self) -> ClientFuture<'_, CheckoutState> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::SessionClosed);
            }
            {
                let details = self.details.lock().unwrap();
                if !details.address || details.shipping.is_none() || details.payment.is_none() {
                    return Ok(CheckoutState::Failed("checkout details incomplete".to_string()));
                }
            }

            tokio::time::sleep(self.inner.behavior.transit).await;
            let server = tokio::spawn(Arc::clone(&self.inner).process_submission(
                self.account.clone(),
                self.cart_key.clone(),
            ));
            if self.inner.behavior.stall_submissions {
                std::future::pending::<()>().await;
            }

            let outcome = server
                .await
                .map_err(|e| ClientError::Navigation(format!("connection dropped: {e}")))?;
            *self.details.lock().unwrap() = Details::default();
            match outcome {
                Ok(order_id) => Ok(CheckoutState::Succeeded(order_id)),
                Err(reason) => Err(ClientError::SubmissionRejected(reason)),
            }
        })
    }

    fn list_orders(&self) -> ClientFuture<'_, OrderLedgerSnapshot> {
        Box::pin(async move {
            self.enter().await?;
            let rows: Vec<OrderSummary> = {
                let state = self.inner.state.lock().unwrap();
                let mut rows: Vec<OrderSummary> = state
                    .visible_orders(&self.account)
                    .map(|order| OrderSummary {
                        line_items: None,
                        ..order.summary.clone()
                    })
                    .collect();
                rows.reverse();
                rows
            };
            OrderLedgerSnapshot::from_recent_first("storefront", self.inner.clock.now(), rows)
                .map_err(|e| ClientError::Malformed(e.to_string()))
        })
    }

    fn cancel_order<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, CheckoutState> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.inner.state.lock().unwrap();
            let now = Instant::now();
            let order = state
                .orders
                .get_mut(&self.account)
                .into_iter()
                .flatten()
                .find(|order| &order.summary.order_id == order_id && order.visible_at <= now)
                .ok_or_else(|| ClientError::OrderNotFound(order_id.clone()))?;
            if !order.summary.status.is_cancellable() {
                return Err(ClientError::NotCancellable(order_id.clone()));
            }
            order.summary.status = OrderStatus::Cancelled;
            Ok(CheckoutState::Empty)
        })
    }

    fn get_order_detail<'a>(&'a self, order_id: &'a OrderId) -> ClientFuture<'a, OrderSummary> {
        Box::pin(async move {
            self.enter().await?;
            self.find_order(order_id)
                .ok_or_else(|| ClientError::OrderNotFound(order_id.clone()))
        })
    }

    fn reload(&self) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            self.enter().await?;
            {
                let mut state = self.inner.state.lock().unwrap();
                if state.reload_failures_left > 0 {
                    state.reload_failures_left -= 1;
                    return Err(ClientError::Navigation("reload failed".to_string()));
                }
            }
            *self.details.lock().unwrap() = Details::default();
            Ok(())
        })
    }

    fn close(&self) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.inner.state.lock().unwrap().open_sessions -= 1;
            }
            Ok(())
        })
    }
}
