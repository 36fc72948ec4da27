//! The checkout state machine of a single actor.
//!
//! ```text
//! Empty ─AddItem─► ItemsInCart ─EnterAddress─► AddressEntered ─SelectMethods─► MethodsSelected
//!                       ▲                                                            │
//!                       │ Resume (cart still filled)                         PlaceOrder
//!                       │                                                            ▼
//!                  Interrupted ◄──────── Interrupt / no new order ──────────── Submitting
//!                       │                                                            │
//!                       └──── new order in ledger ──► Succeeded(id) ◄── new order ───┘
//!                                                     Failed(reason) ◄── rejected, no new order
//! ```
//!
//! Leaving `Submitting` is never decided by the submit call alone. Every
//! submit result schedules a fresh `list_orders()` and the transition is taken
//! by reconciling that ledger against the baseline captured when the actor
//! entered `Submitting`. A client-side timeout does not mean the server did
//! not create the order.

use crate::client::{CheckoutClient, ClientError};
use crate::effect::Effect;
use crate::environment::Clock;
use crate::ledger::OrderLedgerSnapshot;
use crate::reducer::Reducer;
use crate::types::{Address, CartSnapshot, MethodId, OrderId, SelectorPolicy};
use crate::{DateTime, SmallVec, Utc, smallvec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where an actor stands in checkout
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutState {
    /// Nothing in the cart
    #[default]
    Empty,
    /// Cart holds at least one line
    ItemsInCart,
    /// Address accepted
    AddressEntered,
    /// Shipping and payment chosen; the boundary right before submission
    MethodsSelected,
    /// Order submission in flight or awaiting reconciliation
    Submitting,
    /// A new order was observed in the ledger
    Succeeded(OrderId),
    /// The client lost track of the submission; recoverable
    Interrupted,
    /// Checkout cannot continue
    Failed(String),
}

impl CheckoutState {
    /// `Succeeded` and `Failed` admit no further transitions
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    /// Terminal or interrupted; what the orchestrator polls for
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Interrupted)
    }

    /// Short name for logs and metrics labels
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::ItemsInCart => "items_in_cart",
            Self::AddressEntered => "address_entered",
            Self::MethodsSelected => "methods_selected",
            Self::Submitting => "submitting",
            Self::Succeeded(_) => "succeeded",
            Self::Interrupted => "interrupted",
            Self::Failed(_) => "failed",
        }
    }

    /// The order id, if succeeded
    #[must_use]
    pub const fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Succeeded(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(id) => write!(f, "succeeded({id})"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// What the submit call itself reported
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitResult {
    /// The client saw a confirmation carrying an id
    Confirmed(OrderId),
    /// The call returned without confirmation (still processing)
    Accepted,
    /// The storefront explicitly refused
    Rejected(String),
    /// The call failed without a verdict (timeout, navigation error)
    Unknown(String),
}

impl SubmitResult {
    /// Classifies the raw outcome of `submit_order()`
    #[must_use]
    pub fn from_call(result: Result<CheckoutState, ClientError>) -> Self {
        match result {
            Ok(CheckoutState::Succeeded(id)) => Self::Confirmed(id),
            Ok(CheckoutState::Failed(reason)) | Err(ClientError::SubmissionRejected(reason)) => {
                Self::Rejected(reason)
            },
            Ok(_) => Self::Accepted,
            Err(other) => Self::Unknown(other.to_string()),
        }
    }
}

/// A checkout step, for failure attribution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutStep {
    /// Adding an item
    AddItem,
    /// Submitting the address
    Address,
    /// Selecting shipping
    Shipping,
    /// Selecting payment
    Payment,
    /// Reading the ledger for reconciliation
    Reconcile,
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddItem => "add_item",
            Self::Address => "address",
            Self::Shipping => "shipping",
            Self::Payment => "payment",
            Self::Reconcile => "reconcile",
        };
        write!(f, "{name}")
    }
}

/// Commands (drive the storefront) and events (facts fed back by effects)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutAction {
    /// Command: add an item chosen by the policy
    AddItem(SelectorPolicy),
    /// Event: the cart after adding
    ItemAdded(CartSnapshot),
    /// Command: submit the address
    EnterAddress(Address),
    /// Event: the address was accepted
    AddressAccepted,
    /// Command: choose shipping, then payment, from preference lists
    SelectMethods {
        /// Shipping preference order
        shipping: Vec<MethodId>,
        /// Payment preference order
        payment: Vec<MethodId>,
    },
    /// Event: both methods were chosen
    MethodsChosen,
    /// Command: submit the order, reconciling against `baseline`
    PlaceOrder {
        /// Ledger captured before submission
        baseline: OrderLedgerSnapshot,
    },
    /// Event: the submit call returned
    SubmitReturned(SubmitResult),
    /// Command (interrupt injector only): the client abandoned the submission
    Interrupt,
    /// Command: read the ledger and reconcile
    Reconcile,
    /// Event: a ledger capture for reconciliation
    LedgerObserved(OrderLedgerSnapshot),
    /// Command: resume an interrupted checkout with the cart as observed now
    Resume {
        /// Cart observed after the interruption
        cart: CartSnapshot,
    },
    /// Event: a capability call failed
    StepFailed {
        /// Which step
        step: CheckoutStep,
        /// Why
        error: ClientError,
    },
}

/// State of one actor's checkout
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutMachine {
    /// Current state
    pub state: CheckoutState,
    /// Cart as last observed
    pub cart: CartSnapshot,
    /// Ledger captured when entering `Submitting`
    pub baseline: Option<OrderLedgerSnapshot>,
    /// What the latest submit call reported
    pub last_submit: Option<SubmitResult>,
    /// Latest ledger used for reconciliation
    pub last_ledger: Option<OrderLedgerSnapshot>,
    /// Number of times `Submitting` was entered
    pub submissions: u32,
    /// When the latest submission started
    pub submitted_at: Option<DateTime<Utc>>,
    /// Latest error or rejected transition
    pub last_error: Option<String>,
}

impl CheckoutMachine {
    /// A fresh machine in `Empty`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The submit call went unanswered and the ledger has not shown its order.
    ///
    /// A client-side timeout says nothing about the server side, so such an
    /// actor is `Interrupted` but not yet resolved. An injected interrupt
    /// discards the call's result and is never in this condition.
    #[must_use]
    pub fn awaiting_unanswered_submission(&self) -> bool {
        self.state == CheckoutState::Interrupted
            && matches!(self.last_submit, Some(SubmitResult::Unknown(_)))
    }
}

/// Dependencies of the checkout reducer
#[derive(Clone)]
pub struct CheckoutEnvironment {
    /// The actor's own session
    pub client: Arc<dyn CheckoutClient>,
    /// Clock for submission timestamps
    pub clock: Arc<dyn Clock>,
}

impl CheckoutEnvironment {
    /// Creates a new checkout environment
    pub fn new(client: Arc<dyn CheckoutClient>, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }
}

/// Reducer implementing the checkout state machine
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckoutReducer;

type Effects = SmallVec<[Effect<CheckoutAction>; 4]>;

impl CheckoutReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reject(machine: &mut CheckoutMachine, what: &str) -> Effects {
        machine.last_error = Some(format!(
            "illegal transition: {what} in state {}",
            machine.state
        ));
        smallvec![Effect::None]
    }

    fn add_item_effect(client: Arc<dyn CheckoutClient>, policy: SelectorPolicy) -> Effect<CheckoutAction> {
        Effect::future(async move {
            Some(match client.add_item_to_cart(&policy).await {
                Ok(cart) => CheckoutAction::ItemAdded(cart),
                Err(error) => CheckoutAction::StepFailed {
                    step: CheckoutStep::AddItem,
                    error,
                },
            })
        })
    }

    fn address_effect(client: Arc<dyn CheckoutClient>, address: Address) -> Effect<CheckoutAction> {
        Effect::future(async move {
            Some(match client.submit_address(&address).await {
                Ok(CheckoutState::Failed(reason)) => CheckoutAction::StepFailed {
                    step: CheckoutStep::Address,
                    error: ClientError::AddressRejected(reason),
                },
                Ok(_) => CheckoutAction::AddressAccepted,
                Err(error) => CheckoutAction::StepFailed {
                    step: CheckoutStep::Address,
                    error,
                },
            })
        })
    }

    fn methods_effect(
        client: Arc<dyn CheckoutClient>,
        shipping: Vec<MethodId>,
        payment: Vec<MethodId>,
    ) -> Effect<CheckoutAction> {
        Effect::future(async move {
            let steps = [
                (CheckoutStep::Shipping, &shipping),
                (CheckoutStep::Payment, &payment),
            ];
            for (step, preference) in steps {
                let result = match step {
                    CheckoutStep::Shipping => client.select_shipping_method(preference).await,
                    _ => client.select_payment_method(preference).await,
                };
                let error = match result {
                    Ok(CheckoutState::Failed(reason)) => ClientError::Malformed(reason),
                    Ok(_) => continue,
                    Err(error) => error,
                };
                return Some(CheckoutAction::StepFailed { step, error });
            }
            Some(CheckoutAction::MethodsChosen)
        })
    }

    fn submit_effect(client: Arc<dyn CheckoutClient>) -> Effect<CheckoutAction> {
        Effect::future(async move {
            let result = client.submit_order().await;
            Some(CheckoutAction::SubmitReturned(SubmitResult::from_call(result)))
        })
    }

    fn ledger_effect(client: Arc<dyn CheckoutClient>) -> Effect<CheckoutAction> {
        Effect::future(async move {
            Some(match client.list_orders().await {
                Ok(ledger) => CheckoutAction::LedgerObserved(ledger),
                Err(error) => CheckoutAction::StepFailed {
                    step: CheckoutStep::Reconcile,
                    error,
                },
            })
        })
    }

    /// Decides the state after reading the ledger in `Submitting` or `Interrupted`
    fn reconcile(machine: &mut CheckoutMachine, ledger: OrderLedgerSnapshot) -> Effects {
        let Some(baseline) = machine.baseline.as_ref() else {
            machine.last_error = Some("reconciliation without a baseline".to_string());
            return smallvec![Effect::None];
        };

        let new_orders = ledger.new_since(baseline);
        let confirmed_visible = |id: &OrderId| new_orders.iter().any(|o| &o.order_id == id);
        // Orders from other sessions on the same account are new too, so an
        // explicit verdict from the call outranks whatever else appeared.
        let next = match (&machine.state, &machine.last_submit) {
            (CheckoutState::Submitting, Some(SubmitResult::Rejected(reason))) => {
                CheckoutState::Failed(reason.clone())
            },
            (_, Some(SubmitResult::Confirmed(id))) if confirmed_visible(id) => {
                CheckoutState::Succeeded(id.clone())
            },
            // The call reported an id the ledger does not show yet.
            (CheckoutState::Submitting, Some(SubmitResult::Confirmed(_))) => CheckoutState::Submitting,
            (state, last_submit) => match new_orders.first() {
                Some(most_recent) => CheckoutState::Succeeded(most_recent.order_id.clone()),
                None if *state == CheckoutState::Submitting
                    && matches!(last_submit, Some(SubmitResult::Accepted)) =>
                {
                    CheckoutState::Submitting
                },
                None => CheckoutState::Interrupted,
            },
        };

        machine.last_ledger = Some(ledger);
        machine.state = next;
        smallvec![Effect::None]
    }
}

impl Reducer for CheckoutReducer {
    type State = CheckoutMachine;
    type Action = CheckoutAction;
    type Environment = CheckoutEnvironment;

    fn reduce(
        &self,
        machine: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects {
        use CheckoutAction as A;
        use CheckoutState as S;

        match (machine.state.clone(), action) {
            (S::Empty | S::ItemsInCart, A::AddItem(policy)) => {
                smallvec![Self::add_item_effect(Arc::clone(&env.client), policy)]
            },
            (S::Empty | S::ItemsInCart, A::ItemAdded(cart)) => {
                machine.state = if cart.is_empty() { S::Empty } else { S::ItemsInCart };
                machine.cart = cart;
                smallvec![Effect::None]
            },

            (S::ItemsInCart, A::EnterAddress(address)) => {
                smallvec![Self::address_effect(Arc::clone(&env.client), address)]
            },
            (S::ItemsInCart, A::AddressAccepted) => {
                machine.state = S::AddressEntered;
                smallvec![Effect::None]
            },

            (S::AddressEntered, A::SelectMethods { shipping, payment }) => {
                smallvec![Self::methods_effect(Arc::clone(&env.client), shipping, payment)]
            },
            (S::AddressEntered, A::MethodsChosen) => {
                machine.state = S::MethodsSelected;
                smallvec![Effect::None]
            },

            (S::MethodsSelected, A::PlaceOrder { baseline }) => {
                machine.state = S::Submitting;
                machine.baseline = Some(baseline);
                machine.last_submit = None;
                machine.submissions += 1;
                machine.submitted_at = Some(env.clock.now());
                smallvec![Self::submit_effect(Arc::clone(&env.client))]
            },
            (S::Submitting, A::SubmitReturned(result)) => {
                machine.last_submit = Some(result);
                smallvec![Self::ledger_effect(Arc::clone(&env.client))]
            },
            (S::Submitting, A::Interrupt) => {
                machine.state = S::Interrupted;
                smallvec![Effect::None]
            },
            (S::Submitting | S::Interrupted, A::Reconcile) => {
                smallvec![Self::ledger_effect(Arc::clone(&env.client))]
            },
            (S::Submitting | S::Interrupted, A::LedgerObserved(ledger)) => {
                Self::reconcile(machine, ledger)
            },
            (S::Interrupted, A::Resume { cart }) => {
                if cart.is_empty() {
                    return Self::reject(machine, "resume with an empty cart");
                }
                machine.cart = cart;
                machine.state = S::ItemsInCart;
                smallvec![Effect::None]
            },

            (S::Submitting | S::Interrupted, A::StepFailed { step, error }) => {
                machine.last_error = Some(format!("{step} failed: {error}"));
                machine.state = S::Interrupted;
                smallvec![Effect::None]
            },
            (state, A::StepFailed { step, error }) if !state.is_terminal() => {
                let reason = format!("{step} failed: {error}");
                machine.last_error = Some(reason.clone());
                machine.state = S::Failed(reason);
                smallvec![Effect::None]
            },

            (_, other) => Self::reject(machine, action_name(&other)),
        }
    }
}

const fn action_name(action: &CheckoutAction) -> &'static str {
    match action {
        CheckoutAction::AddItem(_) => "add_item",
        CheckoutAction::ItemAdded(_) => "item_added",
        CheckoutAction::EnterAddress(_) => "enter_address",
        CheckoutAction::AddressAccepted => "address_accepted",
        CheckoutAction::SelectMethods { .. } => "select_methods",
        CheckoutAction::MethodsChosen => "methods_chosen",
        CheckoutAction::PlaceOrder { .. } => "place_order",
        CheckoutAction::SubmitReturned(_) => "submit_returned",
        CheckoutAction::Interrupt => "interrupt",
        CheckoutAction::Reconcile => "reconcile",
        CheckoutAction::LedgerObserved(_) => "ledger_observed",
        CheckoutAction::Resume { .. } => "resume",
        CheckoutAction::StepFailed { .. } => "step_failed",
    }
}
