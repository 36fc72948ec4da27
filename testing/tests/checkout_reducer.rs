//! Transition tests for the checkout reducer
//!
//! Each test sets up a machine, sends one action and inspects the new state
//! and the effects it scheduled. Effects are never executed here.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use checkout_harness_core::client::ClientError;
use checkout_harness_core::ledger::OrderLedgerSnapshot;
use checkout_harness_core::machine::{
    CheckoutAction, CheckoutEnvironment, CheckoutMachine, CheckoutReducer, CheckoutState, CheckoutStep,
    SubmitResult,
};
use checkout_harness_core::types::{
    Address, CartSnapshot, Identity, LineItem, Money, OrderId, OrderSummary,
};
use checkout_harness_testing::reducer_test::assertions;
use checkout_harness_testing::{
    ReducerTest, SimulatedStorefront, StorefrontBehavior, test_clock,
};
use chrono::Utc;
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

fn environment() -> CheckoutEnvironment {
    let shop = SimulatedStorefront::new(StorefrontBehavior::default());
    let session = shop.connect(&Identity::guest("reducer")).unwrap();
    CheckoutEnvironment::new(session, Arc::new(test_clock()))
}

fn cart() -> CartSnapshot {
    CartSnapshot::from_lines([LineItem::new("hoodie", 1, Money::from_cents(4_500))]).unwrap()
}

fn ledger(ids: &[&str]) -> OrderLedgerSnapshot {
    let rows = ids
        .iter()
        .map(|id| OrderSummary::new(OrderId::new(*id), "$45.00", 0))
        .collect();
    OrderLedgerSnapshot::from_recent_first("test", Utc::now(), rows).unwrap()
}

fn machine_in(state: CheckoutState) -> CheckoutMachine {
    CheckoutMachine {
        state,
        cart: cart(),
        ..CheckoutMachine::new()
    }
}

fn submitting(last_submit: Option<SubmitResult>) -> CheckoutMachine {
    CheckoutMachine {
        baseline: Some(ledger(&["10"])),
        last_submit,
        submissions: 1,
        ..machine_in(CheckoutState::Submitting)
    }
}

fn test() -> ReducerTest<CheckoutReducer, CheckoutMachine, CheckoutAction, CheckoutEnvironment> {
    ReducerTest::new(CheckoutReducer::new()).with_env(environment())
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn address_accepted_moves_to_address_entered() {
    test()
        .given_state(machine_in(CheckoutState::ItemsInCart))
        .when_action(CheckoutAction::AddressAccepted)
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::AddressEntered))
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn entering_an_address_calls_the_storefront() {
    test()
        .given_state(machine_in(CheckoutState::ItemsInCart))
        .when_action(CheckoutAction::EnterAddress(Address::minimal("a@example.com")))
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::ItemsInCart))
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

#[test]
fn methods_chosen_moves_to_methods_selected() {
    test()
        .given_state(machine_in(CheckoutState::AddressEntered))
        .when_action(CheckoutAction::MethodsChosen)
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::MethodsSelected))
        .run();
}

#[test]
fn placing_the_order_records_the_baseline() {
    test()
        .given_state(machine_in(CheckoutState::MethodsSelected))
        .when_action(CheckoutAction::PlaceOrder {
            baseline: ledger(&["10"]),
        })
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Submitting);
            assert_eq!(machine.baseline.as_ref().map(OrderLedgerSnapshot::len), Some(1));
            assert_eq!(machine.submissions, 1);
            assert_eq!(machine.submitted_at, Some(test_clock_now()));
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assertions::assert_has_future_effect(effects);
        })
        .run();
}

fn test_clock_now() -> chrono::DateTime<Utc> {
    use checkout_harness_core::environment::Clock;
    test_clock().now()
}

#[test]
fn submit_returned_always_reconciles() {
    test()
        .given_state(submitting(None))
        .when_action(CheckoutAction::SubmitReturned(SubmitResult::Unknown("timeout".into())))
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Submitting);
            assert!(matches!(machine.last_submit, Some(SubmitResult::Unknown(_))));
        })
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

// ============================================================================
// Reconciliation
// ============================================================================

#[test]
fn confirmed_id_among_new_orders_wins() {
    test()
        .given_state(submitting(Some(SubmitResult::Confirmed(OrderId::new("11")))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["12", "11", "10"])))
        .then_state(|machine| {
            assertions::assert_reconciled_to(machine, &CheckoutState::Succeeded(OrderId::new("11")));
        })
        .run();
}

#[test]
fn timeout_with_a_new_order_is_success() {
    test()
        .given_state(submitting(Some(SubmitResult::Unknown("timeout".into()))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["11", "10"])))
        .then_state(|machine| {
            assertions::assert_reconciled_to(machine, &CheckoutState::Succeeded(OrderId::new("11")));
        })
        .run();
}

#[test]
fn timeout_without_a_new_order_is_interrupted() {
    test()
        .given_state(submitting(Some(SubmitResult::Unknown("timeout".into()))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["10"])))
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::Interrupted))
        .run();
}

#[test]
fn unanswered_submission_stays_unresolved_while_interrupted() {
    test()
        .given_state(submitting(Some(SubmitResult::Unknown("timeout".into()))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["10"])))
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Interrupted);
            assert!(machine.awaiting_unanswered_submission());
        })
        .run();
}

#[test]
fn injected_interrupt_is_not_an_unanswered_submission() {
    test()
        .given_state(submitting(None))
        .when_action(CheckoutAction::Interrupt)
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Interrupted);
            assert!(!machine.awaiting_unanswered_submission());
        })
        .run();
}

#[test]
fn reconcile_while_interrupted_reads_the_ledger_again() {
    test()
        .given_state(CheckoutMachine {
            state: CheckoutState::Interrupted,
            ..submitting(Some(SubmitResult::Unknown("timeout".into())))
        })
        .when_action(CheckoutAction::Reconcile)
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::Interrupted))
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

#[test]
fn lagging_ledger_keeps_submitting() {
    test()
        .given_state(submitting(Some(SubmitResult::Confirmed(OrderId::new("11")))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["10"])))
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::Submitting))
        .run();
}

#[test]
fn rejection_fails_even_if_other_sessions_ordered() {
    test()
        .given_state(submitting(Some(SubmitResult::Rejected("cart is empty".into()))))
        .when_action(CheckoutAction::LedgerObserved(ledger(&["11", "10"])))
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Failed("cart is empty".into()));
        })
        .run();
}

#[test]
fn interrupted_actor_finds_its_order() {
    test()
        .given_state(CheckoutMachine {
            state: CheckoutState::Interrupted,
            ..submitting(None)
        })
        .when_action(CheckoutAction::LedgerObserved(ledger(&["11", "10"])))
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::Succeeded(OrderId::new("11"))))
        .run();
}

// ============================================================================
// Interrupt, resume and failures
// ============================================================================

#[test]
fn interrupt_abandons_the_submission() {
    test()
        .given_state(submitting(None))
        .when_action(CheckoutAction::Interrupt)
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::Interrupted))
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn resume_with_items_returns_to_cart() {
    test()
        .given_state(machine_in(CheckoutState::Interrupted))
        .when_action(CheckoutAction::Resume { cart: cart() })
        .then_state(|machine| assert_eq!(machine.state, CheckoutState::ItemsInCart))
        .run();
}

#[test]
fn resume_with_empty_cart_is_rejected() {
    test()
        .given_state(machine_in(CheckoutState::Interrupted))
        .when_action(CheckoutAction::Resume {
            cart: CartSnapshot::empty(),
        })
        .then_state(|machine| assertions::assert_refused(machine, &CheckoutState::Interrupted, "resume"))
        .run();
}

#[test]
fn step_failure_before_submission_fails() {
    test()
        .given_state(machine_in(CheckoutState::ItemsInCart))
        .when_action(CheckoutAction::StepFailed {
            step: CheckoutStep::Address,
            error: ClientError::AddressRejected("missing phone".into()),
        })
        .then_state(|machine| assert!(matches!(machine.state, CheckoutState::Failed(_))))
        .run();
}

#[test]
fn step_failure_while_submitting_is_interrupted() {
    test()
        .given_state(submitting(None))
        .when_action(CheckoutAction::StepFailed {
            step: CheckoutStep::Reconcile,
            error: ClientError::Navigation("reset".into()),
        })
        .then_state(|machine| {
            assert_eq!(machine.state, CheckoutState::Interrupted);
            assert!(machine.last_error.is_some());
        })
        .run();
}

#[test]
fn terminal_states_reject_commands() {
    test()
        .given_state(machine_in(CheckoutState::Succeeded(OrderId::new("11"))))
        .when_action(CheckoutAction::PlaceOrder {
            baseline: ledger(&["11"]),
        })
        .then_state(|machine| {
            assertions::assert_refused(machine, &CheckoutState::Succeeded(OrderId::new("11")), "place_order");
        })
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn submit_requires_methods_selected() {
    test()
        .given_state(machine_in(CheckoutState::AddressEntered))
        .when_action(CheckoutAction::PlaceOrder {
            baseline: ledger(&[]),
        })
        .then_state(|machine| {
            assertions::assert_refused(machine, &CheckoutState::AddressEntered, "place_order");
            assert_eq!(machine.submissions, 0);
        })
        .run();
}
