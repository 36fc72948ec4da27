//! Interrupted submissions: reload at different points of the submission
//! lifecycle and check that recovery never double-submits or loses an order.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use checkout_harness_core::environment::{SystemClock, Timer};
use checkout_harness_core::error::{AssertionViolation, HarnessError};
use checkout_harness_core::machine::CheckoutState;
use checkout_harness_core::types::{ActorLabel, Identity, Money, ProductRef, SelectorPolicy};
use checkout_harness_runtime::actor::{Actor, CheckoutPlan, RecoveryDecision};
use checkout_harness_runtime::injector::InterruptInjector;
use checkout_harness_runtime::scenario::ScenarioRunner;
use checkout_harness_testing::{SimulatedStorefront, StorefrontBehavior, fast_config, init_tracing};
use std::sync::Arc;
use std::time::Duration;

const BUYER: &str = "buyer@example.com";

fn shop(behavior: StorefrontBehavior) -> SimulatedStorefront {
    SimulatedStorefront::new(behavior)
        .with_product("hoodie", Money::from_cents(4_500), 50)
        .with_account(BUYER, "secret")
}

fn buyer() -> Identity {
    Identity::customer(BUYER, "secret")
}

fn plan() -> CheckoutPlan {
    CheckoutPlan::single_item(
        SelectorPolicy::Product(ProductRef::new("hoodie")),
        BUYER,
        Vec::new(),
        Vec::new(),
    )
}

fn runner(shop: &SimulatedStorefront) -> ScenarioRunner {
    init_tracing();
    ScenarioRunner::new(Arc::new(shop.clone()), Arc::new(SystemClock::new()), fast_config()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn interrupt_after_completion_does_not_resubmit() {
    let shop = shop(StorefrontBehavior::default());

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_secs(3))
        .await
        .unwrap();

    assert!(report.outcome.is_pass(), "{}", report.to_json().unwrap());
    let interrupt = report.interrupt.unwrap();
    assert!(interrupt.call_finished_first);
    assert_eq!(shop.submissions_received(), 1);
    assert_eq!(shop.orders_of(&buyer()).len(), 1);
    assert_eq!(shop.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_flight_resubmits_once() {
    let shop = shop(StorefrontBehavior {
        processing: Duration::from_secs(5),
        ..StorefrontBehavior::default()
    });

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_secs(1))
        .await
        .unwrap();

    assert!(report.outcome.is_pass(), "{}", report.to_json().unwrap());
    assert!(!report.interrupt.unwrap().call_finished_first);
    assert!(report.notes.iter().any(|n| n.contains("resubmitted")));
    assert_eq!(shop.submissions_received(), 2);
    assert_eq!(shop.orders_of(&buyer()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resubmission_without_deduplication_is_a_duplicate() {
    let shop = shop(StorefrontBehavior {
        processing: Duration::from_secs(5),
        duplicate_resubmissions: true,
        ..StorefrontBehavior::default()
    });

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_secs(1))
        .await
        .unwrap();

    assert!(report.outcome.is_failure());
    assert!(matches!(
        report.outcome.violations(),
        [AssertionViolation::DuplicateOrders { pairs }] if pairs.len() == 1
    ));
    assert_eq!(shop.orders_of(&buyer()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn immediate_interrupt_never_reaches_the_server() {
    let shop = shop(StorefrontBehavior::default());

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_millis(50))
        .await
        .unwrap();

    assert!(report.outcome.is_pass(), "{}", report.to_json().unwrap());
    assert_eq!(shop.submissions_received(), 1);
    assert_eq!(shop.orders_of(&buyer()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_order_after_cleared_cart_is_found() {
    let shop = shop(StorefrontBehavior {
        ledger_lag: Duration::from_secs(10),
        ..StorefrontBehavior::default()
    });

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_millis(1_500))
        .await
        .unwrap();

    assert!(report.outcome.is_pass(), "{}", report.to_json().unwrap());
    assert!(report.notes.iter().any(|n| n.contains("appeared late")), "{:?}", report.notes);
    assert_eq!(shop.submissions_received(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleared_cart_without_any_order_is_lost() {
    let shop = shop(StorefrontBehavior {
        lose_orders: true,
        ..StorefrontBehavior::default()
    });

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_millis(1_500))
        .await
        .unwrap();

    assert!(matches!(
        report.outcome.violations(),
        [AssertionViolation::OrderLost { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn reload_failing_twice_is_an_injection_failure() {
    let shop = shop(StorefrontBehavior {
        failing_reloads: 2,
        ..StorefrontBehavior::default()
    });

    let error = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_millis(500))
        .await
        .unwrap_err();

    assert!(matches!(error, HarnessError::InjectionFailed { .. }), "{error}");
    assert_eq!(shop.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn reload_failing_once_is_retried() {
    let shop = shop(StorefrontBehavior {
        failing_reloads: 1,
        ..StorefrontBehavior::default()
    });

    let report = runner(&shop)
        .interrupted_resubmission(buyer(), &plan(), Duration::from_secs(3))
        .await
        .unwrap();

    assert!(report.outcome.is_pass());
}

#[tokio::test(start_paused = true)]
async fn injector_leaves_the_actor_interrupted_and_recovery_decides() {
    init_tracing();
    let shop = shop(StorefrontBehavior {
        processing: Duration::from_secs(5),
        ..StorefrontBehavior::default()
    });
    let timer: Arc<dyn Timer> = Arc::new(SystemClock::new());
    let config = fast_config();

    let mut actor = Actor::open(&shop, ActorLabel::new("customer"), buyer(), Arc::clone(&timer), &config)
        .await
        .unwrap();
    actor.prepare(&plan()).await.unwrap();
    let baseline = actor.capture_ledger("before").await.unwrap();

    let injector = InterruptInjector::new(timer, &config.retry);
    let report = injector
        .interrupt_after(&mut actor, baseline, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(actor.state(), &CheckoutState::Interrupted);
    assert_eq!(report.observed, None);
    assert_eq!(actor.recover().await.unwrap(), RecoveryDecision::Resume);
    assert_eq!(actor.state(), &CheckoutState::ItemsInCart);

    actor.close().await.unwrap();
}
