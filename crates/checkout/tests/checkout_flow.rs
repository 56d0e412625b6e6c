//! End-to-end checkout scenarios against in-memory collaborators.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;

use unitcart_cart::{CartError, DeliveryOption};
use unitcart_catalog::{CustomerClass, InMemoryCatalog, Product};
use unitcart_checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutState, CustomerSession, HmacGateway,
    PaymentHandoff, ReservationSweeper, SubmitOutcome, SweeperConfig,
};
use unitcart_core::{CustomerId, Money, ProductId};
use unitcart_events::{EventEnvelope, InMemoryEventBus};
use unitcart_infra::{CommandDispatcher, InMemoryEventStore, OrderRepository, StorefrontConfig};
use unitcart_inventory::{ReservationAllocator, Serial, UnitState};
use unitcart_sales::{
    DeliverOrder, EXPIRY_REASON, OrderCommand, OrderStatus, PaymentMethod, PaymentStatus,
    ShipOrder, ShippingAddress,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Orchestrator =
    CheckoutOrchestrator<Arc<InMemoryCatalog>, InMemoryEventStore, Bus, Arc<HmacGateway>>;

struct Storefront {
    catalog: Arc<InMemoryCatalog>,
    allocator: Arc<ReservationAllocator>,
    gateway: Arc<HmacGateway>,
    orchestrator: Arc<Orchestrator>,
}

fn storefront_with(config: StorefrontConfig) -> Storefront {
    unitcart_observability::init();
    let catalog = Arc::new(InMemoryCatalog::new());
    let allocator = Arc::new(ReservationAllocator::new());
    let gateway = Arc::new(HmacGateway::new(&config.gateway_key_secret));
    let orders = OrderRepository::new(CommandDispatcher::new(
        InMemoryEventStore::new(),
        Arc::new(InMemoryEventBus::new()),
    ));
    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        catalog.clone(),
        allocator.clone(),
        orders,
        gateway.clone(),
        config,
    ));
    Storefront {
        catalog,
        allocator,
        gateway,
        orchestrator,
    }
}

fn storefront() -> Storefront {
    storefront_with(StorefrontConfig::default().with_gateway_key_secret("test-secret"))
}

fn serials(prefix: &str, count: usize) -> Result<Vec<Serial>> {
    Ok((0..count)
        .map(|i| Serial::new(format!("{prefix}-{i:03}")))
        .collect::<Result<Vec<_>, _>>()?)
}

/// ₹1499 modem, ₹50 shipping per unit, 18% GST.
fn stock_modem(store: &Storefront, units: usize) -> Result<ProductId> {
    let id = ProductId::new();
    store.catalog.upsert(
        Product::new(id, "Modem", Money::from_major(1499))
            .with_list_price(Money::from_major(1999))
            .with_wholesale(Money::from_major(1200), 10)
            .with_shipping_charge(Money::from_major(50))
            .with_tax_percent(18),
    )?;
    store.allocator.receive_units(id, serials("MDM", units)?)?;
    Ok(id)
}

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Asha Rao".into(),
        phone: "9800000000".into(),
        street: "12 MG Road".into(),
        city: "Bengaluru".into(),
        state: "KA".into(),
        postal_code: "560001".into(),
        country: "IN".into(),
    }
}

fn retail_session(
    store: &Storefront,
    product_id: ProductId,
    quantity: u32,
    method: PaymentMethod,
) -> Result<CustomerSession> {
    let mut session = CustomerSession::new(CustomerId::new(), CustomerClass::Retail);
    session.cart_mut().add_item(
        store.catalog.as_ref(),
        store.allocator.as_ref(),
        product_id,
        quantity,
    )?;
    let checkout = session.checkout_mut();
    checkout.set_address(address())?;
    checkout.continue_to_payment()?;
    checkout.select_payment(method)?;
    Ok(session)
}

fn expect_handoff(outcome: SubmitOutcome) -> PaymentHandoff {
    match outcome {
        SubmitOutcome::AwaitingPayment(handoff) => handoff,
        SubmitOutcome::Confirmed(order) => panic!("expected gateway handoff, got {order:?}"),
    }
}

fn unit_states(store: &Storefront, product_id: ProductId) -> Result<Vec<UnitState>> {
    Ok(store
        .allocator
        .snapshot(product_id)?
        .into_iter()
        .map(|u| u.state)
        .collect())
}

#[test]
fn cod_order_is_confirmed_at_placement() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 5)?;
    let mut session = retail_session(&store, modem, 2, PaymentMethod::Cod)?;

    let SubmitOutcome::Confirmed(order) = store.orchestrator.submit(&mut session)? else {
        panic!("cash on delivery must confirm without a gateway");
    };

    // 2 × 1499 + 2 × 50 shipping + 18% of 2998
    assert_eq!(order.totals().subtotal, Money::from_major(2998));
    assert_eq!(order.totals().shipping, Money::from_major(100));
    assert_eq!(order.totals().tax, Money::from_minor(53_964));
    assert_eq!(order.totals().total, Money::from_minor(363_764));
    assert_eq!(order.items()[0].serials, serials("MDM", 2)?);
    assert_eq!(order.status(), OrderStatus::Processing);
    assert_eq!(order.payment_status(), Some(PaymentStatus::Pending));

    assert!(session.cart().is_empty());
    assert_eq!(session.checkout().state(), CheckoutState::Confirmed);
    assert_eq!(store.allocator.available_units(modem)?, 3);
    assert_eq!(store.allocator.hold_count()?, 0);
    assert_eq!(
        unit_states(&store, modem)?[..2],
        [UnitState::Sold, UnitState::Sold]
    );
    Ok(())
}

#[test]
fn cod_payment_completes_on_delivery() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 2)?;
    let mut session = retail_session(&store, modem, 1, PaymentMethod::Cod)?;
    let SubmitOutcome::Confirmed(order) = store.orchestrator.submit(&mut session)? else {
        panic!("expected confirmation");
    };
    let order_id = order.id_typed();

    let orders = store.orchestrator.orders();
    orders.execute(OrderCommand::ShipOrder(ShipOrder {
        order_id,
        occurred_at: Utc::now(),
    }))?;
    let delivered = orders.execute(OrderCommand::DeliverOrder(DeliverOrder {
        order_id,
        occurred_at: Utc::now(),
    }))?;

    assert_eq!(delivered.status(), OrderStatus::Delivered);
    assert_eq!(delivered.payment_status(), Some(PaymentStatus::Completed));
    assert_eq!(
        delivered.payment().and_then(|p| p.transaction_id.clone()),
        Some(format!("cod:{order_id}"))
    );
    Ok(())
}

#[test]
fn verified_gateway_payment_confirms_the_order() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 3)?;
    let mut session = retail_session(&store, modem, 2, PaymentMethod::Card)?;

    let handoff = expect_handoff(store.orchestrator.submit(&mut session)?);
    assert_eq!(handoff.amount, Money::from_minor(363_764));
    assert_eq!(handoff.currency, "INR");
    assert_eq!(session.checkout().state(), CheckoutState::AwaitingGatewayResult);
    assert_eq!(store.allocator.available_units(modem)?, 1);

    let callback = store
        .gateway
        .signed_callback(&handoff.gateway_order_ref, "pay_123")?;
    let order = store.orchestrator.confirm_payment(&mut session, &callback)?;

    assert_eq!(order.payment_status(), Some(PaymentStatus::Completed));
    assert_eq!(order.status(), OrderStatus::Processing);
    assert!(session.cart().is_empty());
    assert_eq!(session.checkout().state(), CheckoutState::Confirmed);
    assert_eq!(store.allocator.hold_count()?, 0);
    assert_eq!(store.allocator.available_units(modem)?, 1);

    let record = store.orchestrator.orders().record(handoff.order_id)?;
    let json = serde_json::to_value(&record)?;
    assert_eq!(json["_id"], handoff.order_id.to_string());
    assert_eq!(json["totalAmount"], 363_764);
    assert_eq!(json["payment"]["status"], "completed");
    assert_eq!(json["payment"]["transactionId"], "pay_123");
    assert_eq!(json["items"][0]["serials"][1], "MDM-001");
    Ok(())
}

#[test]
fn failed_verification_releases_units_and_keeps_the_cart() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 2)?;
    let mut session = retail_session(&store, modem, 2, PaymentMethod::Card)?;

    let handoff = expect_handoff(store.orchestrator.submit(&mut session)?);
    assert_eq!(store.allocator.available_units(modem)?, 0);

    let mut callback = store
        .gateway
        .signed_callback(&handoff.gateway_order_ref, "pay_123")?;
    callback.signature = "00".repeat(32);
    let err = store
        .orchestrator
        .confirm_payment(&mut session, &callback)
        .unwrap_err();

    assert!(matches!(err, CheckoutError::PaymentVerificationFailed { order_id } if order_id == handoff.order_id));
    assert!(err.is_retryable());
    assert_eq!(store.allocator.available_units(modem)?, 2);
    assert_eq!(unit_states(&store, modem)?, vec![UnitState::Available; 2]);
    assert_eq!(session.cart().unit_count(), 2);
    assert_eq!(session.checkout().state(), CheckoutState::Failed);

    let order = store.orchestrator.orders().get(handoff.order_id)?;
    assert_eq!(order.payment_status(), Some(PaymentStatus::Failed));
    assert_eq!(order.status(), OrderStatus::Cancelled);
    Ok(())
}

#[test]
fn cancelled_payment_releases_units_and_can_be_retried() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 2)?;
    let mut session = retail_session(&store, modem, 1, PaymentMethod::Upi { vpa: None })?;

    let first = expect_handoff(store.orchestrator.submit(&mut session)?);
    let err = store.orchestrator.cancel_payment(&mut session).unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentCancelled { .. }));
    assert_eq!(session.checkout().state(), CheckoutState::Cancelled);
    assert_eq!(store.allocator.available_units(modem)?, 2);
    assert_eq!(session.cart().unit_count(), 1);

    session.checkout_mut().retry()?;
    let second = expect_handoff(store.orchestrator.submit(&mut session)?);
    assert_ne!(first.order_id, second.order_id);
    // The released unit is first in line again.
    let order = store.orchestrator.orders().get(second.order_id)?;
    assert_eq!(order.items()[0].serials, serials("MDM", 1)?);

    let callback = store
        .gateway
        .signed_callback(&second.gateway_order_ref, "pay_9")?;
    store.orchestrator.confirm_payment(&mut session, &callback)?;
    assert_eq!(store.allocator.available_units(modem)?, 1);
    Ok(())
}

#[test]
fn wholesale_minimum_order_quantity_is_enforced() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 20)?;
    let mut session = CustomerSession::new(CustomerId::new(), CustomerClass::Wholesale);

    let err = session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), modem, 5)
        .unwrap_err();
    assert!(matches!(
        err,
        CartError::BelowMinimumOrder { requested: 5, minimum: 10, .. }
    ));
    assert!(session.cart().is_empty());

    session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), modem, 10)?;
    assert_eq!(session.cart().unit_count(), 10);
    assert_eq!(
        session.cart().subtotal(store.catalog.as_ref())?,
        Money::from_major(12_000)
    );
    Ok(())
}

#[test]
fn hold_at_warehouse_rejects_cod_before_reserving() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 10)?;
    let mut session = CustomerSession::new(CustomerId::new(), CustomerClass::Wholesale);
    session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), modem, 10)?;

    let checkout = session.checkout_mut();
    checkout.choose_delivery(DeliveryOption::HoldAtWarehouse)?;
    checkout.continue_to_payment()?;
    let err = checkout.select_payment(PaymentMethod::Cod).unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::InvalidPaymentMethodForDeliveryOption { .. }
    ));

    let err = store.orchestrator.submit(&mut session).unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentMethodRequired));
    assert_eq!(store.allocator.available_units(modem)?, 10);
    assert_eq!(store.orchestrator.orders().dispatcher().store().stream_count()?, 0);
    Ok(())
}

#[test]
fn held_orders_carry_no_shipping() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 10)?;
    let mut session = CustomerSession::new(CustomerId::new(), CustomerClass::Wholesale);
    session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), modem, 10)?;
    let checkout = session.checkout_mut();
    checkout.choose_delivery(DeliveryOption::HoldAtWarehouse)?;
    checkout.continue_to_payment()?;
    checkout.select_payment(PaymentMethod::NetBanking { bank: None })?;

    let handoff = expect_handoff(store.orchestrator.submit(&mut session)?);
    let order = store.orchestrator.orders().get(handoff.order_id)?;
    assert_eq!(order.totals().shipping, Money::ZERO);
    assert_eq!(order.totals().subtotal, Money::from_major(12_000));
    assert_eq!(order.totals().total, Money::from_major(14_160));
    assert!(order.shipping_address().is_none());
    Ok(())
}

#[test]
fn resubmitting_an_unchanged_cart_places_one_order() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 5)?;
    let mut session = retail_session(&store, modem, 2, PaymentMethod::Card)?;

    let first = expect_handoff(store.orchestrator.submit(&mut session)?);
    let second = expect_handoff(store.orchestrator.submit(&mut session)?);

    assert_eq!(first, second);
    assert_eq!(store.allocator.available_units(modem)?, 3);
    assert_eq!(store.allocator.hold_count()?, 1);
    assert_eq!(store.orchestrator.orders().dispatcher().store().stream_count()?, 1);
    Ok(())
}

#[test]
fn concurrent_resubmits_of_one_cart_place_one_order() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 8)?;
    let session = retail_session(&store, modem, 2, PaymentMethod::Card)?;

    for _ in 0..20 {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = store.orchestrator.clone();
                let barrier = barrier.clone();
                let mut session = session.clone();
                thread::spawn(move || {
                    barrier.wait();
                    orchestrator.submit(&mut session)
                })
            })
            .collect();

        let mut handoffs = Vec::new();
        for handle in handles {
            match handle.join().expect("submit thread panicked") {
                Ok(outcome) => handoffs.push(expect_handoff(outcome)),
                Err(err) => {
                    assert!(matches!(err, CheckoutError::SubmitInProgress), "unexpected {err}");
                    assert!(err.is_retryable());
                }
            }
        }

        assert!(!handoffs.is_empty());
        assert!(handoffs.windows(2).all(|pair| pair[0] == pair[1]));
    }

    assert_eq!(store.orchestrator.orders().dispatcher().store().stream_count()?, 1);
    assert_eq!(store.allocator.available_units(modem)?, 6);
    assert_eq!(store.allocator.hold_count()?, 1);
    Ok(())
}

#[test]
fn changing_the_cart_during_payment_is_refused() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 5)?;
    let mut session = retail_session(&store, modem, 1, PaymentMethod::Card)?;
    expect_handoff(store.orchestrator.submit(&mut session)?);

    session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), modem, 1)?;
    let err = store.orchestrator.submit(&mut session).unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidState { .. }));
    assert_eq!(store.allocator.available_units(modem)?, 4);
    Ok(())
}

#[test]
fn partial_stock_shortage_rolls_back_the_whole_attempt() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 5)?;
    let router = ProductId::new();
    store
        .catalog
        .upsert(Product::new(router, "Router", Money::from_major(2499)))?;
    store.allocator.receive_units(router, serials("RTR", 2)?)?;

    let mut session = retail_session(&store, modem, 2, PaymentMethod::Card)?;
    session
        .cart_mut()
        .add_item(store.catalog.as_ref(), store.allocator.as_ref(), router, 2)?;

    // Someone else buys a router in the meantime.
    store.allocator.reserve(router, 1)?;

    let err = store.orchestrator.submit(&mut session).unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::InsufficientStock { product_id, requested: 2, available: 1 } if product_id == router
    ));
    assert!(err.is_retryable());
    assert_eq!(store.allocator.available_units(modem)?, 5);
    assert_eq!(store.allocator.available_units(router)?, 1);
    assert_eq!(session.checkout().state(), CheckoutState::CollectingPayment);
    assert_eq!(session.cart().lines().len(), 2);
    assert_eq!(store.orchestrator.orders().dispatcher().store().stream_count()?, 0);
    Ok(())
}

#[test]
fn concurrent_checkouts_never_oversell() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 5)?;
    let sessions = (0..12)
        .map(|_| retail_session(&store, modem, 1, PaymentMethod::Card))
        .collect::<Result<Vec<_>>>()?;

    let handles: Vec<_> = sessions
        .into_iter()
        .map(|mut session| {
            let orchestrator = Arc::clone(&store.orchestrator);
            thread::spawn(move || orchestrator.submit(&mut session))
        })
        .collect();

    let mut granted = Vec::new();
    let mut refused = 0;
    for handle in handles {
        match handle.join().expect("checkout thread panicked") {
            Ok(outcome) => granted.push(expect_handoff(outcome).order_id),
            Err(CheckoutError::InsufficientStock { .. }) => refused += 1,
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(granted.len(), 5);
    assert_eq!(refused, 7);
    let mut seen = HashSet::new();
    for order_id in granted {
        for item in store.orchestrator.orders().get(order_id)?.items() {
            for serial in &item.serials {
                assert!(seen.insert(serial.clone()), "serial {serial} granted twice");
            }
        }
    }
    assert_eq!(store.allocator.available_units(modem)?, 0);
    Ok(())
}

#[test]
fn overdue_reservations_are_expired() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 2)?;
    let mut session = retail_session(&store, modem, 2, PaymentMethod::Card)?;
    let handoff = expect_handoff(store.orchestrator.submit(&mut session)?);

    let report = store.orchestrator.expire_reservations(Utc::now())?;
    assert_eq!(report.expired, 0);
    assert_eq!(store.allocator.available_units(modem)?, 0);

    let later = Utc::now() + chrono::Duration::minutes(16);
    let report = store.orchestrator.expire_reservations(later)?;
    assert_eq!(report.expired, 1);
    assert_eq!(store.allocator.available_units(modem)?, 2);

    let order = store.orchestrator.orders().get(handoff.order_id)?;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(
        order.payment().and_then(|p| p.failure_reason.clone()).as_deref(),
        Some(EXPIRY_REASON)
    );

    // A late success callback cannot resurrect the order.
    let callback = store
        .gateway
        .signed_callback(&handoff.gateway_order_ref, "pay_late")?;
    let err = store
        .orchestrator
        .confirm_payment(&mut session, &callback)
        .unwrap_err();
    assert!(matches!(err, CheckoutError::ReservationExpired { .. }));
    assert_eq!(session.cart().unit_count(), 2);
    assert_eq!(session.checkout().state(), CheckoutState::Failed);
    Ok(())
}

#[test]
fn sweeper_thread_releases_abandoned_checkouts() -> Result<()> {
    let store = storefront_with(
        StorefrontConfig::default()
            .with_gateway_key_secret("test-secret")
            .with_reservation_ttl(Duration::ZERO),
    );
    let modem = stock_modem(&store, 3)?;
    let mut session = retail_session(&store, modem, 3, PaymentMethod::Card)?;
    let handoff = expect_handoff(store.orchestrator.submit(&mut session)?);

    let sweeper = ReservationSweeper::spawn(
        Arc::clone(&store.orchestrator),
        SweeperConfig::default().with_interval(Duration::from_millis(5)),
    )?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while sweeper.stats().holds_expired == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let stats = sweeper.stats();
    sweeper.shutdown();

    assert_eq!(stats.holds_expired, 1);
    assert_eq!(store.allocator.available_units(modem)?, 3);
    assert_eq!(store.allocator.hold_count()?, 0);
    let order = store.orchestrator.orders().get(handoff.order_id)?;
    assert_eq!(order.payment_status(), Some(PaymentStatus::Failed));
    Ok(())
}

#[test]
fn callbacks_for_another_gateway_order_are_rejected() -> Result<()> {
    let store = storefront();
    let modem = stock_modem(&store, 2)?;
    let mut session = retail_session(&store, modem, 1, PaymentMethod::Card)?;
    expect_handoff(store.orchestrator.submit(&mut session)?);

    let callback = store.gateway.signed_callback("order_999", "pay_1")?;
    let err = store
        .orchestrator
        .confirm_payment(&mut session, &callback)
        .unwrap_err();
    assert!(matches!(err, CheckoutError::GatewayOrderMismatch(_)));
    assert_eq!(session.checkout().state(), CheckoutState::AwaitingGatewayResult);
    assert_eq!(store.allocator.available_units(modem)?, 1);
    Ok(())
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn failed_payments_restore_availability(stock in 1usize..20, take in 1u32..20) {
            let take = take.min(stock as u32);
            let store = storefront();
            let modem = stock_modem(&store, stock).unwrap();
            let mut session = retail_session(&store, modem, take, PaymentMethod::Card).unwrap();

            let handoff = expect_handoff(store.orchestrator.submit(&mut session).unwrap());
            prop_assert_eq!(store.allocator.available_units(modem).unwrap(), stock as u32 - take);

            let mut callback = store
                .gateway
                .signed_callback(&handoff.gateway_order_ref, "pay")
                .unwrap();
            callback.gateway_payment_ref.push('x');
            let verified = store.orchestrator.confirm_payment(&mut session, &callback);
            prop_assert!(
                matches!(verified, Err(CheckoutError::PaymentVerificationFailed { .. })),
                "tampered callback must not verify"
            );
            prop_assert_eq!(store.allocator.available_units(modem).unwrap(), stock as u32);
            prop_assert_eq!(session.cart().unit_count(), take);
        }
    }
}
