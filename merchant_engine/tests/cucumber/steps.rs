use std::time::{Duration, Instant};

use cucumber::{then, when};
use merchant_common::Amount;
use merchant_engine::{
    api::{
        order_objects::{ContractTermsView, PaymentStatus, PostOrderRequest, StatusQuery, StatusRequest},
        payment_objects::{PayResult, RefundIncreaseRequest},
        tip_objects::{Planchet, TipAuthorizeRequest, TipPickupRequest},
    },
    crypto::{messages, Blob, HashCode},
    db_types::{InstanceId, OrderId, OrderListFilter},
    PaymentManagement,
};
use serde_json::json;

use crate::cucumber::merchant_world::{MerchantWorld, WalletCoin};

fn amount(s: &str) -> Amount {
    s.parse().unwrap_or_else(|e| panic!("{s} is not a valid amount: {e}"))
}

fn order_request(order_id: &str, price: &str) -> PostOrderRequest {
    let order = json!({
        "order_id": order_id,
        "amount": price,
        "summary": format!("Order {order_id}"),
        "fulfillment_url": format!("https://shop.test/fulfil/{order_id}"),
    });
    PostOrderRequest { order, inventory_products: vec![] }
}

fn check_request(order_id: &str) -> StatusRequest {
    StatusRequest {
        order_id: OrderId::from(order_id),
        query: StatusQuery::CheckPayment,
        session_id: None,
        contract_url: None,
        min_refund: None,
        timeout: Duration::ZERO,
    }
}

async fn payment_status(world: &MerchantWorld, instance: &str, order_id: &str) -> PaymentStatus {
    world
        .system()
        .status
        .payment_status(&InstanceId::new(instance), &MerchantWorld::urls(instance), check_request(order_id))
        .await
        .expect("Error checking the payment status")
}

//--------------------------------------        Orders        ---------------------------------------------------------

#[when(expr = "the merchant creates order {string} for {string} on {string}")]
async fn create_order(world: &mut MerchantWorld, order_id: String, price: String, instance: String) {
    world.last_error = None;
    let urls = MerchantWorld::urls(&instance);
    let result =
        world.system().orders.create_order(&InstanceId::new(&instance), &urls, order_request(&order_id, &price)).await;
    match result {
        Ok(response) => assert_eq!(response.order_id.as_str(), order_id),
        Err(e) => world.record_error(e),
    }
}

#[when(expr = "a wallet claims order {string} on {string} with nonce {string}")]
async fn claim_order(world: &mut MerchantWorld, order_id: String, instance: String, nonce: String) {
    world.last_error = None;
    let nonce = world.nonce(&nonce);
    let order_id = OrderId::from(order_id);
    let result = world.system().orders.claim_order(&InstanceId::new(&instance), &order_id, &nonce).await;
    match result {
        Ok(claim) => {
            world.contracts.entry(order_id).or_insert_with(|| claim.clone());
            world.last_claim = Some(claim);
        },
        Err(e) => world.record_error(e),
    }
}

#[then(expr = "the contract of order {string} has amount {string}")]
async fn contract_amount(world: &mut MerchantWorld, order_id: String, price: String) {
    let claim = world.contract(&OrderId::from(order_id));
    let terms: ContractTermsView = serde_json::from_value(claim.contract_terms.clone()).expect("Invalid contract terms");
    assert_eq!(terms.amount, amount(&price));
}

#[then(expr = "the contract signature of order {string} is valid")]
async fn contract_signature(world: &mut MerchantWorld, order_id: String) {
    let claim = world.contract(&OrderId::from(order_id));
    let terms: ContractTermsView = serde_json::from_value(claim.contract_terms.clone()).expect("Invalid contract terms");
    let h = claim.h_contract_terms.expect("Claim has no contract hash");
    assert!(messages::contract(&h).verify(&terms.merchant_pub, &claim.sig).is_ok(), "Contract signature is invalid");
}

#[then(expr = "the last claim returned the first contract of order {string}")]
async fn same_claim(world: &mut MerchantWorld, order_id: String) {
    let first = world.contract(&OrderId::from(order_id));
    let last = world.last_claim.as_ref().expect("No order has been claimed");
    assert_eq!(first, last, "The second claim returned a different contract");
}

#[then(expr = "the last request fails with {string}")]
async fn request_failed(world: &mut MerchantWorld, variant: String) {
    let error = world.last_error.as_deref().expect("The last request did not fail");
    assert!(error.starts_with(&variant), "Expected {variant}, but got {error}");
}

#[then("the last request succeeds")]
async fn request_succeeded(world: &mut MerchantWorld) {
    assert!(world.last_error.is_none(), "The last request failed: {:?}", world.last_error);
}

#[then(expr = "instance {string} lists {int} order(s)")]
async fn order_count(world: &mut MerchantWorld, instance: String, count: usize) {
    let listing = world
        .system()
        .orders
        .list_orders(&InstanceId::new(&instance), OrderListFilter::default(), Duration::ZERO)
        .await
        .expect("Error listing orders");
    assert_eq!(listing.orders.len(), count);
}

#[when(expr = "the merchant waits {int}ms for new orders on {string} while order {string} is created after {int}ms")]
async fn wait_for_orders(world: &mut MerchantWorld, timeout: u64, instance: String, order_id: String, delay: u64) {
    let id = InstanceId::new(&instance);
    let urls = MerchantWorld::urls(&instance);
    let filter = OrderListFilter { date: merchant_common::Timestamp::zero(), start: 0, delta: 20, ..Default::default() };
    let system = world.system();
    let listing = system.orders.list_orders(&id, filter, Duration::from_millis(timeout));
    let creation = async {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        system.orders.create_order(&id, &urls, order_request(&order_id, "EUR:1")).await
    };
    let (listing, created) = tokio::join!(listing, creation);
    created.expect("Error creating order");
    world.listed = listing.expect("Error listing orders").orders.into_iter().map(|o| o.order_id).collect();
}

#[then(expr = "the listing contains order {string}")]
async fn listing_contains(world: &mut MerchantWorld, order_id: String) {
    assert!(world.listed.contains(&OrderId::from(order_id.as_str())), "Listing was {:?}", world.listed);
}

//--------------------------------------       Payments       ---------------------------------------------------------

async fn pay(world: &mut MerchantWorld, instance: &str, order_id: &OrderId, coins: &[WalletCoin], mode: &str) {
    world.last_error = None;
    let request = world.pay_request(order_id, coins, mode);
    let result = world.system().payments.pay(&InstanceId::new(instance), request).await;
    match result {
        Ok(res) => world.last_pay = Some(res),
        Err(e) => world.record_error(e),
    }
}

fn new_coins(count: usize, value: &str) -> Vec<WalletCoin> {
    (0..count).map(|_| WalletCoin::new(amount(value))).collect()
}

#[when(expr = "the wallet pays order {string} on {string} with {int} coin(s) of {string}")]
async fn pay_order(world: &mut MerchantWorld, order_id: String, instance: String, count: usize, value: String) {
    let order_id = OrderId::from(order_id);
    let coins = new_coins(count, &value);
    world.coins.insert(order_id.clone(), coins.clone());
    pay(world, &instance, &order_id, &coins, "pay").await;
}

#[when(expr = "the wallet pays order {string} on {string} with the coins it spent on {string}")]
async fn pay_with_spent_coins(world: &mut MerchantWorld, order_id: String, instance: String, other: String) {
    let coins = world.coins.get(&OrderId::from(other)).cloned().expect("No coins were spent on that order");
    pay(world, &instance, &OrderId::from(order_id), &coins, "pay").await;
}

#[when(expr = "the wallet replays its payment of order {string} on {string}")]
async fn replay_payment(world: &mut MerchantWorld, order_id: String, instance: String) {
    let order_id = OrderId::from(order_id);
    let coins = world.coins.get(&order_id).cloned().expect("The order has not been paid");
    pay(world, &instance, &order_id, &coins, "pay").await;
}

#[when(expr = "the wallet aborts the payment of order {string} on {string} with {int} coin(s) of {string}")]
async fn abort_payment(world: &mut MerchantWorld, order_id: String, instance: String, count: usize, value: String) {
    let coins = new_coins(count, &value);
    pay(world, &instance, &OrderId::from(order_id), &coins, "abort-refund").await;
}

#[then(expr = "order {string} on {string} is paid")]
async fn order_paid(world: &mut MerchantWorld, order_id: String, instance: String) {
    let status = payment_status(world, &instance, &order_id).await;
    assert!(status.is_paid(), "Order {order_id} is not paid: {status:?}");
}

#[then(expr = "order {string} on {string} is not paid")]
async fn order_unpaid(world: &mut MerchantWorld, order_id: String, instance: String) {
    let status = payment_status(world, &instance, &order_id).await;
    assert!(!status.is_paid(), "Order {order_id} is paid");
}

#[then("the payment confirmation is valid")]
async fn payment_confirmation(world: &mut MerchantWorld) {
    let Some(PayResult::Paid(response)) = &world.last_pay else {
        panic!("No payment was confirmed");
    };
    let h = response.h_contract_terms.expect("Confirmation has no contract hash");
    let claim = world.contracts.values().find(|c| c.h_contract_terms == Some(h)).expect("Unknown contract");
    let terms: ContractTermsView = serde_json::from_value(claim.contract_terms.clone()).expect("Invalid contract terms");
    assert!(messages::payment_ok(&h).verify(&terms.merchant_pub, &response.sig).is_ok());
}

#[then(expr = "the wallet received {int} refund permission(s)")]
async fn refund_permissions(world: &mut MerchantWorld, count: usize) {
    let Some(PayResult::Aborted(response)) = &world.last_pay else {
        panic!("No payment was aborted");
    };
    assert_eq!(response.refund_permissions.len(), count);
    assert!(response.refund_permissions.iter().all(|p| p.rtransaction_id == 0));
}

#[when(expr = "a wallet polls order {string} on {string} for {int}ms while it is paid with {int} coin(s) of {string} after {int}ms")]
async fn poll_while_paying(
    world: &mut MerchantWorld,
    order_id: String,
    instance: String,
    timeout: u64,
    count: usize,
    value: String,
    delay: u64,
) {
    let oid = OrderId::from(order_id.as_str());
    let id = InstanceId::new(&instance);
    let coins = new_coins(count, &value);
    let request = world.pay_request(&oid, &coins, "pay");
    let h_contract = world.contract(&oid).h_contract_terms.expect("Claim has no contract hash");
    let poll = StatusRequest {
        query: StatusQuery::PollPayment { h_contract },
        timeout: Duration::from_millis(timeout),
        ..check_request(&order_id)
    };
    let urls = MerchantWorld::urls(&instance);
    let system = world.system();
    let started = Instant::now();
    let polling = async {
        let status = system.status.payment_status(&id, &urls, poll).await;
        (status, started.elapsed())
    };
    let paying = async {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        system.payments.pay(&id, request).await
    };
    let ((status, elapsed), paid) = tokio::join!(polling, paying);
    paid.expect("Error paying order");
    let status = status.expect("Error polling the payment status");
    world.polled = Some((status.is_paid(), elapsed));
}

#[then(expr = "the poll saw the payment within {int}ms")]
async fn poll_result(world: &mut MerchantWorld, limit: u64) {
    let (paid, elapsed) = world.polled.expect("No poll was made");
    assert!(paid, "The poll returned before the payment");
    assert!(elapsed < Duration::from_millis(limit), "The poll took {elapsed:?}");
}

//--------------------------------------        Refunds       ---------------------------------------------------------

#[when(expr = "the merchant refunds {string} of order {string} on {string} because {string}")]
async fn increase_refund(world: &mut MerchantWorld, refund: String, order_id: String, instance: String, reason: String) {
    world.last_error = None;
    let request = RefundIncreaseRequest { order_id: OrderId::from(order_id), refund: amount(&refund), reason };
    let urls = MerchantWorld::urls(&instance);
    let result = world.system().refunds.increase(&InstanceId::new(&instance), &urls, request).await;
    match result {
        Ok(response) => assert!(response.taler_refund_url.starts_with("taler://refund/")),
        Err(e) => world.record_error(e),
    }
}

#[then(expr = "the refund total of order {string} on {string} is {string}")]
async fn refund_total(world: &mut MerchantWorld, order_id: String, instance: String, total: String) {
    match payment_status(world, &instance, &order_id).await {
        PaymentStatus::Paid(status) => {
            assert!(status.refunded);
            assert_eq!(status.refund_amount, Some(amount(&total)));
        },
        PaymentStatus::Unpaid(_) => panic!("Order {order_id} is not paid"),
    }
}

#[when(expr = "the wallet looks up the refunds of order {string} on {string}")]
async fn lookup_refunds(world: &mut MerchantWorld, order_id: String, instance: String) {
    let response = world
        .system()
        .refunds
        .lookup(&InstanceId::new(&instance), &OrderId::from(order_id))
        .await
        .expect("Error looking up refunds");
    world.refunds = response.refunds;
}

#[then("every refund is confirmed by the exchange")]
async fn refunds_confirmed(world: &mut MerchantWorld) {
    assert!(!world.refunds.is_empty(), "There are no refunds");
    for refund in &world.refunds {
        assert_eq!(refund.exchange_http_status, 200, "Refund of {} was not confirmed", refund.coin_pub);
        assert!(refund.exchange_sig.is_some());
    }
}

#[then(expr = "the refunds add up to {string}")]
async fn refunds_sum(world: &mut MerchantWorld, total: String) {
    let total = amount(&total);
    let sum = Amount::sum(total.currency(), world.refunds.iter().map(|r| &r.refund_amount)).expect("Invalid sum");
    assert_eq!(sum, total);
}

//--------------------------------------         Tips         ---------------------------------------------------------

#[when(expr = "the merchant authorizes a tip of {string} on {string}")]
async fn authorize_tip(world: &mut MerchantWorld, tip: String, instance: String) {
    world.last_error = None;
    let request = TipAuthorizeRequest {
        amount: amount(&tip),
        justification: "Thanks for reading".into(),
        pickup_url: "https://shop.test/tip".into(),
        next_url: "https://shop.test/".into(),
        extra: json!({}),
    };
    let urls = MerchantWorld::urls(&instance);
    let result = world.system().tips.authorize(&InstanceId::new(&instance), &urls, request).await;
    match result {
        Ok(response) => world.tip = Some(response),
        Err(e) => world.record_error(e),
    }
}

async fn pickup(world: &mut MerchantWorld, instance: &str) {
    world.last_error = None;
    let tip_id = world.tip.as_ref().expect("No tip was authorized").tip_id;
    let request = TipPickupRequest { tip_id, planchets: world.planchets.clone() };
    let result = world.system().tips.pickup(&InstanceId::new(instance), request).await;
    match result {
        Ok(response) => world.blind_sigs = response.blind_sigs.len(),
        Err(e) => world.record_error(e),
    }
}

#[when(expr = "the wallet picks up the tip on {string} with {int} planchet(s)")]
async fn pickup_tip(world: &mut MerchantWorld, instance: String, count: usize) {
    let denom_pub_hash = world.system().exchange.denom.hash();
    world.planchets = (0..count)
        .map(|_| Planchet { denom_pub_hash, coin_ev: Blob::new(HashCode::random().as_bytes().to_vec()) })
        .collect();
    pickup(world, &instance).await;
}

#[when(expr = "the wallet repeats the pickup on {string}")]
async fn repeat_pickup(world: &mut MerchantWorld, instance: String) {
    pickup(world, &instance).await;
}

#[then(expr = "the wallet holds {int} blind signature(s)")]
async fn blind_signatures(world: &mut MerchantWorld, count: usize) {
    assert_eq!(world.blind_sigs, count);
}

#[then(expr = "the exchange signed {int} planchet(s)")]
async fn exchange_withdrawals(world: &mut MerchantWorld, count: usize) {
    assert_eq!(world.system().exchange.withdrawal_count(), count);
}

#[then(expr = "the tip on {string} has {string} left")]
async fn tip_left(world: &mut MerchantWorld, instance: String, left: String) {
    let tip_id = world.tip.as_ref().expect("No tip was authorized").tip_id;
    let info = world.system().tips.tip_info(&InstanceId::new(&instance), &tip_id).await.expect("Error fetching tip");
    assert_eq!(info.amount_left, amount(&left));
}

#[then(expr = "the reserve of {string} has {string} available")]
async fn reserve_available(world: &mut MerchantWorld, instance: String, available: String) {
    let status = world.system().tips.query(&InstanceId::new(&instance)).await.expect("Error querying tips");
    assert_eq!(status.amount_available, amount(&available));
}

//--------------------------------------  Instances & storage ---------------------------------------------------------

#[when(expr = "the merchant deletes instance {string}")]
async fn delete_instance(world: &mut MerchantWorld, instance: String) {
    world.system().instances.delete_instance(&InstanceId::new(&instance), false).await.expect("Error deleting instance");
}

#[then(expr = "instance {string} is kept but inactive")]
async fn instance_inactive(world: &mut MerchantWorld, instance: String) {
    let details = world.system().instances.instance(&InstanceId::new(&instance)).await.expect("Instance is gone");
    assert!(!details.active);
}

#[then(expr = "order {string} has {int} stored deposit(s)")]
async fn stored_deposits(world: &mut MerchantWorld, order_id: String, count: usize) {
    let h = world.contract(&OrderId::from(order_id)).h_contract_terms.expect("Claim has no contract hash");
    let deposits = world.system().db.fetch_deposits(&h).await.expect("Error fetching deposits");
    assert_eq!(deposits.len(), count);
}
