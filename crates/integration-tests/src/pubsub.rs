//! Publish/subscribe scenarios over loopback HTTP: fan-out, TTL expiry,
//! renewal, and unsubscribe.

use crate::harness::{event_name, start_http_bus, Probe, TestEvent};
use courier_bus::ports::{SubscriptionOp, Transport};
use courier_bus::{typed_handler, MessageContext, MessageSpecification};
use courier_http::{AllowAnonymous, HttpTransport, HttpTransportConfig};
use courier_types::{Endpoint, EndpointName, TopicName};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

fn topic() -> TopicName {
    TopicName::new("T0").unwrap()
}

fn event(label: &str) -> TestEvent {
    TestEvent {
        label: label.to_string(),
    }
}

async fn wait_for_subscriber(bus: &courier_bus::Bus, subscriber: &Url, present: bool) {
    timeout(Duration::from_secs(5), async {
        loop {
            let listed = bus.subscribers(&topic()).contains(subscriber);
            if listed == present {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber listing settles");
}

#[tokio::test]
async fn publish_fans_out_to_live_subscribers_exactly_once() {
    let publisher = start_http_bus(Arc::new(AllowAnonymous), |b| b.topic(topic())).await;
    let publisher_address = publisher.server.base_uri().unwrap();

    let probe = Probe::new();
    let probe_handler = probe.clone();
    let subscriber = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(Endpoint::new(
            EndpointName::new("a").unwrap(),
            publisher_address,
            None,
        ))
        .subscribe(
            EndpointName::new("a").unwrap(),
            topic(),
            Duration::from_secs(60),
        )
        .handle(
            MessageSpecification::Named(event_name()),
            typed_handler(move |_: Arc<TestEvent>, ctx: Arc<MessageContext>| {
                let probe = probe_handler.clone();
                async move {
                    probe.hit();
                    ctx.acknowledge();
                    Ok(())
                }
            }),
        )
    })
    .await;

    let subscriber_uri = subscriber.bus.base_uri().clone();
    wait_for_subscriber(&publisher.bus, &subscriber_uri, true).await;

    publisher.bus.publish(event("first"), &topic()).await.unwrap();

    timeout(Duration::from_secs(5), probe.wait_for(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(probe.count(), 1, "fan-out delivers exactly once");

    subscriber.stop().await;
    publisher.stop().await;
}

#[tokio::test]
async fn lapsed_subscriptions_are_excluded_from_fan_out() {
    let publisher = start_http_bus(Arc::new(AllowAnonymous), |b| b.topic(topic())).await;
    let publisher_address = publisher.server.base_uri().unwrap();

    // A bare transport subscribing without a renewal worker: the
    // subscription lapses after its TTL.
    let client = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let ghost = Url::parse("http://127.0.0.1:59999/").unwrap();
    client
        .send_subscription_request(
            SubscriptionOp::Add,
            &publisher_address,
            None,
            &topic(),
            &ghost,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    wait_for_subscriber(&publisher.bus, &ghost, true).await;
    wait_for_subscriber(&publisher.bus, &ghost, false).await;

    // A publish now must not attempt delivery to the lapsed subscriber;
    // with no live subscribers it is a no-op.
    publisher.bus.publish(event("nobody"), &topic()).await.unwrap();

    publisher.stop().await;
}

#[tokio::test]
async fn renewal_keeps_the_subscription_listed_continuously() {
    let publisher = start_http_bus(Arc::new(AllowAnonymous), |b| b.topic(topic())).await;
    let publisher_address = publisher.server.base_uri().unwrap();

    let probe = Probe::new();
    let probe_handler = probe.clone();
    // TTL of 200ms; the worker renews at half-TTL, so the subscription
    // stays listed far beyond the initial TTL.
    let subscriber = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(Endpoint::new(
            EndpointName::new("a").unwrap(),
            publisher_address,
            None,
        ))
        .subscribe(
            EndpointName::new("a").unwrap(),
            topic(),
            Duration::from_millis(200),
        )
        .handle(
            MessageSpecification::Named(event_name()),
            typed_handler(move |_: Arc<TestEvent>, ctx: Arc<MessageContext>| {
                let probe = probe_handler.clone();
                async move {
                    probe.hit();
                    ctx.acknowledge();
                    Ok(())
                }
            }),
        )
    })
    .await;

    let subscriber_uri = subscriber.bus.base_uri().clone();
    wait_for_subscriber(&publisher.bus, &subscriber_uri, true).await;

    // Several TTL periods later the renewal worker has kept it alive.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(publisher.bus.subscribers(&topic()).contains(&subscriber_uri));

    publisher.bus.publish(event("still-here"), &topic()).await.unwrap();
    timeout(Duration::from_secs(5), probe.wait_for(1))
        .await
        .unwrap();

    // Once the subscriber stops renewing, the entry lapses.
    subscriber.stop().await;
    wait_for_subscriber(&publisher.bus, &subscriber_uri, false).await;

    publisher.stop().await;
}

#[tokio::test]
async fn unsubscribe_removes_the_subscription_immediately() {
    let publisher = start_http_bus(Arc::new(AllowAnonymous), |b| b.topic(topic())).await;
    let publisher_address = publisher.server.base_uri().unwrap();

    let client = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let subscriber = Url::parse("http://127.0.0.1:59998/").unwrap();
    client
        .send_subscription_request(
            SubscriptionOp::Add,
            &publisher_address,
            None,
            &topic(),
            &subscriber,
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();
    wait_for_subscriber(&publisher.bus, &subscriber, true).await;

    client
        .send_subscription_request(
            SubscriptionOp::Remove,
            &publisher_address,
            None,
            &topic(),
            &subscriber,
            None,
        )
        .await
        .unwrap();
    wait_for_subscriber(&publisher.bus, &subscriber, false).await;

    publisher.stop().await;
}

#[tokio::test]
async fn subscription_requests_for_undeclared_topics_are_rejected() {
    let publisher = start_http_bus(Arc::new(AllowAnonymous), |b| b).await;
    let publisher_address = publisher.server.base_uri().unwrap();

    let client = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let subscriber = Url::parse("http://127.0.0.1:59997/").unwrap();
    let err = client
        .send_subscription_request(
            SubscriptionOp::Add,
            &publisher_address,
            None,
            &topic(),
            &subscriber,
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap_err();
    // TopicNotFound maps to HTTP 400, which the client reads back as an
    // invalid request.
    assert!(matches!(err, courier_types::BusError::InvalidRequest(_)));

    publisher.stop().await;
}
