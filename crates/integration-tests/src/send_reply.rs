//! Send/reply scenarios over real loopback HTTP: the simple round trip,
//! authorization failure, and the unacknowledged-message contract.

use crate::harness::{
    command_name, start_http_bus, Probe, TestCommand, TestReply,
};
use courier_bus::{typed_handler, MessageContext, MessageSpecification, QueueOptions, SendOptions};
use courier_http::{AllowAnonymous, BasicAuthenticator};
use courier_types::{BusError, Credentials, Endpoint, EndpointName, QueueName};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn endpoint_to(name: &str, address: url::Url, credentials: Option<Credentials>) -> Endpoint {
    Endpoint::new(EndpointName::new(name).unwrap(), address, credentials)
}

#[tokio::test]
async fn simple_send_reply() {
    let bus_b = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.handle(
            MessageSpecification::Named(command_name()),
            typed_handler(|cmd: Arc<TestCommand>, ctx: Arc<MessageContext>| async move {
                ctx.acknowledge();
                ctx.send_last_reply(TestReply { echo: cmd.int_data }).await
            }),
        )
    })
    .await;

    let address = bus_b.server.base_uri().unwrap();
    let bus_a = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(endpoint_to("b", address, None)).send_rule(
            MessageSpecification::Named(command_name()),
            EndpointName::new("b").unwrap(),
        )
    })
    .await;

    let sent = bus_a.bus.send(TestCommand::sample()).await.unwrap();
    let mut replies = sent.observe_replies();

    let reply = timeout(Duration::from_secs(30), replies.recv())
        .await
        .expect("a reply within 30s")
        .expect("stream not finished before the reply");
    assert_eq!(reply.downcast_ref::<TestReply>(), Some(&TestReply { echo: 42 }));

    // Exactly one reply, then the stream completes.
    assert!(timeout(Duration::from_secs(30), replies.recv())
        .await
        .expect("completion within 30s")
        .is_none());

    bus_a.stop().await;
    bus_b.stop().await;
}

#[tokio::test]
async fn rejected_credentials_surface_as_unauthorized() {
    let authenticator = Arc::new(BasicAuthenticator::new().with_user("bee", "correct"));
    let bus_b = start_http_bus(authenticator, |b| {
        b.handle(
            MessageSpecification::Any,
            typed_handler(|_: Arc<TestCommand>, ctx: Arc<MessageContext>| async move {
                ctx.acknowledge();
                Ok(())
            }),
        )
    })
    .await;

    let address = bus_b.server.base_uri().unwrap();
    let wrong = Credentials::Basic {
        username: "bee".to_string(),
        password: "wrong".to_string(),
    };
    let right = Credentials::Basic {
        username: "bee".to_string(),
        password: "correct".to_string(),
    };
    let bus_a = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(endpoint_to("b-wrong", address.clone(), Some(wrong)))
            .endpoint(endpoint_to("b-right", address, Some(right)))
    })
    .await;

    let err = bus_a
        .bus
        .send_to(TestCommand::sample(), &EndpointName::new("b-wrong").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Unauthorized));

    bus_a
        .bus
        .send_to(TestCommand::sample(), &EndpointName::new("b-right").unwrap())
        .await
        .unwrap();

    bus_a.stop().await;
    bus_b.stop().await;
}

#[tokio::test]
async fn unacknowledged_message_fails_non_durable_send() {
    let probe = Probe::new();
    let probe_handler = probe.clone();
    let bus_b = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.handle(
            MessageSpecification::Any,
            typed_handler(move |_: Arc<TestCommand>, _ctx: Arc<MessageContext>| {
                let probe = probe_handler.clone();
                async move {
                    probe.hit();
                    // Declines to acknowledge; the peer answers HTTP 422.
                    Ok(())
                }
            }),
        )
    })
    .await;

    let address = bus_b.server.base_uri().unwrap();
    let bus_a = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(endpoint_to("b", address, None))
    })
    .await;

    let err = bus_a
        .bus
        .send_to(TestCommand::sample(), &EndpointName::new("b").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NotAcknowledged));
    assert_eq!(probe.count(), 1);

    bus_a.stop().await;
    bus_b.stop().await;
}

#[tokio::test]
async fn unacknowledged_durable_send_retries_then_abandons() {
    let probe = Probe::new();
    let probe_handler = probe.clone();
    let bus_b = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.handle(
            MessageSpecification::Any,
            typed_handler(move |_: Arc<TestCommand>, _ctx: Arc<MessageContext>| {
                let probe = probe_handler.clone();
                async move {
                    probe.hit();
                    Ok(())
                }
            }),
        )
    })
    .await;

    let address = bus_b.server.base_uri().unwrap();
    let max_attempts = 3;
    let bus_a = start_http_bus(Arc::new(AllowAnonymous), |b| {
        b.endpoint(endpoint_to("b", address, None))
            .outbound_options(QueueOptions {
                max_attempts,
                retry_delay: Duration::from_millis(20),
                ..QueueOptions::default()
            })
    })
    .await;

    // The durable send succeeds immediately; delivery is the queue's job.
    let sent = bus_a
        .bus
        .send_to_with(
            TestCommand::sample(),
            &EndpointName::new("b").unwrap(),
            SendOptions {
                durable: true,
                ..SendOptions::default()
            },
        )
        .await
        .unwrap();

    let outbound = QueueName::new("outbound").unwrap();
    let id = sent.message_id();
    timeout(Duration::from_secs(10), async {
        loop {
            if let Some(record) = bus_a.queue_store.get(&outbound, id) {
                if record.is_abandoned() {
                    assert_eq!(record.attempts, max_attempts);
                    assert!(record.acknowledged_at.is_none());
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("outbound message abandoned after retries");
    assert_eq!(probe.count(), max_attempts as usize);

    bus_a.stop().await;
    bus_b.stop().await;
}
