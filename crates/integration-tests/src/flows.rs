//! Single-process flows over the in-memory transport: routing, inline and
//! queued dispatch, replies, journaling, and lifecycle.

use crate::harness::{
    command_name, register_test_types, Probe, TestCommand, TestEvent, TestReply,
};
use courier_bus::testing::{
    InMemoryJournal, InMemoryNetwork, InMemoryQueueStore, InMemorySubscriptionStore,
};
use courier_bus::{
    typed_handler, Bus, BusBuilder, MessageContext, MessageSpecification, SendOptions,
};
use courier_bus::ports::JournalCategory;
use courier_types::{
    BusError, Endpoint, EndpointName, Importance, QueueName, TopicName,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn endpoint(name: &str, address: &str) -> Endpoint {
    Endpoint::new(EndpointName::new(name).unwrap(), uri(address), None)
}

async fn memory_bus<F>(
    network: &Arc<InMemoryNetwork>,
    base: &str,
    configure: F,
) -> (Arc<Bus>, Arc<InMemoryQueueStore>)
where
    F: FnOnce(BusBuilder) -> BusBuilder,
{
    let transport = network.transport(uri(base));
    let queue_store = Arc::new(InMemoryQueueStore::new());
    let builder = register_test_types(BusBuilder::new(uri(base)))
        .transport(transport)
        .queue_store(queue_store.clone())
        .subscription_store(Arc::new(InMemorySubscriptionStore::new()));
    let bus = configure(builder).build().await.unwrap();
    (bus, queue_store)
}

#[tokio::test]
async fn send_reply_round_trip() {
    let network = InMemoryNetwork::new();

    let (_bus_b, _) = memory_bus(&network, "http://bus-b.test:1/", |b| {
        b.handle(
            MessageSpecification::Named(command_name()),
            typed_handler(|cmd: Arc<TestCommand>, ctx: Arc<MessageContext>| async move {
                ctx.acknowledge();
                ctx.send_last_reply(TestReply { echo: cmd.int_data }).await
            }),
        )
    })
    .await;

    let (bus_a, _) = memory_bus(&network, "http://bus-a.test:1/", |b| {
        b.endpoint(endpoint("b", "http://bus-b.test:1/")).send_rule(
            MessageSpecification::Named(command_name()),
            EndpointName::new("b").unwrap(),
        )
    })
    .await;

    let sent = bus_a.send(TestCommand::sample()).await.unwrap();
    let mut replies = sent.observe_replies();

    let reply = timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.downcast_ref::<TestReply>(), Some(&TestReply { echo: 42 }));
    // The handler marked its reply as the last one.
    assert!(timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn send_without_matching_rule_fails() {
    let network = InMemoryNetwork::new();
    let (bus, _) = memory_bus(&network, "http://bus-a.test:1/", |b| b).await;

    let err = bus.send(TestCommand::sample()).await.unwrap_err();
    assert!(matches!(err, BusError::NoEndpoints));
}

#[tokio::test]
async fn publish_to_undeclared_topic_fails() {
    let network = InMemoryNetwork::new();
    let (bus, _) = memory_bus(&network, "http://bus-a.test:1/", |b| b).await;

    let err = bus
        .publish(
            TestEvent {
                label: "x".to_string(),
            },
            &TopicName::new("nope").unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::TopicNotFound(_)));
}

#[tokio::test]
async fn unacknowledged_inline_dispatch_fails_the_send() {
    let network = InMemoryNetwork::new();

    let (_bus_b, _) = memory_bus(&network, "http://bus-b.test:1/", |b| {
        b.handle(
            MessageSpecification::Any,
            typed_handler(|_: Arc<TestCommand>, _ctx| async move {
                // Deliberately declines to acknowledge.
                Ok(())
            }),
        )
    })
    .await;

    let (bus_a, _) = memory_bus(&network, "http://bus-a.test:1/", |b| {
        b.endpoint(endpoint("b", "http://bus-b.test:1/"))
    })
    .await;

    let err = bus_a
        .send_to(TestCommand::sample(), &EndpointName::new("b").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NotAcknowledged));
}

#[tokio::test]
async fn critical_messages_are_queued_on_receive() {
    let network = InMemoryNetwork::new();
    let probe = Probe::new();
    let probe_handler = probe.clone();

    let (_bus_b, store_b) = memory_bus(&network, "http://bus-b.test:1/", |b| {
        b.handle(
            MessageSpecification::Named(command_name()),
            typed_handler(move |_: Arc<TestCommand>, ctx: Arc<MessageContext>| {
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

    let (bus_a, _) = memory_bus(&network, "http://bus-a.test:1/", |b| {
        b.endpoint(endpoint("b", "http://bus-b.test:1/"))
    })
    .await;

    bus_a
        .send_to_with(
            TestCommand::sample(),
            &EndpointName::new("b").unwrap(),
            SendOptions {
                importance: Importance::Critical,
                ..SendOptions::default()
            },
        )
        .await
        .unwrap();

    timeout(Duration::from_secs(5), probe.wait_for(1))
        .await
        .unwrap();

    // The message went through B's handler queue and reached the
    // acknowledged terminal state there.
    let handler_queue = QueueName::new("handler-0").unwrap();
    timeout(Duration::from_secs(5), async {
        loop {
            let records = store_b.records(&handler_queue);
            if records.iter().any(|r| r.is_acknowledged()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn journal_captures_sent_received_and_published() {
    let network = InMemoryNetwork::new();
    let journal_a = Arc::new(InMemoryJournal::new());
    let journal_b = Arc::new(InMemoryJournal::new());

    let journal_b_bus = journal_b.clone();
    let (_bus_b, _) = memory_bus(&network, "http://bus-b.test:1/", move |b| {
        b.journal(journal_b_bus)
            .handle(
                MessageSpecification::Any,
                typed_handler(|_: Arc<TestCommand>, ctx: Arc<MessageContext>| async move {
                    ctx.acknowledge();
                    Ok(())
                }),
            )
    })
    .await;

    let journal_a_bus = journal_a.clone();
    let (bus_a, _) = memory_bus(&network, "http://bus-a.test:1/", move |b| {
        b.journal(journal_a_bus)
            .endpoint(endpoint("b", "http://bus-b.test:1/"))
            .topic(TopicName::new("events").unwrap())
    })
    .await;

    bus_a
        .send_to(TestCommand::sample(), &EndpointName::new("b").unwrap())
        .await
        .unwrap();
    bus_a
        .publish(
            TestEvent {
                label: "e".to_string(),
            },
            &TopicName::new("events").unwrap(),
        )
        .await
        .unwrap();

    let categories_a: Vec<JournalCategory> =
        journal_a.entries().into_iter().map(|(c, _)| c).collect();
    assert!(categories_a.contains(&JournalCategory::Sent));
    assert!(categories_a.contains(&JournalCategory::Published));

    let categories_b: Vec<JournalCategory> =
        journal_b.entries().into_iter().map(|(c, _)| c).collect();
    assert!(categories_b.contains(&JournalCategory::Received));
}

#[tokio::test]
async fn disposed_bus_refuses_operations() {
    let network = InMemoryNetwork::new();
    let (bus, _) = memory_bus(&network, "http://bus-a.test:1/", |b| {
        b.topic(TopicName::new("events").unwrap())
    })
    .await;

    bus.shutdown().await;

    assert!(matches!(
        bus.send(TestCommand::sample()).await.unwrap_err(),
        BusError::Disposed
    ));
    assert!(matches!(
        bus.publish(
            TestEvent {
                label: "e".to_string()
            },
            &TopicName::new("events").unwrap()
        )
        .await
        .unwrap_err(),
        BusError::Disposed
    ));
    // A second shutdown is a no-op.
    bus.shutdown().await;
}
