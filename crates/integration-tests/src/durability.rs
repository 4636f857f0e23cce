//! Durable-send recovery: messages enqueued while the destination is down
//! survive a process restart and are delivered exactly once each.

use crate::harness::{command_name, register_test_types, Probe, TestCommand};
use courier_bus::testing::InMemorySubscriptionStore;
use courier_bus::{
    typed_handler, BusBuilder, MessageContext, MessageSpecification, QueueOptions, SendOptions,
};
use courier_http::{
    AllowAnonymous, HttpServer, HttpServerConfig, HttpTransport, HttpTransportConfig, ServerState,
};
use courier_store::FsQueueStore;
use courier_types::{Endpoint, EndpointName, QueuedMessage};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Reserve a loopback port by binding and immediately releasing it.
async fn reserve_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Read every persisted record of a queue directly off disk.
fn read_queue_records(root: &Path, queue: &str) -> Vec<QueuedMessage> {
    let dir = root.join(queue);
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "json") {
            let bytes = std::fs::read(&path).unwrap();
            records.push(serde_json::from_slice(&bytes).unwrap());
        }
    }
    records
}

/// Build a sender bus over a filesystem queue store, addressed at a
/// destination that may not be up yet.
async fn start_sender(store_root: &Path, destination: &Url) -> crate::harness::HttpBus {
    let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default()).unwrap());
    let server = HttpServer::start(
        HttpServerConfig::default(),
        ServerState::new(transport.clone(), Arc::new(AllowAnonymous)),
    )
    .await
    .unwrap();
    let base_uri = server.base_uri().unwrap();

    let queue_store = Arc::new(FsQueueStore::open(store_root).unwrap());
    let bus = register_test_types(BusBuilder::new(base_uri))
        .transport(transport.clone())
        .queue_store(queue_store)
        .subscription_store(Arc::new(InMemorySubscriptionStore::new()))
        .endpoint(Endpoint::new(
            EndpointName::new("b").unwrap(),
            destination.clone(),
            None,
        ))
        .send_rule(
            MessageSpecification::Named(command_name()),
            EndpointName::new("b").unwrap(),
        )
        .outbound_options(QueueOptions {
            max_attempts: 200,
            retry_delay: Duration::from_millis(25),
            ..QueueOptions::default()
        })
        .build()
        .await
        .unwrap();

    crate::harness::HttpBus {
        bus,
        server,
        transport,
        // The harness field carries the in-memory store; durable tests
        // assert against the filesystem directly instead.
        queue_store: Arc::new(courier_bus::testing::InMemoryQueueStore::new()),
    }
}

#[tokio::test]
async fn durable_sends_survive_restart_and_deliver_once() {
    let store_dir = tempfile::tempdir().unwrap();
    let destination_addr = reserve_port().await;
    let destination = Url::parse(&format!("http://{destination_addr}/")).unwrap();

    // First process lifetime: enqueue three durable sends while the
    // destination is down, then die without delivering.
    let mut sent_ids = Vec::new();
    {
        let sender = start_sender(store_dir.path(), &destination).await;
        for n in 0..3 {
            let sent = sender
                .bus
                .send_with(
                    TestCommand {
                        int_data: n,
                        ..TestCommand::sample()
                    },
                    SendOptions {
                        durable: true,
                        ..SendOptions::default()
                    },
                )
                .await
                .unwrap();
            sent_ids.push(sent.message_id());
        }
        sender.stop().await;
    }
    // Let the dispatcher tasks of the first lifetime finish releasing the
    // store lock before the "restarted process" opens the same root.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The multiset of non-terminal records equals what was persisted.
    {
        let records = read_queue_records(store_dir.path(), "outbound");
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| !r.is_terminal()));
    }

    // Second process lifetime: recovery replays the pending records.
    let sender = start_sender(store_dir.path(), &destination).await;

    // The destination comes up and acknowledges everything it sees.
    let probe = Probe::new();
    let probe_handler = probe.clone();
    let receiver_transport =
        Arc::new(HttpTransport::new(HttpTransportConfig::default()).unwrap());
    let receiver_server = HttpServer::start(
        HttpServerConfig {
            bind_addr: destination_addr,
        },
        ServerState::new(receiver_transport.clone(), Arc::new(AllowAnonymous)),
    )
    .await
    .unwrap();
    let receiver_bus = register_test_types(BusBuilder::new(destination.clone()))
        .transport(receiver_transport)
        .queue_store(Arc::new(courier_bus::testing::InMemoryQueueStore::new()))
        .subscription_store(Arc::new(InMemorySubscriptionStore::new()))
        .handle(
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
        .build()
        .await
        .unwrap();

    timeout(Duration::from_secs(15), probe.wait_for(3))
        .await
        .expect("all three recovered messages delivered");

    // Exactly one acknowledgement record per message.
    timeout(Duration::from_secs(15), async {
        loop {
            let records = read_queue_records(store_dir.path(), "outbound");
            if records.iter().filter(|r| r.is_acknowledged()).count() == 3 {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .map(|records| {
        assert_eq!(records.len(), 3);
        for id in &sent_ids {
            let matching: Vec<_> = records
                .iter()
                .filter(|r| r.message.headers().message_id() == Some(*id))
                .collect();
            assert_eq!(matching.len(), 1, "one record per sent message");
            assert!(matching[0].is_acknowledged());
            assert!(matching[0].abandoned_at.is_none());
        }
    })
    .expect("all records acknowledged");

    assert_eq!(probe.count(), 3, "each message delivered exactly once");

    receiver_bus.shutdown().await;
    receiver_server.shutdown().await;
    sender.stop().await;
}
