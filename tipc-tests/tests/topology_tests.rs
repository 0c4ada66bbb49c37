//! End-to-end topology service scenarios

use std::time::Duration;

use futures::StreamExt;
use tipc_net::{Listener, ServiceRange, TipcAddr};
use tipc_tests::require_tipc;
use tipc_topology::{ClientState, EventKind, Filter, TopologyClient, WAIT_FOREVER};
use tokio::time::timeout;

#[tokio::test]
async fn test_subscribe_reports_requested_range() {
    require_tipc!();

    let client = TopologyClient::connect(0).await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);

    let sub = client
        .subscribe(ServiceRange::new(18888, 17, 17), 1000, Filter::SERVICE)
        .await
        .unwrap();
    assert_eq!(client.state(), ClientState::Subscribed);

    let event = timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("no topology event")
        .unwrap();
    assert_eq!(event.lower, 17);
    assert_eq!(event.upper, 17);
    assert_eq!(event.subscription.range, sub.range);

    client.close().unwrap();
    assert_eq!(client.state(), ClientState::Disconnected);
}

#[tokio::test]
async fn test_publish_and_withdraw_events() {
    require_tipc!();

    let client = TopologyClient::connect(0).await.unwrap();
    client
        .subscribe(ServiceRange::new(18889, 0, 100), WAIT_FOREVER, Filter::PORTS)
        .await
        .unwrap();

    let listener = Listener::bind(&TipcAddr::service(18889, 42)).unwrap();
    let bound = listener.addr().unwrap();

    let mut events = Box::pin(client.events());
    let published = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no publish event")
        .unwrap()
        .unwrap();
    assert_eq!(published.kind, EventKind::Published);
    assert_eq!((published.lower, published.upper), (42, 42));
    assert_eq!(published.port, bound);

    listener.close().unwrap();
    let withdrawn = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no withdraw event")
        .unwrap()
        .unwrap();
    assert_eq!(withdrawn.kind, EventKind::Withdrawn);
    assert_eq!(withdrawn.port, bound);
}
