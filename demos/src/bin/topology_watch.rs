//! Print topology events for a service range until interrupted
//!
//! Usage: topology_watch <type> [lower] [upper]

use std::env;

use futures::StreamExt;
use tipc_core::prelude::*;
use tipc_net::ServiceRange;
use tipc_topology::{Filter, TopologyClient, WAIT_FOREVER};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn arg(index: usize, default: u32) -> Result<u32> {
    match env::args().nth(index) {
        Some(value) => value
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("not a number: {}", value))),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service_type = arg(1, 1000)?;
    let lower = arg(2, 0)?;
    let upper = arg(3, u32::MAX)?;

    let client = TopologyClient::connect_default().await?;
    let sub = client
        .subscribe(ServiceRange::new(service_type, lower, upper), WAIT_FOREVER, Filter::PORTS)
        .await?;
    info!(range = %sub.range, "watching");

    let mut events = Box::pin(client.events());
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => info!(%event, "topology"),
                Some(Err(e)) => {
                    warn!("topology stream failed: {}", e);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    drop(events);
    client.cancel(&sub).await?;
    client.close()
}
