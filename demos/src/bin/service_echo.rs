//! Echo server bound to a TIPC service address, with a client in the same
//! process talking to it by name

use std::env;

use tipc_core::prelude::*;
use tipc_net::{dial_service, Listener, ServiceAddress, TipcAddr};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service_type: u32 = env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()
        .map_err(|e| Error::InvalidArgument(format!("Invalid service type: {}", e)))?
        .unwrap_or(1000);

    let config = NetConfig::from_env()?;
    let addr = TipcAddr::Service {
        addr: ServiceAddress::new(service_type, 1),
        scope: config.default_scope,
    };
    let listener = Listener::bind_with(&addr, tipc_net::SocketKind::Stream, &config)?;
    info!(%addr, local = %listener.addr()?, "echo service bound");

    let server = tokio::spawn(async move {
        let conn = listener.accept().await?;
        info!(%conn, "client connected");

        let mut buf = [0u8; 1024];
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            conn.write(&buf[..n]).await?;
        }
        conn.close()
    });

    let client = dial_service(service_type, 1).await?;
    for message in ["hello!", "how are you", "bye"] {
        client.write(message.as_bytes()).await?;
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await?;
        info!(reply = %String::from_utf8_lossy(&buf[..n]), "echoed");
    }
    client.close()?;

    match server.await {
        Ok(result) => result,
        Err(e) => {
            error!("echo task failed: {}", e);
            Err(Error::Internal(e.to_string()))
        }
    }
}
