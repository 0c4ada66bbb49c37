//! Shared helpers for the kernel-backed test suites

use std::sync::Once;

use socket2::{Domain, Socket, Type};
use tipc_net::AF_TIPC;
use tracing::warn;

/// Whether this host can create TIPC sockets (module loaded, family enabled)
pub fn tipc_available() -> bool {
    match Socket::new(Domain::from(i32::from(AF_TIPC)), Type::SEQPACKET, None) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "AF_TIPC unavailable, skipping kernel-backed test");
            false
        }
    }
}

/// Install a test-friendly subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Early-return from a test when the host lacks TIPC support
#[macro_export]
macro_rules! require_tipc {
    () => {
        $crate::init_tracing();
        if !$crate::tipc_available() {
            eprintln!("skipping: AF_TIPC is not available on this host");
            return;
        }
    };
}
