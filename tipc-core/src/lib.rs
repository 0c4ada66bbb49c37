//! # tipc-core
//!
//! Foundation shared by the TIPC socket crates: the error taxonomy, the
//! readiness reactor adapter that turns nonblocking primitives into
//! deadline-bounded async operations, and networking configuration.

pub mod config;
pub mod error;
pub mod reactor;

pub use config::{ConfigError, EnvOverride, NetConfig, Scope};
pub use error::{Error, ErrorCode, Result};
pub use reactor::{Direction, PollEvented, ReactorFd, Readiness};
#[cfg(any(test, feature = "test-util"))]
pub use reactor::ManualReadiness;

pub mod prelude {
    //! Common imports for TIPC applications

    pub use crate::config::{NetConfig, Scope};
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::reactor::{Direction, ReactorFd};
}
