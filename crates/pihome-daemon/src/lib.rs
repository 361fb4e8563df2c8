//! # pihome Daemon
//!
//! The long-lived pihome process. Three independent tasks share one
//! cancellation token and talk to each other only through the database:
//!
//! - the minute scheduler: a clock-driven producer feeding ticks through a
//!   bounded channel to a worker that runs [`pihome_jobs::SchedulerEngine`]
//! - the host statistics sampler
//! - the UDP discovery responder used by displays to find the server
//!
//! ```rust,ignore
//! use pihome_daemon::Daemon;
//!
//! let daemon = Daemon::new(config, store, registry);
//! daemon.run().await?;
//! ```

pub mod clock;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod scheduler;
pub mod signal;
pub mod stats;

pub use clock::{MinuteClock, duration_until_next_minute};
pub use daemon::{Daemon, TaskFailure};
pub use discovery::DiscoveryResponder;
pub use error::DaemonError;
pub use scheduler::{Scheduler, TickHandler};
pub use signal::SignalHandler;
pub use stats::{SampleStore, StatsSampler, SystemSample};

/// Re-exported so callers can build and cancel daemons without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
