//! Application layer: the driver capability, admission control and
//! telemetry.
//!
//! Nothing here opens sockets or device files.  Drivers are handed in as
//! `Arc<dyn InputDriver>` and everything above them sees only the
//! [`Dispatcher`].

pub mod dispatch;
pub mod driver;
pub mod telemetry;

pub use dispatch::{AdmissionPolicy, Completion, DispatchError, Dispatcher, Job, Ticket};
pub use driver::{ConcurrencyClass, DriverCapabilities, DriverError, DriverKind, InputDriver};
pub use telemetry::{PhaseLatency, StatsSnapshot, Telemetry};
