// Agent side of the pipeline: sample host and process gauges, ship them to the server

pub mod collector;
pub mod dispatcher;
pub mod metrics;
pub mod scheduler;
pub mod sender;

pub use collector::{Collector, Snapshot};
pub use dispatcher::{Dispatcher, SnapshotDelivery};
pub use scheduler::AgentScheduler;
pub use sender::{MetricsSender, SendError};
