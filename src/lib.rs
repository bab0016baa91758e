//! # modcon
//!
//! Session & polling synchronization engine for a Modbus TCP management
//! console. The engine talks to a device bridge over HTTP, keeps a local
//! mirror of coil and register state, and runs two independent auto-poll
//! schedulers with single-flight overlap protection:
//!
//! - a register poll at a user-configurable cadence (1 s floor), and
//! - a coil poll at a fixed 2 s cadence started on connect.
//!
//! All mutable state lives in [`ConsoleEngine`]; consumers observe changes
//! through a broadcast [`events::EventBus`].

pub mod client;
pub mod coalesce;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod poll;
pub mod session;
pub mod store;

pub use client::{DeviceClient, DeviceStatus, HttpDeviceClient};
pub use config::ConsoleConfig;
pub use engine::{ConsoleEngine, COIL_POLL_INTERVAL};
pub use error::{ConsoleError, RemoteError, Result};
pub use events::{EngineEvent, EventBus, Severity};
pub use session::{ConnState, ConnectionSnapshot, Endpoint};
pub use store::{CoilStateStore, RegisterSnapshot, RegisterWindow};
