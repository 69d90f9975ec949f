//! Destino do backup: montagem, saúde e reserva exclusiva

pub mod lock;
pub mod monitor;
pub mod mounts;

pub use lock::SinkLock;
pub use monitor::HealthMonitor;
pub use mounts::{MountOps, RemoteMount, SystemMounts};
