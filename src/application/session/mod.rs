pub mod device_session;
pub mod registry;
pub mod sweeper;

pub use device_session::{Outbound, OutboundReceiver, OutboundSender, Session, SessionError};
pub use registry::{
    EvictionListener, EvictionReason, RegistryError, RegistryLimits, RegistryStats,
    SessionRegistry, SharedSessionRegistry,
};
pub use sweeper::{SessionSweeper, SweeperConfig, SweeperHandle};
