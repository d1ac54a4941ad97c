pub mod commands;
pub mod events;
pub mod handlers;
pub mod protocol;
pub mod session;

pub use commands::{CommandError, CommandSender, SharedCommandSender};
pub use events::{
    create_event_bus, EventBus, EventListener, EventSink, EventSubscriber, LoggingEventListener,
    SharedEventBus, SharedEventListener, SharedEventSink,
};
pub use handlers::{MessageDispatcher, SharedMessageDispatcher};
pub use protocol::{
    ProtocolError, ProtocolManager, ProtocolRequest, ProtocolResponse, ProtocolService,
    SharedProtocolManager,
};
pub use session::{Session, SessionRegistry, SharedSessionRegistry};
