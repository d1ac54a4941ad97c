//! Inbound OCPP message handling

pub mod dispatcher;
mod ocpp_v16;

pub use dispatcher::{
    Action, ActionCounters, DispatcherSettings, HandlerError, HandlerResult, MessageDispatcher,
    SharedMessageDispatcher, TransactionIds,
};
pub(crate) use ocpp_v16::{connector_status_key, pending_session_key, ACTIVE_TRANSACTION_KEY};
