pub mod dto;
pub mod handlers;

pub use dto::CloudChargeRequest;
pub use handlers::CloudChargeState;
