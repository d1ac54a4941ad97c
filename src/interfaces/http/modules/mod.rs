pub mod cloudcharge;
pub mod health;
pub mod metrics;
