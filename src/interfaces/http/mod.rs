//! HTTP surface
//!
//! - `common`: response envelope and the validating JSON extractor
//! - `modules`: CloudCharge endpoints, health, Prometheus metrics
//! - `router`: route table and OpenAPI document

pub mod common;
pub mod modules;
pub mod router;

pub use router::{create_api_router, ApiDoc, ApiState};
