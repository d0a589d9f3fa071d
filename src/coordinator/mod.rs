//! Coordinator side: the service and its HTTP router.

pub mod http;
pub mod service;

pub use http::{router, serve, serve_listener};
pub use service::CoordinatorService;
