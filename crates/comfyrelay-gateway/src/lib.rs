//! Comfyrelay Gateway - HTTP front end over the execution client

pub mod error;
pub mod request;
pub mod response;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, start_gateway, AppState};
