// Data models for the request/response envelope

pub mod request;

pub use request::{ApiResponse, RequestDescriptor};
