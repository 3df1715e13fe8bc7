//! Data Transfer Objects for REST response serialization.

pub mod webhook_dto;

pub use webhook_dto::*;
