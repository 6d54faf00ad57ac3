pub mod auth;
pub mod error_handling;

pub use auth::{verify_jwt, Claims, StreamUser, User};
