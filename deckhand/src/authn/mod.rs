//! Client authentication

pub mod user_token;
