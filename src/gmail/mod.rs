//! Gmail API module
//!
//! Contains the OAuth authorization lifecycle, the loopback callback
//! listener, token storage, and the client for sending mail.

pub mod auth;
pub mod callback;
pub mod client;
pub mod credentials;
pub mod oauth;
pub mod token_store;
pub mod types;
pub mod utils;
