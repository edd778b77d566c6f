//! Request handlers.

pub mod http;
pub mod websocket;

pub use http::{health_check, issue_ticket, online_users};
pub use websocket::websocket_handler;
