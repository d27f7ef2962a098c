pub mod health;
pub mod negotiate;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{
    health_handler, health_live_handler, health_ready_handler, list_connections, metrics_handler,
};
pub use negotiate::negotiate_handler;
pub use websocket::hub_websocket_handler;
