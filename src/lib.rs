pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod sse;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use models::{Notification, NotificationKind, UserRole};
pub use sse::ConnectionRegistry;
