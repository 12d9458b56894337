pub mod api;
pub mod handlers;
mod models;
mod service;

pub use handlers::router;
pub use service::{ChatService, Chats};

#[cfg(test)]
pub use models::{Chat, ChatKind};
