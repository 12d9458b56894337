pub mod api;
pub mod handlers;
mod models;
mod service;
mod store;

pub use handlers::router;
pub use service::{UserProfile, UserService, Users};

#[cfg(test)]
pub use models::create_test_user;
