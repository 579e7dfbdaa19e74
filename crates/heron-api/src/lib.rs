pub mod auth;
pub mod comments;
pub mod conversations;
pub mod error;
pub mod follows;
pub mod messages;
pub mod middleware;
