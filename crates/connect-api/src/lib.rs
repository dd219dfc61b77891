pub mod auth;
pub mod convert;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod posts;
pub mod store;
pub mod uploads;
pub mod users;
