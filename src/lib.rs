pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod media;
pub mod prompt;
pub mod providers;
pub mod rate_limit;
pub mod storage;
