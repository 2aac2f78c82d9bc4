pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod janitor;
pub mod logging;
pub mod provider;
