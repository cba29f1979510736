pub mod api;
pub mod config;
pub mod identity;
pub mod models;
pub mod storage;
