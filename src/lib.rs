pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod http;
pub mod listing;
pub mod output;
pub mod providers;
pub mod scheduler;
pub mod store;
