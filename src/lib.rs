pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod repository;
pub mod scope;
pub mod sinks;
pub mod tasks;
pub mod usecase;
