pub mod config;
pub mod crud;
pub mod database;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod schema;
pub mod state;
pub mod store;
