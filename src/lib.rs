pub mod app;
pub mod manager;
pub mod models;
pub mod worker;
