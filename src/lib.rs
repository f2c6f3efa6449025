pub mod accounting;
pub mod audit;
pub mod config;
pub mod controller;
pub mod error;
pub mod hierarchy;
pub mod jobs;
pub mod relay;
pub mod request;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod worker;
