pub mod api;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod executor;
pub mod query;
pub mod runner;
pub mod store;
pub mod util;
pub mod worker;
