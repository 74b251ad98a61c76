pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod source;
pub mod translator;
