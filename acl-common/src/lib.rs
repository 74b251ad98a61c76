pub mod checkpoint;
pub mod health;
pub mod metrics;
pub mod notification;
