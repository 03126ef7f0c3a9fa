//! Annexure Service - groups vendor LRs into annexures and invoices them exactly once.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
pub mod store;
