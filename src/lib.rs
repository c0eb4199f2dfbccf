// Vitacache Offline Cache Engine Library

pub mod cache;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod store;
pub mod strategy;
pub mod sync;
