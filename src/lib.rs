// Runtime configuration (environment-driven)
pub mod config;

// Installation model and token encryption at rest
pub mod credentials;

// Installation persistence
pub mod store;

// OAuth provider client and state codec
pub mod oauth;

// Token lifecycle manager (expiry, single-flight refresh)
pub mod broker;

// Upstream request forwarding
pub mod proxy;

// HTTP API
pub mod api;
