//! Adapters for the domain ports: in-memory store scopes and the HTTP
//! payment gateway client.

pub mod in_memory;
pub mod payment_gateway;
