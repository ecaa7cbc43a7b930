//! HTTP and WebSocket surface over the catalog services. The `satcat`
//! binary wires it to Postgres; tests drive the router directly.

pub mod api;
