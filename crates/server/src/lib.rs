//! HTTP front-end for the chainpool RPC pool.

pub mod routes;
