//! Read-only status API over the published health table.

pub mod api;
mod server;

pub(crate) use server::serve;
