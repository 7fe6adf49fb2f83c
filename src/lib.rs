//! MailGuard: adaptive routing gateway for the mail server and AI scanner.

pub mod adapters;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod routing;
pub mod security;
pub mod store;
