//! Mailpress: publish blog posts by email.
//!
//! A mail relay posts each inbound email to the webhook. The sender is
//! matched against the configured authors, image attachments are fetched,
//! and the rendered post lands on the blog's GitHub repository through a
//! branch-then-merge transaction.

pub mod attachments;
pub mod config;
pub mod error;
pub mod intake;
pub mod post;
pub mod publish;
pub mod server;
pub mod store;
