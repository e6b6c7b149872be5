//! Domain services behind the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own request normalization, the chat pipeline, and reply
//! persistence so route handlers can stay focused on protocol translation
//! and auth plumbing.

pub mod chat;
pub mod classify;
pub mod collector;
pub mod history;
pub mod normalize;
pub mod split;
