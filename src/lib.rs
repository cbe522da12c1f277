//! Aviary — a multi-channel social media bot orchestrator.
//!
//! One process, one shared AI responder, one adapter per platform. A
//! supervisor keeps the adapters alive: each gets one restart, then it
//! is retired so a flapping platform cannot thrash the process.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chat;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod microblog;
pub mod responder;
pub mod retry;
pub mod supervisor;
