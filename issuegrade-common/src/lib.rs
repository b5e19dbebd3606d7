//! # issuegrade common library
//!
//! Shared code for the issuegrade workspace:
//! - Error type
//! - Configuration file and folder resolution
//! - Event wire model and the subscription-indexed EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
