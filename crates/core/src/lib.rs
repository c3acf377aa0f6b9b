//! `taskforge-core`: identifiers and error types shared by every taskforge crate.
//!
//! This crate contains no I/O and no policy; it only names things.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{OrganizationId, UserId};
