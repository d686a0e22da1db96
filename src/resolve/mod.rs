//! Resolution subsystem.
//!
//! # Data Flow
//! ```text
//! (Defaults, Vec<InstanceSpec>)
//!     → resolver.rs (overlay overrides, merge by identity key)
//!     → Vec<ResolvedInstance> (one per user, first-appearance order)
//!     → identity.rs (collision audit)
//!     → Vec<CollisionReport> for logs, metrics and the admin API
//! ```
//!
//! # Design Decisions
//! - A fixed set of overridable fields, merged explicitly field by field
//! - Conflicting market types under one user fail the cycle unless aliasing is enabled
//! - Both steps are pure: same input, same output

pub mod identity;
pub mod resolver;

pub use identity::{validate, CollisionReport, IdentityKey};
pub use resolver::{is_unlimited, resolve, ResolutionError, ResolveOptions, ResolvedInstance, SpecOrigin};
