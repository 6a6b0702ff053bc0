//! mining-policy: ranking strategies for credit mining swarms.
//!
//! A [`Policy`] turns the set of loaded swarms into a preference order.
//! The selector interleaves the orders of several policies, so each one
//! only has to express its own bias:
//!
//! ```text
//! UploadPolicy  ── most seeding bytes first (exploit)
//! RandomPolicy  ── fresh uniform shuffle every tick (explore)
//! ```
//!
//! Policies never touch the engine; they only read [`SwarmRecord`]s.
//!
//! [`SwarmRecord`]: mining_core::SwarmRecord

pub mod policy;

pub use policy::{default_policies, Policy, RandomPolicy, UploadPolicy};
