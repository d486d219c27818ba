//! Public API: envelope normalization, attachment resolution, group state,
//! device provisioning and account registration.

pub mod account;
pub mod attachments;
pub mod collaborators;
pub mod config;
pub mod groups;
pub mod normalizer;
pub mod provisioning;
pub mod types;
