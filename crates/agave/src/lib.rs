//! Agave sender for combaine.
//!
//! Results are repacked into `name:value` points grouped by subgroup
//! ([`common::subgroup_name`]); each subgroup becomes one graph update
//! request, and all subgroups are sent concurrently.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod repack;
pub mod sender;

pub use config::AgaveConfig;
pub use error::AgaveError;
pub use repack::{repack, Repacked};
pub use sender::AgaveSender;
