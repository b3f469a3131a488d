//! Built-in job kinds and processors.

pub mod studio;

pub use studio::{StudioJob, StudioJobProcessor};
