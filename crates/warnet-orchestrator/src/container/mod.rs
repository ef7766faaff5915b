//! Container specifications.

mod spec;

pub use spec::{NodeImage, ResourceLimits, ResourceProfile};
