//! Resource Monitoring Module
//!
//! Provides utilities for tracking what a batch costs while it runs.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage of the classifier process tree
//! - [`JobTimeline`]: time spent in each job state

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{JobTimeline, TimelineEvent};
