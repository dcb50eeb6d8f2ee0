//! Small, widely-shared helpers that don't belong to any one component.

pub mod fs;
