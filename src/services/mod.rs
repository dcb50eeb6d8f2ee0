//! Service container: wires every component into one `AppState` and owns
//! the background tasks' lifecycle.

mod container;

pub use container::ServiceContainer;
