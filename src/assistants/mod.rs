pub mod assistants;
pub use assistants::*;

pub mod aggregate;
pub mod events;
pub mod messages;
pub mod run_steps;
pub mod runs;
pub mod stream;
pub mod threads;
pub mod vector_stores;
