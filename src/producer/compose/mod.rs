//! Composite producers built from other producers

pub mod delegating;
pub mod level_stack;

pub use delegating::DelegatingProducer;
pub use level_stack::LevelStackProducer;
