//! Synchronization primitives shared by every layer of the runtime.

mod completion;

pub use completion::Completion;
