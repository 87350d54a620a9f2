pub mod builtin;
pub mod registry;

pub use registry::{Tool, ToolContext, ToolRegistry};
