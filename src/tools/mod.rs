pub mod builtin;
pub mod handler;
pub mod registry;

pub use builtin::{ReadTool, SearchTool};
pub use handler::{ToolDef, ToolError, ToolHandler};
pub use registry::ToolRegistry;
