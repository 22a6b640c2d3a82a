//! Filesystem, template and tool-discovery helpers.

pub mod fs;
pub mod template;
pub mod tools;

pub use fs::ensure_dir_exists;
pub use template::TemplateProcessor;
pub use tools::ToolPaths;
