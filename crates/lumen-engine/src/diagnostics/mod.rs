//! Diagnostics: the process-wide error catalogue, deterministic code
//! generation, and terminal rendering.

pub mod catalog;
pub mod codes;
pub mod render;

pub use catalog::{global_catalog, CatalogEntry, Diagnostic, ErrorCatalog, ErrorKind};
pub use codes::{generate_error_code, ErrorStage};
pub use render::{render_diagnostic, render_diagnostic_colored};
