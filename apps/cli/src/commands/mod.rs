//! CLI command implementations

pub mod layout;
pub mod run;

pub use layout::LayoutCommand;
pub use run::RunCommand;
