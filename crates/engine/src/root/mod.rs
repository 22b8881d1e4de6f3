//! Root backend: a privileged shell, parsers for its text output, and the
//! executor that ties them together.

pub mod backend;
pub mod executor;
pub mod parser;
pub mod shell;

pub use backend::RootBackend;
pub use executor::RootShellExecutor;
pub use parser::MountPoint;
pub use shell::{shell_quote, CommandOutput, PrivilegedShell, SuShell};
