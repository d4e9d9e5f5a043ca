pub mod config;
pub mod invoker;

pub use config::{OperationConfig, ToolKind};
pub use invoker::{BackupInvoker, OperationInvoker};
