use admission_policy_center::PolicyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("unknown admission plugin: {0}")]
    UnknownPlugin(String),
    #[error("admission plugin registered twice: {0}")]
    DuplicatePlugin(String),
    #[error("admission plugin {name} failed to initialize: {message}")]
    PluginInit { name: String, message: String },
}

pub type KernelResult<T> = Result<T, KernelError>;
