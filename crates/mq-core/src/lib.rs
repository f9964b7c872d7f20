use std::{error, fmt, result};

pub mod clock;

pub type Result<T> = result::Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    BadCapacity(usize),
    LockError,
    Internal(&'static str),
    Shutdown,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::BadCapacity(cap) => write!(f, "bad capacity {}", cap),
            QueueError::LockError => write!(f, "lock failed"),
            QueueError::Internal(what) => write!(f, "internal fault: {}", what),
            QueueError::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl error::Error for QueueError {}
