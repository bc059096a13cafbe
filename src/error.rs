//! Error types.

use std::error::Error;
use std::fmt;
use std::io;

/// Errors reported by the RCU domain and containers.
///
/// Invariant violations (a full map table, a writer touching retired storage) are not
/// represented here: they panic.
///
/// RCU 域和容器报告的错误。
/// 不变量违规（哈希表已满、写入者访问已退休的存储）不在此表示：它们会 panic。
#[derive(Debug)]
pub enum RcuError {
    /// Keyed lookup on a key the map does not hold.
    KeyNotFound,
    /// Positional lookup past the end of the vector.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Length of the snapshot that was consulted.
        len: usize,
    },
    /// Insertion anywhere but the end, which would rewrite published elements.
    InsertPosition {
        /// The requested position.
        position: usize,
        /// Current length of the vector.
        len: usize,
    },
    /// A requested capacity does not fit in the address space.
    CapacityOverflow,
    /// The global allocator could not satisfy a request.
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The background purge thread could not be started.
    ThreadSpawn(io::Error),
}

impl fmt::Display for RcuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound => write!(f, "requested key not found"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::InsertPosition { position, len } => {
                write!(
                    f,
                    "cannot insert at position {position}: only appending at {len} keeps published elements intact"
                )
            }
            Self::CapacityOverflow => write!(f, "capacity overflow"),
            Self::AllocationFailed { size, align } => {
                write!(f, "allocation of {size} bytes (align {align}) failed")
            }
            Self::ThreadSpawn(err) => write!(f, "failed to spawn the purge thread: {err}"),
        }
    }
}

impl Error for RcuError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ThreadSpawn(err) => Some(err),
            _ => None,
        }
    }
}
