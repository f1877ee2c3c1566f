use crate::config::ConfigError;
use fw_platform::DriverError;

/// Failures reported by every heap in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("out of memory")]
    OutOfMemory,
    #[error("no free run of the requested length")]
    OutOfBlocks,
    #[error("block is already free")]
    DoubleFree,
    #[error("address is not managed by this heap")]
    RegionNotFound,
    #[error("heap still holds live allocations")]
    NotEmpty,
    #[error("a heap is already registered for this region")]
    AlreadyExists,
    #[error("page driver failure: {0}")]
    MappingFailure(#[from] DriverError),
}
