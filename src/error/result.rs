//! Result type alias for lifecycle operations.

use super::link_error::LinkError;

/// Type alias for Results using [`LinkError`].
pub type LinkResult<T> = Result<T, LinkError>;
