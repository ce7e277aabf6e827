//! Wire-contract limits, fixed at compile time.
//!
//! These caps bound the memory one connection can pin and are part of the
//! protocol surface: exceeding one yields the documented status code, not a
//! truncated request.

/// Longest accepted request line, in bytes. Exceeding it yields `414`.
pub const MAX_REQUEST_LINE_LEN: usize = 4096;

/// Longest accepted header line, in bytes. Exceeding it yields `431`.
pub const MAX_HEADER_LINE_LEN: usize = 8192;

/// Most header fields accepted on one request. Exceeding it yields `431`.
pub const MAX_HEADER_COUNT: usize = 100;

/// Cap on the whole head (request line through blank line). `431` beyond.
pub const MAX_HEADER_BYTES: usize = 16384;

/// Cap on a request body, fixed-length or chunked. `413` beyond.
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Hard ceiling on bytes a connection may hold unconsumed.
pub const MAX_REQUEST_BUFFER: usize = MAX_HEADER_BYTES + MAX_BODY_BYTES;

/// Listen backlog handed to the kernel.
pub const ACCEPT_BACKLOG: i32 = 128;
