//! Opaque cursor and pagination envelope primitives.
//!
//! Keyset pagination walks an ordered collection by remembering the key of
//! the last row a client saw rather than an offset. This crate owns the
//! transport-facing half of that contract:
//!
//! - [`Cursor`] wraps any serialisable key and encodes it as an opaque,
//!   URL-safe token (base64 over JSON).
//! - [`Direction`] names which side of the cursor a page is read from.
//! - [`PageLimit`] clamps caller-supplied page sizes and exposes the
//!   `limit + 1` fetch size used to detect further rows.
//! - [`Paginated`] is the response envelope returned to callers.
//!
//! The crate is deliberately ignorant of what the key contains; callers
//! define their own key types with the ordering semantics they need.

mod cursor;
mod envelope;

pub use cursor::{Cursor, CursorError, Direction, DirectionParseError};
pub use envelope::{PageLimit, Paginated, split_lookahead};
