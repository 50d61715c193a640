//! Wire protocol layer: message framing, frontend encoding, backend
//! decoding, and authentication responses.

pub mod auth;
pub mod encoder;
pub mod wire;

pub use encoder::PgEncoder;
pub use wire::{AuthRequest, BackendMessage, FieldDescription, TransactionStatus};
