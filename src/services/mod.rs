//! Service layer for Tama.
//!
//! Contains business logic between the HTTP handlers and the database:
//! - Clock (injected time source)
//! - Quota (daily request admission)
//! - Auth (accounts and web sessions)
//! - Chat (LLM generation and transcript persistence)
//! - BlobStore (content-addressed upload storage)

mod auth;
mod blob_store;
mod chat;
mod clock;
mod quota;

pub use auth::{hash_password, normalize_email, verify_password, AuthService, MIN_PASSWORD_LENGTH};
pub use blob_store::{resolve_content_type, validate_upload, BlobStore, LocalBlobStore, StoredBlob};
pub use chat::{ChatService, StreamEvent};
pub use clock::{Clock, FixedClock, SystemClock};
pub use quota::{QuotaDecision, QuotaService, QuotaStatus};
