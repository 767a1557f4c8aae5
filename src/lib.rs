//! Authenticated request pipeline for the reading-platform client.
//!
//! [`client::ApiClient`] attaches bearer credentials from the
//! [`session::SessionStore`], and when the server answers 401 it runs a
//! single-flight token refresh shared by every request that failed at the
//! same time before replaying them.

pub mod auth;
pub mod client;
pub mod configuration;
pub mod error;
pub mod events;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use auth::{decode_claims, decode_identity, AccessClaims, Identity, IdentityUpdate, Role};
pub use client::{ApiClient, ApiRequest};
pub use error::{ApiError, DecodeError, SessionError, StorageError};
pub use events::{Alert, AlertKind, Event, EventBus, EventKind, SubscriptionId};
pub use session::{Navigator, SessionStore};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
