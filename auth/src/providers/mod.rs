//! Provider traits for everything the security core stores or calls.
//!
//! Providers are **interfaces**, not implementations. The components in
//! this crate depend on these traits; the application wires in concrete
//! stores.
//!
//! ```text
//! ┌─────────────────────┐        ┌──────────────────────────┐
//! │ Components          │        │ Implementations          │
//! │  RefreshTokenAuth.  │──uses─▶│  stores::* (Redis, PG)   │
//! │  MfaChallengeMgr.   │        │  mocks::*  (in-memory)   │
//! │  SessionEstablisher │        │  JwksIdentityProvider    │
//! └─────────────────────┘        └──────────────────────────┘
//! ```
//!
//! Every state transition a store exposes (rotate, consume, increment) is
//! a single atomic operation against the backing store. Implementations
//! must not split them into a read followed by a separate write.

pub mod audit;
pub mod challenge_store;
pub mod credential;
pub mod fingerprint;
pub mod identity;
pub mod identity_provider;
pub mod jwks;
pub mod rate_limiter;
pub mod refresh_token;
pub mod session;

pub use audit::{AuditQueryStore, AuditSink};
pub use challenge_store::{MfaChallenge, MfaChallengeStore};
pub use credential::CredentialRepository;
pub use fingerprint::FingerprintStore;
pub use identity::IdentityMappingCache;
pub use identity_provider::IdentityProvider;
pub use jwks::JwksIdentityProvider;
pub use rate_limiter::{AttemptCount, AttemptCounter};
pub use refresh_token::{RefreshRecord, RefreshTokenStore, RotateOutcome};
pub use session::AccessSessionStore;
