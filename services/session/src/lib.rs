//! Session Service library.
//!
//! Issues, validates, rotates and revokes device-bound session credentials:
//! short-lived HS256 access tokens and single-use refresh tokens grouped
//! into token families held in a shared store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod identity;
pub mod instrument;
pub mod issuer;
pub mod jwt;
pub mod metrics;
pub mod refresh;
pub mod revocation;
pub mod service;
pub mod status_cache;
pub mod storage;
pub mod validator;

// Re-exports for convenience
pub use config::Config;
pub use device::{DeviceBinder, DeviceContext};
pub use error::{AuthError, ConfigError};
pub use events::{SecurityEvent, SecurityEventSink};
pub use identity::{HttpIdentityProvider, IdentityClaims, IdentityError, IdentityProvider};
pub use issuer::{AuthResult, TokenIssuer, TokenPair};
pub use jwt::Claims;
pub use refresh::{FamilyStatus, RevocationReason, RotationCoordinator, TokenFamily};
pub use revocation::RevocationService;
pub use service::{SessionService, SessionServiceBuilder};
pub use storage::{CasOutcome, FamilyIndex, FamilyStore, StoreError};
pub use validator::TokenValidator;
