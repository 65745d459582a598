//! Refresh token families and the rotation state machine.

pub mod family;
pub mod generator;
pub mod rotator;

pub use family::{FamilyStatus, RevocationReason, TokenFamily};
pub use generator::RefreshTokenGenerator;
pub use rotator::RotationCoordinator;
