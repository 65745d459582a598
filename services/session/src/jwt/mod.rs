//! Access token claims and HS256 serialization.

pub mod claims;
pub mod serializer;

pub use claims::Claims;
pub use serializer::JwtSerializer;
