// AMP, the signed-envelope messaging protocol (version amp/0.1).
// Addresses, envelopes, API-key auth, registration, the central router and
// cross-provider federation delivery.

pub mod address;
pub mod auth;
pub mod envelope;
pub mod federation;
pub mod register;
pub mod router;
