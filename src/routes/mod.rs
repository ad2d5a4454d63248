//! Router Module Index
//!
//! Routes are grouped by the access they require. Every group is wrapped in
//! its own `middleware::guard` layer, so access control is declared once per
//! group and cannot be forgotten on a single handler.

/// Routes open to anyone: banner, health and the token endpoints.
pub mod public;

/// Routes for any authenticated role. Ownership rules are checked in the handlers.
pub mod authenticated;

/// Routes restricted to the `admin` role.
pub mod admin;
