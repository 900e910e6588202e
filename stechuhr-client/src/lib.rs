//! Portal Session Client Library
//!
//! This library automates time-clock punches against a legacy ASP.NET Web
//! Forms time-tracking portal by emulating a browser session: it fetches the
//! login page, extracts the hidden view-state tokens, posts the credentials,
//! tracks the session cookies, and posts booking actions.
//!
//! # Features
//!
//! - Full login handshake with view-state/view-state-generator tracking
//! - Arrival ("kommen") and departure ("gehen") bookings via hotkey postbacks
//! - Local guard against booking the same action twice in a row
//! - Secure TLS using rustls (no OpenSSL dependencies)
//! - Blocking synchronous API
//! - Well-typed errors using thiserror
//!
//! # Example
//!
//! ```no_run
//! use stechuhr_client::{BookingStatus, Credentials, PortalSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("jdoe", "secret");
//!
//! // Logs in and recovers the last booking state where possible
//! let mut session = PortalSession::establish("https://portal.example.com", &credentials)?;
//!
//! if session.last_booking() != BookingStatus::Arrived {
//!     session.arrive()?;
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod parser;

pub use client::{BookingAction, BookingStatus, Credentials, PortalSession, SessionBuilder};
pub use error::PortalError;
