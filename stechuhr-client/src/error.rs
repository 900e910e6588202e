//! Error types for the portal client

use thiserror::Error;

/// Errors that can occur when talking to the time-tracking portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// Request exceeded the per-request deadline
    #[error("request timed out")]
    Timeout,

    /// Failed to decode response as UTF-8
    #[error("failed to decode response as UTF-8")]
    Encoding,

    /// A named hidden input field was not present in the page
    #[error("hidden input field {name:?} not found")]
    HiddenFieldNotFound {
        /// The `name` attribute that was searched for
        name: String,
    },

    /// A page that must carry the postback tokens did not
    #[error("response page is missing the {field} token")]
    MissingToken {
        /// Field name of the absent token
        field: &'static str,
    },

    /// The initial login-page fetch did not return 200
    #[error("unable to contact portal site (status {status})")]
    LoginPage {
        /// The status code that was received
        status: reqwest::StatusCode,
    },

    /// The credentialed login postback did not return 200
    #[error("login failed (status {status})")]
    LoginRejected {
        /// The status code that was received
        status: reqwest::StatusCode,
    },

    /// The last booking already recorded this action
    #[error("last booking was already {0}")]
    RedundantBooking(crate::BookingAction),

    /// The booking postback did not return 200
    #[error("booking failed (status {status})")]
    BookingFailed {
        /// The status code that was received
        status: reqwest::StatusCode,
    },

    /// Client initialization failed
    #[error("client initialization failed: {0}")]
    ClientInit(String),
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout
        } else {
            PortalError::Request(err)
        }
    }
}
