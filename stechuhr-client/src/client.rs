//! Portal session client
//!
//! Emulates just enough of a browser to hold an authenticated ASP.NET Web
//! Forms session against the time-tracking portal: cookies, the two
//! view-state tokens, and sequential form postbacks.

use crate::error::PortalError;
use crate::parser::ResponseParser;
use reqwest::blocking::RequestBuilder;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Fixed per-request deadline
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Browser-like Accept header sent on every request
const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Name of the serialized page-state token
const VIEW_STATE: &str = "__VIEWSTATE";
/// Name of the view-state generator token
const VIEW_STATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";

/// Login page, also the target of the credentialed login postback
const LOGIN_PATH: &str = "Default.aspx";
/// Endpoint of the hotkey booking postback
const BOOKING_PATH: &str = "includes/checkworkflow.aspx";

/// Username/password pair used for the login postback
///
/// The password is zeroized when the credentials are dropped.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials from a username and a cleartext password
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A bookable time-clock action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    /// "kommen" punch
    Arrive,
    /// "gehen" punch
    Depart,
}

impl BookingAction {
    /// Numeric hotkey code the portal uses to select the action
    fn hotkey(self) -> u8 {
        match self {
            BookingAction::Arrive => 1,
            BookingAction::Depart => 2,
        }
    }

    /// The status a successful booking of this action leaves behind
    fn status(self) -> BookingStatus {
        match self {
            BookingAction::Arrive => BookingStatus::Arrived,
            BookingAction::Depart => BookingStatus::Departed,
        }
    }
}

impl fmt::Display for BookingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingAction::Arrive => f.write_str("arrival"),
            BookingAction::Depart => f.write_str("departure"),
        }
    }
}

/// Last booking recorded for the session
///
/// Seeded best-effort from the page returned by the login postback and
/// updated after every successful booking. `Unknown` never blocks a booking;
/// the portal itself is the authority on truly redundant punches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BookingStatus {
    /// No state could be recovered
    #[default]
    Unknown,
    /// Last punch was an arrival
    Arrived,
    /// Last punch was a departure
    Departed,
}

/// An authenticated portal session
///
/// Constructed through [`PortalSession::establish`] (or the [`SessionBuilder`]
/// for tests), which runs the full login handshake: fetch the login page to
/// seed cookies and postback tokens, then post the credentials. A session
/// that fails to establish is never returned, so every live `PortalSession`
/// can book immediately.
///
/// The session owns all mutable protocol state (cookie jar, view-state
/// tokens, last booking) and is meant to be driven from a single thread.
///
/// # Example
///
/// ```no_run
/// use stechuhr_client::{Credentials, PortalSession};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::new("jdoe", "secret");
/// let mut session = PortalSession::establish("https://portal.example.com", &credentials)?;
/// session.arrive()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PortalSession {
    client: reqwest::blocking::Client,
    base_url: Url,
    origin: HeaderValue,
    parser: ResponseParser,
    view_state: String,
    view_state_generator: String,
    last_booking: BookingStatus,
}

impl PortalSession {
    /// Establish a session against `base_url` with the given credentials
    ///
    /// Runs the two-step login sequence; any failure (unreachable site,
    /// missing view-state tokens, rejected credentials) aborts construction.
    pub fn establish(
        base_url: impl reqwest::IntoUrl,
        credentials: &Credentials,
    ) -> Result<Self, PortalError> {
        Self::builder().base_url(base_url)?.establish(credentials)
    }

    /// Create a builder for configuring the session transport
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Last booking as recovered at login or recorded by [`book`](Self::book)
    pub fn last_booking(&self) -> BookingStatus {
        self.last_booking
    }

    /// Book an arrival ("kommen") punch
    pub fn arrive(&mut self) -> Result<(), PortalError> {
        self.book(BookingAction::Arrive)
    }

    /// Book a departure ("gehen") punch
    pub fn depart(&mut self) -> Result<(), PortalError> {
        self.book(BookingAction::Depart)
    }

    /// Book the given action on the portal
    ///
    /// Rejected locally with [`PortalError::RedundantBooking`], before any
    /// network traffic, when the session already recorded the same action as
    /// its last booking. An `Unknown` last booking always passes the guard.
    ///
    /// On success the session's last booking is set to the performed action.
    pub fn book(&mut self, action: BookingAction) -> Result<(), PortalError> {
        if self.last_booking == action.status() {
            return Err(PortalError::RedundantBooking(action));
        }

        let hotkey = action.hotkey().to_string();
        let form = [
            ("__WPPS", "u"),
            ("__EVENTARGUMENT", ""),
            ("__EVENTTARGET", ""),
            (VIEW_STATE_GENERATOR, self.view_state_generator.as_str()),
            (VIEW_STATE, self.view_state.as_str()),
            ("HotKey_SI_KTO_NR", hotkey.as_str()),
        ];
        let request = self
            .client
            .post(self.url_for(BOOKING_PATH)?)
            .header(ORIGIN, self.origin.clone())
            .form(&form);

        // The booking endpoint does not render the hidden-field pair, so no
        // token refresh here.
        let (_, status) = send(request)?;
        if status != StatusCode::OK {
            return Err(PortalError::BookingFailed { status });
        }

        self.last_booking = action.status();
        debug!(%action, "booking recorded");
        Ok(())
    }

    /// Post the credentialed login form and recover the last booking state
    fn login(&mut self, credentials: &Credentials) -> Result<(), PortalError> {
        // Field set expected verbatim by the server-side widget framework.
        let form = [
            (
                "__EVENTTARGET",
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$btnApgLogin",
            ),
            ("__EVENTARGUMENT", "Click"),
            (VIEW_STATE, self.view_state.as_str()),
            (VIEW_STATE_GENERATOR, self.view_state_generator.as_str()),
            (
                "ctl00$Logininfo1$CheckPopupControlState",
                r#"{"windowsState":"0:0:-1:0:0:0:-10000:-10000:1:0:0:0"}"#,
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl",
                r#"{"activeTabIndex":0}"#,
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$UserName$State",
                r#"{"validationState":""}"#,
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$UserName",
                credentials.username.as_str(),
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$Password$State",
                r#"{"validationState":""}"#,
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$Password",
                credentials.password.as_str(),
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$PasswordRecovery$UserNameContainerID$UserName$State",
                r#"{"validationState":""}"#,
            ),
            (
                "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$PasswordRecovery$UserNameContainerID$UserName",
                "",
            ),
        ];
        let request = self
            .client
            .post(self.url_for(LOGIN_PATH)?)
            .header(ORIGIN, self.origin.clone())
            .form(&form);

        let (body, status) = send(request)?;
        if status != StatusCode::OK {
            return Err(PortalError::LoginRejected { status });
        }
        self.refresh_tokens(&body)?;

        // Best effort only: an unreadable timeline leaves the status Unknown.
        if let Some(state) = self.parser.last_booking_status(&body) {
            self.last_booking = state;
        }
        Ok(())
    }

    /// Re-seed the postback tokens from a freshly fetched page
    fn refresh_tokens(&mut self, body: &str) -> Result<(), PortalError> {
        self.view_state = self
            .parser
            .hidden_field(body, VIEW_STATE)
            .map_err(|_| PortalError::MissingToken { field: VIEW_STATE })?
            .to_owned();
        self.view_state_generator = self
            .parser
            .hidden_field(body, VIEW_STATE_GENERATOR)
            .map_err(|_| PortalError::MissingToken {
                field: VIEW_STATE_GENERATOR,
            })?
            .to_owned();
        Ok(())
    }

    fn url_for(&self, path: &str) -> Result<Url, PortalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortalError::ClientInit("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }
}

/// Execute a request and return its body and status
fn send(request: RequestBuilder) -> Result<(String, StatusCode), PortalError> {
    let response = request.send()?;
    let status = response.status();
    // The deadline also covers reading the body.
    let body = response.text().map_err(|err| {
        if err.is_timeout() {
            PortalError::Timeout
        } else {
            PortalError::Encoding
        }
    })?;
    Ok((body, status))
}

/// Builder for configuring the session transport
///
/// The base URL is mandatory. A custom `reqwest::blocking::ClientBuilder` can
/// be supplied (proxies, TLS settings, ...); the cookie store, the 5 second
/// deadline and the browser `Accept` header are always applied on top, since
/// the portal's session handling depends on them.
///
/// # Example
///
/// ```no_run
/// use stechuhr_client::{Credentials, PortalSession};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = PortalSession::builder()
///     .base_url("http://localhost:1234")?
///     .establish(&Credentials::new("jdoe", "secret"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionBuilder {
    base_url: Option<Url>,
    client_builder: Option<reqwest::blocking::ClientBuilder>,
}

impl SessionBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            base_url: None,
            client_builder: None,
        }
    }

    /// Set the portal base URL, the root of all request paths
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn base_url(mut self, url: impl reqwest::IntoUrl) -> Result<Self, PortalError> {
        self.base_url = Some(url.into_url()?);
        Ok(self)
    }

    /// Set a custom HTTP client builder
    pub fn client_builder(mut self, builder: reqwest::blocking::ClientBuilder) -> Self {
        self.client_builder = Some(builder);
        self
    }

    /// Build the transport and run the login sequence
    ///
    /// # Errors
    ///
    /// * [`PortalError::ClientInit`] - no base URL, or the HTTP client cannot
    ///   be initialized
    /// * [`PortalError::LoginPage`] - the login page did not answer with 200
    /// * [`PortalError::MissingToken`] - a fetched page lacks the view-state
    ///   tokens
    /// * [`PortalError::LoginRejected`] - the credentialed postback did not
    ///   answer with 200
    pub fn establish(self, credentials: &Credentials) -> Result<PortalSession, PortalError> {
        let base_url = self
            .base_url
            .ok_or_else(|| PortalError::ClientInit("base URL is required".to_string()))?;
        let origin = HeaderValue::from_str(&base_url.origin().ascii_serialization())
            .map_err(|_| PortalError::ClientInit("base URL has no usable origin".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let builder = self
            .client_builder
            .unwrap_or_else(|| reqwest::blocking::Client::builder().use_rustls_tls());
        let client = builder
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| PortalError::ClientInit(e.to_string()))?;

        let mut session = PortalSession {
            client,
            base_url,
            origin,
            parser: ResponseParser::new(),
            view_state: String::new(),
            view_state_generator: String::new(),
            last_booking: BookingStatus::Unknown,
        };

        // Step 1: fetch the login page to seed cookies and postback tokens.
        let request = session.client.get(session.url_for(LOGIN_PATH)?);
        let (body, status) = send(request)?;
        if status != StatusCode::OK {
            return Err(PortalError::LoginPage { status });
        }
        session.refresh_tokens(&body)?;

        // Step 2: the credentialed postback.
        session.login(credentials)?;

        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const VS: &str = "dDwtMTg3oTk1MzQ7Oz4=";
    const GEN: &str = "CA0B0334";

    fn tokens(view_state: &str, generator: &str) -> String {
        format!(
            r#"<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="{view_state}" /><input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="{generator}" />"#
        )
    }

    fn login_page() -> String {
        format!("<html><body><form>{}</form></body></html>", tokens(VS, GEN))
    }

    fn landing_page(tooltip: Option<&str>) -> String {
        let timeline = tooltip
            .map(|t| {
                format!(
                    r#"<td onmouseover="return overlib('{t}', CAPTION, 'Buchung')"><img id="Zeitleiste" /></td>"#
                )
            })
            .unwrap_or_default();
        format!(
            "<html><body><form>{}{}</form></body></html>",
            tokens("dDwtNzc3oAAAMzQ7Oz4=", GEN),
            timeline
        )
    }

    fn establish(server: &mockito::Server) -> PortalSession {
        PortalSession::builder()
            .base_url(server.url())
            .unwrap()
            .establish(&Credentials::new("jdoe", "secret"))
            .unwrap()
    }

    fn mock_login(server: &mut mockito::Server, tooltip: Option<&str>) -> (mockito::Mock, mockito::Mock) {
        let page = server
            .mock("GET", "/Default.aspx")
            .with_status(200)
            .with_body(login_page())
            .create();
        let login = server
            .mock("POST", "/Default.aspx")
            .with_status(200)
            .with_body(landing_page(tooltip))
            .create();
        (page, login)
    }

    #[test]
    fn establish_runs_the_login_handshake() {
        let mut server = mockito::Server::new();

        let page = server
            .mock("GET", "/Default.aspx")
            .with_status(200)
            .with_header("set-cookie", "ASP.NET_SessionId=abc123; path=/")
            .with_body(login_page())
            .expect(1)
            .create();
        // The login postback must echo the seeded tokens, carry the session
        // cookie from the first response, and send the credentials.
        let login = server
            .mock("POST", "/Default.aspx")
            .match_header("cookie", Matcher::Regex("ASP\\.NET_SessionId=abc123".into()))
            .match_header("origin", server.url().as_str())
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("__VIEWSTATE".into(), VS.into()),
                Matcher::UrlEncoded("__VIEWSTATEGENERATOR".into(), GEN.into()),
                Matcher::UrlEncoded(
                    "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$UserName".into(),
                    "jdoe".into(),
                ),
                Matcher::UrlEncoded(
                    "ctl00$ContentPlaceHolder1$PanelLogin$PageControl$Login1$Password".into(),
                    "secret".into(),
                ),
            ]))
            .with_status(200)
            .with_body(landing_page(None))
            .expect(1)
            .create();

        let session = establish(&server);
        assert_eq!(session.last_booking(), BookingStatus::Unknown);
        // Tokens were refreshed from the login response, not the login page.
        assert_eq!(session.view_state, "dDwtNzc3oAAAMzQ7Oz4=");

        page.assert();
        login.assert();
    }

    #[test]
    fn establish_fails_when_site_is_unreachable() {
        let mut server = mockito::Server::new();
        let _page = server
            .mock("GET", "/Default.aspx")
            .with_status(503)
            .create();

        let result = PortalSession::builder()
            .base_url(server.url())
            .unwrap()
            .establish(&Credentials::new("jdoe", "secret"));

        match result.unwrap_err() {
            PortalError::LoginPage { status } => assert_eq!(status.as_u16(), 503),
            other => panic!("expected LoginPage, got {other:?}"),
        }
    }

    #[test]
    fn establish_fails_without_view_state() {
        let mut server = mockito::Server::new();
        let _page = server
            .mock("GET", "/Default.aspx")
            .with_status(200)
            .with_body("<html><body>maintenance</body></html>")
            .create();

        let result = PortalSession::builder()
            .base_url(server.url())
            .unwrap()
            .establish(&Credentials::new("jdoe", "secret"));

        match result.unwrap_err() {
            PortalError::MissingToken { field } => assert_eq!(field, "__VIEWSTATE"),
            other => panic!("expected MissingToken, got {other:?}"),
        }
    }

    #[test]
    fn establish_fails_when_login_is_rejected() {
        let mut server = mockito::Server::new();
        let _page = server
            .mock("GET", "/Default.aspx")
            .with_status(200)
            .with_body(login_page())
            .create();
        let _login = server
            .mock("POST", "/Default.aspx")
            .with_status(401)
            .create();

        let result = PortalSession::builder()
            .base_url(server.url())
            .unwrap()
            .establish(&Credentials::new("jdoe", "wrong"));

        match result.unwrap_err() {
            PortalError::LoginRejected { status } => assert_eq!(status.as_u16(), 401),
            other => panic!("expected LoginRejected, got {other:?}"),
        }
    }

    #[test]
    fn login_recovers_arrived_state_from_tooltip() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, Some("KO-1234"));

        let session = establish(&server);
        assert_eq!(session.last_booking(), BookingStatus::Arrived);
    }

    #[test]
    fn login_recovers_departed_state_from_tooltip() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, Some("GE 17:03"));

        let session = establish(&server);
        assert_eq!(session.last_booking(), BookingStatus::Departed);
    }

    #[test]
    fn booking_posts_the_hotkey_form() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, None);
        let booking = server
            .mock("POST", "/includes/checkworkflow.aspx")
            .match_header("origin", server.url().as_str())
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("__WPPS".into(), "u".into()),
                Matcher::UrlEncoded("__EVENTTARGET".into(), "".into()),
                Matcher::UrlEncoded("__EVENTARGUMENT".into(), "".into()),
                Matcher::UrlEncoded("__VIEWSTATE".into(), "dDwtNzc3oAAAMzQ7Oz4=".into()),
                Matcher::UrlEncoded("__VIEWSTATEGENERATOR".into(), GEN.into()),
                Matcher::UrlEncoded("HotKey_SI_KTO_NR".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body("<html><body>ok</body></html>")
            .expect(1)
            .create();

        let mut session = establish(&server);
        session.arrive().unwrap();
        assert_eq!(session.last_booking(), BookingStatus::Arrived);

        booking.assert();
    }

    #[test]
    fn redundant_booking_never_reaches_the_network() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, Some("KO-0815"));
        let booking = server
            .mock("POST", "/includes/checkworkflow.aspx")
            .expect(0)
            .create();

        let mut session = establish(&server);
        match session.arrive().unwrap_err() {
            PortalError::RedundantBooking(action) => assert_eq!(action, BookingAction::Arrive),
            other => panic!("expected RedundantBooking, got {other:?}"),
        }

        booking.assert();
    }

    #[test]
    fn bookings_walk_the_state_machine() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, None);
        let booking = server
            .mock("POST", "/includes/checkworkflow.aspx")
            .with_status(200)
            .with_body("ok")
            .expect(2)
            .create();

        let mut session = establish(&server);
        assert_eq!(session.last_booking(), BookingStatus::Unknown);

        session.arrive().unwrap();
        assert_eq!(session.last_booking(), BookingStatus::Arrived);

        assert!(matches!(
            session.arrive(),
            Err(PortalError::RedundantBooking(BookingAction::Arrive))
        ));

        session.depart().unwrap();
        assert_eq!(session.last_booking(), BookingStatus::Departed);

        booking.assert();
    }

    #[test]
    fn failed_booking_keeps_the_previous_state() {
        let mut server = mockito::Server::new();
        let _login = mock_login(&mut server, None);
        let _booking = server
            .mock("POST", "/includes/checkworkflow.aspx")
            .with_status(500)
            .create();

        let mut session = establish(&server);
        match session.depart().unwrap_err() {
            PortalError::BookingFailed { status } => assert_eq!(status.as_u16(), 500),
            other => panic!("expected BookingFailed, got {other:?}"),
        }
        assert_eq!(session.last_booking(), BookingStatus::Unknown);
    }

    #[test]
    fn unanswered_request_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        // Hold the connection open past the 5s deadline without answering.
        let server = std::thread::spawn(move || {
            let conn = listener.accept();
            std::thread::sleep(Duration::from_secs(6));
            drop(conn);
        });

        let result = PortalSession::builder()
            .base_url(format!("http://{addr}"))
            .unwrap()
            .establish(&Credentials::new("jdoe", "secret"));

        assert!(matches!(result.unwrap_err(), PortalError::Timeout));
        server.join().unwrap();
    }

    #[test]
    fn builder_requires_a_base_url() {
        let result = PortalSession::builder().establish(&Credentials::new("jdoe", "secret"));
        assert!(matches!(result, Err(PortalError::ClientInit(_))));
    }

    #[test]
    fn builder_rejects_invalid_base_url() {
        assert!(PortalSession::builder().base_url("not a url").is_err());
    }
}
