//! HTML scraping for the two portal pages
//!
//! The portal renders classic ASP.NET Web Forms pages. Only two things are ever
//! read out of them: the hidden postback-token inputs and the tooltip of the
//! timeline cell that carries the last booking state.

use crate::BookingStatus;
use crate::error::PortalError;
use regex::Regex;
use std::cell::OnceCell;
use tracing::debug;

/// Parser for portal HTML responses with a cached status regex
#[derive(Clone, Debug)]
pub(crate) struct ResponseParser {
    status_regex: OnceCell<Regex>,
}

impl ResponseParser {
    /// Create a new parser with an uninitialized cache
    pub fn new() -> Self {
        Self {
            status_regex: OnceCell::new(),
        }
    }

    /// Get or compile the booking-state tooltip regex
    fn status_regex(&self) -> &Regex {
        self.status_regex.get_or_init(|| {
            Regex::new(
                r#"<td.*return overlib\('(?P<state>[^']*)', CAPTION.*\).*id="Zeitleiste".*</td>"#,
            )
            .unwrap()
        })
    }

    /// Extract the `value` of the hidden input whose `name` attribute is `name`.
    ///
    /// The scanner walks `<input ...>` tags and reads their attributes without
    /// building a DOM, tolerating arbitrary whitespace, attribute order, quote
    /// style and tag-name case. The returned value is a verbatim subslice of
    /// `html`: no entity unescaping happens, because view-state tokens must be
    /// re-submitted byte-for-byte on the next postback.
    pub fn hidden_field<'a>(&self, html: &'a str, name: &str) -> Result<&'a str, PortalError> {
        // Same length as html, so byte offsets carry over.
        let lower = html.to_ascii_lowercase();
        let mut pos = 0;
        while let Some(offset) = lower[pos..].find("<input") {
            let attrs_start = pos + offset + "<input".len();
            match html.as_bytes().get(attrs_start) {
                // "<inputfoo" is some other tag
                Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {}
                Some(_) => {
                    pos = attrs_start;
                    continue;
                }
                None => break,
            }
            let Some(end) = tag_end(html, attrs_start) else {
                break;
            };

            let mut kind = None;
            let mut field_name = None;
            let mut value = None;
            for (key, val) in Attributes::new(&html[attrs_start..end]) {
                if key.eq_ignore_ascii_case("type") {
                    kind = Some(val);
                } else if key.eq_ignore_ascii_case("name") {
                    field_name = Some(val);
                } else if key.eq_ignore_ascii_case("value") {
                    value = Some(val);
                }
            }
            if kind.is_some_and(|t| t.eq_ignore_ascii_case("hidden")) && field_name == Some(name) {
                return Ok(value.unwrap_or(""));
            }
            pos = end;
        }

        Err(PortalError::HiddenFieldNotFound {
            name: name.to_string(),
        })
    }

    /// Recover the last booking state from the timeline tooltip of the
    /// logged-in page.
    ///
    /// Best effort: the marker is an `overlib(...)` call in the `onmouseover`
    /// attribute of the cell containing the `Zeitleiste` element. A tooltip
    /// starting with `KO` means the last punch was an arrival, anything else a
    /// departure. No match leaves the caller at `Unknown`.
    pub fn last_booking_status(&self, html: &str) -> Option<BookingStatus> {
        let Some(captures) = self.status_regex().captures(html) else {
            debug!("no last-booking-state marker found in page");
            return None;
        };
        let state = captures.name("state")?.as_str();
        if state.starts_with("KO") {
            Some(BookingStatus::Arrived)
        } else {
            debug!(state, "last booking state marker");
            Some(BookingStatus::Departed)
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the closing `>` of a tag, ignoring `>` inside quoted attribute values.
fn tag_end(html: &str, from: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b':'
}

/// Iterator over `key="value"` pairs inside a single tag body
struct Attributes<'a> {
    rest: &'a str,
}

impl<'a> Attributes<'a> {
    fn new(tag: &'a str) -> Self {
        Self { rest: tag }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() && !is_name_byte(bytes[i]) {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && is_name_byte(bytes[i]) {
            i += 1;
        }
        if i == key_start {
            self.rest = "";
            return None;
        }
        let key = &self.rest[key_start..i];

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            // bare attribute like `disabled`
            self.rest = &self.rest[i..];
            return Some((key, ""));
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
            let quote = bytes[i];
            i += 1;
            let value_start = i;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            let value = &self.rest[value_start..i];
            if i < bytes.len() {
                i += 1;
            }
            self.rest = &self.rest[i..];
            Some((key, value))
        } else {
            let value_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'/' {
                i += 1;
            }
            let value = &self.rest[value_start..i];
            self.rest = &self.rest[i..];
            Some((key, value))
        }
    }
}
