//! Stateful HTTP calls with cookie continuity and status validation.
//!
//! The client itself holds no session state. Cookies live in a [`Session`]
//! owned by the caller and threaded through every request; `post` and `get`
//! are the only operations that mutate it. Both record the request and the
//! response in the caller's [`TraceLog`] before the status is checked.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use serde::de::DeserializeOwned;
use traces::TraceLog;

use crate::HarnessError;

/// Cookie name/value pairs carried between calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay cookies from a response; later values win.
    pub fn merge(&mut self, cookies: impl IntoIterator<Item = (String, String)>) {
        self.0.extend(cookies);
    }

    /// `Cookie` request header value, or `None` when empty.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let joined = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }
}

/// Name and value of a single `Set-Cookie` header; attributes are dropped.
#[must_use]
pub fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), value.trim().trim_matches('"').to_owned()))
}

/// One authenticated actor against the service.
#[derive(Clone, Debug)]
pub struct Session {
    base_url: String,
    cookies: CookieJar,
    /// Set after a verified login.
    pub user_id: Option<String>,
    pub session_token: Option<String>,
    pub logged_in_at: Option<time::OffsetDateTime>,
}

impl Session {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            cookies: CookieJar::default(),
            user_id: None,
            session_token: None,
            logged_in_at: None,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    fn resolve(&self, path: &str, absolute: bool) -> String {
        if absolute {
            path.to_owned()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

/// Fully read HTTP response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Cookies set by this response, in header order.
    pub cookies: Vec<(String, String)>,
}

impl HttpResponse {
    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a serde error when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, HarnessError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Submit a form-encoded POST relative to the session's base URL.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnexpectedStatus`] when the status is not in
    /// `expected`, or a transport error.
    pub async fn post(
        &self,
        session: &mut Session,
        path: &str,
        form: &[(&str, &str)],
        expected: &[u16],
        trace: &mut TraceLog,
    ) -> Result<HttpResponse, HarnessError> {
        let url = session.resolve(path, false);
        tracing::info!(%url, fields = form.len(), "POST");
        trace.http_request("POST", &url);

        let mut request = self.http.post(&url).headers(cookie_headers(&session.cookies)?);
        if !form.is_empty() {
            request = request.form(form);
        }
        let response = read_response(request.send().await?).await?;
        trace.http_response(&url, response.status, &response.body);

        session.cookies.merge(response.cookies.iter().cloned());
        check_status(path, &response, expected)?;
        Ok(response)
    }

    /// Issue a GET. `absolute` treats `path` as a full URL instead of joining
    /// it to the base URL; `cookies` replaces the session's jar for this call.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnexpectedStatus`] for anything but 200, or a
    /// transport error.
    pub async fn get(
        &self,
        session: &mut Session,
        path: &str,
        query: &[(&str, &str)],
        cookies: Option<&CookieJar>,
        absolute: bool,
        trace: &mut TraceLog,
    ) -> Result<HttpResponse, HarnessError> {
        let url = session.resolve(path, absolute);
        tracing::info!(%url, ?query, "GET");
        trace.http_request("GET", &url);

        let jar = cookies.unwrap_or(&session.cookies);
        let mut request = self.http.get(&url).headers(cookie_headers(jar)?);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = read_response(request.send().await?).await?;
        trace.http_response(&url, response.status, &response.body);

        session.cookies.merge(response.cookies.iter().cloned());
        check_status(path, &response, &[200])?;
        Ok(response)
    }
}

fn cookie_headers(jar: &CookieJar) -> Result<HeaderMap, HarnessError> {
    let mut headers = HeaderMap::new();
    if let Some(value) = jar.header_value() {
        headers.insert(COOKIE, HeaderValue::from_str(&value)?);
    }
    Ok(headers)
}

async fn read_response(response: reqwest::Response) -> Result<HttpResponse, HarnessError> {
    let status = response.status().as_u16();
    let cookies = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect::<Vec<_>>();
    let body = response.text().await?;

    tracing::info!(status, body = %body, cookies = ?cookies, "response");
    Ok(HttpResponse {
        status,
        body,
        cookies,
    })
}

fn check_status(request: &str, response: &HttpResponse, expected: &[u16]) -> Result<(), HarnessError> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    Err(HarnessError::UnexpectedStatus {
        request: request.to_owned(),
        status: response.status,
        expected: expected.to_vec(),
    })
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
