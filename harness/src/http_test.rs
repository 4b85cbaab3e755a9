use std::time::Duration;

use serde_json::json;
use traces::{TraceKind, TraceLog};

use super::*;
use crate::test_helpers::{MockService, MockState};

fn client() -> HttpClient {
    HttpClient::new(Duration::from_secs(5)).expect("client")
}

#[test]
fn parse_set_cookie_drops_attributes() {
    assert_eq!(
        parse_set_cookie("userId=42; Path=/; HttpOnly"),
        Some(("userId".to_owned(), "42".to_owned()))
    );
    assert_eq!(
        parse_set_cookie(r#"sessionToken="abc""#),
        Some(("sessionToken".to_owned(), "abc".to_owned()))
    );
}

#[test]
fn parse_set_cookie_rejects_nameless_or_valueless_pairs() {
    assert_eq!(parse_set_cookie("=oops"), None);
    assert_eq!(parse_set_cookie("flag; Secure"), None);
}

#[test]
fn cookie_jar_merge_overwrites_and_renders_header() {
    let mut jar = CookieJar::default();
    assert_eq!(jar.header_value(), None);

    jar.insert("userId", "1");
    jar.merge([
        ("userId".to_owned(), "42".to_owned()),
        ("sessionToken".to_owned(), "t".to_owned()),
    ]);

    assert_eq!(jar.get("userId"), Some("42"));
    assert_eq!(jar.header_value().as_deref(), Some("sessionToken=t; userId=42"));
}

#[test]
fn session_trims_trailing_slash_from_base_url() {
    let session = Session::new("http://host:1/");
    assert_eq!(session.base_url(), "http://host:1");
    assert_eq!(session.resolve("/login", false), "http://host:1/login");
    assert_eq!(session.resolve("http://other/x", true), "http://other/x");
}

#[test]
fn http_response_json_parses_body() {
    let response = HttpResponse {
        status: 200,
        body: r#"{"firstName":"John"}"#.to_owned(),
        cookies: Vec::new(),
    };
    let value = response.json::<serde_json::Value>().expect("json");
    assert_eq!(value["firstName"], "John");
}

#[tokio::test]
async fn post_sends_form_and_captures_cookies() {
    let (addr, mock) = MockService::start(MockState::default()).await;
    let mut session = Session::new(format!("http://{addr}"));

    let response = client()
        .post(
            &mut session,
            "/login",
            &[("username", "alice"), ("password", "secret")],
            &[200],
            &mut TraceLog::new(),
        )
        .await
        .expect("login post");

    assert_eq!(response.status, 200);
    assert_eq!(session.cookies().get("userId"), Some("42"));
    assert_eq!(session.cookies().get("sessionToken"), Some("tok-1"));

    let form = mock.with(|s| s.login_forms[0].clone());
    assert_eq!(form.get("username").map(String::as_str), Some("alice"));
    assert_eq!(form.get("password").map(String::as_str), Some("secret"));
}

#[tokio::test]
async fn post_replays_session_cookies_on_later_calls() {
    let (addr, mock) = MockService::start(MockState::default()).await;
    let mut session = Session::new(format!("http://{addr}"));
    let http = client();

    let mut trace = TraceLog::new();
    http.post(&mut session, "/login", &[("username", "a")], &[200], &mut trace)
        .await
        .expect("login");
    http.post(&mut session, "/logout", &[], &[200, 204], &mut trace)
        .await
        .expect("logout");

    let sent = mock.with(|s| s.logout_cookies[0].clone());
    assert!(sent.contains("userId=42"), "cookie header was {sent:?}");
    assert!(sent.contains("sessionToken=tok-1"), "cookie header was {sent:?}");
}

#[tokio::test]
async fn post_rejects_status_outside_expected_set() {
    let state = MockState {
        logout_status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        ..MockState::default()
    };
    let (addr, _mock) = MockService::start(state).await;
    let mut session = Session::new(format!("http://{addr}"));

    let mut trace = TraceLog::new();
    let err = client()
        .post(&mut session, "/logout", &[], &[200, 204], &mut trace)
        .await
        .expect_err("500 should be rejected");
    assert_eq!(trace.summary().http_exchanges, 1);

    match err {
        HarnessError::UnexpectedStatus {
            request,
            status,
            expected,
        } => {
            assert_eq!(request, "/logout");
            assert_eq!(status, 500);
            assert_eq!(expected, vec![200, 204]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn get_absolute_bypasses_base_url_and_sends_query() {
    let (addr, mock) = MockService::start(MockState::default()).await;
    let mut session = Session::new("http://unused.invalid");

    let url = format!("http://{addr}/socket.io/1/");
    let response = client()
        .get(
            &mut session,
            &url,
            &[("t", "1700000000000")],
            None,
            true,
            &mut TraceLog::new(),
        )
        .await
        .expect("negotiation get");

    assert_eq!(response.body, "7F3x9:60:60:websocket");
    let query = mock.with(|s| s.negotiation_queries[0].clone());
    assert_eq!(query.get("t").map(String::as_str), Some("1700000000000"));
}

#[tokio::test]
async fn get_cookie_override_replaces_session_jar() {
    let (addr, mock) = MockService::start(MockState::default()).await;
    let mut session = Session::new(format!("http://{addr}"));
    session.cookies.insert("userId", "1");

    let mut other = CookieJar::default();
    other.insert("override", "yes");
    client()
        .get(
            &mut session,
            "/socket.io/1/",
            &[],
            Some(&other),
            false,
            &mut TraceLog::new(),
        )
        .await
        .expect("get");

    assert_eq!(mock.with(|s| s.negotiation_cookies[0].clone()), "override=yes");
}

#[tokio::test]
async fn get_requires_exactly_ok() {
    let state = MockState {
        negotiation_status: axum::http::StatusCode::NO_CONTENT,
        negotiation_body: String::new(),
        ..MockState::default()
    };
    let (addr, _mock) = MockService::start(state).await;
    let mut session = Session::new(format!("http://{addr}"));

    let err = client()
        .get(&mut session, "/socket.io/1/", &[], None, false, &mut TraceLog::new())
        .await
        .expect_err("204 is not accepted for GET");
    assert!(matches!(err, HarnessError::UnexpectedStatus { status: 204, .. }));
}

#[tokio::test]
async fn rejected_post_still_traces_status_and_body() {
    let state = MockState {
        login_status: axum::http::StatusCode::UNAUTHORIZED,
        login_body: json!({ "error": "bad password for alice" }),
        ..MockState::default()
    };
    let (addr, _mock) = MockService::start(state).await;
    let mut session = Session::new(format!("http://{addr}"));
    let mut trace = TraceLog::new();

    let err = client()
        .post(&mut session, "/login", &[("username", "alice")], &[200], &mut trace)
        .await
        .expect_err("401 should be rejected");
    assert!(matches!(err, HarnessError::UnexpectedStatus { status: 401, .. }));

    let kinds = trace.kinds().collect::<Vec<_>>();
    assert_eq!(kinds, vec![TraceKind::HttpRequest, TraceKind::HttpResponse]);
    let detail = &trace.entries()[1].detail;
    assert_eq!(detail["status"], 401);
    assert!(detail["body"].as_str().is_some_and(|b| b.contains("bad password")));
}

#[tokio::test]
async fn get_traces_absolute_url_actually_requested() {
    let (addr, _mock) = MockService::start(MockState::default()).await;
    let mut session = Session::new("http://unused.invalid");
    let mut trace = TraceLog::new();

    let url = format!("http://{addr}/socket.io/1/");
    client()
        .get(&mut session, &url, &[], None, true, &mut trace)
        .await
        .expect("get");

    assert_eq!(trace.entries()[0].detail["url"], url.as_str());
    assert_eq!(trace.entries()[1].detail["body"], "7F3x9:60:60:websocket");
}
