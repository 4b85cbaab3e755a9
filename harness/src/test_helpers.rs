//! In-process stand-in for the remote service.
//!
//! Serves `/login`, `/logout`, the negotiation endpoint and the websocket
//! upgrade on an ephemeral port. Responses are scripted through
//! [`MockState`]; everything the harness sends is recorded there too.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

pub(crate) struct MockState {
    pub login_status: StatusCode,
    pub login_body: Value,
    pub login_cookies: Vec<String>,
    pub logout_status: StatusCode,
    pub logout_body: String,
    pub negotiation_status: StatusCode,
    pub negotiation_body: String,
    /// Frames pushed as soon as a websocket is accepted.
    pub greeting: Vec<String>,
    /// Frames pushed in answer to each inbound frame, in order.
    pub replies: VecDeque<Vec<String>>,

    pub login_forms: Vec<HashMap<String, String>>,
    pub negotiation_queries: Vec<HashMap<String, String>>,
    pub negotiation_cookies: Vec<String>,
    pub logout_cookies: Vec<String>,
    pub socket_ids: Vec<String>,
    pub inbound_frames: Vec<String>,
    pub sockets_closed: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            login_status: StatusCode::OK,
            login_body: json!({
                "firstName": "John",
                "lastName": "Doe",
                "loginDate": "2024-01-01T00:00:00Z",
            }),
            login_cookies: vec![
                "userId=42; Path=/".to_owned(),
                "sessionToken=tok-1; Path=/; HttpOnly".to_owned(),
            ],
            logout_status: StatusCode::NO_CONTENT,
            logout_body: String::new(),
            negotiation_status: StatusCode::OK,
            negotiation_body: "7F3x9:60:60:websocket".to_owned(),
            greeting: vec!["1:::".to_owned()],
            replies: VecDeque::new(),
            login_forms: Vec::new(),
            negotiation_queries: Vec::new(),
            negotiation_cookies: Vec::new(),
            logout_cookies: Vec::new(),
            socket_ids: Vec::new(),
            inbound_frames: Vec::new(),
            sockets_closed: 0,
        }
    }
}

#[derive(Clone)]
pub(crate) struct MockService {
    state: Arc<Mutex<MockState>>,
}

impl MockService {
    /// Bind on `127.0.0.1:0` and serve in the background.
    pub async fn start(state: MockState) -> (SocketAddr, Self) {
        let service = Self {
            state: Arc::new(Mutex::new(state)),
        };
        let app = Router::new()
            .route("/login", post(login))
            .route("/logout", post(logout))
            .route("/socket.io/1/", get(negotiate))
            .route("/socket.io/1/websocket/{id}", get(upgrade))
            .with_state(service.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock service should bind");
        let addr = listener.local_addr().expect("mock service address");
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock service should serve");
        });
        (addr, service)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().expect("mock state mutex should lock");
        f(&mut state)
    }

    /// Poll until `done` holds, for at most one second.
    pub async fn wait_until(&self, done: impl Fn(&MockState) -> bool) -> bool {
        for _ in 0..100 {
            if self.with(|s| done(s)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn cookie_header(headers: &HeaderMap) -> String {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

async fn login(
    State(service): State<MockService>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (status, body, cookies) = service.with(|s| {
        s.login_forms.push(form);
        (s.login_status, s.login_body.clone(), s.login_cookies.clone())
    });

    let mut response = (status, axum::Json(body)).into_response();
    for cookie in cookies {
        response.headers_mut().append(
            header::SET_COOKIE,
            HeaderValue::from_str(&cookie).expect("cookie header value"),
        );
    }
    response
}

async fn logout(State(service): State<MockService>, headers: HeaderMap) -> Response {
    let (status, body) = service.with(|s| {
        s.logout_cookies.push(cookie_header(&headers));
        (s.logout_status, s.logout_body.clone())
    });
    (status, body).into_response()
}

async fn negotiate(
    State(service): State<MockService>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let (status, body) = service.with(|s| {
        s.negotiation_queries.push(query);
        s.negotiation_cookies.push(cookie_header(&headers));
        (s.negotiation_status, s.negotiation_body.clone())
    });
    (status, body).into_response()
}

async fn upgrade(
    State(service): State<MockService>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    service.with(|s| s.socket_ids.push(id));
    ws.on_upgrade(move |socket| serve_socket(service, socket))
}

async fn serve_socket(service: MockService, mut socket: WebSocket) {
    let greeting = service.with(|s| s.greeting.clone());
    for frame in greeting {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let replies = service.with(|s| {
                    s.inbound_frames.push(text.as_str().to_owned());
                    s.replies.pop_front().unwrap_or_default()
                });
                for reply in replies {
                    if socket.send(Message::Text(reply.into())).await.is_err() {
                        return;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    service.with(|s| s.sockets_closed += 1);
}
