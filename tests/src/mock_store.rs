use {
    anyhow::Result,
    bytes::Bytes,
    http_body_util::Full,
    hyper::{
        Request, Response, StatusCode,
        body::Incoming,
        header::{AUTHORIZATION, CONTENT_RANGE, RANGE},
    },
    hyper_util::server::graceful::GracefulShutdown,
    parking_lot::Mutex,
    portpicker::pick_unused_port,
    rangecrypt_sdk::server::serve_connection,
    std::{
        collections::HashMap,
        convert::Infallible,
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    },
    tokio::net::TcpListener,
    tracing::warn,
    url::Url,
};

#[derive(Default, Clone)]
struct Object {
    data: Bytes,
    /// Value the `Authorization` header must have.
    authorization: Option<String>,
    /// Responses stop after this many bytes of the object.
    truncate_at: Option<u64>,
}

#[derive(Default)]
struct State {
    objects: Mutex<HashMap<String, Object>>,
    requests: AtomicUsize,
}

/// Object store that answers ranged GETs like S3 does.
#[derive(Clone)]
pub struct MockStore {
    addr: SocketAddr,
    state: Arc<State>,
}

impl MockStore {
    pub async fn start() -> Result<Self> {
        let port = pick_unused_port().ok_or_else(|| anyhow::anyhow!("no free port"))?;
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::default());
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            let connections = GracefulShutdown::new();
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(serve_connection(
                            stream,
                            move |request| handle(Arc::clone(&state), request),
                            connections.watcher(),
                        ));
                    }
                    Err(err) => warn!(?err, "mock store failed to accept"),
                }
            }
        });
        Ok(Self { addr, state })
    }

    pub fn url(&self, path: &str) -> Url {
        format!("http://{}/{path}", self.addr)
            .parse()
            .unwrap_or_else(|_| unreachable!())
    }

    /// URL with embedded credentials, which must be sent as Basic auth.
    pub fn url_with_credentials(&self, path: &str, user: &str, password: &str) -> Url {
        let mut url = self.url(path);
        url.set_username(user).unwrap_or_default();
        url.set_password(Some(password)).unwrap_or_default();
        url
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.state.objects.lock().insert(
            format!("/{path}"),
            Object {
                data: data.into(),
                ..Object::default()
            },
        );
    }

    pub fn require_authorization(&self, path: &str, value: &str) {
        if let Some(object) = self.state.objects.lock().get_mut(&format!("/{path}")) {
            object.authorization = Some(value.to_owned());
        }
    }

    pub fn truncate_at(&self, path: &str, offset: u64) {
        if let Some(object) = self.state.objects.lock().get_mut(&format!("/{path}")) {
            object.truncate_at = Some(offset);
        }
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::default())
        .unwrap_or_else(|_| unreachable!())
}

async fn handle(state: Arc<State>, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let Some(object) = state.objects.lock().get(request.uri().path()).cloned() else {
        return Ok(status(StatusCode::NOT_FOUND));
    };
    if let Some(expected) = &object.authorization {
        let actual = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if actual != Some(expected.as_str()) {
            return Ok(status(StatusCode::UNAUTHORIZED));
        }
    }

    let len = u64::try_from(object.data.len()).unwrap_or(u64::MAX);
    let Some((start, end)) = request
        .headers()
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range)
    else {
        return Ok(Response::new(Full::new(object.data)));
    };
    if start >= len || end < start {
        return Ok(status(StatusCode::RANGE_NOT_SATISFIABLE));
    }
    let end = end.min(len.saturating_sub(1));
    let served_end = object
        .truncate_at
        .map_or(end.saturating_add(1), |at| at.clamp(start, end.saturating_add(1)));
    let body = object.data.slice(
        usize::try_from(start).unwrap_or(usize::MAX)..usize::try_from(served_end).unwrap_or(usize::MAX),
    );
    Ok(Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))
        .body(Full::new(body))
        .unwrap_or_else(|_| unreachable!()))
}
