use {
    crate::Context,
    anyhow::{anyhow, ensure},
    bytes::Bytes,
    futures_util::StreamExt,
    http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody},
    hyper::{
        Method, Request, Response, StatusCode,
        body::{Frame, Incoming},
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE},
    },
    rangecrypt_protocol::endpoints::{
        ArchiveFileQuery, ByteRangeQuery, Endpoint, InvalidTransfer, SESSION_ID_HEADER,
        SESSION_RESPONSE_HEADER,
    },
    rangecrypt_sdk::{TransferError, engine::PreparedTransfer},
    std::{convert::Infallible, io},
    tokio::sync::mpsc,
    tokio_stream::wrappers::ReceiverStream,
    tracing::{debug, info, warn},
};

pub(crate) type ResponseBody = BoxBody<Bytes, io::Error>;

/// Chunks buffered between a transfer task and its response body.
const BODY_CHANNEL_CAPACITY: usize = 5;

pub(crate) async fn handle_request(
    ctx: Context,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    try_handle_request(ctx, request).await.or_else(|code| {
        Ok(Response::builder()
            .status(code)
            .body(full(code.as_str().to_owned()))
            .expect("response builder failed"))
    })
}

async fn try_handle_request(
    ctx: Context,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, StatusCode> {
    auth(&ctx, &request).map_err(|err| {
        warn!(?err, "auth error");
        StatusCode::UNAUTHORIZED
    })?;
    if request.method() != Method::GET {
        return Err(StatusCode::METHOD_NOT_ALLOWED);
    }
    let endpoint = Endpoint::route(request.uri().path()).ok_or(StatusCode::NOT_FOUND)?;
    let query = request.uri().query();
    let client_session = request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match endpoint {
        Endpoint::ArchiveFile(file_id) => {
            let params = ArchiveFileQuery::parse(query).map_err(|err| {
                warn!(?err, "invalid query");
                StatusCode::BAD_REQUEST
            })?;
            let transfer = params
                .into_request(file_id.clone(), client_session)
                .map_err(|err| match err {
                    InvalidTransfer::NegativeCoordinates { start, end } => {
                        rejected(TransferError::RangeNotSatisfiable {
                            file_id: file_id.clone(),
                            start,
                            end,
                        })
                    }
                    InvalidTransfer::UnsupportedDestination(_) => {
                        rejected(TransferError::Unsupported(err.to_string()))
                    }
                })?;
            let prepared = ctx.engine.prepare(transfer).await.map_err(rejected)?;
            Ok(stream_response(prepared))
        }
        Endpoint::ArchiveFileSize(file_id) => {
            let size = ctx
                .engine
                .plain_file_size(&file_id)
                .await
                .map_err(rejected)?;
            Ok(Response::builder()
                .header(CONTENT_TYPE, "text/plain")
                .body(full(size.to_string()))
                .expect("response builder failed"))
        }
        Endpoint::ArchiveFileBytes(file_id) => {
            let range = ByteRangeQuery::parse(query).map_err(|err| {
                warn!(?err, "invalid query");
                StatusCode::BAD_REQUEST
            })?;
            if let Some(session) = &client_session {
                debug!(%file_id, session, "client session");
            }
            let prepared = ctx
                .engine
                .prepare_range(&file_id, range.start, range.end)
                .await
                .map_err(rejected)?;
            Ok(stream_response(prepared))
        }
    }
}

fn rejected(err: TransferError) -> StatusCode {
    let status = err.status_code();
    if status.is_server_error() {
        warn!(?err, "transfer failed before streaming");
    } else {
        info!(%err, "transfer rejected");
    }
    status
}

/// Commits the response head and streams the payload from a separate task.
///
/// A failure after the head is sent aborts the body, so the client observes a
/// truncated response.
fn stream_response(prepared: PreparedTransfer) -> Response<ResponseBody> {
    let head = prepared.head().clone();
    let mut builder = Response::builder()
        .status(head.status_code())
        .header(SESSION_RESPONSE_HEADER, &head.session_id)
        .header(CONTENT_TYPE, "application/octet-stream");
    if let Some(len) = head.content_length {
        builder = builder.header(CONTENT_LENGTH, len);
    }
    if let Some(range) = &head.content_range {
        builder = builder.header(CONTENT_RANGE, range);
    }

    let (mut tx, rx) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let result = prepared.stream(&mut tx).await;
        debug!(
            session = %head.session_id,
            success = result.success,
            bytes = result.bytes_transferred,
            elapsed = ?result.elapsed,
            sink_md5 = result.sink_digest.map(|digest| digest.to_string()),
            "response finished",
        );
        if let Some(error) = result.error {
            let _ = tx.send(Err(io::Error::other(error))).await;
        }
    });

    let body = StreamBody::new(ReceiverStream::new(rx).map(|chunk| chunk.map(Frame::data)));
    builder
        .body(BodyExt::boxed(body))
        .expect("response builder failed")
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

fn auth(ctx: &Context, request: &Request<Incoming>) -> anyhow::Result<()> {
    let auth = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| anyhow!("missing authorization header"))?
        .to_str()?;
    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| anyhow!("authorization header is not Bearer"))?;
    ensure!(ctx.access_tokens.contains(token), "invalid bearer token");
    Ok(())
}
