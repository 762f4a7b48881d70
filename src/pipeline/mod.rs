//! Request pipeline.
//!
//! A request is an [`Exchange`] whose type parameter names the stage it has
//! reached:
//!
//! `SessionAssigned -> BodyRead -> Decoded -> StoreResolved -> Encoded -> sent`
//!
//! Each stage consumes the previous state, so a later stage can only run once
//! every value it needs exists. Any stage may stop the chain with a
//! [`PipelineError`], which is rendered as the error response. Gzip on the
//! way in and out is applied by the router's tower-http layers around this
//! chain.

pub mod error;
pub mod session;

pub use error::PipelineError;
pub use session::{Session, SessionIssuer};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::models::ShortenResponse;
use crate::storage::OpContext;

pub type StageResult<T> = Result<T, PipelineError>;

/// Request-scoped values threaded through the stages
pub struct Exchange<S> {
    session: Session,
    ctx: OpContext,
    state: S,
}

pub struct SessionAssigned;

pub struct BodyRead {
    raw_data: Bytes,
}

pub struct Decoded<T> {
    payload: T,
}

pub struct StoreResolved<T> {
    status: StatusCode,
    data: T,
}

pub struct Encoded {
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
}

/// What the store stage sees of the request
pub struct StoreCall<T> {
    pub ctx: OpContext,
    pub user_id: String,
    pub payload: T,
}

impl<S> Exchange<S> {
    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    fn advance<N>(self, state: N) -> Exchange<N> {
        Exchange {
            session: self.session,
            ctx: self.ctx,
            state,
        }
    }
}

impl Exchange<SessionAssigned> {
    /// SessionAssign: resolve the caller and start the deadline clock.
    pub fn start(
        issuer: &SessionIssuer,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> StageResult<Self> {
        let session = issuer
            .assign(headers)
            .map_err(|e| PipelineError::Internal(format!("cannot build session cookie: {e}")))?;

        Ok(Exchange {
            session,
            ctx: OpContext::with_timeout(timeout),
            state: SessionAssigned,
        })
    }

    /// BodyRead: collect the (already decompressed) body up to `limit` bytes.
    pub async fn read_body(self, body: Body, limit: usize) -> StageResult<Exchange<BodyRead>> {
        let raw_data = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| PipelineError::Validation(format!("cannot read body: {e}")))?;
        Ok(self.advance(BodyRead { raw_data }))
    }

    /// Drive the rest of the chain and render its outcome. A cookie minted
    /// for this request is sent on error responses too, so a failed first
    /// request does not cost the client its session.
    pub async fn run<F, Fut>(self, chain: F) -> Response
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = StageResult<Response>>,
    {
        let issued = self.session.issued.clone();
        match chain(self).await {
            Ok(response) => response,
            Err(e) => {
                let mut response = e.into_response();
                if let Some(cookie) = issued {
                    response.headers_mut().append(header::SET_COOKIE, cookie);
                }
                response
            }
        }
    }

    /// For endpoints that carry no body.
    pub fn without_body(self) -> Exchange<Decoded<()>> {
        self.advance(Decoded { payload: () })
    }
}

impl Exchange<BodyRead> {
    /// Decode: the body is the URL itself.
    pub fn decode_plain(self) -> StageResult<Exchange<Decoded<String>>> {
        let text = std::str::from_utf8(&self.state.raw_data)
            .map_err(|_| PipelineError::Validation("body is not valid UTF-8".to_string()))?
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(PipelineError::Validation("empty URL".to_string()));
        }

        Ok(self.advance(Decoded { payload: text }))
    }

    /// Decode: parse the body as JSON.
    pub fn decode_json<T: DeserializeOwned>(self) -> StageResult<Exchange<Decoded<T>>> {
        let payload = serde_json::from_slice(&self.state.raw_data)
            .map_err(|e| PipelineError::Validation(format!("invalid JSON: {e}")))?;
        Ok(self.advance(Decoded { payload }))
    }
}

impl<T> Exchange<Decoded<T>> {
    pub fn payload(&self) -> &T {
        &self.state.payload
    }

    /// Transform the decoded payload, e.g. to pull the URL out of a request object.
    pub fn map<U>(self, f: impl FnOnce(T) -> StageResult<U>) -> StageResult<Exchange<Decoded<U>>> {
        let Exchange {
            session,
            ctx,
            state,
        } = self;
        let payload = f(state.payload)?;
        Ok(Exchange {
            session,
            ctx,
            state: Decoded { payload },
        })
    }

    /// StoreInvoke: hand the payload to the store and keep its status and data.
    pub async fn invoke<R, F, Fut>(self, f: F) -> StageResult<Exchange<StoreResolved<R>>>
    where
        F: FnOnce(StoreCall<T>) -> Fut,
        Fut: Future<Output = StageResult<(StatusCode, R)>>,
    {
        let Exchange {
            session,
            ctx,
            state,
        } = self;

        let call = StoreCall {
            ctx: ctx.clone(),
            user_id: session.user_id.clone(),
            payload: state.payload,
        };
        let (status, data) = f(call).await?;

        Ok(Exchange {
            session,
            ctx,
            state: StoreResolved { status, data },
        })
    }
}

impl<T> Exchange<StoreResolved<T>> {
    pub fn status(&self) -> StatusCode {
        self.state.status
    }

    /// Encode: serialize `data` as a JSON body.
    pub fn encode_json(self) -> StageResult<Exchange<Encoded>>
    where
        T: Serialize,
    {
        let body = serde_json::to_vec(&self.state.data)
            .map_err(|e| PipelineError::Internal(format!("cannot encode response: {e}")))?;
        let status = self.state.status;
        Ok(self.advance(Encoded {
            status,
            content_type: Some("application/json"),
            body: Bytes::from(body),
        }))
    }

    /// No body, status only.
    pub fn encode_empty(self) -> Exchange<Encoded> {
        let status = self.state.status;
        self.advance(Encoded {
            status,
            content_type: None,
            body: Bytes::new(),
        })
    }
}

impl Exchange<StoreResolved<String>> {
    /// Encode: wrap a short URL in the `{"result": ...}` envelope.
    pub fn envelope(self) -> Exchange<StoreResolved<ShortenResponse>> {
        let StoreResolved { status, data } = self.state;
        Exchange {
            session: self.session,
            ctx: self.ctx,
            state: StoreResolved {
                status,
                data: ShortenResponse { result: data },
            },
        }
    }

    pub fn encode_plain(self) -> Exchange<Encoded> {
        let StoreResolved { status, data } = self.state;
        Exchange {
            session: self.session,
            ctx: self.ctx,
            state: Encoded {
                status,
                content_type: Some("text/plain; charset=utf-8"),
                body: Bytes::from(data),
            },
        }
    }
}

impl Exchange<Encoded> {
    /// Send: status, headers, body. The session cookie goes out here.
    pub fn send(self) -> Response {
        let Encoded {
            status,
            content_type,
            body,
        } = self.state;

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        match content_type {
            Some(content_type) => {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            None => {
                headers.remove(header::CONTENT_TYPE);
            }
        }
        if let Some(cookie) = self.session.issued {
            headers.append(header::SET_COOKIE, cookie);
        }
        response
    }
}
