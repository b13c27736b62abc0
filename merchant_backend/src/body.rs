//! Request body handling.
//!
//! Bodies are collected chunk by chunk into a [`BodyBuffer`] that starts small and doubles as needed, up to a hard cap.
//! A body that would grow beyond the cap is refused with `413 Payload Too Large` before it is read any further.
//! Once the stream ends, the buffer is parsed as a single JSON document.
//!
//! Handlers use the [`JsonBody`] extractor instead of `web::Json`, so that every endpoint applies the same limits and
//! produces the same `{code, hint, error}` reply on bad input.
use std::ops::Deref;

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use bytes::BytesMut;
use futures::{future::LocalBoxFuture, StreamExt};
use log::*;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::errors::ServerError;

pub const INITIAL_BODY_CAPACITY: usize = 2 * 1024;
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct BodyBuffer {
    data: BytesMut,
    limit: usize,
}

impl Default for BodyBuffer {
    fn default() -> Self {
        Self::new(INITIAL_BODY_CAPACITY, MAX_BODY_SIZE)
    }
}

impl BodyBuffer {
    pub fn new(initial_capacity: usize, limit: usize) -> Self {
        Self { data: BytesMut::with_capacity(initial_capacity.min(limit)), limit }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Appends a chunk, doubling the capacity until it fits. Fails if the body would exceed the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ServerError> {
        let needed = self.data.len() + chunk.len();
        if needed > self.limit {
            return Err(ServerError::UploadExceedsLimit(self.limit));
        }
        if needed > self.data.capacity() {
            let mut capacity = self.data.capacity().max(1);
            while capacity < needed {
                capacity *= 2;
            }
            let capacity = capacity.min(self.limit);
            self.data.reserve(capacity - self.data.len());
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Parses the body as `T`. A well-formed body that lacks a required field is reported as a missing parameter.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ServerError> {
        serde_json::from_slice(&self.data).map_err(|e| match missing_field(&e) {
            Some(field) => {
                debug!("💻️ Request body lacks the field '{field}'");
                ServerError::MissingParameter(field)
            },
            None => {
                debug!("💻️ Request body is not valid JSON. {e}");
                ServerError::InvalidJson(e.to_string())
            },
        })
    }
}

/// The name of the absent field, if `e` is serde's "missing field `name`" error.
fn missing_field(e: &serde_json::Error) -> Option<String> {
    if e.classify() != Category::Data {
        return None;
    }
    let message = e.to_string();
    let field = message.strip_prefix("missing field `")?.split('`').next()?;
    Some(field.to_string())
}

/// A JSON request body, read through a [`BodyBuffer`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T> JsonBody<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for JsonBody<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> FromRequest for JsonBody<T>
where T: DeserializeOwned + 'static
{
    type Error = ServerError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let declared = req
            .headers()
            .get(actix_web::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let mut payload = payload.take();
        Box::pin(async move {
            if matches!(declared, Some(len) if len > MAX_BODY_SIZE) {
                debug!("💻️ Refusing a body of {declared:?} bytes");
                return Err(ServerError::UploadExceedsLimit(MAX_BODY_SIZE));
            }
            let mut buffer = BodyBuffer::default();
            while let Some(chunk) = payload.next().await {
                let chunk = chunk.map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
                buffer.push(&chunk)?;
            }
            trace!("💻️ Received a body of {} bytes", buffer.len());
            buffer.parse::<T>().map(JsonBody)
        })
    }
}
