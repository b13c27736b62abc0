use std::{
    collections::HashMap,
    future::{ready, Ready},
    str::FromStr,
    time::Duration,
};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use log::*;
use merchant_engine::{db_types::InstanceId, helpers::MerchantUrls};
use regex::Regex;

use crate::{config::ServerOptions, errors::ServerError};

/// Upper bound for client-supplied long-poll timeouts.
pub const MAX_LONG_POLL: Duration = Duration::from_secs(300);

fn forwarded_field(req: &HttpRequest, field: &str) -> Option<String> {
    let value = req.headers().get("Forwarded").and_then(|v| v.to_str().ok())?;
    let re = Regex::new(&format!(r#"(?i){field}="?(?P<value>[^;,"]+)"?"#)).ok()?;
    re.captures(value).and_then(|caps| caps.name("value")).map(|m| m.as_str().trim().to_string())
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Works out where the client thinks the backend lives. When `honor_forwarded` is set, the `X-Forwarded-*` headers and
/// then the `Forwarded` header of a reverse proxy take precedence over the request's own `Host` header and transport.
pub fn merchant_urls(req: &HttpRequest, instance: InstanceId, honor_forwarded: bool) -> MerchantUrls {
    let mut host = None;
    let mut proto = None;
    let mut prefix = None;
    if honor_forwarded {
        host = header(req, "X-Forwarded-Host").or_else(|| forwarded_field(req, "host"));
        proto = header(req, "X-Forwarded-Proto").or_else(|| forwarded_field(req, "proto"));
        prefix = header(req, "X-Forwarded-Prefix");
        trace!("💻️ Forwarded host: {host:?}, proto: {proto:?}, prefix: {prefix:?}");
    }
    let host = host.or_else(|| header(req, "Host")).unwrap_or_else(|| req.connection_info().host().to_string());
    let secure = match proto {
        Some(p) => p.eq_ignore_ascii_case("https"),
        None => req.app_config().secure(),
    };
    MerchantUrls::new(&host, prefix.as_deref(), instance, secure)
}

/// Selects the instance a request is for: the `{instance}` path segment of `/instances/{instance}/..` routes, the
/// `instance` query argument, or the default instance.
pub fn instance_id(req: &HttpRequest) -> InstanceId {
    if let Some(id) = req.match_info().get("instance") {
        return InstanceId::new(id);
    }
    QueryArgs::from_request_query(req)
        .ok()
        .and_then(|q| q.optional("instance").map(InstanceId::new))
        .unwrap_or_else(InstanceId::default_instance)
}

/// The instance a request addresses, and the backend URLs as seen by the client.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub instance: InstanceId,
    pub urls: MerchantUrls,
}

impl FromRequest for RequestContext {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let honor_forwarded =
            req.app_data::<web::Data<ServerOptions>>().map(|o| o.honor_forwarded_headers).unwrap_or(false);
        let instance = instance_id(req);
        let urls = merchant_urls(req, instance.clone(), honor_forwarded);
        ready(Ok(RequestContext { instance, urls }))
    }
}

/// Query string arguments, with the error replies for missing and malformed values.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs(HashMap<String, String>);

impl QueryArgs {
    pub fn parse(query: &str) -> Result<Self, ServerError> {
        web::Query::<HashMap<String, String>>::from_query(query)
            .map(|q| Self(q.into_inner()))
            .map_err(|e| ServerError::InvalidParameter(e.to_string()))
    }

    pub fn from_request_query(req: &HttpRequest) -> Result<Self, ServerError> {
        Self::parse(req.query_string())
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &str) -> Result<&str, ServerError> {
        self.optional(name).ok_or_else(|| ServerError::MissingParameter(name.to_string()))
    }

    pub fn parse_optional<T: FromStr>(&self, name: &str) -> Result<Option<T>, ServerError> {
        self.optional(name)
            .map(|v| v.parse::<T>().map_err(|_| ServerError::InvalidParameter(name.to_string())))
            .transpose()
    }

    pub fn parse_required<T: FromStr>(&self, name: &str) -> Result<T, ServerError> {
        self.required(name)?.parse::<T>().map_err(|_| ServerError::InvalidParameter(name.to_string()))
    }

    /// A long-poll timeout given in seconds under `name`, capped at [`MAX_LONG_POLL`].
    pub fn timeout_secs(&self, name: &str) -> Result<Duration, ServerError> {
        let secs = self.parse_optional::<u64>(name)?.unwrap_or(0);
        Ok(Duration::from_secs(secs).min(MAX_LONG_POLL))
    }

    /// A long-poll timeout given in milliseconds under `name`, capped at [`MAX_LONG_POLL`].
    pub fn timeout_ms(&self, name: &str) -> Result<Duration, ServerError> {
        let ms = self.parse_optional::<u64>(name)?.unwrap_or(0);
        Ok(Duration::from_millis(ms).min(MAX_LONG_POLL))
    }
}

impl FromRequest for QueryArgs {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Self::from_request_query(req))
    }
}
