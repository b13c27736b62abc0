use merchant_common::helpers::join_url;

use crate::db_types::{InstanceId, OrderId};

/// The externally visible location of the backend, as seen by the client of the current request. Used to build the
/// `taler://` URIs wallets understand and the absolute URLs placed in contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantUrls {
    /// `host[:port]` the request was addressed to
    pub host: String,
    /// Path prefix in front of the backend's own routes (e.g. when behind a reverse proxy), without slashes
    pub path_prefix: Option<String>,
    pub instance: InstanceId,
    /// Whether the request arrived over https
    pub secure: bool,
}

impl MerchantUrls {
    pub fn new(host: &str, path_prefix: Option<&str>, instance: InstanceId, secure: bool) -> Self {
        let path_prefix = path_prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty());
        Self { host: host.to_string(), path_prefix, instance, secure }
    }

    /// `http(s)://host/prefix/`
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        match &self.path_prefix {
            Some(prefix) => format!("{scheme}://{}/{prefix}/", self.host),
            None => format!("{scheme}://{}/", self.host),
        }
    }

    /// The base URL wallets use for the public API of this instance. Goes into `merchant_base_url`.
    pub fn merchant_base_url(&self) -> String {
        let base = self.base_url();
        if self.instance.is_default() {
            join_url(&base, "public/")
        } else {
            join_url(&base, &format!("instances/{}/public/", self.instance))
        }
    }

    pub fn contract_url(&self, order_id: &OrderId) -> String {
        let base = join_url(&self.base_url(), "public/proposal");
        match url::Url::parse_with_params(&base, &[("instance", self.instance.as_str()), ("order_id", order_id.as_str())])
        {
            Ok(url) => url.to_string(),
            Err(_) => format!("{base}?instance={}&order_id={order_id}", self.instance),
        }
    }

    fn taler_uri(&self, action: &str, rest: &[&str]) -> String {
        let prefix = self.path_prefix.as_deref().unwrap_or("-");
        let instance = if self.instance.is_default() { "-" } else { self.instance.as_str() };
        let mut uri = format!("taler://{action}/{}/{prefix}/{instance}", self.host);
        for part in rest {
            uri.push('/');
            uri.push_str(part);
        }
        if !self.secure {
            uri.push_str("?insecure=1");
        }
        uri
    }

    pub fn pay_uri(&self, order_id: &OrderId, session_id: Option<&str>) -> String {
        self.taler_uri("pay", &[order_id.as_str(), session_id.unwrap_or("")])
    }

    pub fn refund_uri(&self, order_id: &OrderId) -> String {
        self.taler_uri("refund", &[order_id.as_str()])
    }

    pub fn tip_uri(&self, tip_id: &str) -> String {
        self.taler_uri("tip", &[tip_id])
    }
}
