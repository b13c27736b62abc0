use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use merchant_common::ErrorCode;
use merchant_engine::{
    api::{
        InstanceApiError,
        OrderApiError,
        PaymentApiError,
        RefundApiError,
        StatusApiError,
        TipApiError,
        TrackingApiError,
    },
    exchange::{ExchangeError, ExchangeRejection},
    traits::MerchantDbError,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("The request body is not valid JSON. {0}")]
    InvalidJson(String),
    #[error("The request body exceeds the limit of {0} bytes")]
    UploadExceedsLimit(usize),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{hint}")]
    Rejected { code: ErrorCode, hint: String, details: Map<String, Value> },
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
}

impl ServerError {
    /// A client-facing failure identified by `code`.
    pub fn rejected<S: Into<String>>(code: ErrorCode, hint: S) -> Self {
        Self::Rejected { code, hint: hint.into(), details: Map::new() }
    }

    /// Adds a field to the reply body of a [`ServerError::Rejected`] error. Other variants are returned unchanged.
    pub fn with_detail<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        if let Self::Rejected { details, .. } = &mut self {
            details.insert(key.to_string(), value.into());
        }
        self
    }

    /// Attaches the exchange's reply to the error, so the client can see what went wrong downstream.
    pub fn with_exchange_rejection(self, rejection: &ExchangeRejection) -> Self {
        let result = self.with_detail("exchange_http_status", rejection.http_status);
        let result = match rejection.code {
            Some(code) => result.with_detail("exchange_code", code),
            None => result,
        };
        result.with_detail("exchange_reply", rejection.reply.clone())
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InitializeError(_) | Self::ConfigurationError(_) | Self::IOError(_) => ErrorCode::InternalError,
            Self::InvalidJson(_) | Self::InvalidRequestBody(_) => ErrorCode::JsonInvalid,
            Self::UploadExceedsLimit(_) => ErrorCode::UploadExceedsLimit,
            Self::MissingParameter(_) => ErrorCode::ParameterMissing,
            Self::InvalidParameter(_) => ErrorCode::ParameterMalformed,
            Self::Rejected { code, .. } => *code,
            Self::BackendError(_) => ErrorCode::DbHardError,
        }
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("code".into(), json!(self.error_code()));
        body.insert("hint".into(), json!(self.to_string()));
        match self {
            Self::InvalidJson(_) | Self::InvalidRequestBody(_) => {
                body.insert("error".into(), json!("invalid json"));
            },
            Self::MissingParameter(p) => {
                body.insert("error".into(), json!("missing parameter"));
                body.insert("parameter".into(), json!(p));
            },
            Self::InvalidParameter(p) => {
                body.insert("error".into(), json!("invalid parameter"));
                body.insert("parameter".into(), json!(p));
            },
            Self::Rejected { code, details, .. } => {
                body.extend(details.clone());
                if code.http_status() == 500 && !body.contains_key("error") {
                    body.insert("error".into(), json!("internal error"));
                }
            },
            Self::UploadExceedsLimit(_) => {
                body.insert("error".into(), json!("upload exceeds limit"));
            },
            Self::InitializeError(_) | Self::ConfigurationError(_) | Self::IOError(_) | Self::BackendError(_) => {
                body.insert("error".into(), json!("internal error"));
            },
        }
        Value::Object(body)
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error_code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("💻️ {self}");
        }
        HttpResponse::build(status).insert_header(ContentType::json()).body(self.body().to_string())
    }
}

impl From<MerchantDbError> for ServerError {
    fn from(e: MerchantDbError) -> Self {
        match e {
            MerchantDbError::SoftError(_) => Self::rejected(ErrorCode::DbSoftErrorRetriesExhausted, e.to_string()),
            MerchantDbError::Inconsistent(_) => Self::rejected(ErrorCode::InternalError, e.to_string()),
            _ => Self::BackendError(e.to_string()),
        }
    }
}

fn exchange_error(url: &str, e: ExchangeError) -> ServerError {
    let hint = format!("Exchange {url} failed: {e}");
    match e {
        ExchangeError::Timeout => ServerError::rejected(ErrorCode::PayExchangeTimeout, hint),
        ExchangeError::Unreachable(_) | ExchangeError::InvalidUrl(_) => {
            ServerError::rejected(ErrorCode::ExchangeUnreachable, hint)
        },
        ExchangeError::Protocol(_) => ServerError::rejected(ErrorCode::ExchangeProtocolViolation, hint),
        ExchangeError::Rejected(rejection) => {
            ServerError::rejected(ErrorCode::ExchangeProtocolViolation, hint).with_exchange_rejection(&rejection)
        },
    }
}

impl From<InstanceApiError> for ServerError {
    fn from(e: InstanceApiError) -> Self {
        let hint = e.to_string();
        match e {
            InstanceApiError::DatabaseError(e) => e.into(),
            InstanceApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            InstanceApiError::AlreadyExists(_) => Self::rejected(ErrorCode::InstanceAlreadyExists, hint),
            InstanceApiError::InvalidInstance(_) => Self::rejected(ErrorCode::InstanceInvalid, hint),
            InstanceApiError::UnknownProduct(_) => Self::rejected(ErrorCode::ProductUnknown, hint),
            InstanceApiError::ProductAlreadyExists(_) => Self::rejected(ErrorCode::ProductAlreadyExists, hint),
            InstanceApiError::InvalidProduct(_) => Self::rejected(ErrorCode::ProductInvalid, hint),
        }
    }
}

impl From<OrderApiError> for ServerError {
    fn from(e: OrderApiError) -> Self {
        let hint = e.to_string();
        match e {
            OrderApiError::DatabaseError(e) => e.into(),
            OrderApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            OrderApiError::UnknownOrder(_) => Self::rejected(ErrorCode::OrderUnknown, hint),
            OrderApiError::AlreadyExists(_) => {
                Self::rejected(ErrorCode::ProposalStoreDbErrorAlreadyExists, hint).with_detail("error", "order ID already exists")
            },
            OrderApiError::AlreadyClaimed(_) => Self::rejected(ErrorCode::OrdersAlreadyClaimed, hint),
            OrderApiError::MissingField(field) => Self::rejected(ErrorCode::OrderInvalid, hint).with_detail("field", field),
            OrderApiError::MalformedField(field) => {
                Self::rejected(ErrorCode::OrderInvalid, hint).with_detail("field", field)
            },
            OrderApiError::CurrencyMismatch { .. } => Self::rejected(ErrorCode::OrderCurrencyMismatch, hint),
            OrderApiError::WireDeadlineBeforeRefundDeadline => {
                Self::rejected(ErrorCode::OrderWireDeadlineBeforeRefundDeadline, hint)
            },
            OrderApiError::ProductMissingDescription(_) => Self::rejected(ErrorCode::OrderProductMissingDescription, hint),
            OrderApiError::UnknownProduct(_) => Self::rejected(ErrorCode::ProductUnknown, hint),
            OrderApiError::OutOfStock(_) => Self::rejected(ErrorCode::OrderProductOutOfStock, hint),
            OrderApiError::DeltaZero => Self::InvalidParameter("delta".into()),
            OrderApiError::ContractTerms(_) => Self::rejected(ErrorCode::HashingFailure, hint),
        }
    }
}

impl From<PaymentApiError> for ServerError {
    fn from(e: PaymentApiError) -> Self {
        let hint = e.to_string();
        match e {
            PaymentApiError::DatabaseError(e) => e.into(),
            PaymentApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            PaymentApiError::InvalidMode(_) => Self::rejected(ErrorCode::PayModeInvalid, hint),
            PaymentApiError::NoCoins => Self::rejected(ErrorCode::PayNoCoins, hint),
            PaymentApiError::UnknownContract(_) => Self::rejected(ErrorCode::PayContractUnknown, hint),
            PaymentApiError::AlreadyPaid(_) => Self::rejected(ErrorCode::PayAlreadyPaid, hint),
            PaymentApiError::DeadlineExpired(_) => Self::rejected(ErrorCode::PayDeadlineExpired, hint),
            PaymentApiError::CurrencyMismatch(_) => Self::rejected(ErrorCode::PayCurrencyMismatch, hint),
            PaymentApiError::DenominationNotAccepted(coin) => {
                Self::rejected(ErrorCode::PayDenominationNotAccepted, hint).with_detail("coin_pub", coin)
            },
            PaymentApiError::DenominationExpired(coin) => {
                Self::rejected(ErrorCode::PayDenominationExpired, hint).with_detail("coin_pub", coin)
            },
            PaymentApiError::PaymentInsufficient { .. } => Self::rejected(ErrorCode::PayPaymentInsufficient, hint),
            PaymentApiError::FeesExceedAllowance { .. } => Self::rejected(ErrorCode::PayFeesExceedAllowance, hint),
            PaymentApiError::InvalidCoinSignature(coin) => {
                Self::rejected(ErrorCode::PayCoinSignatureInvalid, hint).with_detail("coin_pub", coin)
            },
            PaymentApiError::DoubleSpend { coin_pub, exchange_url, reply } => {
                Self::rejected(ErrorCode::PayDoubleSpend, hint)
                    .with_detail("coin_pub", coin_pub)
                    .with_detail("exchange_url", exchange_url)
                    .with_detail("exchange_http_status", 409)
                    .with_detail("exchange_reply", reply)
            },
            PaymentApiError::ExchangeFaulty(_) => Self::rejected(ErrorCode::PayExchangeFaulty, hint),
            PaymentApiError::ExchangeRejected(coins) => {
                let coins = serde_json::to_value(coins).unwrap_or(Value::Null);
                Self::rejected(ErrorCode::PayExchangeRejected, hint).with_detail("coins", coins)
            },
            PaymentApiError::ExchangeTimeout => Self::rejected(ErrorCode::PayExchangeTimeout, hint),
            PaymentApiError::Exchange { url, error } => exchange_error(&url, error),
            PaymentApiError::ExchangeSignatureInvalid(_) => Self::rejected(ErrorCode::ExchangeSignatureInvalid, hint),
            PaymentApiError::AbortRefused(_) => Self::rejected(ErrorCode::PayAbortRefused, hint),
            PaymentApiError::Internal(_) => Self::rejected(ErrorCode::InternalError, hint),
        }
    }
}

impl From<StatusApiError> for ServerError {
    fn from(e: StatusApiError) -> Self {
        let hint = e.to_string();
        match e {
            StatusApiError::DatabaseError(e) => e.into(),
            StatusApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            StatusApiError::UnknownOrder(_) => Self::rejected(ErrorCode::CheckPaymentOrderUnknown, hint),
            StatusApiError::ContractHashMismatch(_) => Self::rejected(ErrorCode::PollPaymentContractHashMismatch, hint),
            StatusApiError::InvalidRefundAmount(_) => Self::InvalidParameter("refund".into()),
            StatusApiError::Internal(_) => Self::rejected(ErrorCode::InternalError, hint),
        }
    }
}

impl From<TrackingApiError> for ServerError {
    fn from(e: TrackingApiError) -> Self {
        let hint = e.to_string();
        match e {
            TrackingApiError::DatabaseError(e) => e.into(),
            TrackingApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            TrackingApiError::UnknownOrder(_) | TrackingApiError::NoDeposits(_) => {
                Self::rejected(ErrorCode::TrackTransactionOrderUnknown, hint)
            },
            TrackingApiError::ConflictingReports { exchange_transfer_proof, exchange_transaction_proof } => {
                Self::rejected(ErrorCode::TrackTransactionConflictingReports, hint)
                    .with_detail("exchange_transfer_proof", exchange_transfer_proof)
                    .with_detail("exchange_transaction_proof", exchange_transaction_proof)
            },
            TrackingApiError::ConflictingDeposit { exchange_deposit, local_deposit } => {
                Self::rejected(ErrorCode::TrackTransferConflictingReports, hint)
                    .with_detail("exchange_deposit", exchange_deposit)
                    .with_detail("local_deposit", local_deposit)
            },
            TrackingApiError::TransactionTrackingFailed { rejection, .. } => {
                Self::rejected(ErrorCode::TrackTransactionExchangeFailure, hint).with_exchange_rejection(&rejection)
            },
            TrackingApiError::TransferTrackingFailed { rejection, .. } => {
                Self::rejected(ErrorCode::TrackTransferExchangeFailure, hint).with_exchange_rejection(&rejection)
            },
            TrackingApiError::ExchangeSignatureInvalid(_) => {
                Self::rejected(ErrorCode::TrackTransferSignatureInvalid, hint)
            },
            TrackingApiError::Exchange { url, error } => exchange_error(&url, error),
            TrackingApiError::ExchangeTimeout => Self::rejected(ErrorCode::PayExchangeTimeout, hint),
            TrackingApiError::Internal(_) => Self::rejected(ErrorCode::InternalError, hint),
        }
    }
}

impl From<RefundApiError> for ServerError {
    fn from(e: RefundApiError) -> Self {
        let hint = e.to_string();
        match e {
            RefundApiError::DatabaseError(e) => e.into(),
            RefundApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            RefundApiError::UnknownOrder(_) => Self::rejected(ErrorCode::RefundOrderIdUnknown, hint),
            RefundApiError::NotPaid(_) => Self::rejected(ErrorCode::RefundOrderNotPaid, hint),
            RefundApiError::InconsistentAmount(_) => Self::rejected(ErrorCode::RefundInconsistentAmount, hint),
            RefundApiError::CurrencyMismatch { .. } => Self::rejected(ErrorCode::RefundCurrencyMismatch, hint),
            RefundApiError::ExchangeSignatureInvalid(_) => Self::rejected(ErrorCode::ExchangeSignatureInvalid, hint),
            RefundApiError::ExchangeTimeout => Self::rejected(ErrorCode::PayExchangeTimeout, hint),
            RefundApiError::Internal(_) => Self::rejected(ErrorCode::InternalError, hint),
        }
    }
}

impl From<TipApiError> for ServerError {
    fn from(e: TipApiError) -> Self {
        let hint = e.to_string();
        match e {
            TipApiError::DatabaseError(e) => e.into(),
            TipApiError::UnknownInstance(_) => Self::rejected(ErrorCode::InstanceUnknown, hint),
            TipApiError::InstanceDoesNotTip(_) => Self::rejected(ErrorCode::TipInstanceDoesNotTip, hint),
            TipApiError::InsufficientFunds { available } => {
                Self::rejected(ErrorCode::TipInsufficientFunds, hint).with_detail("available", available.to_string())
            },
            TipApiError::UnknownTip(_) => Self::rejected(ErrorCode::TipUnknown, hint),
            TipApiError::TipExpired(_) => Self::rejected(ErrorCode::TipExpired, hint),
            TipApiError::Overdrawn { remaining } => {
                Self::rejected(ErrorCode::TipPickupOverdrawn, hint).with_detail("remaining", remaining.to_string())
            },
            TipApiError::TooManyPlanchets { .. } => Self::rejected(ErrorCode::TipPickupTooManyPlanchets, hint),
            TipApiError::CurrencyMismatch(_) => Self::rejected(ErrorCode::TipCurrencyMismatch, hint),
            TipApiError::UnknownDenomination(_) => Self::rejected(ErrorCode::TipPickupDenominationUnknown, hint),
            TipApiError::ExchangeRejected { rejection, .. } => {
                Self::rejected(ErrorCode::TipExchangeFailure, hint).with_exchange_rejection(&rejection)
            },
            TipApiError::Exchange { url, error } => exchange_error(&url, error),
            TipApiError::ExchangeTimeout => Self::rejected(ErrorCode::PayExchangeTimeout, hint),
            TipApiError::Internal(_) => Self::rejected(ErrorCode::InternalError, hint),
        }
    }
}

#[cfg(test)]
mod test {
    use actix_web::body::MessageBody;
    use merchant_engine::db_types::{InstanceId, OrderId};

    use super::*;

    fn body_of(e: ServerError) -> (StatusCode, Value) {
        let res = e.error_response();
        let status = res.status();
        let bytes = res.into_body().try_into_bytes().unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn duplicate_orders() {
        let (status, body) = body_of(OrderApiError::AlreadyExists(OrderId::from("fixed-1")).into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 2100);
        assert_eq!(body["error"], "order ID already exists");
        assert!(body["hint"].as_str().unwrap().contains("fixed-1"));
    }

    #[test]
    fn parameter_errors_name_the_parameter() {
        let (status, body) = body_of(ServerError::MissingParameter("order_id".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing parameter");
        assert_eq!(body["parameter"], "order_id");
        let (_, body) = body_of(OrderApiError::DeltaZero.into());
        assert_eq!(body["error"], "invalid parameter");
        assert_eq!(body["parameter"], "delta");
    }

    #[test]
    fn exchange_failures_are_relayed() {
        let rejection = ExchangeRejection::from_reply(500, json!({"code": 1000, "hint": "boom"}));
        let e = TrackingApiError::TransactionTrackingFailed { url: "https://ex.test/".into(), rejection };
        let (status, body) = body_of(e.into());
        assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
        assert_eq!(body["exchange_http_status"], 500);
        assert_eq!(body["exchange_code"], 1000);
        assert_eq!(body["exchange_reply"]["hint"], "boom");
    }

    #[test]
    fn conflicting_reports_carry_both_proofs() {
        let e = TrackingApiError::ConflictingReports {
            exchange_transfer_proof: json!({"wtid": "A"}),
            exchange_transaction_proof: json!({"wtid": "B"}),
        };
        let (status, body) = body_of(e.into());
        assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
        assert_eq!(body["code"], 2401);
        assert_eq!(body["exchange_transfer_proof"]["wtid"], "A");
        assert_eq!(body["exchange_transaction_proof"]["wtid"], "B");
    }

    #[test]
    fn timeouts_and_internal_errors() {
        let (status, _) = body_of(PaymentApiError::ExchangeTimeout.into());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, body) = body_of(MerchantDbError::DatabaseError("disk full".into()).into());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal error");
        assert_eq!(body["code"], 51);
    }

    #[test]
    fn internal_rejections_say_so() {
        let (status, body) = body_of(TrackingApiError::Internal("amount overflow".into()).into());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], 50);
        assert_eq!(body["error"], "internal error");
        assert!(body["hint"].as_str().unwrap().contains("amount overflow"));
        let (status, body) = body_of(MerchantDbError::Inconsistent("two paid flags".into()).into());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal error");
    }

    #[test]
    fn unknown_instances_are_404() {
        let (status, body) = body_of(TipApiError::UnknownInstance(InstanceId::from("nope")).into());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 2000);
    }
}
