use std::fmt::Display;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

macro_rules! error_codes {
    ($($name:ident = $code:literal => $status:literal,)+) => {
        /// The numeric error codes reported in the `code` field of every error reply, together with the HTTP
        /// status each one is normally returned with.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($name,)+
        }

        impl ErrorCode {
            pub fn code(&self) -> u32 {
                match self {
                    $(ErrorCode::$name => $code,)+
                }
            }

            pub fn http_status(&self) -> u16 {
                match self {
                    $(ErrorCode::$name => $status,)+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(ErrorCode::$name => stringify!($name),)+
                }
            }

            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(ErrorCode::$name),)+
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    Ok = 0 => 200,
    EndpointUnknown = 10 => 404,
    JsonInvalid = 20 => 400,
    ParameterMissing = 25 => 400,
    ParameterMalformed = 26 => 400,
    UploadExceedsLimit = 27 => 413,
    InternalError = 50 => 500,
    DbHardError = 51 => 500,
    DbSoftErrorRetriesExhausted = 52 => 500,
    HashingFailure = 53 => 500,
    SigningFailure = 54 => 500,

    InstanceUnknown = 2000 => 404,
    InstanceAlreadyExists = 2001 => 409,
    InstanceKeyRevoked = 2002 => 404,
    InstanceInvalid = 2003 => 400,

    ProposalStoreDbErrorAlreadyExists = 2100 => 400,
    OrdersAlreadyClaimed = 2101 => 409,
    OrderUnknown = 2102 => 404,
    OrderCurrencyMismatch = 2103 => 400,
    OrderWireDeadlineBeforeRefundDeadline = 2104 => 400,
    OrderProductMissingDescription = 2105 => 400,
    OrderInvalid = 2106 => 400,
    OrderListDeltaZero = 2107 => 400,
    OrderProductOutOfStock = 2108 => 410,

    PayModeInvalid = 2200 => 400,
    PayContractUnknown = 2201 => 404,
    PayDeadlineExpired = 2202 => 403,
    PayDenominationNotAccepted = 2203 => 400,
    PayDenominationExpired = 2204 => 400,
    PayPaymentInsufficient = 2205 => 406,
    PayFeesExceedAllowance = 2206 => 406,
    PayCoinSignatureInvalid = 2207 => 403,
    PayCurrencyMismatch = 2208 => 400,
    PayAlreadyPaid = 2209 => 409,
    PayDoubleSpend = 2210 => 403,
    PayExchangeFaulty = 2211 => 500,
    PayExchangeRejected = 2212 => 402,
    PayExchangeTimeout = 2213 => 503,
    PayAbortRefused = 2214 => 403,
    PayNoCoins = 2215 => 400,

    CheckPaymentOrderUnknown = 2300 => 404,
    PollPaymentContractHashMismatch = 2301 => 404,

    TrackTransactionOrderUnknown = 2400 => 404,
    TrackTransactionConflictingReports = 2401 => 424,
    TrackTransactionExchangeFailure = 2402 => 424,
    TrackTransferExchangeFailure = 2403 => 424,
    TrackTransferSignatureInvalid = 2404 => 424,
    TrackTransferConflictingReports = 2405 => 409,

    RefundOrderIdUnknown = 2500 => 404,
    RefundInconsistentAmount = 2501 => 409,
    RefundOrderNotPaid = 2502 => 409,
    RefundCurrencyMismatch = 2503 => 400,

    TipInstanceDoesNotTip = 2600 => 404,
    TipInsufficientFunds = 2601 => 412,
    TipUnknown = 2602 => 404,
    TipExpired = 2603 => 410,
    TipPickupOverdrawn = 2604 => 409,
    TipPickupTooManyPlanchets = 2605 => 400,
    TipCurrencyMismatch = 2606 => 400,
    TipPickupDenominationUnknown = 2607 => 409,
    TipExchangeFailure = 2608 => 424,

    ProductUnknown = 2700 => 404,
    ProductAlreadyExists = 2701 => 409,
    ProductInvalid = 2702 => 400,

    ExchangeUnreachable = 2800 => 424,
    ExchangeProtocolViolation = 2801 => 424,
    ExchangeKeysUnavailable = 2802 => 424,
    ExchangeSignatureInvalid = 2803 => 424,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u32::deserialize(deserializer)?;
        ErrorCode::from_code(code).ok_or_else(|| de::Error::custom(format!("unknown error code {code}")))
    }
}
