use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
pub struct Error(ErrorDetails);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(details)
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.0.code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        self.0
    }

    pub fn is_retryable(&self) -> bool {
        match &self.0 {
            ErrorDetails::Store { kind, .. } => kind.is_retryable(),
            ErrorDetails::StoreNotReady { .. } => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

/// Classification of store-boundary failures.
///
/// `Auth` and `Protocol` are terminal: retrying cannot help and the condition
/// is not expected to clear on its own. Everything else is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Connection,
    Timeout,
    Auth,
    Protocol,
    Network,
    Unknown,
}

impl StoreErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, StoreErrorKind::Auth | StoreErrorKind::Protocol)
    }

    pub fn is_temporary(self) -> bool {
        !matches!(self, StoreErrorKind::Auth | StoreErrorKind::Protocol)
    }
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreErrorKind::Connection => "Connection",
            StoreErrorKind::Timeout => "Timeout",
            StoreErrorKind::Auth => "Authentication",
            StoreErrorKind::Protocol => "Protocol",
            StoreErrorKind::Network => "Network",
            StoreErrorKind::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AppState {
        message: String,
    },
    BuildModelsFailed {
        message: String,
    },
    Config {
        message: String,
    },
    DeductionFailed {
        message: String,
    },
    DeductionInconsistent {
        new_used: i64,
        weight: i64,
    },
    InsufficientQuota {
        required: i64,
        available: i64,
    },
    InvalidParams {
        message: String,
    },
    InvalidQuotaFormat {
        message: String,
    },
    InvalidQuotaValue {
        key: String,
        raw: String,
    },
    InvalidToken,
    InvalidTotalQuota {
        message: String,
    },
    InvalidUsedQuota {
        message: String,
    },
    NoToken,
    NoUserId,
    Observability {
        message: String,
    },
    SendModelsResponseFailed {
        message: String,
    },
    StarRequired {
        user_id: String,
    },
    Store {
        kind: StoreErrorKind,
        operation: String,
        key: String,
        message: String,
    },
    StoreNotReady {
        cluster_name: String,
    },
    TokenParseFailed {
        message: String,
    },
    TotalQuotaError {
        message: String,
    },
    Unauthorized,
    UsedQuotaError {
        message: String,
    },
    Upstream {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::BuildModelsFailed { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::DeductionFailed { .. } => tracing::Level::ERROR,
            ErrorDetails::DeductionInconsistent { .. } => tracing::Level::ERROR,
            ErrorDetails::InsufficientQuota { .. } => tracing::Level::WARN,
            ErrorDetails::InvalidParams { .. } => tracing::Level::WARN,
            ErrorDetails::InvalidQuotaFormat { .. } => tracing::Level::WARN,
            ErrorDetails::InvalidQuotaValue { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidToken => tracing::Level::WARN,
            ErrorDetails::InvalidTotalQuota { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidUsedQuota { .. } => tracing::Level::ERROR,
            ErrorDetails::NoToken => tracing::Level::WARN,
            ErrorDetails::NoUserId => tracing::Level::WARN,
            ErrorDetails::Observability { .. } => tracing::Level::ERROR,
            ErrorDetails::SendModelsResponseFailed { .. } => tracing::Level::ERROR,
            ErrorDetails::StarRequired { .. } => tracing::Level::WARN,
            ErrorDetails::Store { kind, .. } => {
                if kind.is_temporary() {
                    tracing::Level::WARN
                } else {
                    tracing::Level::ERROR
                }
            }
            ErrorDetails::StoreNotReady { .. } => tracing::Level::ERROR,
            ErrorDetails::TokenParseFailed { .. } => tracing::Level::WARN,
            ErrorDetails::TotalQuotaError { .. } => tracing::Level::ERROR,
            ErrorDetails::Unauthorized => tracing::Level::WARN,
            ErrorDetails::UsedQuotaError { .. } => tracing::Level::ERROR,
            ErrorDetails::Upstream { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::BuildModelsFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::DeductionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::DeductionInconsistent { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InsufficientQuota { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::InvalidParams { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::InvalidQuotaFormat { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::InvalidQuotaValue { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorDetails::InvalidTotalQuota { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidUsedQuota { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::NoToken => StatusCode::UNAUTHORIZED,
            ErrorDetails::NoUserId => StatusCode::UNAUTHORIZED,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::SendModelsResponseFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StarRequired { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetails::StoreNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetails::TokenParseFailed { .. } => StatusCode::UNAUTHORIZED,
            ErrorDetails::TotalQuotaError { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::Unauthorized => StatusCode::FORBIDDEN,
            ErrorDetails::UsedQuotaError { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Domain-dotted code rendered in the JSON envelope.
    ///
    /// Codes from the quota arithmetic and gate-flag phases carry the
    /// `quota-check.` prefix; everything else carries `ai-gateway.`.
    fn code(&self) -> &'static str {
        match self {
            ErrorDetails::AppState { .. } => "ai-gateway.app_state",
            ErrorDetails::BuildModelsFailed { .. } => "ai-gateway.build_models_failed",
            ErrorDetails::Config { .. } => "ai-gateway.config",
            ErrorDetails::DeductionFailed { .. } => "quota-check.deduction_failed",
            ErrorDetails::DeductionInconsistent { .. } => "quota-check.deduction_inconsistent",
            ErrorDetails::InsufficientQuota { .. } => "quota-check.insufficient_quota",
            ErrorDetails::InvalidParams { .. } => "ai-gateway.invalid_params",
            ErrorDetails::InvalidQuotaFormat { .. } => "ai-gateway.invalid_quota_format",
            ErrorDetails::InvalidQuotaValue { .. } => "ai-gateway.invalid_quota_value",
            ErrorDetails::InvalidToken => "ai-gateway.invalid_token",
            ErrorDetails::InvalidTotalQuota { .. } => "quota-check.invalid_total_quota",
            ErrorDetails::InvalidUsedQuota { .. } => "quota-check.invalid_used_quota",
            ErrorDetails::NoToken => "ai-gateway.no_token",
            ErrorDetails::NoUserId => "ai-gateway.no_userid",
            ErrorDetails::Observability { .. } => "ai-gateway.observability",
            ErrorDetails::SendModelsResponseFailed { .. } => {
                "ai-gateway.send_models_response_failed"
            }
            ErrorDetails::StarRequired { .. } => "quota-check.star_required",
            ErrorDetails::Store { .. } => "ai-gateway.error",
            ErrorDetails::StoreNotReady { .. } => "ai-gateway.error",
            ErrorDetails::TokenParseFailed { .. } => "ai-gateway.token_parse_failed",
            ErrorDetails::TotalQuotaError { .. } => "quota-check.total_quota_error",
            ErrorDetails::Unauthorized => "ai-gateway.unauthorized",
            ErrorDetails::UsedQuotaError { .. } => "quota-check.used_quota_error",
            ErrorDetails::Upstream { .. } => "ai-gateway.upstream_error",
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::BuildModelsFailed { message } => {
                write!(f, "Failed to build models response: {message}")
            }
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::DeductionFailed { message } => {
                write!(f, "Failed to deduct quota: {message}")
            }
            ErrorDetails::DeductionInconsistent { new_used, weight } => {
                write!(
                    f,
                    "Quota deduction returned an inconsistent counter: used quota is {new_used} after deducting {weight}"
                )
            }
            ErrorDetails::InsufficientQuota {
                required,
                available,
            } => {
                write!(
                    f,
                    "Request denied by ai quota check. Insufficient quota. Required: {required}, Available: {available}"
                )
            }
            ErrorDetails::InvalidParams { message } => {
                write!(f, "Request denied by ai quota check. {message}")
            }
            ErrorDetails::InvalidQuotaFormat { message } => {
                write!(f, "Quota value must be an integer: {message}")
            }
            ErrorDetails::InvalidQuotaValue { key, raw } => {
                write!(
                    f,
                    "Stored quota value for key {key} is not a non-negative integer: {raw}"
                )
            }
            ErrorDetails::InvalidToken => {
                write!(f, "Request denied by ai quota check. Invalid token format.")
            }
            ErrorDetails::InvalidTotalQuota { message } => {
                write!(f, "Invalid total quota value: {message}")
            }
            ErrorDetails::InvalidUsedQuota { message } => {
                write!(f, "Invalid used quota value: {message}")
            }
            ErrorDetails::NoToken => {
                write!(f, "Request denied by ai quota check. No token found.")
            }
            ErrorDetails::NoUserId => {
                write!(
                    f,
                    "Request denied by ai quota check. No user ID found in token."
                )
            }
            ErrorDetails::Observability { message } => write!(f, "{message}"),
            ErrorDetails::SendModelsResponseFailed { message } => {
                write!(f, "Failed to send models response: {message}")
            }
            ErrorDetails::StarRequired { user_id } => {
                write!(
                    f,
                    "Request denied by ai quota check. Star the project to activate quota for user {user_id}."
                )
            }
            ErrorDetails::Store {
                kind,
                operation,
                key,
                message,
            } => {
                write!(f, "Redis {kind} error in {operation} (key: {key}): {message}")
            }
            ErrorDetails::StoreNotReady { cluster_name } => {
                write!(
                    f,
                    "Redis client for cluster {cluster_name} is not ready, please call init() first"
                )
            }
            ErrorDetails::TokenParseFailed { message } => {
                write!(
                    f,
                    "Request denied by ai quota check. Token parse failed: {message}"
                )
            }
            ErrorDetails::TotalQuotaError { message } => {
                write!(f, "Failed to read total quota: {message}")
            }
            ErrorDetails::Unauthorized => {
                write!(
                    f,
                    "Request denied by ai quota check. Unauthorized admin operation."
                )
            }
            ErrorDetails::UsedQuotaError { message } => {
                write!(f, "Failed to read used quota: {message}")
            }
            ErrorDetails::Upstream { message } => {
                write!(f, "Failed to forward request upstream: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    /// Convert the error into the JSON envelope shared by every terminal response
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
            "success": false,
            "data": serde_json::Value::Null,
        });
        (self.status_code(), Json(body)).into_response()
    }
}
