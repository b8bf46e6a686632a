use thiserror::Error;

/// Numeric result codes returned by the API, either as a request-level scalar
/// or as a per-command entry of a response array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCode {
    Internal,
    Args,
    Again,
    RateLimit,
    Failed,
    TooMany,
    Range,
    Expired,
    NotFound,
    Circular,
    Access,
    Exists,
    Incomplete,
    Key,
    Sid,
    Blocked,
    OverQuota,
    TempUnavailable,
    TooManyConnections,
    Write,
    Read,
    AppKey,
    Ssl,
    GoingOverQuota,
    MfaRequired,
    MasterOnly,
    BusinessPastDue,
    Paywall,
    Unknown(i64),
}

/// Raised when a non-negative number is interpreted as an error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("Value {value} is not an error code. API error codes are strictly negative")]
    NotNegative { value: i64 },
}

impl ApiCode {
    pub fn try_from_i64(value: i64) -> Result<Self, CodeError> {
        if value >= 0 {
            return Err(CodeError::NotNegative { value });
        }
        Ok(match value {
            -1 => ApiCode::Internal,
            -2 => ApiCode::Args,
            -3 => ApiCode::Again,
            -4 => ApiCode::RateLimit,
            -5 => ApiCode::Failed,
            -6 => ApiCode::TooMany,
            -7 => ApiCode::Range,
            -8 => ApiCode::Expired,
            -9 => ApiCode::NotFound,
            -10 => ApiCode::Circular,
            -11 => ApiCode::Access,
            -12 => ApiCode::Exists,
            -13 => ApiCode::Incomplete,
            -14 => ApiCode::Key,
            -15 => ApiCode::Sid,
            -16 => ApiCode::Blocked,
            -17 => ApiCode::OverQuota,
            -18 => ApiCode::TempUnavailable,
            -19 => ApiCode::TooManyConnections,
            -20 => ApiCode::Write,
            -21 => ApiCode::Read,
            -22 => ApiCode::AppKey,
            -23 => ApiCode::Ssl,
            -24 => ApiCode::GoingOverQuota,
            -26 => ApiCode::MfaRequired,
            -27 => ApiCode::MasterOnly,
            -28 => ApiCode::BusinessPastDue,
            -29 => ApiCode::Paywall,
            other => ApiCode::Unknown(other),
        })
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            ApiCode::Internal => -1,
            ApiCode::Args => -2,
            ApiCode::Again => -3,
            ApiCode::RateLimit => -4,
            ApiCode::Failed => -5,
            ApiCode::TooMany => -6,
            ApiCode::Range => -7,
            ApiCode::Expired => -8,
            ApiCode::NotFound => -9,
            ApiCode::Circular => -10,
            ApiCode::Access => -11,
            ApiCode::Exists => -12,
            ApiCode::Incomplete => -13,
            ApiCode::Key => -14,
            ApiCode::Sid => -15,
            ApiCode::Blocked => -16,
            ApiCode::OverQuota => -17,
            ApiCode::TempUnavailable => -18,
            ApiCode::TooManyConnections => -19,
            ApiCode::Write => -20,
            ApiCode::Read => -21,
            ApiCode::AppKey => -22,
            ApiCode::Ssl => -23,
            ApiCode::GoingOverQuota => -24,
            ApiCode::MfaRequired => -26,
            ApiCode::MasterOnly => -27,
            ApiCode::BusinessPastDue => -28,
            ApiCode::Paywall => -29,
            ApiCode::Unknown(value) => *value,
        }
    }

    /// Codes that are absorbed by the channel's retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiCode::Again | ApiCode::TempUnavailable)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiCode::RateLimit)
    }
}

impl std::fmt::Display for ApiCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", strerror(self.as_i64()), self.as_i64())
    }
}

/// Human readable description of an API result code.
pub fn strerror(code: i64) -> &'static str {
    let Ok(code) = ApiCode::try_from_i64(code) else {
        return "No error";
    };
    match code {
        ApiCode::Internal => "Internal error",
        ApiCode::Args => "Invalid argument",
        ApiCode::Again => "Request failed, retrying",
        ApiCode::RateLimit => "Rate limit exceeded",
        ApiCode::Failed => "Failed permanently",
        ApiCode::TooMany => "Too many concurrent connections or transfers",
        ApiCode::Range => "Out of range",
        ApiCode::Expired => "Expired",
        ApiCode::NotFound => "Not found",
        ApiCode::Circular => "Circular linkage detected",
        ApiCode::Access => "Access denied",
        ApiCode::Exists => "Already exists",
        ApiCode::Incomplete => "Incomplete",
        ApiCode::Key => "Invalid key/Decryption error",
        ApiCode::Sid => "Bad session ID",
        ApiCode::Blocked => "Blocked",
        ApiCode::OverQuota => "Over quota",
        ApiCode::TempUnavailable => "Temporarily not available",
        ApiCode::TooManyConnections => "Connection overflow",
        ApiCode::Write => "Write error",
        ApiCode::Read => "Read error",
        ApiCode::AppKey => "Invalid application key",
        ApiCode::Ssl => "SSL verification failed",
        ApiCode::GoingOverQuota => "Not enough quota",
        ApiCode::MfaRequired => "Multi-factor authentication required",
        ApiCode::MasterOnly => "Access denied for sub-users",
        ApiCode::BusinessPastDue => "Business account has expired",
        ApiCode::Paywall => "Storage quota exceeded",
        ApiCode::Unknown(_) => "Unknown error",
    }
}
