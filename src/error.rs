use actix_web::http::StatusCode;
use actix_web::ResponseError;
use std::net::AddrParseError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit quota must allow at least one request per window")]
    ZeroRequests,
    #[error("Rate limit window must be non-zero")]
    ZeroWindow,
    #[error("Rate limit window of {0:?} exceeds the maximum supported window")]
    WindowTooLarge(Duration),
    #[error("Garbage collection interval must be non-zero")]
    ZeroGcInterval,
    #[error("Garbage collection interval of {0:?} exceeds the maximum supported interval")]
    GcIntervalTooLarge(Duration),
    #[error("Unable to parse remote IP address: {0}")]
    InvalidIp(
        #[source]
        #[from]
        AddrParseError,
    ),
    #[error("Unable to determine the remote address of the request")]
    MissingRemoteAddr,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidIp(_) | Error::MissingRemoteAddr => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
