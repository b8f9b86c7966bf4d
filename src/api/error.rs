use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("login failed: {0}")]
    LoginError(String),
    #[error("portal error: {0}")]
    ApiError(String),
    #[error("too many requests: {0}")]
    RateExceeded(String),
    #[error("unexpected portal response")]
    UnexpectedApiResponse,
    #[error("invalid portal response ({1}): {0}")]
    InvalidResponse(String, String),
    #[error("no meter id found on the dashboard")]
    MeterIdNotFound,
    #[error("no meter id configured")]
    MissingMeterId,
    #[error("account has no contract")]
    NoContract,
    #[error("no meter reading available")]
    NoReading,
    #[error("internal error")]
    InternalError,
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error) = match &self {
            Error::RateExceeded(s) => (
                Status::TooManyRequests,
                format!("<html><body><h3>429 Too Many Requests</h3>Water portal response: <code>{}</code></body></html>", s),
            ),
            Error::LoginError(s) => (
                Status::Forbidden,
                format!("<html><body><h3>403 Forbidden</h3>Error while authenticating to the water portal: <code>{}</code></body></html>", s),
            ),
            _ => (
                Status::InternalServerError,
                format!(
                    "<html><body><h3>Unknown exception</h3><code>{}</code></body></html>",
                    self
                ),
            ),
        };
        Response::build()
            .status(status)
            .sized_body(error.len(), Cursor::new(error))
            .header(ContentType::new("text", "html"))
            .ok()
    }
}
