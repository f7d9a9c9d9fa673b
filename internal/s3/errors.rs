use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Error {
    AccessDenied,
    NoSuchBucket,
    NoSuchUpload,
    SignatureDoesNotMatch,
    InvalidRequest,
    MethodNotAllowed,
    NotImplemented,
    ServiceUnavailable,
    InternalError,
}

impl S3Error {
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "AccessDenied",
            S3Error::NoSuchBucket => "NoSuchBucket",
            S3Error::NoSuchUpload => "NoSuchUpload",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidRequest => "InvalidRequest",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::ServiceUnavailable => "ServiceUnavailable",
            S3Error::InternalError => "InternalError",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "Access Denied",
            S3Error::NoSuchBucket => "The specified bucket does not exist",
            S3Error::NoSuchUpload => "The specified upload does not exist",
            S3Error::SignatureDoesNotMatch => {
                "The request signature we calculated does not match the signature you provided"
            }
            S3Error::InvalidRequest => "Invalid Request",
            S3Error::MethodNotAllowed => "Method Not Allowed",
            S3Error::NotImplemented => "Not Implemented",
            S3Error::ServiceUnavailable => "Service Unavailable. Please retry.",
            S3Error::InternalError => "Internal Error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied => StatusCode::FORBIDDEN,
            S3Error::NoSuchBucket => StatusCode::NOT_FOUND,
            S3Error::NoSuchUpload => StatusCode::NOT_FOUND,
            S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::InvalidRequest => StatusCode::BAD_REQUEST,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            S3Error::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn error_xml(error: S3Error, request_id: &str, resource: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource><RequestId>{}</RequestId></Error>",
        error.code(),
        error.message(),
        xml_escape(resource),
        request_id
    )
}

pub fn s3_error(error: S3Error, request_id: &str, resource: &str) -> Response {
    let body = error_xml(error, request_id, resource);
    let mut response = (
        error.status(),
        [
            ("Content-Type", "application/xml".to_string()),
            ("Content-Length", body.len().to_string()),
        ],
        body,
    )
        .into_response();
    if error == S3Error::ServiceUnavailable {
        if let Ok(value) = "1".parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
