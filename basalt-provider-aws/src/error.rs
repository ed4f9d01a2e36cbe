//! Mapping of AWS SDK failures onto `CloudError`

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use basalt_core::CloudError;

/// Error codes meaning the caller's credentials are missing or unusable
const CREDENTIAL_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "InvalidToken",
];

const ACCESS_DENIED_CODES: &[&str] = &["AccessDenied", "AccessDeniedException", "AllAccessDisabled"];

const CONFLICT_CODES: &[&str] = &[
    "OperationAborted",
    "ConcurrentModification",
    "ConditionalRequestConflict",
    "PreconditionFailed",
    "BucketAlreadyOwnedByYou",
];

const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchKey", "NotFound", "NoSuchEntity"];

const THROTTLE_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
    "ServiceUnavailable",
    "InternalError",
];

/// Classify an SDK error from any AWS client
pub(crate) fn classify<E>(operation: &str, err: &SdkError<E>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = format!("{}: {}", operation, DisplayErrorContext(err));
    match err {
        SdkError::TimeoutError(_) => CloudError::Connectivity(message),
        SdkError::DispatchFailure(_) | SdkError::ConstructionFailure(_) => {
            if looks_like_credentials(&message) {
                CloudError::Credentials(message)
            } else {
                CloudError::Connectivity(message)
            }
        }
        _ => classify_response(
            err.code(),
            err.raw_response().map(|r| r.status().as_u16()),
            message,
        ),
    }
}

/// Classify a service response by error code, then by HTTP status
pub(crate) fn classify_response(code: Option<&str>, status: Option<u16>, message: String) -> CloudError {
    if let Some(code) = code {
        if CREDENTIAL_CODES.contains(&code) {
            return CloudError::Credentials(message);
        }
        if ACCESS_DENIED_CODES.contains(&code) {
            return CloudError::AccessDenied(message);
        }
        if code == "BucketAlreadyExists" {
            return CloudError::NameUnavailable(message);
        }
        if CONFLICT_CODES.contains(&code) {
            return CloudError::Conflict(message);
        }
        if NOT_FOUND_CODES.contains(&code) {
            return CloudError::NotFound(message);
        }
        if THROTTLE_CODES.contains(&code) {
            return CloudError::Connectivity(message);
        }
    }

    match status {
        // HeadBucket has no body, so only the status says why
        Some(403) => CloudError::AccessDenied(message),
        Some(404) => CloudError::NotFound(message),
        Some(409) | Some(412) => CloudError::Conflict(message),
        Some(s) if s >= 500 => CloudError::Connectivity(message),
        _ => CloudError::Provider(message),
    }
}

pub(crate) fn is_code<E>(err: &SdkError<E>, code: &str) -> bool
where
    E: ProvideErrorMetadata,
{
    err.code() == Some(code)
}

fn looks_like_credentials(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("credential") || lower.contains("no identity") || lower.contains("identity resolver")
}

/// Wrap a request-builder error
pub(crate) fn build_error(what: &str, err: impl std::fmt::Display) -> CloudError {
    CloudError::Provider(format!("Failed to build {}: {}", what, err))
}
