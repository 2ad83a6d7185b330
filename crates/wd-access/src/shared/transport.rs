//! RPC Error Transport
//!
//! Business errors cross the user/auth service boundary as a `tonic::Status`
//! whose details carry a protobuf-encoded [`ErrorDetail`]. The receiving side
//! decodes it back into the same [`AccessError`] variant, so the message key
//! and its attributes survive for localization by the final caller.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};
use tracing::warn;

use super::error::AccessError;

/// Wire form of a business error.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorDetail {
    #[prost(string, tag = "1")]
    pub message_key: String,

    #[prost(map = "string, string", tag = "2")]
    pub attributes: HashMap<String, String>,
}

impl From<&AccessError> for ErrorDetail {
    fn from(err: &AccessError) -> Self {
        Self {
            message_key: err.message_key().to_string(),
            attributes: err.attributes().into_iter().collect(),
        }
    }
}

impl ErrorDetail {
    pub fn into_error(self) -> AccessError {
        let attributes: BTreeMap<String, String> = self.attributes.into_iter().collect();
        AccessError::from_parts(&self.message_key, &attributes)
    }
}

/// gRPC status code for each error kind.
pub fn status_code(err: &AccessError) -> Code {
    match err {
        AccessError::ServerError { .. } => Code::Internal,
        AccessError::RecordNotFound { .. } | AccessError::NoRowsEffected { .. } => Code::NotFound,
        AccessError::RoleExisted { .. } => Code::AlreadyExists,
        AccessError::IsNotDeletable { .. } => Code::FailedPrecondition,
        AccessError::InvalidRequestBody { .. } => Code::InvalidArgument,
        AccessError::UserInActive { .. }
        | AccessError::UserUnVerified { .. }
        | AccessError::UserIsBanned { .. } => Code::PermissionDenied,
    }
}

impl From<AccessError> for Status {
    fn from(err: AccessError) -> Self {
        let detail = ErrorDetail::from(&err);
        Status::with_details(
            status_code(&err),
            err.to_string(),
            Bytes::from(detail.encode_to_vec()),
        )
    }
}

impl AccessError {
    /// Decode an error received from a peer service.
    ///
    /// Statuses without a decodable [`ErrorDetail`] (transport failures,
    /// peers that predate the detail format) become `ServerError`.
    pub fn from_status(status: &Status) -> Self {
        if status.details().is_empty() {
            return Self::ServerError {
                operation: "remote".to_string(),
            };
        }

        match ErrorDetail::decode(status.details()) {
            Ok(detail) => detail.into_error(),
            Err(e) => {
                warn!(code = ?status.code(), error = %e, "Undecodable error detail from peer");
                Self::ServerError {
                    operation: "remote".to_string(),
                }
            }
        }
    }
}
