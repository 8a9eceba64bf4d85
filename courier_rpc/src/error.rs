use serde::{Deserialize, Serialize};

/// Sentinel code for errors that don't map to any framework kind.
pub const UNKNOWN_ERROR: i64 = 1000;

/// Errors covering envelope validation, dispatch and registration problems.
///
/// Every kind carries a stable numeric code in the 1000..1100 range. The codes
/// travel inside `error` envelopes and are part of the wire contract, so a
/// kind keeps its code even when the Rust surface makes it hard to reach.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, strum::IntoStaticStr)]
pub enum RpcError {
    #[error("Field {field} must exist in message")]
    FieldMustExist { field: String },

    #[error("Unsuitable field {field} value {value}")]
    UnsuitableFieldValue { field: String, value: String },

    #[error("Field {field} must not contain null values")]
    FieldMustFullyDefined { field: String },

    #[error("Handler for {entry_point} ({message_type}) not found")]
    HandlerNotFound {
        entry_point: String,
        message_type: String,
    },

    #[error("Service {service} should implement ServiceController")]
    NeedToBeController { service: String },

    #[error("Entry point should be of pattern 'service.method'")]
    WrongEntryPointFormat,

    #[error("Service {service} could not be discovered")]
    UnableToDiscover { service: String },

    #[error("Wrong AMQP connection parameters: {detail}")]
    IncorrectAmqpConfig { detail: String },

    #[error("Got incorrect response {response}. Response should be a response, error or payload mapping")]
    WrongResponse { response: String },

    #[error("Incorrect value for AMQP engine")]
    IncorrectAmqpLibrary,

    #[error("Service for {entry_point} is not found")]
    ServiceNotFound { entry_point: String },

    #[error("Service {service} is already registered")]
    DuplicatedServiceRegistration { service: String },

    #[error("Entry point {method} is already registered")]
    DuplicatedEntryPointRegistration { method: String },

    #[error("Service {service} unknown for server")]
    UnknownService { service: String },

    #[error("Service {service} is not registered")]
    ServiceIsNotRegister { service: String },

    #[error("Remote method (event) name for handler {method_name} is not found")]
    PublisherEndpointNotFound { method_name: String },

    #[error("Duplicated registration of method '{method_name}'")]
    DuplicatedMethodRegistration { method_name: String },

    #[error("Headers are forbidden to re-define: {headers}")]
    ForbiddenHeaders { headers: String },

    #[error("Subscription handler for {entry_point} is not found")]
    SubscriptionHandlerNotFound { entry_point: String },

    #[error("Outgoing message is malformed: {detail}")]
    IncorrectOutgoingMessage { detail: String },

    #[error("Incoming message is malformed: {detail}")]
    IncorrectMessage { detail: String },

    #[error("Remote publisher {service} cannot be registered here")]
    CantRegisterRemotePublisher { service: String },

    #[error("Config file is not defined")]
    ConfigFileIsNotDefined,
}

impl RpcError {
    /// The stable wire code for this error kind.
    pub fn code(&self) -> i64 {
        match self {
            Self::FieldMustExist { .. } => 1001,
            Self::UnsuitableFieldValue { .. } => 1002,
            Self::FieldMustFullyDefined { .. } => 1003,
            Self::HandlerNotFound { .. } => 1004,
            Self::NeedToBeController { .. } => 1005,
            Self::WrongEntryPointFormat => 1006,
            Self::UnableToDiscover { .. } => 1007,
            Self::IncorrectAmqpConfig { .. } => 1008,
            Self::WrongResponse { .. } => 1009,
            Self::IncorrectAmqpLibrary => 1010,
            Self::ServiceNotFound { .. } => 1022,
            Self::DuplicatedServiceRegistration { .. } => 1023,
            Self::DuplicatedEntryPointRegistration { .. } => 1024,
            Self::UnknownService { .. } => 1025,
            Self::ServiceIsNotRegister { .. } => 1026,
            Self::PublisherEndpointNotFound { .. } => 1027,
            Self::DuplicatedMethodRegistration { .. } => 1028,
            Self::ForbiddenHeaders { .. } => 1029,
            Self::SubscriptionHandlerNotFound { .. } => 1030,
            Self::IncorrectOutgoingMessage { .. } => 1031,
            Self::IncorrectMessage { .. } => 1032,
            Self::CantRegisterRemotePublisher { .. } => 1033,
            Self::ConfigFileIsNotDefined => 1034,
        }
    }

    /// The error kind name as it appears in `error` envelope payloads.
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    /// Whether this kind is handler-visible (validation/dispatch) rather than
    /// a programmer error. Both classes end up acknowledged on the dispatch
    /// path; the distinction drives log severity.
    pub fn is_ackable(&self) -> bool {
        !matches!(
            self,
            Self::NeedToBeController { .. }
                | Self::IncorrectAmqpConfig { .. }
                | Self::IncorrectAmqpLibrary
                | Self::DuplicatedMethodRegistration { .. }
                | Self::ForbiddenHeaders { .. }
                | Self::WrongResponse { .. }
                | Self::IncorrectOutgoingMessage { .. }
                | Self::IncorrectMessage { .. }
                | Self::CantRegisterRemotePublisher { .. }
                | Self::ConfigFileIsNotDefined
        )
    }
}

/// Body of an `error` envelope: `{class, message, code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Name of the error kind (or the remote exception class).
    pub class: String,

    /// Human-readable message.
    pub message: String,

    /// Numeric code; [`UNKNOWN_ERROR`] when the failure carries none.
    pub code: i64,
}

impl ErrorPayload {
    /// Create a new instance. A missing code falls back to [`UNKNOWN_ERROR`].
    pub fn new(
        class: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<Option<i64>>,
    ) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            code: code.into().unwrap_or(UNKNOWN_ERROR),
        }
    }
}

impl From<&RpcError> for ErrorPayload {
    fn from(err: &RpcError) -> Self {
        Self {
            class: err.kind_name().to_owned(),
            message: err.to_string(),
            code: err.code(),
        }
    }
}
