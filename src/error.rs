use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Machine-readable, dot-namespaced failure code such as `card.invalid-number`
/// or `processout-mobile.cancelled`.
///
/// Codes are stored lowercased so that classification is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FailureCode(String);

impl FailureCode {
    pub const CANCELLED: &'static str = "processout-mobile.cancelled";
    pub const CUSTOMER_CANCELLED: &'static str = "customer.cancelled";
    pub const TIMEOUT: &'static str = "processout-mobile.timeout";
    pub const NETWORK_UNREACHABLE: &'static str = "processout-mobile.network-unreachable";
    pub const INTERNAL: &'static str = "processout-mobile.internal";
    pub const GENERIC: &'static str = "processout-mobile.generic.error";
    pub const VALIDATION: &'static str = "request.validation.error";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Top-level namespace of the code, e.g. `card` for `card.invalid-number`.
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::classify(self)
    }
}

impl From<String> for FailureCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for FailureCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<FailureCode> for String {
    fn from(code: FailureCode) -> Self {
        code.0
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse classification of a [`FailureCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Cancelled,
    Timeout,
    NetworkUnreachable,
    Authentication,
    Validation,
    NotFound,
    Internal,
    Generic,
    Unknown,
    /// Any other backend-reported failure, e.g. `gateway.declined` or `card.*`.
    Server,
}

impl FailureKind {
    fn classify(code: &FailureCode) -> Self {
        let raw = code.as_str();
        match raw {
            FailureCode::CANCELLED | FailureCode::CUSTOMER_CANCELLED => return Self::Cancelled,
            FailureCode::TIMEOUT | "gateway.timeout" => return Self::Timeout,
            FailureCode::NETWORK_UNREACHABLE => return Self::NetworkUnreachable,
            FailureCode::INTERNAL | "gateway.internal-error" => return Self::Internal,
            "gateway.unknown-error" => return Self::Unknown,
            "gateway.validation-error"
            | "gateway.invalid-customer-input"
            | "gateway.missing-customer-input"
            | "gateway.invalid-state" => return Self::Validation,
            "request.route-not-found" => return Self::NotFound,
            _ => {}
        }
        if raw.starts_with("request.authentication.") || raw == "request.authentication" {
            Self::Authentication
        } else if raw.starts_with("request.validation.") || raw == "request.validation" {
            Self::Validation
        } else if raw.ends_with(".not-found") {
            Self::NotFound
        } else if raw.starts_with("processout-mobile.generic") {
            Self::Generic
        } else if !KNOWN_NAMESPACES.contains(&code.namespace()) {
            Self::Unknown
        } else {
            Self::Server
        }
    }

    /// Transport-level failures that are worth retrying while polling.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::NetworkUnreachable | Self::Timeout | Self::Internal)
    }
}

const KNOWN_NAMESPACES: &[&str] = &[
    "processout-mobile",
    "customer",
    "gateway",
    "request",
    "resource",
    "card",
    "authentication",
];

/// Per-field validation message attached to a [`Failure`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InvalidField {
    pub name: String,
    pub message: String,
}

/// Structured failure shared by every layer of the checkout.
#[derive(Debug, Clone, Error)]
#[error("{code}{}", message_suffix(self.message.as_deref()))]
pub struct Failure {
    pub code: FailureCode,
    pub message: Option<String>,
    pub invalid_fields: Vec<InvalidField>,
    #[source]
    pub underlying: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

fn message_suffix(message: Option<&str>) -> String {
    message.map(|m| format!(": {m}")).unwrap_or_default()
}

impl Failure {
    pub fn new(code: impl Into<FailureCode>, message: Option<String>) -> Self {
        Self {
            code: code.into(),
            message,
            invalid_fields: Vec::new(),
            underlying: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureCode::CANCELLED, None)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCode::TIMEOUT, Some(message.into()))
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(FailureCode::GENERIC, Some(message.into()))
    }

    /// Wraps an unexpected error so it can travel through the checkout.
    pub fn internal(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            underlying: Some(Arc::new(error)),
            ..Self::new(FailureCode::INTERNAL, None)
        }
    }

    /// Locally detected validation failure naming every offending field.
    pub fn validation(invalid_fields: Vec<InvalidField>) -> Self {
        Self {
            invalid_fields,
            ..Self::new(FailureCode::VALIDATION, Some("Invalid parameters.".to_string()))
        }
    }

    pub fn with_invalid_fields(mut self, invalid_fields: Vec<InvalidField>) -> Self {
        self.invalid_fields = invalid_fields;
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.code.kind()
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.message == other.message
            && self.invalid_fields == other.invalid_fields
    }
}

/// Errors raised outside of the checkout flow itself: loading scenarios,
/// talking to a stopped checkout, or a checkout that ended in failure.
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Scenario error: {0}")]
    ScenarioError(String),
    #[error("Checkout failed: {0}")]
    CheckoutFailed(#[from] Failure),
    #[error("Checkout is no longer running")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
