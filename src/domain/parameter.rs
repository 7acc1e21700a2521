use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type tag of a server-described form parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Text,
    Digits,
    Email,
    Phone,
    Card,
    SingleSelect,
    Boolean,
    Otp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectableValue {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub preselected: bool,
}

/// Describes a single input the customer has to provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpecification {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub available_values: Vec<SelectableValue>,
}

impl ParameterSpecification {
    pub fn new(key: impl Into<String>, kind: ParameterType) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            kind,
            required: false,
            min_length: None,
            max_length: None,
            available_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_values(mut self, values: Vec<SelectableValue>) -> Self {
        self.available_values = values;
        self
    }

    /// Value the server marked as preselected, if any.
    pub fn preselected_value(&self) -> Option<&str> {
        self.available_values
            .iter()
            .find(|value| value.preselected)
            .map(|value| value.value.as_str())
    }
}

/// Current raw value of a parameter and its most recent validation error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub value: Option<String>,
    pub error: Option<String>,
}

impl ParameterValue {
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().is_none_or(str::is_empty)
    }
}

/// A specification paired with the value collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub specification: ParameterSpecification,
    pub value: ParameterValue,
}

/// Building block of a native alternative payment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativePaymentElement {
    /// Group of inputs the customer fills in.
    Form {
        #[serde(default)]
        label: Option<String>,
        parameters: Vec<ParameterSpecification>,
    },
    /// Static text explaining what the customer has to do next.
    Instruction { value: String },
    /// Asks the customer to explicitly confirm they completed an offline step.
    Confirmation { label: String },
}

impl NativePaymentElement {
    pub fn parameters(&self) -> &[ParameterSpecification] {
        match self {
            Self::Form { parameters, .. } => parameters,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativePaymentStatus {
    NextStepRequired,
    Pending,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePaymentRedirect {
    pub url: String,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Server answer to any native alternative payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePaymentResponse {
    pub status: NativePaymentStatus,
    #[serde(default)]
    pub elements: Vec<NativePaymentElement>,
    #[serde(default)]
    pub redirect: Option<NativePaymentRedirect>,
}

impl NativePaymentResponse {
    pub fn parameters(&self) -> impl Iterator<Item = &ParameterSpecification> {
        self.elements.iter().flat_map(NativePaymentElement::parameters)
    }
}

/// Identifies the payment a native request refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePaymentTarget {
    pub invoice_id: String,
    pub gateway_configuration_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePaymentSubmission {
    pub target: NativePaymentTarget,
    pub parameters: HashMap<String, String>,
}
