//! Normalization and validation of dynamic form parameters.
//!
//! Pure functions only: nothing here touches state or the network.

use crate::domain::parameter::{Parameter, ParameterSpecification, ParameterType};
use crate::error::InvalidField;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+$").expect("valid regex"));
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{1,3}\d*$").expect("valid regex"));

const CARD_NUMBER_LENGTH: (usize, usize) = (12, 19);

/// Canonical form of `value` for a parameter of type `kind`.
pub fn normalize(kind: ParameterType, value: &str) -> String {
    match kind {
        ParameterType::Digits | ParameterType::Otp | ParameterType::Card => {
            value.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
        }
        ParameterType::Phone => {
            let trimmed = value.trim();
            let mut normalized: String = trimmed
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if trimmed.starts_with('+') {
                normalized.insert(0, '+');
            }
            normalized
        }
        ParameterType::Email => value.trim().to_string(),
        ParameterType::Boolean => value.trim().to_ascii_lowercase(),
        ParameterType::Text | ParameterType::SingleSelect => value.to_string(),
    }
}

/// Validates an already normalized value, returning a customer-facing error
/// message on failure.
pub fn validate(specification: &ParameterSpecification, value: Option<&str>) -> Result<(), String> {
    let value = value.unwrap_or_default();
    if value.is_empty() {
        return if specification.required {
            Err("Parameter is required.".to_string())
        } else {
            Ok(())
        };
    }
    validate_length(specification, value)?;
    match specification.kind {
        ParameterType::Text => Ok(()),
        ParameterType::Digits | ParameterType::Otp => {
            if value.chars().all(|c| c.is_ascii_digit()) {
                Ok(())
            } else {
                Err("Value must contain only digits.".to_string())
            }
        }
        ParameterType::Email => {
            if EMAIL.is_match(value) {
                Ok(())
            } else {
                Err("Email format is invalid.".to_string())
            }
        }
        ParameterType::Phone => {
            if PHONE.is_match(value) {
                Ok(())
            } else {
                Err("Phone number format is invalid.".to_string())
            }
        }
        ParameterType::Card => {
            let (min, max) = CARD_NUMBER_LENGTH;
            let length = value.chars().count();
            if value.chars().all(|c| c.is_ascii_digit()) && (min..=max).contains(&length) {
                Ok(())
            } else {
                Err("Card number is invalid.".to_string())
            }
        }
        ParameterType::SingleSelect => {
            if specification
                .available_values
                .iter()
                .any(|option| option.value == value)
            {
                Ok(())
            } else {
                Err("Selected value is not available.".to_string())
            }
        }
        ParameterType::Boolean => match value {
            "true" | "false" => Ok(()),
            _ => Err("Value must be true or false.".to_string()),
        },
    }
}

fn validate_length(specification: &ParameterSpecification, value: &str) -> Result<(), String> {
    let length = value.chars().count();
    match (specification.min_length, specification.max_length) {
        (Some(min), Some(max)) if min == max && length != min => {
            Err(format!("Value must be exactly {min} characters long."))
        }
        (Some(min), _) if length < min => {
            Err(format!("Value must be at least {min} characters long."))
        }
        (_, Some(max)) if length > max => {
            Err(format!("Value must be at most {max} characters long."))
        }
        _ => Ok(()),
    }
}

/// Validates every parameter and collects the first error of each invalid one.
pub fn invalid_fields<'a>(parameters: impl IntoIterator<Item = &'a Parameter>) -> Vec<InvalidField> {
    parameters
        .into_iter()
        .filter_map(|parameter| {
            validate(&parameter.specification, parameter.value.value.as_deref())
                .err()
                .map(|message| InvalidField {
                    name: parameter.specification.key.clone(),
                    message,
                })
        })
        .collect()
}

/// Message shown for a parameter the server rejected without a usable
/// explanation.
pub fn rejected_value_message(kind: ParameterType) -> &'static str {
    match kind {
        ParameterType::Email => "Email is not valid.",
        ParameterType::Phone => "Phone number is not valid.",
        ParameterType::Card => "Card number is not valid.",
        ParameterType::Otp => "Code is not valid.",
        ParameterType::Digits => "Number is not valid.",
        ParameterType::SingleSelect => "Selected value is not valid.",
        ParameterType::Text | ParameterType::Boolean => "Value is not valid.",
    }
}
