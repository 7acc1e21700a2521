use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A payment method offered by an invoice.
///
/// Methods are identified by an `id` that is unique within the invoice. Types
/// this crate does not understand are kept as [`PaymentMethod::Unknown`] so
/// that one unexpected entry does not invalidate the whole invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPaymentMethod", into = "RawPaymentMethod")]
pub enum PaymentMethod {
    Card(CardMethod),
    Wallet(WalletMethod),
    AlternativePayment(AlternativePaymentMethod),
    NativeAlternativePayment(NativeAlternativePaymentMethod),
    CustomerToken(CustomerTokenMethod),
    Unknown { id: String, kind: String },
}

impl PaymentMethod {
    pub fn id(&self) -> &str {
        match self {
            Self::Card(method) => &method.id,
            Self::Wallet(method) => &method.id,
            Self::AlternativePayment(method) => &method.id,
            Self::NativeAlternativePayment(method) => &method.id,
            Self::CustomerToken(method) => &method.id,
            Self::Unknown { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Card(_) => "card",
            Self::Wallet(_) => "wallet",
            Self::AlternativePayment(_) => "alternative_payment",
            Self::NativeAlternativePayment(_) => "native_alternative_payment",
            Self::CustomerToken(_) => "customer_token",
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// Whether the customer may opt in to persisting this instrument from the
    /// method list. Card saving is handled by the card collection itself.
    pub fn supports_saving(&self) -> bool {
        match self {
            Self::AlternativePayment(method) => method.configuration.saving_allowed,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMethod {
    pub id: String,
    #[serde(default)]
    pub configuration: CardMethodConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMethodConfiguration {
    #[serde(default = "default_true")]
    pub cvc_required: bool,
    #[serde(default)]
    pub cardholder_name_required: bool,
    #[serde(default)]
    pub billing_address: BillingAddressConfiguration,
    #[serde(default)]
    pub saving_allowed: bool,
}

impl Default for CardMethodConfiguration {
    fn default() -> Self {
        Self {
            cvc_required: true,
            cardholder_name_required: false,
            billing_address: BillingAddressConfiguration::default(),
            saving_allowed: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingAddressConfiguration {
    #[serde(default)]
    pub collection_mode: BillingAddressCollectionMode,
    /// ISO country codes the customer may pick from; empty means any.
    #[serde(default)]
    pub restrict_to_country_codes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingAddressCollectionMode {
    Never,
    #[default]
    Automatic,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMethod {
    pub id: String,
    pub configuration: WalletConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletConfiguration {
    pub merchant_id: String,
    pub country_code: String,
    #[serde(default)]
    pub supported_networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativePaymentMethod {
    pub id: String,
    pub configuration: AlternativePaymentConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativePaymentConfiguration {
    pub gateway_configuration_id: String,
    pub redirect_url: String,
    #[serde(default)]
    pub saving_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAlternativePaymentMethod {
    pub id: String,
    pub configuration: NativeAlternativePaymentMethodConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAlternativePaymentMethodConfiguration {
    pub gateway_configuration_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerTokenMethod {
    pub id: String,
    pub configuration: CustomerTokenConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerTokenConfiguration {
    pub customer_token_id: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub deleting_allowed: bool,
}

fn default_true() -> bool {
    true
}

/// Wire shape shared by every method: `{ "id", "type", "configuration" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPaymentMethod {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    configuration: serde_json::Value,
}

impl TryFrom<RawPaymentMethod> for PaymentMethod {
    type Error = serde_json::Error;

    fn try_from(raw: RawPaymentMethod) -> Result<Self, Self::Error> {
        fn configuration<T: DeserializeOwned + Default>(
            value: serde_json::Value,
        ) -> Result<T, serde_json::Error> {
            if value.is_null() {
                Ok(T::default())
            } else {
                serde_json::from_value(value)
            }
        }

        let RawPaymentMethod {
            id,
            kind,
            configuration: value,
        } = raw;
        let method = match kind.as_str() {
            "card" => Self::Card(CardMethod {
                id,
                configuration: configuration(value)?,
            }),
            "wallet" => Self::Wallet(WalletMethod {
                id,
                configuration: serde_json::from_value(value)?,
            }),
            "alternative_payment" => Self::AlternativePayment(AlternativePaymentMethod {
                id,
                configuration: serde_json::from_value(value)?,
            }),
            "native_alternative_payment" => {
                Self::NativeAlternativePayment(NativeAlternativePaymentMethod {
                    id,
                    configuration: serde_json::from_value(value)?,
                })
            }
            "customer_token" => Self::CustomerToken(CustomerTokenMethod {
                id,
                configuration: serde_json::from_value(value)?,
            }),
            _ => {
                warn!(method_id = %id, kind = %kind, "Unrecognized payment method type");
                Self::Unknown { id, kind }
            }
        };
        Ok(method)
    }
}

impl From<PaymentMethod> for RawPaymentMethod {
    fn from(method: PaymentMethod) -> Self {
        let kind = method.kind().to_string();
        let (id, configuration) = match method {
            PaymentMethod::Card(m) => (m.id, serde_json::to_value(m.configuration)),
            PaymentMethod::Wallet(m) => (m.id, serde_json::to_value(m.configuration)),
            PaymentMethod::AlternativePayment(m) => (m.id, serde_json::to_value(m.configuration)),
            PaymentMethod::NativeAlternativePayment(m) => {
                (m.id, serde_json::to_value(m.configuration))
            }
            PaymentMethod::CustomerToken(m) => (m.id, serde_json::to_value(m.configuration)),
            PaymentMethod::Unknown { id, .. } => (id, Ok(serde_json::Value::Null)),
        };
        Self {
            id,
            kind,
            configuration: configuration.unwrap_or_default(),
        }
    }
}
