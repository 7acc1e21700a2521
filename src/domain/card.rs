use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Card network identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardScheme {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Jcb,
    DinersClub,
    UnionPay,
    Maestro,
    Elo,
    CarteBancaire,
    #[serde(other)]
    Unknown,
}

/// Issuer details resolved from a card's leading digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerInformation {
    pub scheme: CardScheme,
    #[serde(default)]
    pub co_scheme: Option<CardScheme>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
}

impl IssuerInformation {
    pub fn new(scheme: CardScheme) -> Self {
        Self {
            scheme,
            co_scheme: None,
            card_type: None,
            bank_name: None,
        }
    }

    pub fn with_co_scheme(mut self, co_scheme: CardScheme) -> Self {
        self.co_scheme = Some(co_scheme);
        self
    }

    pub fn offers(&self, scheme: CardScheme) -> bool {
        self.scheme == scheme || self.co_scheme == Some(scheme)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardContact {
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl CardContact {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTokenizationRequest {
    pub number: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub cvc: Option<String>,
    pub name: Option<String>,
    pub contact: Option<CardContact>,
    pub preferred_scheme: Option<CardScheme>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Tokenized card returned by the card service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub scheme: CardScheme,
    #[serde(default)]
    pub co_scheme: Option<CardScheme>,
    pub last4_digits: String,
    pub exp_month: u8,
    pub exp_year: u16,
}
