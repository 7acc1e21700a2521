use crate::domain::card::{Card, CardScheme, IssuerInformation};
use crate::error::Failure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFieldId {
    Number,
    Expiration,
    Cvc,
    CardholderName,
    Country,
    Street1,
    Street2,
    City,
    State,
    PostalCode,
}

impl CardFieldId {
    pub fn is_address(self) -> bool {
        matches!(
            self,
            Self::Country | Self::Street1 | Self::Street2 | Self::City | Self::State | Self::PostalCode
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardField {
    pub value: String,
    pub is_valid: bool,
    pub is_required: bool,
}

impl CardField {
    pub fn new(value: impl Into<String>, is_required: bool) -> Self {
        Self {
            value: value.into(),
            is_valid: true,
            is_required,
        }
    }
}

/// Snapshot of the card form while it accepts input.
#[derive(Debug, Clone, PartialEq)]
pub struct CardCollectionStarted {
    pub fields: BTreeMap<CardFieldId, CardField>,
    /// Resolved by the remote issuer lookup.
    pub issuer: Option<IssuerInformation>,
    /// Derived locally from the leading digits while the lookup is pending.
    pub detected_scheme: Option<CardScheme>,
    pub preferred_scheme: Option<CardScheme>,
    pub saving_allowed: bool,
    pub should_save_card: bool,
    pub recent_error: Option<String>,
}

impl CardCollectionStarted {
    pub fn value(&self, id: CardFieldId) -> &str {
        self.fields
            .get(&id)
            .map(|field| field.value.as_str())
            .unwrap_or_default()
    }

    /// Non-empty value of an optional field.
    pub fn non_empty(&self, id: CardFieldId) -> Option<String> {
        let value = self.value(id).trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn are_fields_valid(&self) -> bool {
        self.fields.values().all(|field| field.is_valid)
    }

    /// Scheme used to format the security code and reported to the backend.
    pub fn effective_scheme(&self) -> Option<CardScheme> {
        self.preferred_scheme
            .or(self.issuer.as_ref().map(|issuer| issuer.scheme))
            .or(self.detected_scheme)
    }

    pub fn mark_invalid(&mut self, ids: &[CardFieldId]) {
        for id in ids {
            if let Some(field) = self.fields.get_mut(id) {
                field.is_valid = false;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CardCollectionState {
    Idle,
    Started(CardCollectionStarted),
    Tokenizing(CardCollectionStarted),
    Tokenized {
        card: Card,
        snapshot: CardCollectionStarted,
    },
    Failure(Failure),
}

impl CardCollectionState {
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Tokenized { .. } | Self::Failure(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Started(_) => "started",
            Self::Tokenizing(_) => "tokenizing",
            Self::Tokenized { .. } => "tokenized",
            Self::Failure(_) => "failure",
        }
    }
}

/// Results of background work, applied through [`super::CardCollectionSubflow::handle`].
#[derive(Debug)]
pub enum CardMessage {
    IssuerResolved {
        iin: String,
        result: Result<IssuerInformation, Failure>,
    },
    TokenizationFinished(Result<Card, Failure>),
}

/// Caller operations on an active card collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CardCommand {
    Update { field: CardFieldId, value: String },
    SetPreferredScheme(CardScheme),
    SetShouldSaveCard(bool),
    Tokenize,
}
