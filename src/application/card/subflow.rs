use super::address::{AddressUnit, collected_units};
use super::scheme::detect_scheme;
use super::state::{
    CardCollectionStarted, CardCollectionState, CardCommand, CardField, CardFieldId, CardMessage,
};
use crate::application::debounce::Debouncer;
use crate::application::formatting::{FieldFormatter, parse_expiration, security_code_length};
use crate::application::observer::{Dispatch, Observable, ObserverId};
use crate::config::CardCollectionConfiguration;
use crate::domain::card::{Card, CardContact, CardScheme, CardTokenizationRequest, IssuerInformation};
use crate::domain::event::CardCollectionEvent;
use crate::domain::payment_method::{BillingAddressCollectionMode, CardMethodConfiguration};
use crate::domain::ports::CardServiceRef;
use crate::error::{Failure, FailureKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IIN_LENGTH: usize = 6;
const INVALID_CARD_MESSAGE: &str = "Card details are not valid.";

/// Owner-supplied hooks of a card collection.
#[async_trait]
pub trait CardCollectionDelegate: Send + Sync {
    fn on_event(&self, _event: CardCollectionEvent) {}

    fn preferred_scheme(&self, issuer: &IssuerInformation) -> Option<CardScheme> {
        Some(issuer.scheme)
    }

    /// Whether a recoverable tokenization failure returns to input collection.
    fn should_continue_after_failure(&self, _failure: &Failure) -> bool {
        true
    }

    /// Post-processing run after tokenization succeeded; a failure here is
    /// handled exactly like a tokenization failure.
    async fn process_tokenized_card(
        &self,
        _card: &Card,
        _should_save: bool,
        _cancel: &CancellationToken,
    ) -> Result<(), Failure> {
        Ok(())
    }
}

pub type CardCompletion = Box<dyn FnOnce(Result<Card, Failure>) + Send>;

/// Collects card details, resolves the issuer and tokenizes the card.
///
/// All mutation happens through `&mut self`; background work (issuer
/// lookups and tokenization) reports back through the [`Dispatch`] given at
/// construction and must be fed to [`CardCollectionSubflow::handle`].
/// Dropping the sub-flow cancels every task it started.
pub struct CardCollectionSubflow {
    method: CardMethodConfiguration,
    configuration: CardCollectionConfiguration,
    cards: CardServiceRef,
    delegate: Arc<dyn CardCollectionDelegate>,
    dispatch: Dispatch<CardMessage>,
    state: Observable<CardCollectionState>,
    root: CancellationToken,
    issuer_lookup: Debouncer,
    iin: Option<String>,
    completion: Option<CardCompletion>,
}

impl CardCollectionSubflow {
    pub fn new(
        method: CardMethodConfiguration,
        configuration: CardCollectionConfiguration,
        cards: CardServiceRef,
        delegate: Arc<dyn CardCollectionDelegate>,
        dispatch: Dispatch<CardMessage>,
        completion: CardCompletion,
    ) -> Self {
        let root = CancellationToken::new();
        let issuer_lookup = Debouncer::new(configuration.issuer_lookup_debounce, root.clone());
        Self {
            method,
            configuration,
            cards,
            delegate,
            dispatch,
            state: Observable::new(CardCollectionState::Idle),
            root,
            issuer_lookup,
            iin: None,
            completion: Some(completion),
        }
    }

    pub fn state(&self) -> &CardCollectionState {
        self.state.get()
    }

    pub fn observe(
        &mut self,
        observer: impl FnMut(&CardCollectionState) + Send + 'static,
    ) -> ObserverId {
        self.state.observe(observer)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.state.unobserve(id)
    }

    pub fn start(&mut self) {
        if !matches!(self.state(), CardCollectionState::Idle) {
            debug!(state = self.state().name(), "Card collection already started, ignored");
            return;
        }
        let mut fields = BTreeMap::new();
        fields.insert(CardFieldId::Number, CardField::new("", true));
        fields.insert(CardFieldId::Expiration, CardField::new("", true));
        if self.method.cvc_required {
            fields.insert(CardFieldId::Cvc, CardField::new("", true));
        }
        if self.method.cardholder_name_required {
            fields.insert(CardFieldId::CardholderName, CardField::new("", true));
        }
        let mut started = CardCollectionStarted {
            fields,
            issuer: None,
            detected_scheme: None,
            preferred_scheme: None,
            saving_allowed: self.method.saving_allowed,
            should_save_card: false,
            recent_error: None,
        };
        let defaults = self.configuration.default_address.clone().unwrap_or_default();
        let country = defaults
            .country_code
            .clone()
            .or_else(|| self.method.billing_address.restrict_to_country_codes.first().cloned())
            .unwrap_or_default()
            .to_ascii_uppercase();
        let prefilled = [
            (CardFieldId::Street1, defaults.address1),
            (CardFieldId::Street2, defaults.address2),
            (CardFieldId::City, defaults.city),
            (CardFieldId::State, defaults.state),
            (CardFieldId::PostalCode, defaults.zip),
        ];
        self.rebuild_address(&mut started, &country);
        for (id, value) in prefilled {
            if let (Some(field), Some(value)) = (started.fields.get_mut(&id), value) {
                field.value = value;
            }
        }
        self.set_state(CardCollectionState::Started(started));
        self.delegate.on_event(CardCollectionEvent::DidStart);
    }

    pub fn execute(&mut self, command: CardCommand) {
        match command {
            CardCommand::Update { field, value } => self.update(field, &value),
            CardCommand::SetPreferredScheme(scheme) => self.set_preferred_scheme(scheme),
            CardCommand::SetShouldSaveCard(should_save) => self.set_should_save_card(should_save),
            CardCommand::Tokenize => self.tokenize(),
        }
    }

    /// Applies the result of a background operation.
    pub fn handle(&mut self, message: CardMessage) {
        match message {
            CardMessage::IssuerResolved { iin, result } => self.did_resolve_issuer(iin, result),
            CardMessage::TokenizationFinished(result) => self.did_finish_tokenization(result),
        }
    }

    pub fn update(&mut self, id: CardFieldId, value: &str) {
        let CardCollectionState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring card field update");
            return;
        };
        let Some(field) = current.fields.get(&id) else {
            debug!(field = ?id, "Ignoring update of a field that is not collected");
            return;
        };
        let formatted = self.formatter(id, current).format(value);
        if formatted == field.value {
            return;
        }
        let mut started = current.clone();
        if let Some(field) = started.fields.get_mut(&id) {
            field.value = formatted.clone();
            field.is_valid = true;
        }
        match id {
            CardFieldId::Number => self.number_changed(&mut started),
            CardFieldId::Country => self.rebuild_address(&mut started, &formatted),
            _ => {}
        }
        if started.are_fields_valid() {
            started.recent_error = None;
        }
        self.set_state(CardCollectionState::Started(started));
        self.delegate.on_event(CardCollectionEvent::ParametersChanged);
    }

    pub fn set_preferred_scheme(&mut self, scheme: CardScheme) {
        let CardCollectionState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring preferred scheme change");
            return;
        };
        let offered = current.issuer.as_ref().is_some_and(|issuer| issuer.offers(scheme));
        if !offered || current.preferred_scheme == Some(scheme) {
            debug!(?scheme, "Preferred scheme is unavailable or already selected");
            return;
        }
        let mut started = current.clone();
        started.preferred_scheme = Some(scheme);
        reformat_security_code(&mut started);
        self.set_state(CardCollectionState::Started(started));
    }

    pub fn set_should_save_card(&mut self, should_save: bool) {
        match self.state() {
            CardCollectionState::Started(current)
                if current.saving_allowed && current.should_save_card != should_save =>
            {
                let mut started = current.clone();
                started.should_save_card = should_save;
                self.set_state(CardCollectionState::Started(started));
            }
            state => debug!(state = state.name(), "Ignoring card saving change"),
        }
    }

    /// Tokenizes the card once every field passes local validation.
    pub fn tokenize(&mut self) {
        let CardCollectionState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring tokenization request");
            return;
        };
        if !current.are_fields_valid() {
            debug!("Card fields have outstanding errors, tokenization ignored");
            return;
        }
        let mut started = current.clone();
        let invalid = self.locally_invalid_fields(&started);
        if !invalid.is_empty() {
            debug!(fields = ?invalid, "Card details failed local validation");
            started.mark_invalid(&invalid);
            started.recent_error = Some(INVALID_CARD_MESSAGE.to_string());
            self.set_state(CardCollectionState::Started(started));
            return;
        }
        let Some(request) = self.tokenization_request(&started) else {
            return;
        };
        let should_save = started.should_save_card;
        started.recent_error = None;
        self.set_state(CardCollectionState::Tokenizing(started));
        self.delegate.on_event(CardCollectionEvent::WillTokenize);

        let token = self.root.child_token();
        let cards = self.cards.clone();
        let delegate = self.delegate.clone();
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = async {
                    let card = cards.tokenize(request, &token).await?;
                    delegate.process_tokenized_card(&card, should_save, &token).await?;
                    Ok::<_, Failure>(card)
                } => result,
            };
            if !token.is_cancelled() {
                dispatch(CardMessage::TokenizationFinished(result));
            }
        });
    }

    /// Fails the collection with a cancellation unless it already finished.
    pub fn cancel(&mut self) {
        if self.state().is_sink() {
            debug!("Card collection already finished, cancel ignored");
            return;
        }
        self.fail(Failure::cancelled());
    }

    fn formatter(&self, id: CardFieldId, started: &CardCollectionStarted) -> FieldFormatter {
        match id {
            CardFieldId::Number => FieldFormatter::CardNumber,
            CardFieldId::Expiration => FieldFormatter::Expiration,
            CardFieldId::Cvc => FieldFormatter::SecurityCode {
                scheme: started.effective_scheme(),
            },
            CardFieldId::Country => FieldFormatter::UppercaseCode,
            _ => FieldFormatter::Plain,
        }
    }

    fn number_changed(&mut self, started: &mut CardCollectionStarted) {
        let digits: String = started
            .value(CardFieldId::Number)
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        started.detected_scheme = detect_scheme(&digits);
        let iin = digits.get(..IIN_LENGTH).map(str::to_string);
        if iin != self.iin {
            self.iin = iin.clone();
            started.issuer = None;
            started.preferred_scheme = None;
            self.issuer_lookup.cancel();
            if let Some(iin) = iin {
                self.schedule_issuer_lookup(iin);
            }
        }
        reformat_security_code(started);
    }

    fn schedule_issuer_lookup(&mut self, iin: String) {
        let cards = self.cards.clone();
        let dispatch = self.dispatch.clone();
        self.issuer_lookup.schedule(move |token| async move {
            let result = cards.lookup_issuer(&iin, &token).await;
            if !token.is_cancelled() {
                dispatch(CardMessage::IssuerResolved { iin, result });
            }
        });
    }

    fn did_resolve_issuer(&mut self, iin: String, result: Result<IssuerInformation, Failure>) {
        let CardCollectionState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring issuer information");
            return;
        };
        if self.iin.as_deref() != Some(iin.as_str()) {
            debug!(%iin, "Ignoring issuer information for outdated IIN");
            return;
        }
        let issuer = match result {
            Ok(issuer) => issuer,
            Err(failure) => {
                debug!(%failure, "Issuer lookup failed, ignored");
                return;
            }
        };
        let mut started = current.clone();
        started.preferred_scheme = self
            .delegate
            .preferred_scheme(&issuer)
            .filter(|scheme| issuer.offers(*scheme))
            .or(Some(issuer.scheme));
        started.issuer = Some(issuer);
        reformat_security_code(&mut started);
        self.set_state(CardCollectionState::Started(started));
    }

    fn did_finish_tokenization(&mut self, result: Result<Card, Failure>) {
        let CardCollectionState::Tokenizing(snapshot) = self.state() else {
            debug!(state = self.state().name(), "Ignoring tokenization result");
            return;
        };
        let snapshot = snapshot.clone();
        match result {
            Ok(card) => {
                info!(card_id = %card.id, "Did tokenize card");
                self.set_state(CardCollectionState::Tokenized {
                    card: card.clone(),
                    snapshot,
                });
                self.delegate.on_event(CardCollectionEvent::DidTokenize);
                self.complete(Ok(card));
            }
            Err(failure) => {
                let invalid = invalid_fields_for(&failure, &snapshot);
                let recoverable = !failure.is_cancellation()
                    && (!invalid.is_empty() || failure.kind() == FailureKind::Validation);
                if recoverable && self.delegate.should_continue_after_failure(&failure) {
                    warn!(%failure, fields = ?invalid, "Card tokenization failed, awaiting corrections");
                    let mut started = snapshot;
                    started.mark_invalid(&invalid);
                    started.recent_error =
                        Some(failure.message.clone().unwrap_or_else(|| INVALID_CARD_MESSAGE.to_string()));
                    self.set_state(CardCollectionState::Started(started));
                } else {
                    self.fail(failure);
                }
            }
        }
    }

    fn locally_invalid_fields(&self, started: &CardCollectionStarted) -> Vec<CardFieldId> {
        let allowed_countries = &self.method.billing_address.restrict_to_country_codes;
        started
            .fields
            .iter()
            .filter(|(id, field)| {
                let value = field.value.trim();
                if value.is_empty() {
                    return field.is_required;
                }
                match id {
                    CardFieldId::Number => {
                        let length = value.chars().filter(char::is_ascii_digit).count();
                        !(12..=19).contains(&length)
                    }
                    CardFieldId::Expiration => parse_expiration(value).is_none(),
                    CardFieldId::Cvc => {
                        let max = security_code_length(started.effective_scheme());
                        !(3..=max).contains(&value.len())
                    }
                    CardFieldId::Country => {
                        !allowed_countries.is_empty()
                            && !allowed_countries.iter().any(|code| code.eq_ignore_ascii_case(value))
                    }
                    _ => false,
                }
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn tokenization_request(&self, started: &CardCollectionStarted) -> Option<CardTokenizationRequest> {
        let (exp_month, exp_year) = parse_expiration(started.value(CardFieldId::Expiration))?;
        let defaults = self
            .configuration
            .attach_defaults_to_payment_method
            .then_some(self.configuration.default_address.as_ref())
            .flatten();
        // Collected values win; defaults also fill units that are not collected.
        let value = |id: CardFieldId, default: Option<&Option<String>>| {
            started
                .non_empty(id)
                .or_else(|| default.and_then(Option::clone))
        };
        let contact = CardContact {
            address1: value(CardFieldId::Street1, defaults.map(|d| &d.address1)),
            address2: value(CardFieldId::Street2, defaults.map(|d| &d.address2)),
            city: value(CardFieldId::City, defaults.map(|d| &d.city)),
            state: value(CardFieldId::State, defaults.map(|d| &d.state)),
            zip: value(CardFieldId::PostalCode, defaults.map(|d| &d.zip)),
            country_code: value(CardFieldId::Country, defaults.map(|d| &d.country_code)),
        };
        let contact = (!contact.is_empty()).then_some(contact);
        Some(CardTokenizationRequest {
            number: started
                .value(CardFieldId::Number)
                .chars()
                .filter(char::is_ascii_digit)
                .collect(),
            exp_month,
            exp_year,
            cvc: started.non_empty(CardFieldId::Cvc),
            name: started.non_empty(CardFieldId::CardholderName),
            contact,
            preferred_scheme: started.preferred_scheme,
            metadata: HashMap::new(),
        })
    }

    /// Replaces the address fields with the ones collected for `country`,
    /// preserving values the customer already typed.
    fn rebuild_address(&self, started: &mut CardCollectionStarted, country: &str) {
        let mode = self.method.billing_address.collection_mode;
        let previous: HashMap<CardFieldId, CardField> = started
            .fields
            .iter()
            .filter(|(id, _)| id.is_address())
            .map(|(id, field)| (*id, field.clone()))
            .collect();
        started.fields.retain(|id, _| !id.is_address());
        if mode == BillingAddressCollectionMode::Never {
            return;
        }
        let mut wanted = vec![(CardFieldId::Country, true)];
        for unit in collected_units(mode, country) {
            match unit {
                AddressUnit::Street => {
                    wanted.push((CardFieldId::Street1, true));
                    wanted.push((CardFieldId::Street2, false));
                }
                AddressUnit::City => wanted.push((CardFieldId::City, true)),
                AddressUnit::State => wanted.push((CardFieldId::State, true)),
                AddressUnit::Postcode => wanted.push((CardFieldId::PostalCode, true)),
            }
        }
        for (id, is_required) in wanted {
            let mut field = previous.get(&id).cloned().unwrap_or_default();
            field.is_required = is_required;
            if id == CardFieldId::Country {
                field.value = country.to_string();
                field.is_valid = true;
            } else if previous.get(&id).is_none() {
                field.is_valid = true;
            }
            started.fields.insert(id, field);
        }
    }

    fn fail(&mut self, failure: Failure) {
        warn!(%failure, "Card collection failed");
        self.root.cancel();
        self.set_state(CardCollectionState::Failure(failure.clone()));
        self.delegate.on_event(CardCollectionEvent::DidFail(failure.clone()));
        self.complete(Err(failure));
    }

    fn complete(&mut self, result: Result<Card, Failure>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }

    fn set_state(&mut self, state: CardCollectionState) {
        if self.state().is_sink() {
            debug!(new_state = state.name(), "Card collection is finished, transition ignored");
            return;
        }
        self.state.set(state);
    }
}

impl Drop for CardCollectionSubflow {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn reformat_security_code(started: &mut CardCollectionStarted) {
    let formatter = FieldFormatter::SecurityCode {
        scheme: started.effective_scheme(),
    };
    if let Some(field) = started.fields.get_mut(&CardFieldId::Cvc) {
        field.value = formatter.format(&field.value);
    }
}

/// Maps a tokenization failure back to the fields the customer has to fix.
fn invalid_fields_for(failure: &Failure, started: &CardCollectionStarted) -> Vec<CardFieldId> {
    use CardFieldId::*;
    let mut ids: Vec<CardFieldId> = match failure.code.as_str() {
        "request.card.invalid" | "card.invalid" => vec![Number, Expiration, Cvc],
        "card.invalid-number" | "card.missing-number" => vec![Number],
        "card.invalid-expiry-date"
        | "card.missing-expiry"
        | "card.invalid-expiry-month"
        | "card.invalid-expiry-year" => vec![Expiration],
        "card.bad-track-data" => vec![Expiration, Cvc],
        "card.missing-cvc" | "card.failed-cvc" | "card.failed-cvc-and-avs" | "card.invalid-cvc" => {
            vec![Cvc]
        }
        "card.invalid-name" => vec![CardholderName],
        "card.invalid-zip" | "card.failed-avs-postal" => vec![PostalCode],
        _ => Vec::new(),
    };
    ids.extend(failure.invalid_fields.iter().filter_map(|field| {
        match field.name.trim_start_matches("card.") {
            "number" => Some(Number),
            "exp_month" | "exp_year" | "expiration" => Some(Expiration),
            "cvc" | "cvc2" => Some(Cvc),
            "name" => Some(CardholderName),
            "address1" => Some(Street1),
            "address2" => Some(Street2),
            "city" => Some(City),
            "state" => Some(State),
            "zip" => Some(PostalCode),
            "country_code" => Some(Country),
            _ => None,
        }
    }));
    ids.sort();
    ids.dedup();
    ids.retain(|id| started.fields.contains_key(id));
    ids
}
