use crate::application::card::scheme::detect_scheme;
use crate::domain::card::{Card, CardScheme, CardTokenizationRequest, IssuerInformation};
use crate::domain::event::CheckoutEvent;
use crate::domain::invoice::{
    CustomerAction, InvalidationReason, Invoice, InvoiceAuthorizationRequest, InvoiceRequest,
    InvoiceTransaction, TransactionStatus,
};
use crate::domain::parameter::{
    NativePaymentResponse, NativePaymentStatus, NativePaymentSubmission, NativePaymentTarget,
    ParameterSpecification,
};
use crate::domain::payment_method::{PaymentMethod, WalletMethod};
use crate::domain::ports::{
    AlternativePaymentAuthenticator, CardService, CheckoutDelegate, CustomerActionHandler,
    InvoiceService, ServiceResult, WalletService,
};
use crate::error::Failure;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated round trip that gives up as soon as `cancel` fires.
async fn round_trip(latency: Duration, cancel: &CancellationToken) -> ServiceResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Failure::cancelled()),
        _ = tokio::time::sleep(latency) => Ok(()),
    }
}

#[derive(Default)]
struct InvoiceBackend {
    invoices: HashMap<String, Invoice>,
    customer_action: Option<CustomerAction>,
    authorizations: VecDeque<ServiceResult<()>>,
    native_steps: VecDeque<ServiceResult<NativePaymentResponse>>,
    submissions: VecDeque<ServiceResult<NativePaymentResponse>>,
    captures: VecDeque<ServiceResult<NativePaymentResponse>>,
    fetched: Vec<String>,
    authorization_requests: Vec<InvoiceAuthorizationRequest>,
    submitted: Vec<NativePaymentSubmission>,
    capture_attempts: usize,
}

/// Scripted invoice backend.
///
/// Invoices are served by id. Native payment answers and authorization
/// results are consumed in the order they were scripted; once a script runs
/// dry authorizations succeed, submissions and captures report `pending`.
/// Clones share the same backend so tests can keep a probe.
#[derive(Default, Clone)]
pub struct InMemoryInvoiceService {
    backend: Arc<Mutex<InvoiceBackend>>,
    latency: Duration,
}

impl InMemoryInvoiceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invoice(self, invoice: Invoice) -> Self {
        lock(&self.backend)
            .invoices
            .insert(invoice.id.clone(), invoice);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requires `action` to be resolved before every authorization.
    pub fn with_customer_action(self, action: CustomerAction) -> Self {
        lock(&self.backend).customer_action = Some(action);
        self
    }

    pub fn with_authorization_result(self, result: ServiceResult<()>) -> Self {
        lock(&self.backend).authorizations.push_back(result);
        self
    }

    pub fn with_native_step(self, result: ServiceResult<NativePaymentResponse>) -> Self {
        lock(&self.backend).native_steps.push_back(result);
        self
    }

    pub fn with_submission_result(self, result: ServiceResult<NativePaymentResponse>) -> Self {
        lock(&self.backend).submissions.push_back(result);
        self
    }

    pub fn with_capture_result(self, result: ServiceResult<NativePaymentResponse>) -> Self {
        lock(&self.backend).captures.push_back(result);
        self
    }

    /// Ids of every invoice fetched so far, in order.
    pub fn fetched_invoices(&self) -> Vec<String> {
        lock(&self.backend).fetched.clone()
    }

    pub fn authorizations(&self) -> Vec<InvoiceAuthorizationRequest> {
        lock(&self.backend).authorization_requests.clone()
    }

    pub fn submissions(&self) -> Vec<NativePaymentSubmission> {
        lock(&self.backend).submitted.clone()
    }

    pub fn capture_attempts(&self) -> usize {
        lock(&self.backend).capture_attempts
    }
}

fn pending() -> NativePaymentResponse {
    NativePaymentResponse {
        status: NativePaymentStatus::Pending,
        elements: Vec::new(),
        redirect: None,
    }
}

#[async_trait]
impl InvoiceService for InMemoryInvoiceService {
    async fn fetch_invoice(
        &self,
        request: &InvoiceRequest,
        cancel: &CancellationToken,
    ) -> ServiceResult<Invoice> {
        round_trip(self.latency, cancel).await?;
        let mut backend = lock(&self.backend);
        backend.fetched.push(request.invoice_id.clone());
        backend
            .invoices
            .get(&request.invoice_id)
            .cloned()
            .ok_or_else(|| {
                Failure::new(
                    "resource.invoice.not-found",
                    Some(format!("Invoice {} does not exist.", request.invoice_id)),
                )
            })
    }

    async fn authorize_invoice(
        &self,
        request: InvoiceAuthorizationRequest,
        customer_actions: &dyn CustomerActionHandler,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        round_trip(self.latency, cancel).await?;
        let invoice_id = request.invoice_id.clone();
        let action = {
            let mut backend = lock(&self.backend);
            backend.authorization_requests.push(request);
            backend.customer_action.clone()
        };
        if let Some(action) = action {
            debug!(kind = %action.kind, "Authorization requires customer action");
            customer_actions.handle(action, cancel).await?;
        }
        let mut backend = lock(&self.backend);
        let result = backend.authorizations.pop_front().unwrap_or(Ok(()));
        if result.is_ok()
            && let Some(invoice) = backend.invoices.get_mut(&invoice_id)
        {
            invoice.transaction = Some(InvoiceTransaction {
                status: TransactionStatus::Authorized,
            });
        }
        result
    }

    async fn native_alternative_payment(
        &self,
        target: &NativePaymentTarget,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse> {
        round_trip(self.latency, cancel).await?;
        lock(&self.backend).native_steps.pop_front().unwrap_or_else(|| {
            Err(Failure::new(
                "resource.gateway-configuration.not-found",
                Some(format!(
                    "Gateway configuration {} is not available.",
                    target.gateway_configuration_id
                )),
            ))
        })
    }

    async fn initiate_native_alternative_payment(
        &self,
        submission: NativePaymentSubmission,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse> {
        round_trip(self.latency, cancel).await?;
        let mut backend = lock(&self.backend);
        backend.submitted.push(submission);
        backend.submissions.pop_front().unwrap_or_else(|| Ok(pending()))
    }

    async fn capture_native_alternative_payment(
        &self,
        _target: &NativePaymentTarget,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse> {
        round_trip(self.latency, cancel).await?;
        let mut backend = lock(&self.backend);
        backend.capture_attempts += 1;
        backend.captures.pop_front().unwrap_or_else(|| Ok(pending()))
    }
}

#[derive(Default)]
struct CardBackend {
    issuers: HashMap<String, IssuerInformation>,
    tokenization_failure: Option<Failure>,
    issuer_lookups: usize,
    tokenizations: Vec<CardTokenizationRequest>,
}

/// Card backend resolving issuers from a fixed IIN table.
#[derive(Default, Clone)]
pub struct InMemoryCardService {
    backend: Arc<Mutex<CardBackend>>,
    latency: Duration,
}

impl InMemoryCardService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(self, iin: impl Into<String>, issuer: IssuerInformation) -> Self {
        lock(&self.backend).issuers.insert(iin.into(), issuer);
        self
    }

    /// Makes every tokenization fail with `failure`.
    pub fn failing_tokenization(self, failure: Failure) -> Self {
        lock(&self.backend).tokenization_failure = Some(failure);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn issuer_lookups(&self) -> usize {
        lock(&self.backend).issuer_lookups
    }

    pub fn tokenizations(&self) -> usize {
        lock(&self.backend).tokenizations.len()
    }

    pub fn tokenization_requests(&self) -> Vec<CardTokenizationRequest> {
        lock(&self.backend).tokenizations.clone()
    }
}

#[async_trait]
impl CardService for InMemoryCardService {
    async fn tokenize(
        &self,
        request: CardTokenizationRequest,
        cancel: &CancellationToken,
    ) -> ServiceResult<Card> {
        let (failure, sequence) = {
            let mut backend = lock(&self.backend);
            backend.tokenizations.push(request.clone());
            (backend.tokenization_failure.clone(), backend.tokenizations.len())
        };
        round_trip(self.latency, cancel).await?;
        if let Some(failure) = failure {
            return Err(failure);
        }
        let scheme = request
            .preferred_scheme
            .or_else(|| detect_scheme(&request.number))
            .unwrap_or(CardScheme::Unknown);
        let last4_digits = request
            .number
            .get(request.number.len().saturating_sub(4)..)
            .unwrap_or_default()
            .to_string();
        Ok(Card {
            id: format!("card_{sequence}"),
            scheme,
            co_scheme: None,
            last4_digits,
            exp_month: request.exp_month,
            exp_year: request.exp_year,
        })
    }

    async fn lookup_issuer(
        &self,
        iin: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<IssuerInformation> {
        round_trip(self.latency, cancel).await?;
        let mut backend = lock(&self.backend);
        backend.issuer_lookups += 1;
        backend.issuers.get(iin).cloned().ok_or_else(|| {
            Failure::new(
                "resource.iin.not-found",
                Some(format!("No issuer is known for {iin}.")),
            )
        })
    }
}

/// Authenticator answering every redirect with a scripted gateway token.
#[derive(Clone)]
pub struct InMemoryAuthenticator {
    results: Arc<Mutex<VecDeque<ServiceResult<String>>>>,
    urls: Arc<Mutex<Vec<String>>>,
    latency: Duration,
}

impl Default for InMemoryAuthenticator {
    fn default() -> Self {
        Self {
            results: Arc::default(),
            urls: Arc::default(),
            latency: Duration::ZERO,
        }
    }
}

impl InMemoryAuthenticator {
    pub const DEFAULT_TOKEN: &'static str = "gway_req_authenticated";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, result: ServiceResult<String>) -> Self {
        lock(&self.results).push_back(result);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn authenticated_urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }
}

#[async_trait]
impl AlternativePaymentAuthenticator for InMemoryAuthenticator {
    async fn authenticate(
        &self,
        redirect_url: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        lock(&self.urls).push(redirect_url.to_string());
        round_trip(self.latency, cancel).await?;
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Ok(Self::DEFAULT_TOKEN.to_string()))
    }
}

/// Wallet that is either always or never available.
#[derive(Debug, Clone)]
pub struct InMemoryWalletService {
    available: bool,
    result: ServiceResult<String>,
}

impl Default for InMemoryWalletService {
    fn default() -> Self {
        Self {
            available: true,
            result: Ok("wallet_token".to_string()),
        }
    }
}

impl InMemoryWalletService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            result: Err(failure),
            ..Self::default()
        }
    }
}

#[async_trait]
impl WalletService for InMemoryWalletService {
    fn can_make_payments(&self, _method: &WalletMethod) -> bool {
        self.available
    }

    async fn tokenize(
        &self,
        _method: &WalletMethod,
        _invoice: &Invoice,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        round_trip(Duration::ZERO, cancel).await?;
        self.result.clone()
    }
}

/// Customer action handler that approves every challenge.
#[derive(Debug, Default, Clone)]
pub struct ApprovingCustomerActions {
    handled: Arc<Mutex<Vec<CustomerAction>>>,
}

impl ApprovingCustomerActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handled(&self) -> Vec<CustomerAction> {
        lock(&self.handled).clone()
    }
}

#[async_trait]
impl CustomerActionHandler for ApprovingCustomerActions {
    async fn handle(
        &self,
        action: CustomerAction,
        _cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        let value = format!("{}:approved", action.kind);
        lock(&self.handled).push(action);
        Ok(value)
    }
}

#[derive(Default)]
struct DelegateRecord {
    events: Vec<CheckoutEvent>,
    invalidations: Vec<InvalidationReason>,
    authorized_methods: Vec<String>,
}

/// Checkout delegate that records what it observes and answers from a
/// script.
#[derive(Clone)]
pub struct RecordingCheckoutDelegate {
    record: Arc<Mutex<DelegateRecord>>,
    continue_after_failure: bool,
    new_invoices: Arc<Mutex<VecDeque<InvoiceRequest>>>,
    default_values: HashMap<String, String>,
}

impl Default for RecordingCheckoutDelegate {
    fn default() -> Self {
        Self {
            record: Arc::default(),
            continue_after_failure: true,
            new_invoices: Arc::default(),
            default_values: HashMap::new(),
        }
    }
}

impl RecordingCheckoutDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every payment failure terminal.
    pub fn stopping_after_failure(mut self) -> Self {
        self.continue_after_failure = false;
        self
    }

    /// Queues a replacement invoice handed out on the next invalidation.
    pub fn with_new_invoice(self, request: InvoiceRequest) -> Self {
        lock(&self.new_invoices).push_back(request);
        self
    }

    pub fn with_default_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_values.insert(key.into(), value.into());
        self
    }

    pub fn events(&self) -> Vec<CheckoutEvent> {
        lock(&self.record).events.clone()
    }

    pub fn invalidations(&self) -> Vec<InvalidationReason> {
        lock(&self.record).invalidations.clone()
    }

    /// Ids of the payment methods invoices were authorized with.
    pub fn authorized_methods(&self) -> Vec<String> {
        lock(&self.record).authorized_methods.clone()
    }
}

#[async_trait]
impl CheckoutDelegate for RecordingCheckoutDelegate {
    fn on_event(&self, event: &CheckoutEvent) {
        lock(&self.record).events.push(event.clone());
    }

    fn should_continue_after_failure(&self, _failure: &Failure) -> bool {
        self.continue_after_failure
    }

    async fn new_invoice(
        &self,
        _current: &Invoice,
        reason: &InvalidationReason,
    ) -> Option<InvoiceRequest> {
        lock(&self.record).invalidations.push(reason.clone());
        lock(&self.new_invoices).pop_front()
    }

    async fn default_values(
        &self,
        _payment_method_id: &str,
        parameters: &[ParameterSpecification],
    ) -> HashMap<String, String> {
        parameters
            .iter()
            .filter_map(|parameter| {
                self.default_values
                    .get(&parameter.key)
                    .map(|value| (parameter.key.clone(), value.clone()))
            })
            .collect()
    }

    async fn will_authorize_invoice(
        &self,
        _request: &mut InvoiceAuthorizationRequest,
        payment_method: &PaymentMethod,
    ) {
        lock(&self.record)
            .authorized_methods
            .push(payment_method.id().to_string());
    }
}
