//! Persistence layer.
//!
//! Provides the entity model and a backend-agnostic repository contract for
//! leads, tasks and quotes. Two implementations exist:
//!
//! - `local`: a key-value store seeded with demo fixtures, one JSON table per
//!   entity kind, rewritten in full on every write
//! - `remote`: an authenticated HTTP client for the pipeline API
//!
//! The backing mode is chosen once at startup (see [`crate::config::mode`]);
//! callers only ever see the `Arc<dyn ...Repository>` handles in
//! [`Repositories`].

pub mod local;
pub mod remote;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::config::mode::{BackingMode, init_backing_mode};
use crate::error::RepositoryError;

/// Fields that an update payload must never overwrite, in external naming.
pub const IMMUTABLE_FIELDS: &[&str] = &["id", "user_id", "created_at"];

/// Create an `Arc`-wrapped set of repositories for the backing mode selected
/// by `config`. The mode is resolved once per process; later calls reuse it.
pub fn connect_from_config(config: &Config) -> Result<Repositories, RepositoryError> {
    match init_backing_mode(&config.remote) {
        BackingMode::Remote => {
            let Some(remote) = config.remote.resolved() else {
                return Err(RepositoryError::Storage(
                    "remote mode selected without remote settings".to_string(),
                ));
            };
            let client = remote::RemoteClient::new(&remote.api_url, &remote.api_token)?;
            Ok(Repositories::remote(Arc::new(client)))
        }
        BackingMode::Local => {
            let store = local::LocalStore::open(&config.store)?;
            Ok(Repositories::local(Arc::new(store)))
        }
    }
}

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Qualified,
    ProposalSent,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        Self::New,
        Self::Qualified,
        Self::ProposalSent,
        Self::Negotiation,
        Self::ClosedWon,
        Self::ClosedLost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Qualified => "QUALIFIED",
            Self::ProposalSent => "PROPOSAL_SENT",
            Self::Negotiation => "NEGOTIATION",
            Self::ClosedWon => "CLOSED_WON",
            Self::ClosedLost => "CLOSED_LOST",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Qualified => "Qualified",
            Self::ProposalSent => "Proposal",
            Self::Negotiation => "Negotiation",
            Self::ClosedWon => "Won",
            Self::ClosedLost => "Lost",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_value(s).ok_or_else(|| format!("unknown lead status '{s}'"))
    }
}

/// Where a lead came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionChannel {
    OrganicSearch,
    PaidSocial,
    LinkedinAds,
    Referral,
    #[default]
    Direct,
}

impl AcquisitionChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrganicSearch => "ORGANIC_SEARCH",
            Self::PaidSocial => "PAID_SOCIAL",
            Self::LinkedinAds => "LINKEDIN_ADS",
            Self::Referral => "REFERRAL",
            Self::Direct => "DIRECT",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OrganicSearch => "Organic search",
            Self::PaidSocial => "Paid social (Meta)",
            Self::LinkedinAds => "LinkedIn Ads",
            Self::Referral => "Referral",
            Self::Direct => "Direct",
        }
    }
}

/// Web analytics captured for a lead before first contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    #[serde(default)]
    pub pages_visited: Vec<String>,
    /// Seconds.
    #[serde(default)]
    pub time_on_site: u64,
    #[serde(default)]
    pub landing_page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Email,
    Call,
    Meeting,
    Note,
    QuoteSent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub date: NaiveDate,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    pub status: LeadStatus,
    pub value: Decimal,
    #[serde(default)]
    pub channel: AcquisitionChannel,
    #[serde(rename = "gaData", default)]
    pub analytics: AnalyticsData,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub last_contacted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Only populated by [`crate::crm::Crm::lead_with_quotes`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<Quote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default = "default_lead_status")]
    pub status: LeadStatus,
    #[serde(default)]
    pub value: Decimal,
    #[serde(default)]
    pub channel: AcquisitionChannel,
    #[serde(rename = "gaData", default)]
    pub analytics: AnalyticsData,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_lead_status() -> LeadStatus {
    LeadStatus::New
}

impl CreateLeadParams {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: String::new(),
            phone: String::new(),
            company: String::new(),
            position: String::new(),
            status: LeadStatus::New,
            value: Decimal::ZERO,
            channel: AcquisitionChannel::Direct,
            analytics: AnalyticsData::default(),
            interactions: Vec::new(),
            score: None,
            last_contacted: None,
            avatar_url: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeadParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<AcquisitionChannel>,
    #[serde(rename = "gaData", default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactions: Option<Vec<Interaction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Call,
    Meeting,
    Email,
    Todo,
    Proposal,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Meeting => "meeting",
            Self::Email => "email",
            Self::Todo => "todo",
            Self::Proposal => "proposal",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "call" => Some(Self::Call),
            "meeting" => Some(Self::Meeting),
            "email" => Some(Self::Email),
            "todo" => Some(Self::Todo),
            "proposal" => Some(Self::Proposal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display order for task lists: open tasks before completed ones, and
/// priority tasks first within each group. Ties keep their relative order
/// when used with a stable sort.
pub fn task_display_order(a: &Task, b: &Task) -> Ordering {
    a.completed
        .cmp(&b.completed)
        .then_with(|| b.priority.cmp(&a.priority))
}

pub fn sort_tasks_for_display(tasks: &mut [Task]) {
    tasks.sort_by(task_display_order);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CreateTaskParams {
    pub fn new(title: impl Into<String>, kind: TaskType, date: NaiveDate) -> Self {
        Self {
            id: None,
            title: title.into(),
            kind,
            date,
            time: None,
            completed: false,
            priority: false,
            description: None,
            amount: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}

/// Quote lifecycle. The order is advisory; nothing enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
}

impl QuoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Accepted => "ACCEPTED",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "SENT" => Some(Self::Sent),
            "ACCEPTED" => Some(Self::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub total: Decimal,
}

impl QuoteItem {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        let mut item = Self {
            description: description.into(),
            quantity,
            unit_price,
            total: Decimal::ZERO,
        };
        // Out-of-range lines are rejected when the quote is saved.
        item.total = item.computed_total().unwrap_or_default();
        item
    }

    pub fn computed_total(&self) -> Result<Decimal, RepositoryError> {
        self.quantity
            .checked_mul(self.unit_price)
            .map(|total| total.round_dp(2))
            .ok_or_else(out_of_range)
    }
}

fn out_of_range() -> RepositoryError {
    RepositoryError::Validation("quote total out of range".to_string())
}

/// Sum amounts, failing instead of overflowing.
pub fn checked_sum(
    amounts: impl IntoIterator<Item = Decimal>,
) -> Result<Decimal, RepositoryError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(out_of_range)
}

/// Recompute every line total and return the quote total. Caller-supplied
/// `total` values are discarded.
pub fn price_items(items: &mut [QuoteItem]) -> Result<Decimal, RepositoryError> {
    for item in items.iter_mut() {
        item.total = item.computed_total()?;
    }
    checked_sum(items.iter().map(|item| item.total))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub lead_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub status: QuoteStatus,
    pub total_amount: Decimal,
    #[serde(default)]
    pub items: Vec<QuoteItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub lead_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub status: QuoteStatus,
    #[serde(default)]
    pub items: Vec<QuoteItem>,
    /// Always recomputed from `items` before the quote is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CreateQuoteParams {
    pub fn new(lead_id: impl Into<String>, items: Vec<QuoteItem>) -> Self {
        Self {
            id: None,
            lead_id: lead_id.into(),
            date: None,
            status: QuoteStatus::Draft,
            items,
            total_amount: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuoteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QuoteStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<QuoteItem>>,
    /// Recomputed from `items` when they are present, dropped otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
}

/// Authenticated (or, in local mode, pseudo) user that owns written rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn require_text(field: &str, value: &str) -> Result<(), RepositoryError> {
    if value.trim().is_empty() {
        return Err(RepositoryError::Validation(format!("'{field}' is required")));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: Decimal) -> Result<(), RepositoryError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(RepositoryError::Validation(format!(
            "'{field}' must not be negative"
        )));
    }
    Ok(())
}

fn require_score(score: Option<u8>) -> Result<(), RepositoryError> {
    match score {
        Some(score) if score > 100 => Err(RepositoryError::Validation(
            "'score' must be between 0 and 100".to_string(),
        )),
        _ => Ok(()),
    }
}

fn require_items(items: &[QuoteItem]) -> Result<(), RepositoryError> {
    for item in items {
        require_non_negative("quantity", item.quantity)?;
        require_non_negative("unitPrice", item.unit_price)?;
    }
    Ok(())
}

fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Behaviour every persisted entity shares, independent of the backend.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Create: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Patch: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static;

    /// Singular name used in error messages.
    const KIND: &'static str;
    /// Collection name: table key suffix and API path segment.
    const COLLECTION: &'static str;
    /// External field names an update must never send, on top of
    /// [`IMMUTABLE_FIELDS`].
    const EXTRA_IMMUTABLE: &'static [&'static str] = &[];

    fn id(&self) -> &str;

    fn requested_id(input: &Self::Create) -> Option<&str>;

    /// Record a create depends on, as `(kind, id)`. A create that fails with
    /// not-found is reported against it.
    fn create_parent(_input: &Self::Create) -> Option<(&'static str, &str)> {
        None
    }

    /// Validate a create payload and normalize derived fields in place.
    fn prepare_create(input: &mut Self::Create) -> Result<(), RepositoryError>;

    /// Validate a patch and normalize derived fields in place.
    fn prepare_patch(patch: &mut Self::Patch) -> Result<(), RepositoryError>;

    fn from_create(
        input: Self::Create,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, RepositoryError>;

    /// Merge `patch` field by field. Identity, owner and creation time are
    /// never touched.
    fn apply_patch(
        &mut self,
        patch: Self::Patch,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

impl Record for Lead {
    type Create = CreateLeadParams;
    type Patch = UpdateLeadParams;

    const KIND: &'static str = "lead";
    const COLLECTION: &'static str = "leads";

    fn id(&self) -> &str {
        &self.id
    }

    fn requested_id(input: &CreateLeadParams) -> Option<&str> {
        input.id.as_deref()
    }

    fn prepare_create(input: &mut CreateLeadParams) -> Result<(), RepositoryError> {
        require_text("firstName", &input.first_name)?;
        require_text("lastName", &input.last_name)?;
        require_non_negative("value", input.value)?;
        require_score(input.score)
    }

    fn prepare_patch(patch: &mut UpdateLeadParams) -> Result<(), RepositoryError> {
        if let Some(first_name) = &patch.first_name {
            require_text("firstName", first_name)?;
        }
        if let Some(last_name) = &patch.last_name {
            require_text("lastName", last_name)?;
        }
        if let Some(value) = patch.value {
            require_non_negative("value", value)?;
        }
        require_score(patch.score)
    }

    fn from_create(
        input: CreateLeadParams,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, RepositoryError> {
        let created_at = input.created_at.unwrap_or(now);
        Ok(Self {
            id: input.id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_record_id),
            user_id: owner,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            email: input.email,
            phone: input.phone,
            company: input.company,
            position: input.position,
            status: input.status,
            value: input.value,
            channel: input.channel,
            analytics: input.analytics,
            interactions: input.interactions,
            score: input.score,
            last_contacted: input.last_contacted,
            avatar_url: input.avatar_url,
            quotes: Vec::new(),
            created_at,
            updated_at: created_at,
        })
    }

    fn apply_patch(
        &mut self,
        patch: UpdateLeadParams,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(v) = patch.first_name {
            self.first_name = v.trim().to_string();
        }
        if let Some(v) = patch.last_name {
            self.last_name = v.trim().to_string();
        }
        if let Some(v) = patch.email {
            self.email = v;
        }
        if let Some(v) = patch.phone {
            self.phone = v;
        }
        if let Some(v) = patch.company {
            self.company = v;
        }
        if let Some(v) = patch.position {
            self.position = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.value {
            self.value = v;
        }
        if let Some(v) = patch.channel {
            self.channel = v;
        }
        if let Some(v) = patch.analytics {
            self.analytics = v;
        }
        if let Some(v) = patch.interactions {
            self.interactions = v;
        }
        if let Some(v) = patch.score {
            self.score = Some(v);
        }
        if let Some(v) = patch.last_contacted {
            self.last_contacted = Some(v);
        }
        if let Some(v) = patch.avatar_url {
            self.avatar_url = Some(v);
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Record for Task {
    type Create = CreateTaskParams;
    type Patch = UpdateTaskParams;

    const KIND: &'static str = "task";
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }

    fn requested_id(input: &CreateTaskParams) -> Option<&str> {
        input.id.as_deref()
    }

    fn prepare_create(input: &mut CreateTaskParams) -> Result<(), RepositoryError> {
        require_text("title", &input.title)?;
        if let Some(amount) = input.amount {
            require_non_negative("amount", amount)?;
        }
        Ok(())
    }

    fn prepare_patch(patch: &mut UpdateTaskParams) -> Result<(), RepositoryError> {
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }
        if let Some(amount) = patch.amount {
            require_non_negative("amount", amount)?;
        }
        Ok(())
    }

    fn from_create(
        input: CreateTaskParams,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, RepositoryError> {
        let created_at = input.created_at.unwrap_or(now);
        Ok(Self {
            id: input.id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_record_id),
            user_id: owner,
            title: input.title.trim().to_string(),
            kind: input.kind,
            date: input.date,
            time: input.time,
            completed: input.completed,
            priority: input.priority,
            description: input.description,
            amount: input.amount,
            created_at,
            updated_at: created_at,
        })
    }

    fn apply_patch(
        &mut self,
        patch: UpdateTaskParams,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(v) = patch.title {
            self.title = v.trim().to_string();
        }
        if let Some(v) = patch.kind {
            self.kind = v;
        }
        if let Some(v) = patch.date {
            self.date = v;
        }
        if let Some(v) = patch.time {
            self.time = Some(v);
        }
        if let Some(v) = patch.completed {
            self.completed = v;
        }
        if let Some(v) = patch.priority {
            self.priority = v;
        }
        if let Some(v) = patch.description {
            self.description = Some(v);
        }
        if let Some(v) = patch.amount {
            self.amount = Some(v);
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Record for Quote {
    type Create = CreateQuoteParams;
    type Patch = UpdateQuoteParams;

    const KIND: &'static str = "quote";
    const COLLECTION: &'static str = "quotes";
    const EXTRA_IMMUTABLE: &'static [&'static str] = &["lead_id"];

    fn id(&self) -> &str {
        &self.id
    }

    fn requested_id(input: &CreateQuoteParams) -> Option<&str> {
        input.id.as_deref()
    }

    fn create_parent(input: &CreateQuoteParams) -> Option<(&'static str, &str)> {
        Some((Lead::KIND, &input.lead_id))
    }

    fn prepare_create(input: &mut CreateQuoteParams) -> Result<(), RepositoryError> {
        require_text("leadId", &input.lead_id)?;
        require_items(&input.items)?;
        input.total_amount = Some(price_items(&mut input.items)?);
        Ok(())
    }

    fn prepare_patch(patch: &mut UpdateQuoteParams) -> Result<(), RepositoryError> {
        patch.total_amount = match patch.items.as_mut() {
            Some(items) => {
                require_items(items)?;
                Some(price_items(items)?)
            }
            None => None,
        };
        Ok(())
    }

    fn from_create(
        input: CreateQuoteParams,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, RepositoryError> {
        let created_at = input.created_at.unwrap_or(now);
        let mut items = input.items;
        let total_amount = price_items(&mut items)?;
        Ok(Self {
            id: input.id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_record_id),
            user_id: owner,
            lead_id: input.lead_id,
            date: input.date.unwrap_or_else(|| now.date_naive()),
            status: input.status,
            total_amount,
            items,
            created_at,
            updated_at: created_at,
        })
    }

    fn apply_patch(
        &mut self,
        patch: UpdateQuoteParams,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(v) = patch.date {
            self.date = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.items {
            self.items = v;
        }
        self.total_amount = price_items(&mut self.items)?;
        self.updated_at = now;
        Ok(())
    }
}

// ==================== Repository traits ====================
//
// `EntityRepository` is the CRUD contract shared by all three entity kinds.
// Each kind adds one narrower operation through its own sub-trait.

#[async_trait]
pub trait EntityRepository<E: Record>: Send + Sync {
    /// All rows, newest first.
    async fn get_all(&self) -> Result<Vec<E>, RepositoryError>;
    async fn get_one(&self, id: &str) -> Result<E, RepositoryError>;
    async fn create(&self, input: E::Create) -> Result<E, RepositoryError>;
    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, RepositoryError>;
    /// Deleting an id that does not exist succeeds.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: EntityRepository<Lead> {
    /// Change only the status (and the modification timestamp).
    async fn update_status(&self, id: &str, status: LeadStatus) -> Result<Lead, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: EntityRepository<Task> {
    /// Flip `completed`.
    async fn toggle(&self, id: &str) -> Result<Task, RepositoryError>;
}

#[async_trait]
pub trait QuoteRepository: EntityRepository<Quote> {
    /// Quotes owned by one lead, newest first.
    async fn list_for_lead(&self, lead_id: &str) -> Result<Vec<Quote>, RepositoryError>;
}

/// The three repositories for one backing mode, chosen once at composition
/// time and shared by every caller.
#[derive(Clone)]
pub struct Repositories {
    pub mode: BackingMode,
    pub leads: Arc<dyn LeadRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub quotes: Arc<dyn QuoteRepository>,
}

impl Repositories {
    pub fn local(store: Arc<local::LocalStore>) -> Self {
        Self {
            mode: BackingMode::Local,
            leads: Arc::new(local::LocalRepository::<Lead>::new(Arc::clone(&store))),
            tasks: Arc::new(local::LocalRepository::<Task>::new(Arc::clone(&store))),
            quotes: Arc::new(local::LocalRepository::<Quote>::new(store)),
        }
    }

    pub fn remote(client: Arc<remote::RemoteClient>) -> Self {
        Self {
            mode: BackingMode::Remote,
            leads: Arc::new(remote::RemoteRepository::<Lead>::new(Arc::clone(&client))),
            tasks: Arc::new(remote::RemoteRepository::<Task>::new(Arc::clone(&client))),
            quotes: Arc::new(remote::RemoteRepository::<Quote>::new(client)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn task(id: &str, completed: bool, priority: bool) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            user_id: None,
            title: id.to_string(),
            kind: TaskType::Todo,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date"),
            time: None,
            completed,
            priority,
            description: None,
            amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lead_status_parses_case_insensitively() {
        assert_eq!(
            LeadStatus::from_db_value("proposal_sent"),
            Some(LeadStatus::ProposalSent)
        );
        assert_eq!(LeadStatus::from_db_value("CLOSED_WON"), Some(LeadStatus::ClosedWon));
        assert_eq!(LeadStatus::from_db_value("nouveau"), None);
        assert_eq!(
            serde_json::to_value(LeadStatus::ClosedLost).expect("serialize"),
            json!("CLOSED_LOST")
        );
    }

    #[test]
    fn task_order_puts_open_priority_work_first() {
        let mut tasks = vec![
            task("done-plain", true, false),
            task("open-plain", false, false),
            task("done-priority", true, true),
            task("open-priority", false, true),
            task("open-plain-2", false, false),
        ];
        sort_tasks_for_display(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "open-priority",
                "open-plain",
                "open-plain-2",
                "done-priority",
                "done-plain"
            ]
        );
    }

    #[test]
    fn price_items_ignores_supplied_totals() {
        let mut items = vec![
            QuoteItem {
                description: "Audit".to_string(),
                quantity: dec!(2),
                unit_price: dec!(100),
                total: dec!(1),
            },
            QuoteItem {
                description: "Hosting".to_string(),
                quantity: dec!(1.5),
                unit_price: dec!(40.10),
                total: dec!(0),
            },
        ];
        let total = price_items(&mut items).expect("priced");
        assert_eq!(items[0].total, dec!(200));
        assert_eq!(items[1].total, dec!(60.15));
        assert_eq!(total, dec!(260.15));
    }

    #[test]
    fn oversized_items_are_rejected() {
        let huge = Decimal::MAX;
        let mut input = CreateQuoteParams::new("l-1", vec![QuoteItem::new("Big", huge, dec!(2))]);
        assert!(matches!(
            Quote::prepare_create(&mut input),
            Err(RepositoryError::Validation(m)) if m == "quote total out of range"
        ));

        let mut items = vec![QuoteItem::new("A", huge, dec!(1)), QuoteItem::new("B", huge, dec!(1))];
        assert!(price_items(&mut items).is_err());

        let mut patch = UpdateQuoteParams {
            items: Some(vec![QuoteItem::new("Big", huge, huge)]),
            ..Default::default()
        };
        assert!(Quote::prepare_patch(&mut patch).is_err());
    }

    #[test]
    fn quote_patch_recomputes_total_from_existing_items() {
        let now = Utc::now();
        let mut quote = Quote::from_create(
            CreateQuoteParams::new("l-1", vec![QuoteItem::new("X", dec!(2), dec!(100))]),
            None,
            now,
        )
        .expect("quote");
        assert_eq!(quote.total_amount, dec!(200));

        let mut patch = UpdateQuoteParams {
            status: Some(QuoteStatus::Sent),
            total_amount: Some(dec!(999)),
            ..Default::default()
        };
        Quote::prepare_patch(&mut patch).expect("valid patch");
        assert_eq!(patch.total_amount, None);
        quote.apply_patch(patch, now).expect("apply");
        assert_eq!(quote.status, QuoteStatus::Sent);
        assert_eq!(quote.total_amount, dec!(200));
    }

    #[test]
    fn lead_validation_rejects_negative_value_and_bad_score() {
        let mut input = CreateLeadParams::new("A", "B");
        input.value = dec!(-1);
        assert!(matches!(
            Lead::prepare_create(&mut input),
            Err(RepositoryError::Validation(_))
        ));

        let mut patch = UpdateLeadParams {
            score: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            Lead::prepare_patch(&mut patch),
            Err(RepositoryError::Validation(_))
        ));
    }

    #[test]
    fn lead_create_defaults_analytics_and_interactions() {
        let lead = Lead::from_create(CreateLeadParams::new("A", "B"), Some("u1".into()), Utc::now())
            .expect("lead");
        assert!(!lead.id.is_empty());
        assert_eq!(lead.analytics, AnalyticsData::default());
        assert!(lead.interactions.is_empty());
        assert_eq!(lead.user_id.as_deref(), Some("u1"));
        assert_eq!(lead.created_at, lead.updated_at);
    }

    #[test]
    fn non_numeric_value_is_rejected_on_decode() {
        let row = json!({ "first_name": "A", "last_name": "B", "value": "lots" });
        let decoded = crate::transcode::decode::<CreateLeadParams>(row);
        assert!(decoded.is_err());
    }
}
