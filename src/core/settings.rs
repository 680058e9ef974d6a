//! Hierarchical settings resolution.
//!
//! A setting value is looked up along a four-level override chain, first
//! non-null wins:
//!
//! 1. TNM ticket override column (only for ticket-overridable keys)
//! 2. Project override column
//! 3. Global `app_settings` row (database)
//! 4. Process environment variable of the same name
//!
//! The database becomes the source of truth after first boot;
//! [`seed_defaults`](SettingsResolver::seed_defaults) migrates the bootstrap
//! values in on an empty table. Resolution never fails on a missing key - it
//! returns `None` and callers supply their own defaults.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::{QueryOrder, Set, prelude::*};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    entities::{AppSetting, Project, TnmTicket, app_setting, project, tnm_ticket},
    errors::Result,
};

/// A typed setting value after coercion.
///
/// `Float` carries a `Decimal` rather than an `f64`: every float-typed
/// setting in this system is a rate or a percentage that feeds currency math.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Str(String),
    Int(i64),
    Float(Decimal),
    Bool(bool),
}

impl SettingValue {
    /// Coerces a raw string according to a declared data type
    /// ("string", "integer", "float", "boolean").
    ///
    /// Booleans accept case-insensitive `true`/`1`/`yes`/`on` as true.
    /// Numeric parse failures fall back to the raw string.
    #[must_use]
    pub fn coerce(raw: &str, data_type: &str) -> Self {
        match data_type {
            "boolean" => Self::Bool(matches!(
                raw.to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            "integer" => raw
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Self::Str(raw.to_string()), Self::Int),
            "float" => Decimal::from_str(raw.trim())
                .map_or_else(|_| Self::Str(raw.to_string()), Self::Float),
            _ => Self::Str(raw.to_string()),
        }
    }

    /// Infers a type for a raw string with no declared data type, used for
    /// environment variables outside the key registry: boolean spellings,
    /// then integer, then decimal, then plain string.
    #[must_use]
    pub fn infer(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.trim().parse::<i64>() {
            return Self::Int(i);
        }
        if raw.contains('.') {
            if let Ok(d) = Decimal::from_str(raw.trim()) {
                return Self::Float(d);
            }
        }
        Self::Str(raw.to_string())
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(d) => d.to_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Float(d) => Some(*d),
            Self::Int(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(d) => write!(f, "{d}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Inheritance-aware wrapper for a nullable override column.
///
/// A NULL column means "inherit from the parent level", not "no value" - this
/// type makes that intent explicit at the resolution seams instead of leaning
/// on `Option` as a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Override<T> {
    /// No local value; resolution continues at the next level.
    Inherited,
    /// A local value that stops resolution.
    Explicit(T),
}

impl<T> Override<T> {
    /// Interprets a nullable database column as an override.
    #[must_use]
    pub fn from_column(column: Option<T>) -> Self {
        column.map_or(Self::Inherited, Self::Explicit)
    }

    /// The explicit value, if this level carries one.
    #[must_use]
    pub fn explicit(self) -> Option<T> {
        match self {
            Self::Explicit(v) => Some(v),
            Self::Inherited => None,
        }
    }
}

/// Declared value kind for a registered overridable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Float,
    Int,
}

impl ValueKind {
    const fn data_type(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "integer",
        }
    }
}

/// Keys overridable at both ticket and project level.
const TICKET_OVERRIDABLE: [(&str, ValueKind); 8] = [
    ("DEFAULT_MATERIAL_OHP", ValueKind::Float),
    ("DEFAULT_LABOR_OHP", ValueKind::Float),
    ("DEFAULT_EQUIPMENT_OHP", ValueKind::Float),
    ("DEFAULT_SUBCONTRACTOR_OHP", ValueKind::Float),
    ("RATE_PROJECT_MANAGER", ValueKind::Float),
    ("RATE_SUPERINTENDENT", ValueKind::Float),
    ("RATE_CARPENTER", ValueKind::Float),
    ("RATE_LABORER", ValueKind::Float),
];

/// Keys overridable at project level only.
const PROJECT_ONLY: [(&str, ValueKind); 3] = [
    ("REMINDER_INTERVAL_DAYS", ValueKind::Int),
    ("REMINDER_MAX_RETRIES", ValueKind::Int),
    ("APPROVAL_TOKEN_EXPIRATION_HOURS", ValueKind::Int),
];

fn registered_kind(key: &str) -> Option<ValueKind> {
    TICKET_OVERRIDABLE
        .iter()
        .chain(PROJECT_ONLY.iter())
        .find(|(k, _)| *k == key)
        .map(|(_, kind)| *kind)
}

fn is_ticket_overridable(key: &str) -> bool {
    TICKET_OVERRIDABLE.iter().any(|(k, _)| *k == key)
}

/// Reads the ticket-level override column for a registered key.
fn ticket_override(ticket: &tnm_ticket::Model, key: &str) -> Override<Decimal> {
    let column = match key {
        "DEFAULT_MATERIAL_OHP" => ticket.material_ohp_percent,
        "DEFAULT_LABOR_OHP" => ticket.labor_ohp_percent,
        "DEFAULT_EQUIPMENT_OHP" => ticket.equipment_ohp_percent,
        "DEFAULT_SUBCONTRACTOR_OHP" => ticket.subcontractor_ohp_percent,
        "RATE_PROJECT_MANAGER" => ticket.rate_project_manager,
        "RATE_SUPERINTENDENT" => ticket.rate_superintendent,
        "RATE_CARPENTER" => ticket.rate_carpenter,
        "RATE_LABORER" => ticket.rate_laborer,
        _ => None,
    };
    Override::from_column(column)
}

/// Reads the project-level override column for a registered key.
fn project_override(proj: &project::Model, key: &str) -> Option<SettingValue> {
    let decimal = match key {
        "DEFAULT_MATERIAL_OHP" => proj.material_ohp_percent,
        "DEFAULT_LABOR_OHP" => proj.labor_ohp_percent,
        "DEFAULT_EQUIPMENT_OHP" => proj.equipment_ohp_percent,
        "DEFAULT_SUBCONTRACTOR_OHP" => proj.subcontractor_ohp_percent,
        _ => None,
    };
    if let Some(d) = Override::from_column(decimal).explicit() {
        return Some(SettingValue::Float(d));
    }
    let integer = match key {
        "REMINDER_INTERVAL_DAYS" => proj.reminder_interval_days,
        "REMINDER_MAX_RETRIES" => proj.reminder_max_retries,
        "APPROVAL_TOKEN_EXPIRATION_HOURS" => proj.approval_token_expiration_hours,
        _ => None,
    };
    Override::from_column(integer)
        .explicit()
        .map(|i| SettingValue::Int(i64::from(i)))
}

/// Bootstrap definition of one global setting.
#[derive(Debug, Clone)]
pub struct SettingDefault {
    pub key: String,
    pub value: String,
    pub category: String,
    pub data_type: String,
    pub description: String,
}

#[derive(Debug)]
struct CacheEntry {
    /// `None` records a confirmed-absent row, so absence is cached too.
    value: Option<SettingValue>,
    fetched_at: Instant,
}

/// TTL-bounded cache over the global settings table.
///
/// Owned by the [`SettingsResolver`] and injected at construction, so its
/// lifecycle (and staleness window) is explicit rather than hidden in
/// process-wide statics. Writes through
/// [`update_global_setting`](SettingsResolver::update_global_setting)
/// invalidate the touched key immediately.
#[derive(Debug)]
pub struct SettingsCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl SettingsCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cache hit returns `Some(cached)` where the inner `Option` mirrors row
    /// presence; a miss or stale entry returns `None`.
    async fn get(&self, key: &str) -> Option<Option<SettingValue>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    async fn put(&self, key: &str, value: Option<SettingValue>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drops the cached entry for a key, forcing a database read next time.
    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}

/// Effective settings for a context, grouped for presentation.
#[derive(Debug, Default)]
pub struct EffectiveSettings {
    pub company: BTreeMap<String, Option<SettingValue>>,
    pub smtp: BTreeMap<String, Option<SettingValue>>,
    pub rates: BTreeMap<String, Option<SettingValue>>,
    pub ohp: BTreeMap<String, Option<SettingValue>>,
    pub reminders: BTreeMap<String, Option<SettingValue>>,
    pub approval: BTreeMap<String, Option<SettingValue>>,
}

/// Resolves settings along the ticket -> project -> global -> environment
/// chain. Stateless apart from the injected global-layer cache.
#[derive(Debug)]
pub struct SettingsResolver {
    cache: SettingsCache,
}

impl SettingsResolver {
    #[must_use]
    pub fn new(cache: SettingsCache) -> Self {
        Self { cache }
    }

    /// Resolver with caching effectively disabled, for request-scoped use
    /// and tests where staleness is unacceptable.
    #[must_use]
    pub fn uncached() -> Self {
        Self::new(SettingsCache::new(Duration::ZERO))
    }

    /// Resolves a setting with hierarchical override semantics.
    ///
    /// Ticket and project overrides only apply to registered keys; anything
    /// else resolves from the global table or the environment. A key absent
    /// at every level resolves to `Ok(None)`, never an error.
    pub async fn resolve(
        &self,
        db: &DatabaseConnection,
        key: &str,
        ticket_id: Option<Uuid>,
        project_id: Option<Uuid>,
    ) -> Result<Option<SettingValue>> {
        let mut project_id = project_id;

        // 1. Ticket-level override
        if let Some(ticket_id) = ticket_id {
            if is_ticket_overridable(key) {
                if let Some(ticket) = TnmTicket::find_by_id(ticket_id).one(db).await? {
                    if let Some(value) = ticket_override(&ticket, key).explicit() {
                        return Ok(Some(SettingValue::Float(value)));
                    }
                    // No ticket override - continue with the ticket's project
                    project_id = Some(ticket.project_id);
                }
            }
        }

        // 2. Project-level override
        if let Some(project_id) = project_id {
            if registered_kind(key).is_some() {
                if let Some(proj) = Project::find_by_id(project_id).one(db).await? {
                    if let Some(value) = project_override(&proj, key) {
                        return Ok(Some(value));
                    }
                }
            }
        }

        // 3. Global setting (database, through the cache)
        if let Some(value) = self.global(db, key).await? {
            return Ok(Some(value));
        }

        // 4. Environment fallback
        Ok(Self::env_value(key))
    }

    /// Reads the global layer only, consulting the cache first.
    async fn global(&self, db: &DatabaseConnection, key: &str) -> Result<Option<SettingValue>> {
        if let Some(cached) = self.cache.get(key).await {
            return Ok(cached);
        }

        let row = AppSetting::find()
            .filter(app_setting::Column::Key.eq(key))
            .one(db)
            .await?;
        let value = row.map(|setting| setting.typed_value());
        self.cache.put(key, value.clone()).await;
        Ok(value)
    }

    /// Environment variable fallback with registry-aware coercion.
    fn env_value(key: &str) -> Option<SettingValue> {
        let raw = std::env::var(key).ok()?;
        let value = registered_kind(key).map_or_else(
            || SettingValue::infer(&raw),
            |kind| SettingValue::coerce(&raw, kind.data_type()),
        );
        Some(value)
    }

    /// Resolves the full fixed key set for a context and groups the results
    /// into presentation sections. Pure read-side aggregation.
    pub async fn effective_settings(
        &self,
        db: &DatabaseConnection,
        ticket_id: Option<Uuid>,
        project_id: Option<Uuid>,
    ) -> Result<EffectiveSettings> {
        let mut effective = EffectiveSettings::default();

        for (key, _) in &TICKET_OVERRIDABLE {
            let value = self.resolve(db, key, ticket_id, project_id).await?;
            let section = if key.starts_with("RATE_") {
                &mut effective.rates
            } else {
                &mut effective.ohp
            };
            section.insert((*key).to_string(), value);
        }

        for (key, _) in &PROJECT_ONLY {
            let value = self.resolve(db, key, ticket_id, project_id).await?;
            let section = if key.starts_with("REMINDER_") {
                &mut effective.reminders
            } else {
                &mut effective.approval
            };
            section.insert((*key).to_string(), value);
        }

        // Company, SMTP and the reminder kill-switch always come from the
        // global layer.
        for key in [
            "COMPANY_NAME",
            "COMPANY_EMAIL",
            "COMPANY_PHONE",
            "COMPANY_LOGO_URL",
            "TZ",
        ] {
            let value = self.resolve(db, key, None, None).await?;
            effective.company.insert(key.to_string(), value);
        }
        for key in [
            "SMTP_ENABLED",
            "SMTP_HOST",
            "SMTP_PORT",
            "SMTP_USE_TLS",
            "SMTP_USERNAME",
            "SMTP_FROM_EMAIL",
            "SMTP_FROM_NAME",
        ] {
            let value = self.resolve(db, key, None, None).await?;
            effective.smtp.insert(key.to_string(), value);
        }
        let reminders_enabled = self.resolve(db, "REMINDER_ENABLED", None, None).await?;
        effective
            .reminders
            .insert("REMINDER_ENABLED".to_string(), reminders_enabled);
        let gc_signature = self
            .resolve(db, "REQUIRE_GC_SIGNATURE_ON_APPROVAL", None, None)
            .await?;
        effective
            .approval
            .insert("REQUIRE_GC_SIGNATURE_ON_APPROVAL".to_string(), gc_signature);

        Ok(effective)
    }

    /// Updates or creates a global setting and invalidates its cache entry.
    /// Category and data type are inferred from the key for new rows.
    pub async fn update_global_setting(
        &self,
        db: &DatabaseConnection,
        key: &str,
        value: &str,
        updated_by: Option<String>,
    ) -> Result<app_setting::Model> {
        let now = chrono::Utc::now();
        let existing = AppSetting::find()
            .filter(app_setting::Column::Key.eq(key))
            .one(db)
            .await?;

        let saved = if let Some(setting) = existing {
            let mut active: app_setting::ActiveModel = setting.into();
            active.value = Set(value.to_string());
            active.updated_by = Set(updated_by);
            active.updated_at = Set(now);
            active.update(db).await?
        } else {
            let active = app_setting::ActiveModel {
                key: Set(key.to_string()),
                value: Set(value.to_string()),
                category: Set(category_for_key(key).to_string()),
                data_type: Set(data_type_for_key(key).to_string()),
                description: Set(Some(description_for_key(key).to_string())),
                updated_by: Set(updated_by),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            active.insert(db).await?
        };

        self.cache.invalidate(key).await;
        Ok(saved)
    }

    /// Lists all global settings, optionally filtered by category, ordered
    /// by category then key.
    pub async fn all_global_settings(
        &self,
        db: &DatabaseConnection,
        category: Option<&str>,
    ) -> Result<Vec<app_setting::Model>> {
        let mut query = AppSetting::find();
        if let Some(category) = category {
            query = query.filter(app_setting::Column::Category.eq(category));
        }
        query
            .order_by_asc(app_setting::Column::Category)
            .order_by_asc(app_setting::Column::Key)
            .all(db)
            .await
            .map_err(Into::into)
    }

    /// Seeds the global settings table from bootstrap defaults if - and only
    /// if - it is empty. Returns whether seeding ran. After the first boot
    /// the database rows win over the environment.
    pub async fn seed_defaults(
        &self,
        db: &DatabaseConnection,
        defaults: &[SettingDefault],
    ) -> Result<bool> {
        let existing = AppSetting::find().one(db).await?;
        if existing.is_some() {
            debug!("Settings already initialized in database");
            return Ok(false);
        }

        let now = chrono::Utc::now();
        for default in defaults {
            let active = app_setting::ActiveModel {
                key: Set(default.key.clone()),
                value: Set(default.value.clone()),
                category: Set(default.category.clone()),
                data_type: Set(default.data_type.clone()),
                description: Set(Some(default.description.clone())),
                updated_by: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            active.insert(db).await?;
        }

        info!("Seeded {} global settings from defaults", defaults.len());
        Ok(true)
    }
}

/// Infers the presentation category for a setting key.
#[must_use]
pub fn category_for_key(key: &str) -> &'static str {
    if key.starts_with("COMPANY_") || key == "TZ" {
        "company"
    } else if key.starts_with("SMTP_") {
        "smtp"
    } else if key.starts_with("RATE_") {
        "rates"
    } else if key.starts_with("DEFAULT_") && key.contains("_OHP") {
        "ohp"
    } else if key.starts_with("REMINDER_") {
        "reminders"
    } else if key.starts_with("APPROVAL_") || key == "REQUIRE_GC_SIGNATURE_ON_APPROVAL" {
        "approval"
    } else {
        "other"
    }
}

/// Infers the stored data type for a setting key.
#[must_use]
pub fn data_type_for_key(key: &str) -> &'static str {
    if let Some(kind) = registered_kind(key) {
        return kind.data_type();
    }
    if key.contains("ENABLED") || key.contains("USE_TLS") || key.starts_with("REQUIRE_") {
        "boolean"
    } else if key.contains("PORT")
        || key.contains("DAYS")
        || key.contains("RETRIES")
        || key.contains("HOURS")
    {
        "integer"
    } else {
        "string"
    }
}

/// Human-readable description for the known setting keys.
#[must_use]
pub fn description_for_key(key: &str) -> &'static str {
    match key {
        "COMPANY_NAME" => "Company name",
        "COMPANY_EMAIL" => "Company email address",
        "COMPANY_PHONE" => "Company phone number",
        "COMPANY_LOGO_URL" => "Company logo URL for emails",
        "TZ" => "Timezone (e.g. America/New_York)",
        "SMTP_ENABLED" => "Enable/disable email sending",
        "SMTP_HOST" => "SMTP server hostname",
        "SMTP_PORT" => "SMTP server port",
        "SMTP_USE_TLS" => "Use TLS for SMTP connection",
        "SMTP_USERNAME" => "SMTP username/email",
        "SMTP_FROM_EMAIL" => "Email 'from' address",
        "SMTP_FROM_NAME" => "Email 'from' name",
        "DEFAULT_MATERIAL_OHP" => "Default Material OH&P percentage",
        "DEFAULT_LABOR_OHP" => "Default Labor OH&P percentage",
        "DEFAULT_EQUIPMENT_OHP" => "Default Equipment OH&P percentage",
        "DEFAULT_SUBCONTRACTOR_OHP" => "Default Subcontractor OH&P percentage",
        "RATE_PROJECT_MANAGER" => "Project Manager hourly rate",
        "RATE_SUPERINTENDENT" => "Superintendent hourly rate",
        "RATE_CARPENTER" => "Carpenter hourly rate",
        "RATE_LABORER" => "Laborer hourly rate",
        "REMINDER_ENABLED" => "Enable/disable email reminders",
        "REMINDER_INTERVAL_DAYS" => "Days between reminder emails",
        "REMINDER_MAX_RETRIES" => "Maximum number of reminder emails",
        "APPROVAL_TOKEN_EXPIRATION_HOURS" => "Hours until approval link expires",
        "REQUIRE_GC_SIGNATURE_ON_APPROVAL" => "Require GC signature on approval page",
        _ => "",
    }
}
