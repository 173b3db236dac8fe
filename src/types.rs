use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type TreatmentId = String;
pub type CustomerId = String;

/// Sentinel treatment: always permitted, never consumes capacity.
pub const IGNORE_TREATMENT_ID: &str = "ignore";

pub fn is_ignore(treatment_id: &str) -> bool {
    treatment_id == IGNORE_TREATMENT_ID
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Call,
    App,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Call => "call",
            Channel::App => "app",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentType {
    Marketing,
    Service,
}

impl TreatmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            TreatmentType::Marketing => "marketing",
            TreatmentType::Service => "service",
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A candidate outreach action.
///
/// `channel` and `treatment_type` are optional in configuration; the catalog resolves them once
/// at load time from keywords in the id and description, so downstream checks read the cached
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    #[serde(default)]
    pub id: TreatmentId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub treatment_type: Option<TreatmentType>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Treatment {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: display_name_from_id(&id),
            id,
            description: description.into(),
            enabled: true,
            channel: None,
            treatment_type: None,
            is_custom: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_type(mut self, treatment_type: TreatmentType) -> Self {
        self.treatment_type = Some(treatment_type);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_ignore(&self) -> bool {
        is_ignore(&self.id)
    }
}

/// `retention_email` -> `Retention Email`
pub fn display_name_from_id(id: &str) -> String {
    id.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One historical record about a customer. Everything beyond the identifying fields is kept
/// verbatim so the oracle sees the record as the source produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl EventRecord {
    pub fn new(customer_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            date: date.into(),
            category: None,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Event records for one customer, grouped by source category (`usage_data`, `billing_data`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub records: BTreeMap<String, Vec<EventRecord>>,
}

impl CustomerProfile {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn with_records(mut self, category: impl Into<String>, records: Vec<EventRecord>) -> Self {
        self.records.entry(category.into()).or_default().extend(records);
        self
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

/// Only an exact `Y` grants consent. Any other string (`y`, `Yes`, empty) loads as
/// `Unrecognized` and is treated as a refusal, so one odd value never rejects the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentFlag {
    #[serde(rename = "Y")]
    Yes,
    #[serde(rename = "N")]
    No,
    #[serde(other)]
    Unrecognized,
}

impl ConsentFlag {
    pub fn is_granted(self) -> bool {
        self == ConsentFlag::Yes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConsent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<ConsentFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ConsentFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl ChannelConsent {
    pub fn flag(&self, treatment_type: TreatmentType) -> Option<ConsentFlag> {
        match treatment_type {
            TreatmentType::Marketing => self.marketing,
            TreatmentType::Service => self.service,
        }
    }
}

/// Per-customer contact consent. Channels are keyed by name so matrices carrying channels the
/// engine does not classify still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    #[serde(default)]
    pub customer_id: CustomerId,
    #[serde(default, alias = "permissions")]
    pub channels: BTreeMap<String, ChannelConsent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_contact_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_not_disturb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
}

impl PermissionMatrix {
    pub fn empty(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Self::default()
        }
    }

    pub fn with_consent(
        mut self,
        channel: Channel,
        treatment_type: TreatmentType,
        flag: ConsentFlag,
    ) -> Self {
        let consent = self
            .channels
            .entry(channel.as_str().to_string())
            .or_default();
        match treatment_type {
            TreatmentType::Marketing => consent.marketing = Some(flag),
            TreatmentType::Service => consent.service = Some(flag),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn consent(&self, channel: Channel, treatment_type: TreatmentType) -> Option<ConsentFlag> {
        self.channels
            .get(channel.as_str())
            .and_then(|consent| consent.flag(treatment_type))
    }
}
