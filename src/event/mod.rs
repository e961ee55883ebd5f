//! Delivery event records.
//!
//! Each queue record carries a JSON body describing one message delivery:
//!
//! ```text
//! { application: {app_id}, event_timestamp,
//!   attributes: {campaign_id, treatment_id, journey_id, journey_activity_id},
//!   client: {client_id},
//!   client_context: {custom: {endpoint: "<JSON string>"}} }
//! ```
//!
//! The endpoint is itself JSON encoded inside a string and holds the
//! recipient attributes used for template substitution.
//!
//! Campaign sends carry `campaign_id`; journey sends carry
//! `journey_id`/`journey_activity_id` instead. One of `campaign_id` or
//! `journey_activity_id` must be present.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ArchiverError, Result};

/// One record from the delivery queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub body: String,
}

impl QueueRecord {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
        }
    }
}

/// A batch of queue records as delivered by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records")]
    pub records: Vec<QueueRecord>,
}

/// Campaign identity of one event, passed to collaborators and logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignContext {
    pub application_id: String,
    pub event_timestamp: Option<i64>,
    pub campaign_id: Option<String>,
    pub treatment_id: Option<String>,
    pub journey_id: Option<String>,
    pub journey_activity_id: Option<String>,
}

impl CampaignContext {
    /// Identifier the content definition and compiled templates are keyed by:
    /// the campaign for campaign sends, the journey activity otherwise
    pub fn template_key(&self) -> &str {
        self.campaign_id
            .as_deref()
            .or(self.journey_activity_id.as_deref())
            .unwrap_or_default()
    }
}

/// A parsed delivery event
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub context: CampaignContext,
    /// Recipient identity
    pub endpoint_id: String,
    /// Substitution values for the recipient
    pub endpoint_attributes: Map<String, Value>,
}

#[derive(Deserialize)]
struct EventBody {
    application: Option<Application>,
    event_timestamp: Option<i64>,
    attributes: Option<Attributes>,
    client: Option<Client>,
    client_context: Option<ClientContext>,
}

#[derive(Deserialize)]
struct Application {
    app_id: Option<String>,
}

#[derive(Deserialize)]
struct Attributes {
    campaign_id: Option<String>,
    treatment_id: Option<String>,
    journey_id: Option<String>,
    journey_activity_id: Option<String>,
}

#[derive(Deserialize)]
struct Client {
    client_id: Option<String>,
}

#[derive(Deserialize)]
struct ClientContext {
    custom: Option<Custom>,
}

#[derive(Deserialize)]
struct Custom {
    endpoint: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| ArchiverError::MalformedEvent(format!("missing field {}", field)))
}

impl EventRecord {
    /// Parse a queue record body
    pub fn parse(body: &str) -> Result<Self> {
        let event: EventBody = serde_json::from_str(body)
            .map_err(|e| ArchiverError::MalformedEvent(format!("invalid event body: {}", e)))?;

        let application_id = required(
            event.application.and_then(|a| a.app_id),
            "application.app_id",
        )?;
        let attributes = required(event.attributes, "attributes")?;
        if attributes.campaign_id.is_none() && attributes.journey_activity_id.is_none() {
            return Err(ArchiverError::MalformedEvent(
                "missing field attributes.campaign_id or attributes.journey_activity_id"
                    .to_string(),
            ));
        }
        let endpoint_id = required(event.client.and_then(|c| c.client_id), "client.client_id")?;
        let endpoint_json = required(
            event
                .client_context
                .and_then(|c| c.custom)
                .and_then(|c| c.endpoint),
            "client_context.custom.endpoint",
        )?;

        let endpoint_attributes = match serde_json::from_str::<Value>(&endpoint_json) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(ArchiverError::MalformedEvent(
                    "endpoint must be a JSON object".to_string(),
                ))
            }
            Err(e) => {
                return Err(ArchiverError::MalformedEvent(format!(
                    "invalid endpoint JSON: {}",
                    e
                )))
            }
        };

        Ok(Self {
            context: CampaignContext {
                application_id,
                event_timestamp: event.event_timestamp,
                campaign_id: attributes.campaign_id,
                treatment_id: attributes.treatment_id,
                journey_id: attributes.journey_id,
                journey_activity_id: attributes.journey_activity_id,
            },
            endpoint_id,
            endpoint_attributes,
        })
    }
}
