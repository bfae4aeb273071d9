//! HTTP detector services.
//!
//! Two wire dialects are supported:
//!
//! - [`Dialect::Legal`]: `POST {base}/analyze` with `{"text"}`, answering
//!   `{"entities": [{"text", "label", "start", "end", "confidence"}]}`
//! - [`Dialect::Pii`]: `POST {base}/analyze` with `{"text", "language"}`,
//!   answering `[{"entity_type", "start", "end", "score"}]`
//!
//! Both expose `GET {base}/health` returning `{"status": "healthy"}`.
//! Offsets on the wire are char offsets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Category, EntityDetector, EntitySpan};
use crate::error::DetectError;
use crate::text::slice_chars;

/// Confidence assumed when a legal service omits it.
const DEFAULT_LEGAL_CONFIDENCE: f32 = 0.7;

/// Wire format spoken by a detector service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Legal,
    Pii,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

#[derive(Deserialize)]
struct LegalResponse {
    entities: Vec<LegalEntity>,
}

#[derive(Deserialize)]
struct LegalEntity {
    label: String,
    start: usize,
    end: usize,
    #[serde(default = "default_legal_confidence")]
    confidence: f32,
}

fn default_legal_confidence() -> f32 {
    DEFAULT_LEGAL_CONFIDENCE
}

#[derive(Deserialize)]
struct PiiEntity {
    entity_type: String,
    start: usize,
    end: usize,
    score: f32,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// Client for one detector service.
pub struct RemoteDetector {
    name: String,
    base_url: String,
    dialect: Dialect,
    client: Client,
    timeout: Duration,
    max_input_chars: Option<usize>,
}

impl RemoteDetector {
    /// Create a client. `timeout` bounds every request including health
    /// probes.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        dialect: Dialect,
        timeout: Duration,
    ) -> Result<Self, DetectError> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .gzip(true)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dialect,
            client,
            timeout,
            max_input_chars: None,
        })
    }

    /// Declare the service's input ceiling.
    #[must_use]
    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = Some(max);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn call(&self, text: &str) -> Result<Vec<EntitySpan>, DetectError> {
        let request = AnalyzeRequest {
            text,
            language: (self.dialect == Dialect::Pii).then_some("en"),
        };
        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::Unavailable {
                detector: self.name.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.text().await?;
        let raw: Vec<(String, usize, usize, f32)> = match self.dialect {
            Dialect::Legal => {
                let parsed: LegalResponse =
                    serde_json::from_str(&body).map_err(|e| self.malformed(&e))?;
                parsed
                    .entities
                    .into_iter()
                    .map(|e| (e.label, e.start, e.end, e.confidence))
                    .collect()
            }
            Dialect::Pii => {
                let parsed: Vec<PiiEntity> =
                    serde_json::from_str(&body).map_err(|e| self.malformed(&e))?;
                parsed
                    .into_iter()
                    .map(|e| (e.entity_type, e.start, e.end, e.score))
                    .collect()
            }
        };

        Ok(raw
            .into_iter()
            .map(|(raw_label, start, end, confidence)| {
                let (label, category) = map_label(&raw_label);
                EntitySpan {
                    text: slice_chars(text, start, end).to_string(),
                    label,
                    category,
                    start,
                    end,
                    page: None,
                    confidence,
                    source: self.name.clone(),
                }
            })
            .collect())
    }

    fn malformed(&self, err: &serde_json::Error) -> DetectError {
        DetectError::MalformedResponse {
            detector: self.name.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl EntityDetector for RemoteDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let probe = async {
            let response = self.client.get(&url).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            response.json::<HealthResponse>().await.ok()
        };

        match tokio::time::timeout(self.timeout, probe).await {
            Ok(Some(health)) => health.status == "healthy",
            Ok(None) | Err(_) => {
                debug!(detector = %self.name, url = %url, "health probe failed");
                false
            }
        }
    }

    fn max_input_chars(&self) -> Option<usize> {
        self.max_input_chars
    }

    #[instrument(skip(self, text), fields(detector = %self.name, chars = text.len()))]
    async fn detect(&self, text: &str) -> Result<Vec<EntitySpan>, DetectError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let spans = tokio::time::timeout(self.timeout, self.call(text))
            .await
            .map_err(|_| DetectError::Timeout {
                detector: self.name.clone(),
                secs: self.timeout.as_secs(),
            })??;

        debug!(found = spans.len(), "remote detection complete");
        Ok(spans)
    }
}

/// Map a service label to the canonical label and category.
///
/// Unknown labels keep their upper-cased name under [`Category::Other`].
pub fn map_label(raw: &str) -> (String, Category) {
    let upper = raw.trim().to_uppercase();
    let (label, category) = match upper.as_str() {
        "PERSON" | "PER" => ("PERSON", Category::Person),
        "ORG" | "ORGANIZATION" | "ORGANISATION" | "COURT" => ("ORGANIZATION", Category::Organization),
        "GPE" | "LOC" | "LOCATION" | "ADDRESS" => ("LOCATION", Category::Location),
        "DATE" | "DATE_TIME" => ("DATE", Category::Date),
        "MONEY" | "FINANCIAL_AMOUNT" | "CREDIT_CARD" | "IBAN_CODE" => {
            ("FINANCIAL_AMOUNT", Category::Financial)
        }
        "CASE_NUMBER" | "CASENAME" | "CITATION" | "CASE_REFERENCE" => {
            ("CASE_REFERENCE", Category::CaseRef)
        }
        "JUDGE" | "LEGAL_ROLE" => ("LEGAL_ROLE", Category::LegalRole),
        "PROVISION" | "INSTRUMENT" | "LEGISLATION" => ("LEGISLATION", Category::Legislation),
        "EMAIL_ADDRESS" | "EMAIL" => ("EMAIL", Category::Email),
        "PHONE_NUMBER" | "PHONE" => ("PHONE", Category::Phone),
        "UK_NINO" | "NI_NUMBER" => ("NI_NUMBER", Category::IdNumber),
        "UK_NHS" | "US_SSN" | "US_DRIVER_LICENSE" | "US_PASSPORT" | "MEDICAL_LICENSE" => {
            return (upper.clone(), Category::IdNumber);
        }
        _ => return (upper.clone(), Category::Other),
    };
    (label.to_string(), category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_legal_labels() {
        assert_eq!(map_label("ORG"), ("ORGANIZATION".to_string(), Category::Organization));
        assert_eq!(map_label("CASE_NUMBER").1, Category::CaseRef);
        assert_eq!(map_label("PROVISION").1, Category::Legislation);
    }

    #[test]
    fn maps_pii_labels() {
        assert_eq!(map_label("EMAIL_ADDRESS"), ("EMAIL".to_string(), Category::Email));
        assert_eq!(map_label("DATE_TIME").0, "DATE");
        assert_eq!(map_label("UK_NHS"), ("UK_NHS".to_string(), Category::IdNumber));
    }

    #[test]
    fn unknown_labels_are_kept() {
        assert_eq!(map_label("ip_address"), ("IP_ADDRESS".to_string(), Category::Other));
    }

    #[test]
    fn pii_request_carries_language() {
        let body = serde_json::to_value(AnalyzeRequest {
            text: "x",
            language: Some("en"),
        })
        .unwrap();
        assert_eq!(body["language"], "en");

        let legal = serde_json::to_value(AnalyzeRequest {
            text: "x",
            language: None,
        })
        .unwrap();
        assert!(legal.get("language").is_none());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let detector =
            RemoteDetector::new("legal", "http://localhost:5004/", Dialect::Legal, Duration::from_secs(1))
                .unwrap();
        assert_eq!(detector.base_url, "http://localhost:5004");
        assert_eq!(detector.max_input_chars(), None);
    }

    #[tokio::test]
    async fn empty_text_skips_the_network() {
        let detector =
            RemoteDetector::new("pii", "http://127.0.0.1:9", Dialect::Pii, Duration::from_secs(1))
                .unwrap();
        assert!(detector.detect("   ").await.unwrap().is_empty());
    }
}
