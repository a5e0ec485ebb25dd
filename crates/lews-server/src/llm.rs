//! LLM client for risk assessment and alert narratives.
//!
//! The transport is a trait so detection runs can be exercised against a
//! scripted model. The HTTP transport speaks a messages-style chat endpoint.
//! Retryable failures (throttling, 5xx, network) go through the shared
//! retry policy; schema failures get up to two "JSON only" re-asks before
//! surfacing as bad output.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use lews_core::models::Assessment;

use crate::config::Config;
use crate::error::LewsError;
use crate::retry::RetryPolicy;

const SYSTEM_PROMPT: &str = "You are a senior geotechnical engineer at a national landslide \
early-warning centre.\n\
Your expertise covers Mohr-Coulomb failure criteria, unsaturated soil mechanics, hazard \
zonation methodology, and multi-sensor data fusion.\n\
Your role: analyse IoT slope-monitoring telemetry for landslide precursors, assess risk \
using soil mechanics principles and the supplied geological context, and produce clear, \
actionable warnings for disaster management officials.\n\
Guidelines:\n\
- Use technical accuracy but clear language\n\
- Apply the 75/100/150 mm rainfall thresholds for Yellow/Orange/Red\n\
- Weight spatial correlation heavily: multiple agreeing sensors beat a single sensor\n\
- Weight geological context from hazard zonation heavily\n\
- Be decisive but acknowledge uncertainty\n\
- Output ONLY valid JSON (no markdown, no code blocks)";

const JSON_NUDGE: &str =
    "\n\nIMPORTANT: Return ONLY a single valid JSON object matching the requested schema. \
No prose, no markdown fences, no extra keys.";

/// Per-call sampling parameters.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

/// Transport-level failure classification; drives the retry predicate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmCallError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("terminal: {0}")]
    Terminal(String),
}

impl LlmCallError {
    fn retryable(&self) -> bool {
        matches!(self, LlmCallError::Throttled(_) | LlmCallError::Transient(_))
    }
}

/// A text-in/text-out chat endpoint.
pub trait LlmTransport: Send + Sync + 'static {
    fn chat(
        &self,
        system: &str,
        user: &str,
        params: &ChatParams,
    ) -> impl Future<Output = Result<String, LlmCallError>> + Send;
}

/// Messages-API request body for the HTTP transport.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    system: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// HTTP chat transport.
pub struct HttpLlmTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpLlmTransport {
    pub fn new(endpoint: String, api_key: String, timeout_s: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_s))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

impl LlmTransport for HttpLlmTransport {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        params: &ChatParams,
    ) -> Result<String, LlmCallError> {
        let request = MessagesRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            system,
            messages: vec![ApiMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LlmCallError::Transient(e.to_string())
                } else {
                    LlmCallError::Terminal(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmCallError::Transient(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(LlmCallError::Throttled(body));
        }
        if status.is_server_error() {
            return Err(LlmCallError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(LlmCallError::Terminal(format!("{status}: {body}")));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| LlmCallError::Terminal(format!("unparseable response: {e}")))?;

        Ok(parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Summary of one detection target handed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentContext {
    pub detection_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_risk: Option<f64>,
    pub risk_score: f64,
    pub spatial_correlation: f64,
    pub sensor_ids: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_label: String,
    pub telemetry: serde_json::Value,
    pub critical_moisture_percent: f64,
    pub zone: serde_json::Value,
}

pub struct LlmClient<T: LlmTransport> {
    transport: T,
    params: ChatParams,
    retry: RetryPolicy,
    parse_retries: u32,
}

impl<T: LlmTransport> LlmClient<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            params: ChatParams {
                model: config.llm_model_id.clone(),
                max_tokens: config.llm_max_tokens,
                temperature: config.llm_temperature,
                top_p: config.llm_top_p,
            },
            retry: RetryPolicy::new(
                config.llm_max_attempts,
                Duration::from_secs_f64(config.llm_backoff_base_s),
                Duration::from_secs_f64(config.llm_backoff_cap_s),
            ),
            parse_retries: config.llm_parse_retries,
        }
    }

    async fn chat_with_retry(&self, user: &str) -> Result<String, LewsError> {
        self.retry
            .run(
                |_attempt| self.transport.chat(SYSTEM_PROMPT, user, &self.params),
                LlmCallError::retryable,
            )
            .await
            .map_err(|e| match e {
                LlmCallError::Throttled(msg) => LewsError::LlmThrottled(msg),
                LlmCallError::Transient(msg) | LlmCallError::Terminal(msg) => {
                    LewsError::LlmTransient(msg)
                }
            })
    }

    /// Ask for a structured risk judgement and validate it against the
    /// assessment schema. Parse failures get a "JSON only" re-ask.
    pub async fn assess_risk(&self, context: &AssessmentContext) -> Result<Assessment, LewsError> {
        let base_prompt = build_assessment_prompt(context);

        let mut last_err = String::new();
        for parse_attempt in 0..=self.parse_retries {
            let prompt = if parse_attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{base_prompt}{JSON_NUDGE}")
            };

            let text = self.chat_with_retry(&prompt).await?;
            match parse_assessment(&text) {
                Ok(assessment) => {
                    tracing::info!(
                        risk_level = assessment.risk_level.as_str(),
                        confidence = assessment.confidence,
                        "risk assessment received"
                    );
                    return Ok(assessment);
                }
                Err(err) => {
                    tracing::warn!(parse_attempt, %err, "assessment parse failed");
                    last_err = err;
                }
            }
        }

        Err(LewsError::LlmBadOutput(last_err))
    }

    /// Free-text public warning; called only for Orange/Red assessments.
    pub async fn generate_narrative(
        &self,
        assessment: &Assessment,
        location_label: &str,
        issued_at: &str,
    ) -> Result<String, LewsError> {
        let prompt = build_narrative_prompt(assessment, location_label, issued_at);
        let text = self.chat_with_retry(&prompt).await?;
        Ok(text.trim().to_string())
    }
}

fn build_assessment_prompt(context: &AssessmentContext) -> String {
    let header = if context.detection_type == "cluster" {
        format!(
            "CLUSTER DETECTION ({} sensors)\nMembers: {}\nAverage Risk Score: {:.2}",
            context.cluster_size.unwrap_or(0),
            context.sensor_ids.join(", "),
            context.avg_risk.unwrap_or(context.risk_score),
        )
    } else {
        format!(
            "INDIVIDUAL SENSOR DETECTION\nSensor ID: {}\nRisk Score: {:.2}",
            context.sensor_ids.first().map(String::as_str).unwrap_or("unknown"),
            context.risk_score,
        )
    };

    let spatial_note = if context.spatial_correlation > 0.6 {
        "High agreement with neighbours"
    } else if context.spatial_correlation < 0.3 {
        "Isolated anomaly (possible sensor fault)"
    } else {
        "Moderate agreement"
    };

    format!(
        "SENSOR DATA ANALYSIS REQUEST\n\n{header}\n\n\
         LOCATION: {label} ({lat:.4}, {lon:.4})\n\n\
         CURRENT READINGS:\n{telemetry}\n\
         Critical moisture threshold for this site: {critical:.1}%\n\n\
         SPATIAL CONTEXT:\n- Spatial Correlation: {corr:.2}\n- {spatial_note}\n\n\
         GEOLOGICAL CONTEXT (from hazard zonation):\n{zone}\n\n\
         TASK:\nAssess landslide risk from the data above. Consider whether readings \
         exceed site-specific thresholds, whether spatial correlation is strong, and \
         whether the pattern matches known pre-failure signatures.\n\n\
         OUTPUT FORMAT (JSON only, no markdown):\n\
         {{\n  \"risk_level\": \"Yellow|Orange|Red\",\n  \"confidence\": 0.0-1.0,\n  \
         \"reasoning\": \"2-3 sentences referencing specific data\",\n  \
         \"trigger_factors\": [\"factor1\", \"factor2\"],\n  \
         \"recommended_action\": \"Monitor closely|Prepare evacuation|Evacuate immediately\",\n  \
         \"time_to_failure_estimate\": \"hours|days|unknown\",\n  \
         \"references\": [\"...\"]\n}}",
        label = context.location_label,
        lat = context.latitude,
        lon = context.longitude,
        telemetry = context.telemetry,
        critical = context.critical_moisture_percent,
        corr = context.spatial_correlation,
        zone = context.zone,
    )
}

fn build_narrative_prompt(assessment: &Assessment, location_label: &str, issued_at: &str) -> String {
    format!(
        "Generate an urgent landslide warning for local disaster management officials and \
         affected communities.\n\n\
         CONTEXT:\n\
         - Risk Level: {level}\n\
         - Confidence: {confidence:.2}\n\
         - Technical Reasoning: {reasoning}\n\
         - Location: {location_label}\n\
         - Time to Potential Failure: {ttf:?}\n\n\
         REQUIREMENTS:\n\
         - Length: 150-200 words\n\
         - Tone: urgent and authoritative, but avoid panic\n\
         - Language: simple English, no technical jargon\n\n\
         FORMAT:\n\
         URGENT LANDSLIDE WARNING - [Location Name]\n\n\
         SITUATION: [what sensors show, in plain language]\n\n\
         RISK: [probability and timeframe of failure]\n\n\
         ACTION REQUIRED: [specific, clear evacuation or safety instructions]\n\n\
         ISSUED: {issued_at}\n\
         CONTACT: National Emergency Hotline 117",
        level = assessment.risk_level.as_str(),
        confidence = assessment.confidence,
        reasoning = assessment.reasoning,
        ttf = assessment.time_to_failure_estimate,
    )
}

/// Extract and validate the assessment JSON from model output. Tolerates
/// markdown fences and prose around the object, nothing else.
pub fn parse_assessment(text: &str) -> Result<Assessment, String> {
    let start = text.find('{').ok_or("no JSON object in output")?;
    let end = text.rfind('}').ok_or("no closing brace in output")?;
    if end < start {
        return Err("malformed JSON object".into());
    }

    let assessment: Assessment =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("schema mismatch: {e}"))?;

    if !(0.0..=1.0).contains(&assessment.confidence) {
        return Err(format!(
            "confidence {} outside [0,1]",
            assessment.confidence
        ));
    }
    if assessment.reasoning.trim().is_empty() {
        return Err("empty reasoning".into());
    }

    Ok(assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lews_core::models::{RecommendedAction, RiskLevel};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const VALID_JSON: &str = r#"{
        "risk_level": "Orange",
        "confidence": 0.82,
        "reasoning": "Moisture exceeds the site threshold and three sensors agree.",
        "trigger_factors": ["moisture", "tilt rate"],
        "recommended_action": "Prepare evacuation",
        "time_to_failure_estimate": "hours",
        "references": ["rainfall threshold"]
    }"#;

    fn test_config() -> Config {
        let mut config = Config::from_env();
        config.llm_max_attempts = 4;
        config.llm_backoff_base_s = 0.002;
        config.llm_backoff_cap_s = 0.008;
        config.llm_parse_retries = 2;
        config
    }

    fn context() -> AssessmentContext {
        AssessmentContext {
            detection_type: "individual".into(),
            cluster_size: None,
            avg_risk: None,
            risk_score: 0.8,
            spatial_correlation: 0.5,
            sensor_ids: vec!["SENSOR_001".into()],
            latitude: 6.85,
            longitude: 80.93,
            location_label: "6.85000, 80.93000".into(),
            telemetry: serde_json::json!({"moisture_percent": 92.0}),
            critical_moisture_percent: 35.0,
            zone: serde_json::json!({"hazard_level": "High"}),
        }
    }

    /// Scripted transport: errors for the first `failures` calls, then
    /// returns the canned bodies in order (last one repeats).
    struct ScriptedTransport {
        calls: Arc<AtomicU32>,
        failures: u32,
        failure: LlmCallError,
        bodies: Vec<String>,
    }

    impl LlmTransport for ScriptedTransport {
        async fn chat(
            &self,
            _system: &str,
            _user: &str,
            _params: &ChatParams,
        ) -> Result<String, LlmCallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.failure.clone());
            }
            let idx = ((n - self.failures) as usize).min(self.bodies.len() - 1);
            Ok(self.bodies[idx].clone())
        }
    }

    #[test]
    fn parse_accepts_fenced_json() {
        let fenced = format!("```json\n{VALID_JSON}\n```");
        let a = parse_assessment(&fenced).unwrap();
        assert_eq!(a.risk_level, RiskLevel::Orange);
        assert_eq!(a.recommended_action, RecommendedAction::PrepareEvacuation);
    }

    #[test]
    fn parse_rejects_bad_enum_and_range() {
        let bad_level = VALID_JSON.replace("Orange", "Purple");
        assert!(parse_assessment(&bad_level).is_err());

        let bad_confidence = VALID_JSON.replace("0.82", "1.5");
        assert!(parse_assessment(&bad_confidence).is_err());

        assert!(parse_assessment("the model said nothing useful").is_err());
    }

    #[tokio::test]
    async fn assess_risk_survives_throttling_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = LlmClient::new(
            ScriptedTransport {
                calls: calls.clone(),
                failures: 3,
                failure: LlmCallError::Throttled("429".into()),
                bodies: vec![VALID_JSON.into()],
            },
            &test_config(),
        );

        let assessment = client.assess_risk(&context()).await.unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Orange);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn assess_risk_fails_when_throttling_exceeds_attempts() {
        let client = LlmClient::new(
            ScriptedTransport {
                calls: Arc::new(AtomicU32::new(0)),
                failures: 10,
                failure: LlmCallError::Throttled("429".into()),
                bodies: vec![VALID_JSON.into()],
            },
            &test_config(),
        );

        let err = client.assess_risk(&context()).await.unwrap_err();
        assert!(matches!(err, LewsError::LlmThrottled(_)));
    }

    #[tokio::test]
    async fn bad_json_is_reasked_then_surfaced() {
        // Two garbage responses, then valid: succeeds on the final parse retry.
        let client = LlmClient::new(
            ScriptedTransport {
                calls: Arc::new(AtomicU32::new(0)),
                failures: 0,
                failure: LlmCallError::Transient("unused".into()),
                bodies: vec![
                    "I think the slope looks risky.".into(),
                    "{\"risk_level\": \"Mauve\"}".into(),
                    VALID_JSON.into(),
                ],
            },
            &test_config(),
        );
        assert!(client.assess_risk(&context()).await.is_ok());

        // Garbage forever: LlmBadOutput after the re-asks run out.
        let client = LlmClient::new(
            ScriptedTransport {
                calls: Arc::new(AtomicU32::new(0)),
                failures: 0,
                failure: LlmCallError::Transient("unused".into()),
                bodies: vec!["not json".into()],
            },
            &test_config(),
        );
        let err = client.assess_risk(&context()).await.unwrap_err();
        assert!(matches!(err, LewsError::LlmBadOutput(_)));
    }

    #[tokio::test]
    async fn narrative_passes_through_trimmed_text() {
        let client = LlmClient::new(
            ScriptedTransport {
                calls: Arc::new(AtomicU32::new(0)),
                failures: 0,
                failure: LlmCallError::Transient("unused".into()),
                bodies: vec!["  URGENT LANDSLIDE WARNING - Ella\n\nSITUATION: ...\n  ".into()],
            },
            &test_config(),
        );
        let assessment = parse_assessment(VALID_JSON).unwrap();
        let narrative = client
            .generate_narrative(&assessment, "Ella", "2026-08-02 09:00 UTC")
            .await
            .unwrap();
        assert!(narrative.starts_with("URGENT LANDSLIDE WARNING"));
    }
}
