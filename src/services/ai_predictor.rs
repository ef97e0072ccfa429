use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{AppConfig, DeepSeekConfig};
use crate::error::{AppError, Result};
use crate::models::{PredictionDraft, PredictionOutcome};
use crate::services::football_api::HeadToHeadMeeting;

const SYSTEM_INSTRUCTION: &str = "You are a sophisticated soccer match prediction AI. \
Analyze the provided data and predict the match outcome accurately. \
Respond with a single JSON object with the fields: \
\"prediction\" (one of HOME_WIN, DRAW, AWAY_WIN), \
\"confidence\" (number between 0.0 and 1.0), \
\"homeChance\", \"drawChance\", \"awayChance\" (probability of each outcome), \
and \"reasoning\" (a brief explanation).";

const DEFAULT_CONFIDENCE: f64 = 0.7;
const DEFAULT_CHANCE: f64 = 0.33;
const DEFAULT_REASONING: &str = "Based on team performance analysis";

/// Everything the model sees about one fixture.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub season: String,
    pub home_stats: Value,
    pub away_stats: Value,
    pub head_to_head: Vec<HeadToHeadMeeting>,
}

/// A chat-style completion endpoint returning the assistant message text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct DeepSeekClient {
    client: Client,
    config: DeepSeekConfig,
}

impl DeepSeekClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            config: config.deepseek.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatCompletion for DeepSeekClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Upstream("DEEPSEEK_API_KEY not set".to_string()))?;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
        });

        let resp = self.client.post(&url).bearer_auth(api_key).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("DeepSeek API error {}: {}", status, text)));
        }

        let parsed: ChatResponse = serde_json::from_str(&resp.text().await?)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Upstream("DeepSeek reply has no message content".to_string()))
    }
}

pub fn build_prompt(ctx: &PromptContext) -> String {
    format!(
        r#"
Please predict the outcome of the soccer match {home} (home) vs {away} (away) in {league}, with the following data:

HOME TEAM STATISTICS ({season} Season):
{home_stats}

AWAY TEAM STATISTICS ({season} Season):
{away_stats}

HEAD TO HEAD MATCHES (Last {n}):
{h2h}

Based on this data, predict the match outcome (HOME_WIN, DRAW, or AWAY_WIN),
assign a confidence level between 0.0 and 1.0,
calculate the chance for each outcome (homeChance, drawChance, awayChance),
and provide a brief reasoning for your prediction.

Please format your response as a JSON object.
"#,
        home = ctx.home_team,
        away = ctx.away_team,
        league = ctx.league,
        season = ctx.season,
        home_stats = pretty(&ctx.home_stats),
        away_stats = pretty(&ctx.away_stats),
        n = ctx.head_to_head.len(),
        h2h = pretty(&ctx.head_to_head),
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Used whenever the model cannot be reached or its reply is unusable.
pub fn fallback_prediction() -> PredictionDraft {
    PredictionDraft {
        prediction: PredictionOutcome::HomeWin,
        confidence: 0.33,
        home_chance: 0.4,
        draw_chance: 0.3,
        away_chance: 0.3,
        reasoning: "Unable to generate prediction due to an error. This is a fallback prediction.".to_string(),
    }
}

/// Ask the model for a prediction. Never fails: any error degrades to
/// `fallback_prediction()`.
pub async fn request_ai_prediction(model: &dyn ChatCompletion, ctx: &PromptContext) -> PredictionDraft {
    let prompt = build_prompt(ctx);
    let reply = match model.complete(SYSTEM_INSTRUCTION, &prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("AI prediction for {} vs {} failed, using fallback: {}", ctx.home_team, ctx.away_team, e);
            return fallback_prediction();
        }
    };

    match parse_model_reply(&reply) {
        Ok(draft) => draft,
        Err(e) => {
            tracing::warn!(
                "AI reply for {} vs {} unusable, using fallback: {}",
                ctx.home_team,
                ctx.away_team,
                e
            );
            fallback_prediction()
        }
    }
}

/// Parse the model's JSON reply. The outcome is mandatory; numeric fields
/// fall back to defaults when missing or non-numeric.
pub fn parse_model_reply(content: &str) -> Result<PredictionDraft> {
    let value: Value = serde_json::from_str(strip_code_fence(content))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Upstream("AI reply is not a JSON object".to_string()))?;

    let prediction = obj
        .get("prediction")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Upstream("AI reply has no prediction".to_string()))?
        .parse::<PredictionOutcome>()
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let number = |field: &str, default: f64| obj.get(field).and_then(coerce_f64).unwrap_or(default);

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REASONING)
        .to_string();

    Ok(PredictionDraft {
        prediction,
        confidence: number("confidence", DEFAULT_CONFIDENCE),
        home_chance: number("homeChance", DEFAULT_CHANCE),
        draw_chance: number("drawChance", DEFAULT_CHANCE),
        away_chance: number("awayChance", DEFAULT_CHANCE),
        reasoning,
    })
}

/// JSON numbers pass through; strings like "0.45" or "45%" are parsed.
fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedModel;
    use super::*;

    fn context() -> PromptContext {
        PromptContext {
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            league: "Premier League".to_string(),
            season: "2025/2026".to_string(),
            home_stats: json!({ "form": "WWDLW" }),
            away_stats: json!({ "form": "LLDWW" }),
            head_to_head: vec![],
        }
    }

    #[test]
    fn numeric_fields_default_when_missing_or_non_numeric() {
        let draft = parse_model_reply(r#"{ "prediction": "DRAW", "confidence": "high", "homeChance": "0.25" }"#).unwrap();
        assert_eq!(draft.prediction, PredictionOutcome::Draw);
        assert_eq!(draft.confidence, 0.7);
        assert_eq!(draft.home_chance, 0.25);
        assert_eq!(draft.draw_chance, 0.33);
        assert_eq!(draft.away_chance, 0.33);
        assert_eq!(draft.reasoning, "Based on team performance analysis");
    }

    #[test]
    fn zero_is_kept_and_percent_strings_are_parsed() {
        let draft = parse_model_reply(
            r#"{ "prediction": "AWAY_WIN", "confidence": 0, "homeChance": "20%", "drawChance": 0.3, "awayChance": 0.5,
                 "reasoning": "Away side in form" }"#,
        )
        .unwrap();
        assert_eq!(draft.confidence, 0.0);
        assert_eq!(draft.home_chance, 20.0);
        assert_eq!(draft.reasoning, "Away side in form");
    }

    #[test]
    fn fenced_reply_is_accepted() {
        let draft = parse_model_reply("```json\n{ \"prediction\": \"HOME_WIN\", \"confidence\": 0.61 }\n```").unwrap();
        assert_eq!(draft.confidence, 0.61);
    }

    #[test]
    fn missing_or_unknown_outcome_is_rejected() {
        assert!(parse_model_reply(r#"{ "confidence": 0.9 }"#).is_err());
        assert!(parse_model_reply(r#"{ "prediction": "HOME", "confidence": 0.9 }"#).is_err());
        assert!(parse_model_reply("the home side will win").is_err());
    }

    #[test]
    fn prompt_embeds_stats_and_season() {
        let prompt = build_prompt(&context());
        assert!(prompt.contains("HOME TEAM STATISTICS (2025/2026 Season)"));
        assert!(prompt.contains("WWDLW"));
        assert!(prompt.contains("LLDWW"));
        assert!(prompt.contains("Arsenal (home) vs Chelsea (away)"));
    }

    #[tokio::test]
    async fn failed_call_degrades_to_fallback() {
        let model = ScriptedModel::new(vec![Err(AppError::Upstream("connection refused".to_string()))]);
        let draft = request_ai_prediction(&model, &context()).await;
        assert_eq!(draft, fallback_prediction());
        assert_eq!(draft.prediction, PredictionOutcome::HomeWin);
        assert_eq!(draft.confidence, 0.33);
        assert_eq!((draft.home_chance, draft.draw_chance, draft.away_chance), (0.4, 0.3, 0.3));
        assert!(draft.reasoning.contains("fallback"));
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_fallback() {
        let model = ScriptedModel::always("{ not json");
        assert_eq!(request_ai_prediction(&model, &context()).await, fallback_prediction());
    }

    #[tokio::test]
    async fn missing_key_degrades_to_fallback() {
        let client = DeepSeekClient::new(&AppConfig::for_tests()).unwrap();
        assert_eq!(request_ai_prediction(&client, &context()).await, fallback_prediction());
    }
}
