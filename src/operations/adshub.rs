//! Ad pre-processing agent operations
//!
//! Two registry entries share this implementation and differ only in the
//! agent code: e-commerce (`adshub_pre_eb`) and app (`adshub_pre_app`).
//! A case chats with the agent once and, when asked to, has the agent
//! generate an ad plan that is expanded into one row per ad group.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::llm::{ChatMessage, LlmClient};
use super::stream::{data_events, find_text};
use super::{Operation, OperationContext};
use crate::config::BackendConfig;
use crate::http::{HttpClient, RetryPolicy};
use crate::models::{CaseArgs, ResultRow};
use crate::utils::round_secs;

pub const ADSHUB_PRE_EB: &str = "adshub_pre_eb";
pub const ADSHUB_PRE_APP: &str = "adshub_pre_app";

const DEFAULT_LANGUAGE: &str = "zh_CN";

/// The stream opens with two content fragments that are not part of the answer
const PREAMBLE_FRAGMENTS: usize = 2;

const QUESTION_SYSTEM_PROMPT: &str = "You are an advertiser planning a campaign and \
talking to an ad placement assistant.";

const QUESTION_PROMPT: &str = "Conversation so far:\n{history}\nProduct: {item_info}\n\
Campaign objective: {objective}\nWrite the advertiser's next message to the assistant. \
Reply in JSON with the key \"q\".";

/// What the agent said back in one chat turn
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentReply {
    pub answer: String,
    pub conversation_id: String,
    pub trace_id: String,
}

/// Assemble the agent's streamed reply
pub fn parse_agent_stream(body: &str) -> AgentReply {
    let events = data_events(body);

    let answer: String = events
        .iter()
        .filter_map(|event| find_text(event, "content"))
        .skip(PREAMBLE_FRAGMENTS)
        .collect::<String>()
        .replace("\\n", "\n");

    let first = |key: &str| {
        events
            .iter()
            .find_map(|event| find_text(event, key))
            .unwrap_or_default()
    };

    AgentReply {
        answer,
        conversation_id: first("conversationId"),
        trace_id: first("traceId"),
    }
}

/// Terminal state of plan generation
#[derive(Clone, Debug, PartialEq)]
pub enum PlanOutcome {
    Ready(Value),
    Failed,
    Pending,
}

impl PlanOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            PlanOutcome::Ready(_) => "SUCCESS",
            PlanOutcome::Failed => "PLAN_FAIL",
            PlanOutcome::Pending => "TIMEOUT",
        }
    }
}

/// Classify one plan-info response body
pub fn plan_outcome(body: &Value) -> PlanOutcome {
    let result = body.get("result").unwrap_or(body);
    match result.get("planStatus").and_then(Value::as_str) {
        Some("SUCCESS") => PlanOutcome::Ready(result.clone()),
        Some("PLAN_FAIL") => PlanOutcome::Failed,
        _ => PlanOutcome::Pending,
    }
}

/// One row per campaign and ad group of a finished plan.
///
/// Campaign fields are prefixed `campaign_`, ad group fields `adgroup_`.
pub fn plan_rows(plan: &Value, base: &ResultRow) -> Vec<ResultRow> {
    let campaigns = plan
        .pointer("/planDetail/campaignList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut rows = Vec::new();
    for campaign in &campaigns {
        let Some(campaign) = campaign.as_object() else {
            continue;
        };
        let adgroups = campaign
            .get("adGroupList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for adgroup in adgroups.iter().filter_map(Value::as_object) {
            let mut row = base.clone();
            for (key, value) in campaign.iter().filter(|(k, _)| *k != "adGroupList") {
                row.insert(format!("campaign_{key}"), value.clone());
            }
            for (key, value) in adgroup {
                row.insert(format!("adgroup_{key}"), value.clone());
            }
            rows.push(row);
        }
    }
    rows
}

/// Ad pre-processing agent operation
pub struct AdshubOperation {
    name: &'static str,
    agent_code: String,
    user_id: u64,
    http: HttpClient,
    llm: Arc<LlmClient>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl AdshubOperation {
    fn new(
        name: &'static str,
        agent_code: &str,
        backends: &BackendConfig,
        llm: Arc<LlmClient>,
    ) -> Result<Self> {
        let mut http = HttpClient::with_timeout(backends.request_timeout_secs)?
            .base_url(&backends.adshub_url)
            .retry(RetryPolicy::new(
                backends.retries,
                Duration::from_secs(backends.retry_delay_secs),
            ))
            .default_header("Agent-Code", agent_code)?
            .default_header("x-sino-language", "zh-CN")?;
        if let Some(token) = &backends.adshub_token {
            http = http.default_header("x-sino-jwt", token)?;
        }

        Ok(Self {
            name,
            agent_code: agent_code.to_string(),
            user_id: backends.adshub_user_id,
            http,
            llm,
            poll_attempts: backends.plan_poll_attempts.max(1),
            poll_interval: Duration::from_secs(backends.plan_poll_interval_secs),
        })
    }

    /// E-commerce agent
    pub fn ecommerce(backends: &BackendConfig, llm: Arc<LlmClient>) -> Result<Self> {
        Self::new(ADSHUB_PRE_EB, &backends.adshub_ec_agent_code, backends, llm)
    }

    /// App agent
    pub fn app(backends: &BackendConfig, llm: Arc<LlmClient>) -> Result<Self> {
        Self::new(ADSHUB_PRE_APP, &backends.adshub_app_agent_code, backends, llm)
    }

    /// The case's own `query`, or one generated from the product description
    async fn question(&self, args: &CaseArgs, history: &str, user: &str) -> Result<String> {
        if let Some(query) = args.get_str("query") {
            return Ok(query.to_string());
        }

        let item_info = json!({
            "item_desc": args.str_or("item_desc", ""),
            "price": args.str_or("price", ""),
        });
        let prompt = QUESTION_PROMPT
            .replace("{history}", history)
            .replace("{item_info}", &item_info.to_string())
            .replace("{objective}", args.str_or("objective", ""));
        let messages = [
            ChatMessage::system(QUESTION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        self.llm.ask_for(&messages, user, "q").await
    }

    async fn chat(
        &self,
        question: &str,
        language: &str,
        conversation_id: Option<&str>,
    ) -> Result<AgentReply> {
        let mut body = json!({
            "agentCode": self.agent_code,
            "agentSubType": "CHAT",
            "language": language,
            "userId": self.user_id,
            "userInputText": question,
        });
        if let Some(id) = conversation_id {
            body["conversationId"] = json!(id);
        }

        let response = self
            .http
            .post_json("/dialogue/agentStreamAskQuestion", &body)
            .await?;
        Ok(parse_agent_stream(&response.body))
    }

    async fn generate_plan(&self, conversation_id: &str) -> Result<(String, PlanOutcome)> {
        let response = self
            .http
            .post_json(
                "/conversation/generate",
                &json!({"conversationId": conversation_id}),
            )
            .await?;
        let body: Value = response.json()?;
        let plan_id = find_text(&body, "planId")
            .ok_or_else(|| anyhow!("Plan generation returned no planId: {}", response.body))?;
        info!("Generating plan {} for conversation {}", plan_id, conversation_id);

        for attempt in 1..=self.poll_attempts {
            let response = self
                .http
                .get(&format!("/plan/planInfo?planId={plan_id}"))
                .await?;
            match plan_outcome(&response.json()?) {
                PlanOutcome::Pending if attempt < self.poll_attempts => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                outcome => return Ok((plan_id, outcome)),
            }
        }
        warn!(
            "Plan {} still pending after {} poll(s)",
            plan_id, self.poll_attempts
        );
        Ok((plan_id, PlanOutcome::Pending))
    }
}

#[async_trait]
impl Operation for AdshubOperation {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()> {
        let session = ctx.session();
        let user = session.user.clone();
        let history = session.history_json();
        let conversation_id = session.conversation_id.clone();

        let question = self.question(args, &history, &user).await?;
        info!("Advertiser asks {}: {}", self.name, question);

        let started = Instant::now();
        let reply = self
            .chat(
                &question,
                args.str_or("language", DEFAULT_LANGUAGE),
                conversation_id.as_deref(),
            )
            .await?;
        let cost = round_secs(started.elapsed().as_secs_f64());
        info!("Agent replied in {}s: {}", cost, reply.answer);

        let session = ctx.session();
        session.push_turn(&question, &reply.answer);
        if !reply.conversation_id.is_empty() {
            session.conversation_id = Some(reply.conversation_id.clone());
        }

        let mut base = ResultRow::new();
        base.insert("question".into(), json!(question));
        base.insert("answer".into(), json!(reply.answer));
        base.insert("conversation_id".into(), json!(reply.conversation_id));
        base.insert("trace_id".into(), json!(reply.trace_id));
        base.insert("cost_secs".into(), json!(cost));

        if !args.flag("generate_plan") {
            ctx.emit(base);
            return Ok(());
        }

        if reply.conversation_id.is_empty() {
            warn!("Agent reply carried no conversation id, plan generation skipped");
            ctx.emit(base);
            return Ok(());
        }

        let (plan_id, outcome) = self.generate_plan(&reply.conversation_id).await?;
        base.insert("plan_id".into(), json!(plan_id));
        base.insert("plan_status".into(), json!(outcome.status()));

        let rows = match &outcome {
            PlanOutcome::Ready(plan) => plan_rows(plan, &base),
            _ => Vec::new(),
        };
        if rows.is_empty() {
            ctx.emit(base);
        } else {
            for row in rows {
                ctx.emit(row);
            }
        }
        Ok(())
    }
}
