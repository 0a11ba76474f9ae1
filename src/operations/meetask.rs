//! Meet-ask Q&A operation
//!
//! Asks the knowledge Q&A backend a question. While the backend marks its
//! answer as needing clarification, a follow-up question steering toward the
//! case's target question is generated and asked. Every turn becomes a row.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::llm::{ChatMessage, LlmClient};
use super::stream::{data_events, scalar_text};
use super::{Operation, OperationContext};
use crate::config::BackendConfig;
use crate::http::{HttpClient, RetryPolicy};
use crate::models::{CaseArgs, ResultRow};

pub const MEETASK: &str = "meetask";

/// Answer type the backend uses for "ask me something more specific"
const FOLLOW_UP_ANSWER_TYPE: i64 = 3;

const FOLLOW_UP_PROMPT: &str = "Act as a user talking to an advertising and marketing \
knowledge Q&A system.\nConversation so far:\n{history}\nTarget question: {target}\n\
From the user's side, ask the system one question that builds on the conversation \
and leads it toward answering the target question. Keep it under 20 words.\n\
Reply in JSON with the key \"q\".";

/// Parsed final event of an answer stream
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeetAskAnswer {
    pub answer: String,
    pub qa_id: String,
    pub answer_type: Option<i64>,
}

impl MeetAskAnswer {
    pub fn wants_follow_up(&self) -> bool {
        self.answer_type == Some(FOLLOW_UP_ANSWER_TYPE)
    }
}

/// Read the last `data:` event that carries a `result`
pub fn parse_answer_stream(body: &str) -> Result<MeetAskAnswer> {
    let result = data_events(body)
        .into_iter()
        .rev()
        .find_map(|event| event.get("result").filter(|r| r.is_object()).cloned())
        .ok_or_else(|| anyhow!("Answer stream has no result event"))?;

    let answer_type = match result.get("answerType") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    Ok(MeetAskAnswer {
        answer: result
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        qa_id: result.get("qaId").and_then(scalar_text).unwrap_or_default(),
        answer_type,
    })
}

/// Meet-ask question operation
pub struct MeetAskOperation {
    http: HttpClient,
    llm: Arc<LlmClient>,
}

impl MeetAskOperation {
    pub fn from_config(backends: &BackendConfig, llm: Arc<LlmClient>) -> Result<Self> {
        let http = HttpClient::with_timeout(backends.request_timeout_secs)?
            .base_url(&backends.meetask_url)
            .retry(RetryPolicy::new(
                backends.retries,
                Duration::from_secs(backends.retry_delay_secs),
            ));
        Ok(Self { http, llm })
    }

    async fn ask(&self, query: &str, user: &str) -> Result<MeetAskAnswer> {
        info!("User {} asks meet-ask: {}", user, query);
        let body = json!({"llmType": "openai", "query": query, "user": user});
        let response = self
            .http
            .post_json("/meetask/stream/askQuestion", &body)
            .await?;
        let answer = parse_answer_stream(&response.body)?;
        info!("qa_id {} answered: {}", answer.qa_id, answer.answer);
        Ok(answer)
    }

    async fn follow_up_question(&self, history: &str, target: &str, user: &str) -> Result<String> {
        let prompt = FOLLOW_UP_PROMPT
            .replace("{history}", history)
            .replace("{target}", target);
        let question = self
            .llm
            .ask_for(&[ChatMessage::user(prompt)], user, "q")
            .await?;
        info!("Generated follow-up question: {}", question);
        Ok(question)
    }
}

#[async_trait]
impl Operation for MeetAskOperation {
    fn name(&self) -> &str {
        MEETASK
    }

    fn required_fields(&self) -> &[&'static str] {
        &["query"]
    }

    async fn execute(&self, args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()> {
        let query = args.str_or("query", "").to_string();
        let target = args.str_or("target_question", &query).to_string();
        let gt_answer = args.str_or("gt_answer", "").to_string();
        let user = ctx.session().user.clone();

        let mut question = query.clone();
        let mut turn = 1;
        loop {
            let answer = self.ask(&question, &user).await?;
            ctx.session().push_turn(&question, &answer.answer);

            let mut row = ResultRow::new();
            row.insert("query".into(), json!(question));
            row.insert("gt_answer".into(), json!(gt_answer));
            row.insert("target_question".into(), json!(target));
            row.insert("response".into(), json!(answer.answer));
            row.insert("qa_id".into(), json!(answer.qa_id));
            row.insert("answer_type".into(), json!(answer.answer_type));
            row.insert("turn".into(), json!(turn));
            ctx.emit(row);

            if !answer.wants_follow_up() {
                return Ok(());
            }

            let history = ctx.session().history_json();
            question = self.follow_up_question(&history, &target, &user).await?;
            turn += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer_stream() {
        let body = "data:{\"result\":{\"answer\":\"partial\"}}\n\n\
                    data:{\"result\":{\"answer\":\"Use the budget panel.\",\"qaId\":\"qa-17\",\"answerType\":1}}\n\n";
        let answer = parse_answer_stream(body).unwrap();
        assert_eq!(answer.answer, "Use the budget panel.");
        assert_eq!(answer.qa_id, "qa-17");
        assert_eq!(answer.answer_type, Some(1));
        assert!(!answer.wants_follow_up());
    }

    #[test]
    fn test_follow_up_answer_type() {
        let body = "data:{\"result\":{\"answer\":\"Which platform?\",\"qaId\":901,\"answerType\":\"3\"}}\n\n";
        let answer = parse_answer_stream(body).unwrap();
        assert_eq!(answer.qa_id, "901");
        assert!(answer.wants_follow_up());
    }

    #[test]
    fn test_parse_answer_stream_without_result() {
        assert!(parse_answer_stream("data:{\"status\":\"busy\"}\n\n").is_err());
        assert!(parse_answer_stream("").is_err());
    }

    #[test]
    fn test_follow_up_prompt_placeholders() {
        let prompt = FOLLOW_UP_PROMPT
            .replace("{history}", "[]")
            .replace("{target}", "How do I raise my budget?");
        assert!(prompt.contains("Target question: How do I raise my budget?"));
        assert!(!prompt.contains("{history}"));
    }
}
