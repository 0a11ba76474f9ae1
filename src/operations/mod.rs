//! Operations
//!
//! An operation is the unit of work a case names in its `operation` column.
//! Operations are looked up in a registry built once at startup and receive
//! only the case fields that are not reserved by the harness.

mod adshub;
mod llm;
mod meetask;
mod stream;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::models::{CaseArgs, ResultRow};

use adshub::AdshubOperation;
use llm::LlmClient;
use meetask::MeetAskOperation;

/// A named unit of work invoked once per case
#[async_trait]
pub trait Operation: Send + Sync {
    /// Registry key, matched against the case's `operation` column
    fn name(&self) -> &str;

    /// Fields that must be present and non-blank
    fn required_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Run the operation, contributing rows through `ctx.emit`.
    ///
    /// Rows emitted before an error are kept.
    async fn execute(&self, args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()>;
}

/// One question/answer exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub q: String,
    pub a: String,
}

/// Conversation state carried across the cases of one worker
#[derive(Clone, Debug)]
pub struct SessionState {
    pub user: String,
    pub conversation_id: Option<String>,
    pub history: Vec<Turn>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            user: generate_user_id(),
            conversation_id: None,
            history: Vec::new(),
        }
    }

    /// Forget the conversation; the user id is kept
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.history.clear();
    }

    pub fn push_turn(&mut self, q: impl Into<String>, a: impl Into<String>) {
        self.history.push(Turn {
            q: q.into(),
            a: a.into(),
        });
    }

    /// History as JSON text for prompts
    pub fn history_json(&self) -> String {
        serde_json::to_string(&self.history).unwrap_or_default()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// `test_` + last 6 digits of the unix time + 6 random hex chars
fn generate_user_id() -> String {
    let ts = Utc::now().timestamp().rem_euclid(1_000_000);
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("test_{ts:06}{suffix:06x}")
}

/// What an operation sees while it runs
pub struct OperationContext<'a> {
    case_index: usize,
    session: &'a mut SessionState,
    rows: Vec<ResultRow>,
}

impl<'a> OperationContext<'a> {
    pub fn new(case_index: usize, session: &'a mut SessionState) -> Self {
        Self {
            case_index,
            session,
            rows: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn case_index(&self) -> usize {
        self.case_index
    }

    pub fn session(&mut self) -> &mut SessionState {
        &mut *self.session
    }

    /// Contribute a result row
    pub fn emit(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }
}

/// Operation lookup by name
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under its own name, replacing any previous one
    pub fn register(&mut self, operation: impl Operation + 'static) -> &mut Self {
        self.operations
            .insert(operation.name().to_string(), Arc::new(operation));
        self
    }

    pub fn with(mut self, operation: impl Operation + 'static) -> Self {
        self.register(operation);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Registry with every built-in operation wired to the configured backends
pub fn default_registry(backends: &BackendConfig) -> Result<OperationRegistry> {
    let llm = Arc::new(LlmClient::from_config(backends)?);

    Ok(OperationRegistry::new()
        .with(MeetAskOperation::from_config(backends, llm.clone())?)
        .with(AdshubOperation::ecommerce(backends, llm.clone())?)
        .with(AdshubOperation::app(backends, llm)?))
}

#[cfg(test)]
mod tests {
    use super::adshub::{ADSHUB_PRE_APP, ADSHUB_PRE_EB};
    use super::meetask::MEETASK;
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Operation for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn required_fields(&self) -> &[&'static str] {
            &["query"]
        }

        async fn execute(&self, args: &CaseArgs, ctx: &mut OperationContext<'_>) -> Result<()> {
            let query = args.str_or("query", "").to_string();
            ctx.session().push_turn(&query, "ok");
            let mut row = ResultRow::new();
            row.insert("query".into(), json!(query));
            ctx.emit(row);
            Ok(())
        }
    }

    #[test]
    fn test_user_id_format() {
        let session = SessionState::new();
        assert!(session.user.starts_with("test_"));
        assert_eq!(session.user.len(), "test_".len() + 12);
    }

    #[test]
    fn test_session_reset_keeps_user() {
        let mut session = SessionState::new();
        let user = session.user.clone();
        session.conversation_id = Some("c-1".into());
        session.push_turn("q", "a");
        assert_eq!(session.history_json(), r#"[{"q":"q","a":"a"}]"#);

        session.reset();
        assert_eq!(session.user, user);
        assert!(session.conversation_id.is_none());
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_registry() {
        let registry = OperationRegistry::new().with(Echo);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
        assert_eq!(registry.get("echo").unwrap().required_fields(), &["query"]);
    }

    #[test]
    fn test_context_collects_rows() {
        let mut session = SessionState::new();
        let registry = OperationRegistry::new().with(Echo);
        let op = registry.get("echo").unwrap();
        let args = crate::models::Case::new(4, "echo")
            .with_field("query", "hello")
            .args();

        let mut ctx = OperationContext::new(4, &mut session);
        tokio_test::block_on(op.execute(&args, &mut ctx)).unwrap();
        assert_eq!(ctx.case_index(), 4);
        assert_eq!(ctx.rows().len(), 1);
        assert_eq!(ctx.into_rows()[0]["query"], "hello");
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn test_default_registry_names() {
        let registry = default_registry(&BackendConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![ADSHUB_PRE_APP, ADSHUB_PRE_EB, MEETASK]
        );
    }
}
