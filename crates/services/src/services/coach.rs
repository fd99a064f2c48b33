//! Chat coach: answers questions about the user's goals and proposes new
//! goals and tasks.

use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::task::TaskPriority;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;

use super::{
    gemini::{Content, GeminiClient, GeminiError, TextStream, parse_json_reply},
    state::GoalState,
};

const COACH_SYSTEM_PROMPT: &str = "You are GoalFlow's productivity coach. Help the user \
make progress on their goals. Be concrete and encouraging, keep answers short, and refer \
to the user's actual goals and tasks when they are given.";

const SUGGEST_SYSTEM_PROMPT: &str = "You are GoalFlow's planning assistant. Reply with JSON \
only, shaped as {\"goals\": [{\"name\": string, \"kpiName\": string?, \"kpiTarget\": number?}], \
\"tasks\": [{\"title\": string, \"goalName\": string?, \"priority\": \"low\"|\"medium\"|\"high\"?, \
\"durationMinutes\": number?}]}. Suggest at most 3 goals and 5 tasks.";

const STREAM_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("coach is not configured")]
    NotConfigured,
    #[error(transparent)]
    Model(#[from] GeminiError),
}

/// Body of `/api/chat` and `/api/chat/suggestions`. `context` is either a
/// prepared summary string or any JSON the client wants the coach to see.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub context: Option<Value>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedGoal {
    pub name: String,
    #[serde(default)]
    pub kpi_name: Option<String>,
    #[serde(default)]
    pub kpi_target: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTask {
    pub title: String,
    #[serde(default)]
    pub goal_name: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
pub struct CoachSuggestions {
    #[serde(default)]
    pub goals: Vec<SuggestedGoal>,
    #[serde(default)]
    pub tasks: Vec<SuggestedTask>,
}

/// The language model behind the coach.
#[async_trait]
pub trait CoachModel: Send + Sync {
    async fn stream(&self, prompt: String, system: String) -> Result<TextStream, GeminiError>;
    async fn ask(&self, prompt: String, system: String) -> Result<String, GeminiError>;
}

#[async_trait]
impl CoachModel for GeminiClient {
    async fn stream(&self, prompt: String, system: String) -> Result<TextStream, GeminiError> {
        let contents = vec![Content::user(prompt)];
        GeminiClient::stream(self, contents, Some(system), STREAM_MAX_TOKENS).await
    }

    async fn ask(&self, prompt: String, system: String) -> Result<String, GeminiError> {
        GeminiClient::ask(self, &prompt, Some(system)).await
    }
}

#[derive(Clone)]
pub struct Coach {
    model: Arc<dyn CoachModel>,
}

impl Coach {
    pub fn new(model: Arc<dyn CoachModel>) -> Self {
        Self { model }
    }

    pub fn gemini(client: GeminiClient) -> Self {
        Self::new(Arc::new(client))
    }

    /// Stream the coach's answer to `request` as text fragments.
    pub async fn stream_reply(&self, request: &ChatRequest) -> Result<TextStream, CoachError> {
        let prompt = build_prompt(request)?;
        info!(query_len = request.query.len(), "coach reply requested");
        Ok(self.model.stream(prompt, COACH_SYSTEM_PROMPT.to_string()).await?)
    }

    /// Collect the whole streamed answer.
    pub async fn reply(&self, request: &ChatRequest) -> Result<String, CoachError> {
        let mut stream = self.stream_reply(request).await?;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }

    /// Ask for new goals and tasks fitting the query and context.
    pub async fn suggest(&self, request: &ChatRequest) -> Result<CoachSuggestions, CoachError> {
        let prompt = build_prompt(request)?;
        let raw = self.model.ask(prompt, SUGGEST_SYSTEM_PROMPT.to_string()).await?;
        let mut suggestions: CoachSuggestions = parse_json_reply(&raw)?;
        suggestions.goals.retain(|g| !g.name.trim().is_empty());
        suggestions.tasks.retain(|t| !t.title.trim().is_empty());
        debug!(
            goals = suggestions.goals.len(),
            tasks = suggestions.tasks.len(),
            "coach suggestions parsed"
        );
        Ok(suggestions)
    }
}

fn build_prompt(request: &ChatRequest) -> Result<String, CoachError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(CoachError::EmptyQuery);
    }
    let context = match &request.context {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            Some(serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()))
        }
    };
    Ok(match context {
        Some(context) => format!("Context about my goals:\n{context}\n\nQuestion: {query}"),
        None => format!("Question: {query}"),
    })
}

/// Plain-text summary of a user's goals, progress and open tasks, used as
/// coach context when the client sends none.
pub fn summarize_state(state: &GoalState, now: DateTime<Utc>) -> String {
    if state.goals.is_empty() {
        return "The user has no goals yet.".to_string();
    }
    let mut out = String::new();
    for goal in &state.goals {
        let tasks: Vec<_> = state.tasks_for(goal.id).cloned().collect();
        let progress = goal.progress(&tasks);
        let _ = writeln!(out, "- Goal \"{}\": {:.0}% done", goal.name, progress.percent);
        for task in tasks.iter().filter(|t| !t.completed) {
            let due = match task.days_to_deadline(now) {
                Some(days) if days < 0 => format!(", overdue by {} day(s)", -days),
                Some(days) => format!(", due in {days} day(s)"),
                None => String::new(),
            };
            let _ = writeln!(out, "  - [{}] {}{}", task.priority, task.title, due);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::services::state::fixtures;

    #[derive(Default)]
    struct ScriptedModel {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                prompts: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl CoachModel for ScriptedModel {
        async fn stream(&self, prompt: String, _system: String) -> Result<TextStream, GeminiError> {
            self.prompts.lock().unwrap().push(prompt);
            let words: Vec<Result<String, GeminiError>> = self
                .answer
                .split_inclusive(' ')
                .map(|w| Ok(w.to_string()))
                .collect();
            Ok(stream::iter(words).boxed())
        }

        async fn ask(&self, prompt: String, _system: String) -> Result<String, GeminiError> {
            self.prompts.lock().unwrap().push(prompt);
            Ok(self.answer.clone())
        }
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let coach = Coach::new(ScriptedModel::answering("unused"));
        let err = coach.stream_reply(&ChatRequest::new("   ")).await.err().unwrap();
        assert!(matches!(err, CoachError::EmptyQuery));
    }

    #[tokio::test]
    async fn reply_streams_model_text_with_context() {
        let model = ScriptedModel::answering("Finish the draft first.");
        let coach = Coach::new(model.clone());
        let request = ChatRequest {
            query: "What next?".into(),
            context: Some(Value::String("Goal: write a book".into())),
        };

        assert_eq!(coach.reply(&request).await.unwrap(), "Finish the draft first.");
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Goal: write a book"));
        assert!(prompt.ends_with("Question: What next?"));
    }

    #[tokio::test]
    async fn suggestions_parse_fenced_json() {
        let coach = Coach::new(ScriptedModel::answering(
            "Sure!\n```json\n{\"goals\": [{\"name\": \"Run 10k\", \"kpiName\": \"km/week\", \"kpiTarget\": 20}],\n\"tasks\": [{\"title\": \"Buy shoes\", \"priority\": \"high\"}, {\"title\": \" \"}]}\n```",
        ));
        let suggestions = coach.suggest(&ChatRequest::new("get fit")).await.unwrap();
        assert_eq!(suggestions.goals[0].kpi_target, Some(20.0));
        assert_eq!(suggestions.tasks.len(), 1);
        assert_eq!(suggestions.tasks[0].priority, Some(TaskPriority::High));
    }

    #[tokio::test]
    async fn malformed_suggestions_are_model_errors() {
        let coach = Coach::new(ScriptedModel::answering("I can't do that"));
        let err = coach.suggest(&ChatRequest::new("plan")).await.unwrap_err();
        assert!(matches!(err, CoachError::Model(GeminiError::Serde(_))));
    }

    #[test]
    fn summary_lists_open_tasks_under_goals() {
        let goal = fixtures::goal("Write a book");
        let mut done = fixtures::task(goal.id, "outline");
        done.completed = true;
        let open = fixtures::task(goal.id, "chapter one");
        let state = GoalState {
            goals: vec![goal],
            tasks: vec![done, open],
            loading: false,
            error: None,
        };

        let summary = summarize_state(&state, Utc::now());
        assert!(summary.contains("Goal \"Write a book\": 50% done"));
        assert!(summary.contains("chapter one"));
        assert!(!summary.contains("outline"));
    }
}
