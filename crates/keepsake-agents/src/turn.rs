//! The per-turn state machine.
//!
//! ```text
//! Judge       unsafe -> End, safe -> Assistant
//! Assistant   tool call only -> ToolExec, otherwise -> JudgeFinal
//! ToolExec    -> Assistant
//! JudgeFinal  unsafe -> End, safe -> ToolExec if a call is pending, else End
//! ```
//!
//! Assistant free text is buffered in `pending_response` and only reaches the
//! message log once the safety judge releases it.

use std::sync::Arc;

use keepsake_common::{ConversationState, Error, Message, Result, Role, Usage};
use keepsake_config::AppConfig;
use tracing::{debug, info, instrument, warn};

use crate::judge::SafetyJudge;
use crate::prompt::{build_system_prompt, history_window};
use crate::providers::{ChatMessage, LlmProvider, LlmRequest};
use crate::tools::ToolExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStep {
    Judge,
    Assistant,
    ToolExec,
    JudgeFinal,
    End,
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub history_window: usize,
    /// Upper bound on assistant invocations within one turn.
    pub max_tool_iterations: usize,
    pub system_prompt: Option<String>,
}

impl TurnSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: Some(config.llm.temperature),
            max_tokens: config.llm.max_tokens,
            history_window: config.agent.history_window,
            max_tool_iterations: config.agent.max_tool_iterations,
            system_prompt: config.agent.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    /// Every state the controller passed through, ending with `End`.
    pub trace: Vec<TurnStep>,
    /// Tokens spent by the assistant and judge calls of this turn.
    pub usage: Usage,
}

pub struct TurnController {
    provider: Arc<dyn LlmProvider>,
    judge: Option<SafetyJudge>,
    tools: ToolExecutor,
    settings: TurnSettings,
}

impl TurnController {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolExecutor, settings: TurnSettings) -> Self {
        Self {
            provider,
            judge: None,
            tools,
            settings,
        }
    }

    pub fn with_judge(mut self, judge: SafetyJudge) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn judge_enabled(&self) -> bool {
        self.judge.is_some()
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Run one turn for `user_message` on top of `state`.
    ///
    /// The controller owns the state for the duration of the turn; on error
    /// it is dropped, so a caller that passed a clone keeps its committed log.
    #[instrument(skip(self, state, user_message), fields(judge = self.judge.is_some()))]
    pub async fn run(
        &self,
        session_id: &str,
        state: ConversationState,
        user_message: &str,
    ) -> Result<TurnOutcome> {
        if self.settings.history_window == 0 {
            return Err(Error::Config("history window must be at least 1".into()));
        }

        let mut state = state;
        state.pending_response = None;
        state.messages.push(Message::user(user_message));

        let mut trace = Vec::new();
        let mut usage = Usage::default();
        let mut assistant_calls = 0usize;
        let mut step = if self.judge.is_some() {
            TurnStep::Judge
        } else {
            TurnStep::Assistant
        };

        loop {
            trace.push(step);
            step = match step {
                TurnStep::Judge => self.judge_input(&mut state, &mut usage).await,
                TurnStep::Assistant => {
                    assistant_calls += 1;
                    if assistant_calls > self.settings.max_tool_iterations {
                        return Err(Error::Agent(format!(
                            "tool loop exceeded maximum of {} iterations",
                            self.settings.max_tool_iterations
                        )));
                    }
                    self.assistant(&mut state, &mut usage).await?
                }
                TurnStep::ToolExec => self.tool_exec(session_id, &mut state).await?,
                TurnStep::JudgeFinal => self.judge_final(&mut state, &mut usage).await,
                TurnStep::End => break,
            };
        }

        info!(
            steps = trace.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "turn complete"
        );
        Ok(TurnOutcome {
            state,
            trace,
            usage,
        })
    }

    async fn judge_input(&self, state: &mut ConversationState, usage: &mut Usage) -> TurnStep {
        let Some(judge) = &self.judge else {
            return TurnStep::Assistant;
        };
        let Some(idx) = state.last_user_index() else {
            return TurnStep::Assistant;
        };

        let text = state.messages[idx].text().unwrap_or_default().to_string();
        let judgement = judge.evaluate(&text).await;
        if let Some(spent) = &judgement.usage {
            usage.add(spent);
        }
        if judgement.verdict.is_safe() {
            return TurnStep::Assistant;
        }

        warn!("user message blocked by the safety judge");
        state.messages[idx] = judge.blocked_message();
        TurnStep::End
    }

    async fn assistant(&self, state: &mut ConversationState, usage: &mut Usage) -> Result<TurnStep> {
        let request = self.build_request(state);
        let response = self.provider.complete(&request).await?;
        if let Some(spent) = &response.usage {
            usage.add(spent);
        }

        let mut message = response.into_message();
        if message.tool_calls.len() > 1 {
            warn!(
                dropped = message.tool_calls.len() - 1,
                "model requested several tool calls, keeping the first"
            );
            message.tool_calls.truncate(1);
        }

        if self.judge.is_none() {
            let next = if message.has_tool_calls() {
                TurnStep::ToolExec
            } else {
                TurnStep::End
            };
            let message = if message.has_text() {
                message.released()
            } else {
                message
            };
            state.messages.push(message);
            return Ok(next);
        }

        if message.has_tool_calls() && !message.has_text() {
            debug!("tool-only response, skipping the judge");
            state.messages.push(message);
            Ok(TurnStep::ToolExec)
        } else {
            state.pending_response = Some(message);
            Ok(TurnStep::JudgeFinal)
        }
    }

    async fn tool_exec(&self, session_id: &str, state: &mut ConversationState) -> Result<TurnStep> {
        let call = state
            .next_pending_tool_call()
            .cloned()
            .ok_or_else(|| Error::Agent("no pending tool call to execute".into()))?;
        debug!(tool = %call.name, "executing tool call");

        let (result, mut update) = self.tools.execute(session_id, &call, state).await?;
        update.messages.insert(0, result);
        *state = std::mem::take(state).apply(update);
        Ok(TurnStep::Assistant)
    }

    async fn judge_final(&self, state: &mut ConversationState, usage: &mut Usage) -> TurnStep {
        let Some(pending) = state.pending_response.take() else {
            warn!("nothing buffered for the final judge");
            return TurnStep::End;
        };

        if pending.role == Role::Tool {
            state.messages.push(pending);
            return TurnStep::Assistant;
        }

        if let Some(judge) = &self.judge {
            let judgement = judge.evaluate(pending.text().unwrap_or_default()).await;
            if let Some(spent) = &judgement.usage {
                usage.add(spent);
            }
            if !judgement.verdict.is_safe() {
                warn!("assistant response blocked by the safety judge");
                state.messages.push(judge.blocked_message());
                return TurnStep::End;
            }
        }

        let next = if pending.has_tool_calls() {
            TurnStep::ToolExec
        } else {
            TurnStep::End
        };
        let released = if pending.has_text() {
            pending.released()
        } else {
            pending
        };
        state.messages.push(released);
        next
    }

    fn build_request(&self, state: &ConversationState) -> LlmRequest {
        LlmRequest {
            model: self.settings.model.clone(),
            messages: history_window(&state.messages, self.settings.history_window)
                .into_iter()
                .map(ChatMessage::from)
                .collect(),
            system: Some(build_system_prompt(
                self.settings.system_prompt.as_deref(),
                &state.short_term_memories,
            )),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            tools: self.tools.definitions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgePolicy;
    use crate::providers::{ChatRole, ContentBlock, LlmResponse};
    use crate::tools::{AddTask, GetListOfTasks};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Tools(Vec<(&'static str, serde_json::Value)>),
        TextAndTool(&'static str, &'static str, serde_json::Value),
        Empty,
        Fail,
    }

    /// Plays back canned replies in order and records every request.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Text("SAFE"));
            let content = match reply {
                Reply::Text(text) => vec![ContentBlock::Text { text: text.into() }],
                Reply::Tools(calls) => calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, input))| ContentBlock::ToolUse {
                        id: format!("call_{i}"),
                        name: name.into(),
                        input,
                    })
                    .collect(),
                Reply::TextAndTool(text, name, input) => vec![
                    ContentBlock::Text { text: text.into() },
                    ContentBlock::ToolUse {
                        id: "call_t".into(),
                        name: name.into(),
                        input,
                    },
                ],
                Reply::Empty => Vec::new(),
                Reply::Fail => return Err(Error::Agent("model unavailable".into())),
            };
            Ok(LlmResponse {
                content,
                model: "scripted".into(),
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 2,
                }),
                stop_reason: Some("stop".into()),
            })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    const BLOCKED: &str = "⚠️ Content blocked due to safety concerns.";

    fn settings() -> TurnSettings {
        TurnSettings {
            model: "test-model".into(),
            temperature: Some(0.0),
            max_tokens: None,
            history_window: 20,
            max_tool_iterations: 5,
            system_prompt: None,
        }
    }

    fn task_tools() -> ToolExecutor {
        let mut tools = ToolExecutor::new();
        tools.register(Box::new(AddTask));
        tools.register(Box::new(GetListOfTasks));
        tools
    }

    fn judged(
        assistant: Arc<ScriptedProvider>,
        verdicts: Arc<ScriptedProvider>,
    ) -> TurnController {
        let judge = SafetyJudge::new(
            verdicts,
            "judge-model",
            JudgePolicy {
                prohibited_categories: vec!["violence".into()],
                blocked_message: BLOCKED.into(),
            },
        );
        TurnController::new(assistant, task_tools(), settings()).with_judge(judge)
    }

    fn assert_no_consecutive_tool_exec(trace: &[TurnStep]) {
        assert!(
            trace
                .windows(2)
                .all(|w| !(w[0] == TurnStep::ToolExec && w[1] == TurnStep::ToolExec)),
            "trace {trace:?}"
        );
    }

    #[tokio::test]
    async fn safe_text_is_released() {
        let assistant = ScriptedProvider::new(vec![Reply::Text("Hello Martha!")]);
        let verdicts = ScriptedProvider::new(vec![Reply::Text("SAFE"), Reply::Text("safe.")]);
        let controller = judged(assistant.clone(), verdicts.clone());

        let outcome = controller
            .run("s1", ConversationState::new(), "Hi, I'm Martha")
            .await
            .unwrap();

        assert_eq!(
            outcome.trace,
            vec![
                TurnStep::Judge,
                TurnStep::Assistant,
                TurnStep::JudgeFinal,
                TurnStep::End
            ]
        );
        let state = outcome.state;
        assert!(state.pending_response.is_none());
        assert_eq!(state.messages.len(), 2);
        let reply = state.last_message().unwrap();
        assert_eq!(reply.text(), Some("Hello Martha!"));
        assert!(reply.visible);
        assert_eq!(verdicts.calls(), 2);
        assert_eq!(outcome.usage.input_tokens, 30);
    }

    #[tokio::test]
    async fn unsafe_input_replaces_user_entry() {
        let assistant = ScriptedProvider::new(vec![]);
        let verdicts = ScriptedProvider::new(vec![Reply::Text("UNSAFE")]);
        let controller = judged(assistant.clone(), verdicts);

        let mut prior = ConversationState::new();
        prior.messages.push(Message::user("earlier"));
        let outcome = controller
            .run("s1", prior, "something terrible")
            .await
            .unwrap();

        assert_eq!(outcome.trace, vec![TurnStep::Judge, TurnStep::End]);
        assert_eq!(assistant.calls(), 0);
        let messages = outcome.state.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), Some("earlier"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), Some(BLOCKED));
        assert!(
            messages
                .iter()
                .all(|m| m.text() != Some("something terrible"))
        );
    }

    #[tokio::test]
    async fn unsafe_output_is_substituted() {
        let assistant = ScriptedProvider::new(vec![Reply::Text("harmful advice")]);
        let verdicts = ScriptedProvider::new(vec![Reply::Text("SAFE"), Reply::Text("UNSAFE")]);
        let outcome = judged(assistant, verdicts)
            .run("s1", ConversationState::new(), "hello")
            .await
            .unwrap();

        let messages = &outcome.state.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), Some(BLOCKED));
        assert!(messages.iter().all(|m| m.text() != Some("harmful advice")));
        assert!(outcome.state.pending_response.is_none());
    }

    #[tokio::test]
    async fn empty_verdict_fails_open() {
        let assistant = ScriptedProvider::new(vec![Reply::Text("Sure.")]);
        let verdicts = ScriptedProvider::new(vec![Reply::Empty, Reply::Text("")]);
        let outcome = judged(assistant, verdicts)
            .run("s1", ConversationState::new(), "hello")
            .await
            .unwrap();
        assert_eq!(outcome.state.last_message().unwrap().text(), Some("Sure."));
    }

    #[tokio::test]
    async fn tool_only_response_skips_judge_and_loops_back() {
        let assistant = ScriptedProvider::new(vec![
            Reply::Tools(vec![("add_task", json!({"new_task": "buy milk"}))]),
            Reply::Text("I added it."),
        ]);
        let verdicts = ScriptedProvider::new(vec![Reply::Text("SAFE"), Reply::Text("SAFE")]);
        let outcome = judged(assistant.clone(), verdicts.clone())
            .run("s1", ConversationState::new(), "add buy milk")
            .await
            .unwrap();

        assert_eq!(
            outcome.trace,
            vec![
                TurnStep::Judge,
                TurnStep::Assistant,
                TurnStep::ToolExec,
                TurnStep::Assistant,
                TurnStep::JudgeFinal,
                TurnStep::End
            ]
        );
        assert_eq!(verdicts.calls(), 2);

        let state = outcome.state;
        assert_eq!(state.tasks, vec!["buy milk"]);
        assert_eq!(state.tools_used, vec!["add_task"]);
        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(!state.messages[1].visible);
        assert!(!state.messages[2].visible);
        assert_eq!(state.visible_messages().count(), 2);

        let second = &assistant.requests.lock().unwrap()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.tools.len(), 2);
    }

    #[tokio::test]
    async fn extra_tool_calls_are_dropped() {
        let assistant = ScriptedProvider::new(vec![
            Reply::Tools(vec![
                ("add_task", json!({"new_task": "one"})),
                ("add_task", json!({"new_task": "two"})),
            ]),
            Reply::Text("Added."),
        ]);
        let verdicts = ScriptedProvider::new(vec![]);
        let outcome = judged(assistant, verdicts)
            .run("s1", ConversationState::new(), "add two tasks")
            .await
            .unwrap();

        assert_eq!(outcome.state.tasks, vec!["one"]);
        assert_eq!(outcome.state.messages[1].tool_calls.len(), 1);
        assert_no_consecutive_tool_exec(&outcome.trace);
    }

    #[tokio::test]
    async fn judged_text_with_tool_call_runs_tool_after_release() {
        let assistant = ScriptedProvider::new(vec![
            Reply::TextAndTool("Let me note that.", "add_task", json!({"new_task": "walk"})),
            Reply::Text("Noted."),
        ]);
        let verdicts = ScriptedProvider::new(vec![]);
        let outcome = judged(assistant, verdicts)
            .run("s1", ConversationState::new(), "remind me to walk")
            .await
            .unwrap();

        assert_eq!(
            outcome.trace,
            vec![
                TurnStep::Judge,
                TurnStep::Assistant,
                TurnStep::JudgeFinal,
                TurnStep::ToolExec,
                TurnStep::Assistant,
                TurnStep::JudgeFinal,
                TurnStep::End
            ]
        );
        assert_eq!(outcome.state.tasks, vec!["walk"]);
        assert!(outcome.state.messages[1].visible);
    }

    #[tokio::test]
    async fn empty_response_is_still_judged() {
        let assistant = ScriptedProvider::new(vec![Reply::Empty]);
        let verdicts = ScriptedProvider::new(vec![Reply::Text("SAFE")]);
        let outcome = judged(assistant, verdicts.clone())
            .run("s1", ConversationState::new(), "hello")
            .await
            .unwrap();
        assert_eq!(
            outcome.trace,
            vec![
                TurnStep::Judge,
                TurnStep::Assistant,
                TurnStep::JudgeFinal,
                TurnStep::End
            ]
        );
        // the empty text never reaches the judge model
        assert_eq!(verdicts.calls(), 1);
        assert!(!outcome.state.last_message().unwrap().visible);
    }

    #[tokio::test]
    async fn log_only_grows_across_turns() {
        let assistant = ScriptedProvider::new(vec![
            Reply::Text("one"),
            Reply::Tools(vec![("get_list_of_tasks", json!({}))]),
            Reply::Text("two"),
        ]);
        let controller = TurnController::new(assistant, task_tools(), settings());

        let first = controller
            .run("s1", ConversationState::new(), "a")
            .await
            .unwrap();
        let before = first.state.messages.clone();
        let second = controller.run("s1", first.state, "b").await.unwrap();

        assert!(second.state.messages.len() > before.len());
        assert_eq!(&second.state.messages[..before.len()], &before[..]);
        assert!(second.state.pending_response.is_none());
        assert_no_consecutive_tool_exec(&second.trace);
    }

    #[tokio::test]
    async fn without_judge_text_is_appended_directly() {
        let assistant = ScriptedProvider::new(vec![Reply::Text("Hi!")]);
        let controller = TurnController::new(assistant, task_tools(), settings());
        assert!(!controller.judge_enabled());

        let outcome = controller
            .run("s1", ConversationState::new(), "hello")
            .await
            .unwrap();
        assert_eq!(outcome.trace, vec![TurnStep::Assistant, TurnStep::End]);
        assert!(outcome.state.last_message().unwrap().visible);
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let replies = (0..10)
            .map(|_| Reply::Tools(vec![("get_list_of_tasks", json!({}))]))
            .collect();
        let controller = TurnController::new(ScriptedProvider::new(replies), task_tools(), settings());
        let err = controller
            .run("s1", ConversationState::new(), "loop")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum of 5 iterations"));
    }

    #[tokio::test]
    async fn tool_failure_aborts_turn() {
        let assistant = ScriptedProvider::new(vec![Reply::Tools(vec![("fly", json!({}))])]);
        let controller = TurnController::new(assistant, task_tools(), settings());
        let committed = ConversationState::new();
        let err = controller
            .run("s1", committed.clone(), "fly away")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        assert!(committed.messages.is_empty());
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let controller =
            TurnController::new(ScriptedProvider::new(vec![Reply::Fail]), task_tools(), settings());
        assert!(
            controller
                .run("s1", ConversationState::new(), "hello")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn single_entry_window_keeps_the_tool_exchange() {
        let assistant = ScriptedProvider::new(vec![
            Reply::Tools(vec![("add_task", json!({"new_task": "buy milk"}))]),
            Reply::Text("I added it."),
        ]);
        let mut settings = settings();
        settings.history_window = 1;
        let controller = TurnController::new(assistant.clone(), task_tools(), settings);

        controller
            .run("s1", ConversationState::new(), "add buy milk")
            .await
            .unwrap();

        let requests = assistant.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let roles: Vec<ChatRole> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::Assistant, ChatRole::Tool]);
    }

    #[tokio::test]
    async fn request_carries_window_and_memories() {
        let assistant = ScriptedProvider::new(vec![Reply::Text("ok")]);
        let mut settings = settings();
        settings.history_window = 2;
        let controller = TurnController::new(assistant.clone(), task_tools(), settings);

        let mut state = ConversationState::new();
        for i in 0..4 {
            state.messages.push(Message::user(format!("old {i}")));
        }
        state
            .short_term_memories
            .push(keepsake_common::MemoryEntry::new("Likes tea."));
        controller.run("s1", state, "new").await.unwrap();

        let request = &assistant.requests.lock().unwrap()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].text_content(), "new");
        assert!(request.system.as_deref().unwrap().contains("Likes tea."));
        assert_eq!(request.temperature, Some(0.0));
    }
}
