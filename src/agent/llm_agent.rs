//! Agent capability backed by an LLM provider
//!
//! Keeps a per-agent conversation (system prompt plus bounded history),
//! streams tokens through [`LlmProvider::stream_completion`] and signals
//! handoffs through `transfer_to_<agent>` function tools.

use crate::agent::capability::{
    Agent, AgentError, AgentIdentity, AgentProfile, AgentReply, HandoffTurn, TokenStream,
    TransferOption, TransferRequest,
};
use crate::agent::role::AgentRole;
use crate::llm::{
    CompletionRequest, CompletionStream, LlmProvider, Message, ToolCall, ToolDescription,
};
use crate::session::AgentFactory;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Prefix of the function tools offered for handoff
pub const TRANSFER_TOOL_PREFIX: &str = "transfer_to_";

/// Model parameters shared by every LLM agent of a hub
#[derive(Debug, Clone)]
pub struct LlmAgentSettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Maximum number of user/assistant messages kept in history
    pub history_limit: usize,
    /// Run a provider health check during `initialize`
    pub verify_on_init: bool,
}

impl Default for LlmAgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            history_limit: 40,
            verify_on_init: false,
        }
    }
}

impl LlmAgentSettings {
    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

#[derive(Debug)]
struct Conversation {
    system_prompt: String,
    history: Vec<Message>,
}

impl Conversation {
    fn push(&mut self, message: Message, limit: usize) {
        self.history.push(message);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    fn messages(&self) -> Vec<Message> {
        std::iter::once(Message::system(self.system_prompt.clone()))
            .chain(self.history.iter().cloned())
            .collect()
    }
}

type SharedConversation = Arc<Mutex<Option<Conversation>>>;

/// LLM-backed implementation of [`Agent`]
pub struct LlmAgent {
    provider: Arc<dyn LlmProvider>,
    settings: LlmAgentSettings,
    identity: AgentIdentity,
    conversation: SharedConversation,
}

impl LlmAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        settings: LlmAgentSettings,
        identity: AgentIdentity,
    ) -> Self {
        Self {
            provider,
            settings,
            identity,
            conversation: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of messages currently held in history
    pub async fn history_len(&self) -> usize {
        self.conversation
            .lock()
            .await
            .as_ref()
            .map(|c| c.history.len())
            .unwrap_or(0)
    }
}

/// Function name offered for a transfer to `target`
pub fn transfer_tool_name(target: &AgentIdentity) -> String {
    let sanitized: String = target
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{TRANSFER_TOOL_PREFIX}{sanitized}")
}

fn transfer_tools(options: &[TransferOption]) -> Vec<ToolDescription> {
    options
        .iter()
        .map(|option| ToolDescription {
            name: transfer_tool_name(&option.target),
            description: format!("Transfer to {}: {}", option.target, option.trigger),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why control should move to this agent"
                    }
                }
            }),
        })
        .collect()
}

/// Map a function call back onto the declared transfer it names
fn match_transfer(options: &[TransferOption], call: &ToolCall) -> Option<TransferRequest> {
    let option = options
        .iter()
        .find(|option| transfer_tool_name(&option.target) == call.name)?;

    let reason = call
        .arguments
        .get("reason")
        .and_then(|reason| reason.as_str())
        .unwrap_or(&option.trigger)
        .to_string();

    Some(TransferRequest {
        target: option.target.clone(),
        reason,
    })
}

/// Transfers named outside the declared options keep their raw target so the
/// orchestrator can reject them as undeclared.
fn undeclared_transfer(call: &ToolCall) -> Option<TransferRequest> {
    call.name
        .strip_prefix(TRANSFER_TOOL_PREFIX)
        .map(|target| TransferRequest {
            target: AgentIdentity::new(target),
            reason: String::new(),
        })
}

fn handoff_messages(conversation: &Conversation, turn: &HandoffTurn) -> Vec<Message> {
    let mut messages = conversation.messages();
    messages.push(Message::user(turn.message.clone()));
    for record in &turn.transcript {
        messages.push(Message::assistant(format!("[{}] {}", record.agent, record.text)));
    }
    messages
}

struct ReplyRecorder {
    inner: CompletionStream,
    reply: String,
    conversation: SharedConversation,
    history_limit: usize,
    finished: bool,
}

async fn next_token(mut recorder: ReplyRecorder) -> Option<(Result<String, AgentError>, ReplyRecorder)> {
    if recorder.finished {
        return None;
    }

    match recorder.inner.next().await {
        Some(Ok(token)) => {
            recorder.reply.push_str(&token);
            Some((Ok(token), recorder))
        }
        Some(Err(e)) => {
            recorder.finished = true;
            Some((Err(e.into()), recorder))
        }
        None => {
            if !recorder.reply.is_empty() {
                if let Some(conversation) = recorder.conversation.lock().await.as_mut() {
                    let reply = std::mem::take(&mut recorder.reply);
                    conversation.push(Message::assistant(reply), recorder.history_limit);
                }
            }
            None
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn initialize(&self, profile: &AgentProfile) -> Result<(), AgentError> {
        if self.settings.verify_on_init {
            self.provider
                .health_check()
                .await
                .map_err(|e| AgentError::initialization(e.to_string()))?;
        }

        let mut profile = profile.clone();
        profile
            .args
            .entry("now".to_string())
            .or_insert_with(|| chrono::Local::now().format("%Y-%m-%d %H:%M").to_string());

        let mut system_prompt = profile.rendered_instructions();
        if !profile.description.is_empty() {
            system_prompt = format!("{system_prompt}\n\nRole: {}", profile.description);
        }

        debug!(agent = %self.identity, provider = self.provider.name(), "Agent initialized");
        *self.conversation.lock().await = Some(Conversation {
            system_prompt,
            history: Vec::new(),
        });
        Ok(())
    }

    fn stream_tokens(&self, input: &str) -> TokenStream {
        let provider = Arc::clone(&self.provider);
        let conversation = Arc::clone(&self.conversation);
        let settings = self.settings.clone();
        let input = input.to_string();

        let start = async move {
            let request = {
                let mut guard = conversation.lock().await;
                let state = guard.as_mut().ok_or(AgentError::NotInitialized)?;
                state.push(Message::user(input), settings.history_limit);
                settings.request(state.messages())
            };

            let inner = provider.stream_completion(request).await?;
            Ok::<TokenStream, AgentError>(
                stream::unfold(
                    ReplyRecorder {
                        inner,
                        reply: String::new(),
                        conversation,
                        history_limit: settings.history_limit,
                        finished: false,
                    },
                    next_token,
                )
                .boxed(),
            )
        };

        stream::once(start)
            .flat_map(|started| match started {
                Ok(tokens) => tokens,
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            })
            .boxed()
    }

    async fn respond(&self, turn: &HandoffTurn) -> Result<AgentReply, AgentError> {
        let mut request = {
            let guard = self.conversation.lock().await;
            let state = guard.as_ref().ok_or(AgentError::NotInitialized)?;
            self.settings.request(handoff_messages(state, turn))
        };

        if !turn.transfer_options.is_empty() {
            request.tools = Some(transfer_tools(&turn.transfer_options));
            request.tool_choice = Some("auto".to_string());
        }

        let response = self.provider.complete(request).await?;
        let text = response.content.unwrap_or_default();

        let transfer = response.tool_calls.as_deref().unwrap_or_default().iter().find_map(|call| {
            match_transfer(&turn.transfer_options, call).or_else(|| {
                let request = undeclared_transfer(call);
                if request.is_some() {
                    warn!(agent = %self.identity, tool = %call.name, "Agent named an undeclared transfer");
                }
                request
            })
        });

        if transfer.is_none() && !text.is_empty() {
            if let Some(state) = self.conversation.lock().await.as_mut() {
                state.push(Message::user(turn.message.clone()), self.settings.history_limit);
                state.push(Message::assistant(text.clone()), self.settings.history_limit);
            }
        }

        Ok(AgentReply {
            text,
            transfer,
            tool_calls: Vec::new(),
        })
    }

    fn identity(&self) -> AgentIdentity {
        self.identity.clone()
    }

    async fn release(&self) {
        *self.conversation.lock().await = None;
    }
}

/// Builds one [`LlmAgent`] per session and role over a shared provider
pub struct LlmAgentFactory {
    provider: Arc<dyn LlmProvider>,
    settings: LlmAgentSettings,
}

impl LlmAgentFactory {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: LlmAgentSettings) -> Self {
        Self { provider, settings }
    }
}

impl AgentFactory for LlmAgentFactory {
    fn create(
        &self,
        session_id: &str,
        role: AgentRole,
        profile: &AgentProfile,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        debug!(session_id, %role, agent = %profile.name, "Creating LLM agent");
        Ok(Arc::new(LlmAgent::new(
            Arc::clone(&self.provider),
            self.settings.clone(),
            profile.identity(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::capability::TurnRecord;
    use crate::llm::{CompletionResponse, FinishReason, LlmError, TokenUsage};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedProvider {
        chunks: Vec<String>,
        fail_stream_at: Option<usize>,
        tool_calls: Option<Vec<ToolCall>>,
        requests: StdMutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn available_models(&self) -> Vec<String> {
            vec!["scripted".to_string()]
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(CompletionResponse {
                content: Some(self.chunks.concat()),
                model: request.model,
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
                tool_calls: self.tool_calls.clone(),
                metadata: HashMap::new(),
            })
        }

        async fn stream_completion(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            let mut items: Vec<Result<String, LlmError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            if let Some(at) = self.fail_stream_at {
                items.truncate(at);
                items.push(Err(LlmError::NetworkError("reset".to_string())));
            }
            Ok(stream::iter(items).boxed())
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Err(LlmError::NotConfigured("offline".to_string()))
        }
    }

    fn agent(provider: Arc<ScriptedProvider>) -> LlmAgent {
        LlmAgent::new(provider, LlmAgentSettings::default(), AgentIdentity::new("tutor"))
    }

    fn profile() -> AgentProfile {
        AgentProfile::new("tutor", "Explains concepts", "Explain {{$subject}}.")
            .with_arg("subject", "entropy")
    }

    #[tokio::test]
    async fn test_stream_before_initialize_fails() {
        let agent = agent(Arc::new(ScriptedProvider::default()));
        let items: Vec<_> = agent.stream_tokens("hi").collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AgentError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_stream_records_history() {
        let provider = Arc::new(ScriptedProvider {
            chunks: vec!["Ent".to_string(), "ropy".to_string()],
            ..Default::default()
        });
        let agent = agent(Arc::clone(&provider));
        agent.initialize(&profile()).await.unwrap();

        let tokens: Vec<String> = agent
            .stream_tokens("what is entropy?")
            .map(|t| t.unwrap())
            .collect()
            .await;

        assert_eq!(tokens, vec!["Ent", "ropy"]);
        assert_eq!(agent.history_len().await, 2);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].content, "Explain entropy.\n\nRole: Explains concepts");
        assert_eq!(requests[0].messages[1].content, "what is entropy?");
    }

    #[tokio::test]
    async fn test_stream_error_is_forwarded() {
        let provider = Arc::new(ScriptedProvider {
            chunks: vec!["a".to_string(), "b".to_string()],
            fail_stream_at: Some(1),
            ..Default::default()
        });
        let agent = agent(provider);
        agent.initialize(&profile()).await.unwrap();

        let items: Vec<_> = agent.stream_tokens("q").collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(matches!(items[1], Err(AgentError::Llm(_))));
        // The failed reply is not recorded
        assert_eq!(agent.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let provider = Arc::new(ScriptedProvider {
            chunks: vec!["ok".to_string()],
            ..Default::default()
        });
        let settings = LlmAgentSettings {
            history_limit: 3,
            ..Default::default()
        };
        let agent = LlmAgent::new(provider, settings, AgentIdentity::new("tutor"));
        agent.initialize(&profile()).await.unwrap();

        for _ in 0..4 {
            let _: Vec<_> = agent.stream_tokens("again").collect().await;
        }
        assert_eq!(agent.history_len().await, 3);
    }

    #[tokio::test]
    async fn test_verify_on_init_surfaces_provider_failure() {
        let settings = LlmAgentSettings {
            verify_on_init: true,
            ..Default::default()
        };
        let agent = LlmAgent::new(
            Arc::new(ScriptedProvider::default()),
            settings,
            AgentIdentity::new("tutor"),
        );

        let result = agent.initialize(&profile()).await;
        assert!(matches!(result, Err(AgentError::Initialization(_))));
    }

    #[tokio::test]
    async fn test_respond_maps_transfer_call() {
        let provider = Arc::new(ScriptedProvider {
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                name: "transfer_to_QuizAgent".to_string(),
                arguments: json!({"reason": "wants a quiz"}),
            }]),
            ..Default::default()
        });
        let agent = agent(Arc::clone(&provider));
        agent.initialize(&profile()).await.unwrap();

        let turn = HandoffTurn {
            message: "quiz me".to_string(),
            transcript: vec![TurnRecord {
                agent: AgentIdentity::new("tutor"),
                text: "earlier".to_string(),
            }],
            transfer_options: vec![TransferOption {
                target: AgentIdentity::new("QuizAgent"),
                trigger: "user requests quizzes".to_string(),
            }],
        };

        let reply = agent.respond(&turn).await.unwrap();
        let transfer = reply.transfer.unwrap();
        assert_eq!(transfer.target.as_str(), "QuizAgent");
        assert_eq!(transfer.reason, "wants a quiz");

        let requests = provider.requests.lock().unwrap();
        let tools = requests[0].tools.as_ref().unwrap();
        assert_eq!(tools[0].name, "transfer_to_QuizAgent");
        assert_eq!(requests[0].messages.last().unwrap().content, "[tutor] earlier");
    }

    #[tokio::test]
    async fn test_respond_without_transfer_records_history() {
        let provider = Arc::new(ScriptedProvider {
            chunks: vec!["Entropy measures surprise.".to_string()],
            ..Default::default()
        });
        let agent = agent(Arc::clone(&provider));
        agent.initialize(&profile()).await.unwrap();

        let reply = agent
            .respond(&HandoffTurn {
                message: "what is entropy?".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(reply.text, "Entropy measures surprise.");
        assert!(reply.transfer.is_none());
        assert!(provider.requests.lock().unwrap()[0].tools.is_none());
        assert_eq!(agent.history_len().await, 2);
    }

    #[tokio::test]
    async fn test_release_clears_conversation() {
        let agent = agent(Arc::new(ScriptedProvider::default()));
        agent.initialize(&profile()).await.unwrap();
        agent.release().await;

        let result = agent
            .respond(&HandoffTurn {
                message: "hi".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AgentError::NotInitialized)));
    }

    #[test]
    fn test_transfer_tool_name_sanitizes() {
        assert_eq!(
            transfer_tool_name(&AgentIdentity::new("Quiz Agent!")),
            "transfer_to_Quiz_Agent_"
        );
    }

    #[tokio::test]
    async fn test_factory_builds_agents_named_after_profile() {
        let factory = LlmAgentFactory::new(
            Arc::new(ScriptedProvider::default()),
            LlmAgentSettings::default(),
        );

        let first = factory.create("s1", AgentRole::Primary, &profile()).unwrap();
        let second = factory.create("s2", AgentRole::Primary, &profile()).unwrap();

        assert_eq!(first.identity().as_str(), "tutor");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
