//! AI chat commands
//!
//! Every backend is a single GET with the prompt as a query parameter. The
//! differences (parameter names, where the answer sits in the JSON, how
//! success is signalled) live in the [`ChatBackend`] table. Backends that
//! continue register a `ChatThread` selection on every answer, so replying to
//! the answer asks a follow-up question.

use super::{Command, Services};
use crate::channels::{InboundReply, Invocation, OutboundReply, ReplySink};
use crate::config::Endpoints;
use crate::error::{CommandError, ReportExt};
use crate::fetch::{Endpoint, FetchError, RequestParams};
use crate::resources::ScopedResources;
use crate::selection::{
    FailurePolicy, Grammar, PendingSelection, ReplyChoice, Resolution, SelectionHandler, SelectionKind,
    SelectionPayload,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const CONTINUE_FOOTER: &str = "Reply to continue the conversation.";

/// How the answer document signals success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCheck {
    None,
    /// `status` must equal the given string
    StatusEquals(&'static str),
    /// `status` must be truthy (`true` or a non-empty string)
    StatusTruthy,
}

/// What to do with the body of the message the invocation replied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyContextUse {
    Ignore,
    /// Use it as the prompt when no prompt was typed
    WhenEmpty,
    /// Append it to the prompt as context
    Append,
}

/// One chat backend
pub struct ChatBackend {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub title: &'static str,
    pub description: &'static str,
    pub url: fn(&Endpoints) -> &str,
    pub prompt_param: &'static str,
    /// Parameter carrying the sender ID, for backends that keep sessions
    pub session_param: Option<&'static str>,
    pub extra_params: &'static [(&'static str, &'static str)],
    /// Parameter carrying the configured API key, if any
    pub key_param: Option<&'static str>,
    /// JSON pointer to the answer text
    pub answer_pointer: &'static str,
    pub success: SuccessCheck,
    /// Shown when the answer is missing; `None` treats a missing answer as a failure
    pub fallback_answer: Option<&'static str>,
    pub timeout: Duration,
    pub continues: bool,
    pub reply_context: ReplyContextUse,
    pub missing_prompt: &'static str,
    pub failure: &'static str,
}

pub static BACKENDS: &[ChatBackend] = &[
    ChatBackend {
        id: "claude",
        aliases: &["sonnet", "claudeai"],
        title: "🤖 Claude Sonnet 4.5",
        description: "Chat with Claude Sonnet 4.5",
        url: |e| &e.claude,
        prompt_param: "msg",
        session_param: Some("uid"),
        extra_params: &[],
        key_param: None,
        answer_pointer: "/reply",
        success: SuccessCheck::StatusEquals("success"),
        fallback_answer: None,
        timeout: Duration::from_secs(25),
        continues: true,
        reply_context: ReplyContextUse::Ignore,
        missing_prompt: "❓ Please provide a prompt for Claude Sonnet 4.5.\n\nExample: claude Hello!",
        failure: "❌ Failed to connect to Claude Sonnet 4.5.",
    },
    ChatBackend {
        id: "groq",
        aliases: &["groqai", "llama33"],
        title: "⚡ Groq AI – LLaMA 3.3 70B",
        description: "Chat with LLaMA 3.3 70B on Groq",
        url: |e| &e.groq,
        prompt_param: "ask",
        session_param: Some("uid"),
        extra_params: &[("model", "llama-3.3-70b-versatile"), ("roleplay", ""), ("stream", "false")],
        key_param: None,
        answer_pointer: "/answer",
        success: SuccessCheck::None,
        fallback_answer: Some("No response received from Groq AI."),
        timeout: Duration::from_secs(25),
        continues: true,
        reply_context: ReplyContextUse::Ignore,
        missing_prompt: "❓ Please provide a prompt.\n\nExample: groq Hello!",
        failure: "❌ Failed to connect to Groq AI.",
    },
    ChatBackend {
        id: "copilot",
        aliases: &[],
        title: "🤖 Copilot AI",
        description: "Chat with Copilot (reply to a message to ask about it)",
        url: |e| &e.copilot,
        prompt_param: "message",
        session_param: None,
        extra_params: &[("model", "default")],
        key_param: None,
        answer_pointer: "/answer",
        success: SuccessCheck::None,
        fallback_answer: None,
        timeout: Duration::from_secs(30),
        continues: true,
        reply_context: ReplyContextUse::WhenEmpty,
        missing_prompt: "❓ Please provide a message.\n\nExample: copilot Hello, how are you?",
        failure: "⚠️ Copilot AI service is currently unavailable.",
    },
    ChatBackend {
        id: "christusgpt",
        aliases: &["cgpt"],
        title: "✝️ Christus GPT",
        description: "Chat with Christus GPT (replied-to text is added as context)",
        url: |e| &e.christusgpt,
        prompt_param: "query",
        session_param: Some("uid"),
        extra_params: &[
            ("model", "gpt-4o"),
            (
                "roleplay",
                "You are Christus GPT, a powerful and helpful AI. Your creator is Christus. Always act as his official assistant.",
            ),
        ],
        key_param: Some("apikey"),
        answer_pointer: "/response",
        success: SuccessCheck::None,
        fallback_answer: Some("Sorry, Christus GPT is having technical difficulties."),
        timeout: Duration::from_secs(30),
        continues: true,
        reply_context: ReplyContextUse::Append,
        missing_prompt: "🔎 Ask Christus GPT a question.\n\nExample: cgpt who created you?",
        failure: "❌ An error occurred while connecting to Christus GPT.",
    },
    ChatBackend {
        id: "gemini",
        aliases: &[],
        title: "🤖 Google Gemini",
        description: "Ask Google Gemini a single question",
        url: |e| &e.gemini,
        prompt_param: "prompt",
        session_param: None,
        extra_params: &[],
        key_param: None,
        answer_pointer: "/result",
        success: SuccessCheck::StatusTruthy,
        fallback_answer: None,
        timeout: Duration::from_secs(30),
        continues: false,
        reply_context: ReplyContextUse::Ignore,
        missing_prompt: "❌ Please provide a prompt for Gemini.",
        failure: "❌ Error while contacting Gemini API.",
    },
    ChatBackend {
        id: "lenna",
        aliases: &["lennaai", "leva"],
        title: "🚀 Lenna AI",
        description: "Chat with Lenna AI",
        url: |e| &e.lenna,
        prompt_param: "prompt",
        session_param: None,
        extra_params: &[],
        key_param: None,
        answer_pointer: "/result",
        success: SuccessCheck::None,
        fallback_answer: Some("No response received from Lenna AI."),
        timeout: Duration::from_secs(20),
        continues: true,
        reply_context: ReplyContextUse::Ignore,
        missing_prompt: "❓ Please provide a prompt.\n\nExample: lenna Hello!",
        failure: "❌ Failed to connect to Lenna AI.",
    },
    ChatBackend {
        id: "xdash",
        aliases: &["xdashai", "xdashbot", "xdash-ai"],
        title: "🤖 XDash AI",
        description: "Chat with XDash AI",
        url: |e| &e.xdash,
        prompt_param: "ask",
        session_param: None,
        extra_params: &[("stream", "false")],
        key_param: None,
        answer_pointer: "/answer/llm_response",
        success: SuccessCheck::None,
        fallback_answer: Some("No response from XDash AI."),
        timeout: Duration::from_secs(25),
        continues: true,
        reply_context: ReplyContextUse::Ignore,
        missing_prompt: "❓ Please provide a prompt for XDash AI.\n\nExample: xdash Hello!",
        failure: "❌ Failed to connect to XDash AI.",
    },
];

pub fn backend(id: &str) -> Option<&'static ChatBackend> {
    BACKENDS.iter().find(|b| b.id == id)
}

impl ChatBackend {
    /// Ask one question; returns the answer text
    pub async fn ask(&self, services: &Services, prompt: &str, sender_id: &str) -> Result<String, CommandError> {
        let mut params: Vec<(String, String)> = vec![(self.prompt_param.to_string(), prompt.to_string())];
        if let Some(name) = self.session_param {
            params.push((name.to_string(), sender_id.to_string()));
        }
        params.extend(self.extra_params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        if let (Some(name), Some(key)) = (self.key_param, services.config.christusgpt_key.as_deref()) {
            params.push((name.to_string(), key.to_string()));
        }

        let endpoint = Endpoint::get((self.url)(services.endpoints()), self.timeout);
        let document: Value = services.fetch.json(&endpoint, &RequestParams::Query(params)).await?;

        self.extract_answer(&document).map_err(CommandError::from)
    }

    fn extract_answer(&self, document: &Value) -> Result<String, FetchError> {
        let status = document.get("status");
        let ok = match self.success {
            SuccessCheck::None => true,
            SuccessCheck::StatusEquals(expected) => status.and_then(Value::as_str) == Some(expected),
            SuccessCheck::StatusTruthy => match status {
                Some(Value::Bool(b)) => *b,
                Some(Value::String(s)) => !s.is_empty(),
                _ => false,
            },
        };
        if !ok {
            return Err(FetchError::malformed("backend reported failure"));
        }

        let answer = document
            .pointer(self.answer_pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (answer, self.fallback_answer) {
            (Some(answer), _) => Ok(answer.to_string()),
            (None, Some(fallback)) => Ok(fallback.to_string()),
            (None, None) => Err(FetchError::malformed(format!("missing field `{}`", self.answer_pointer))),
        }
    }

    fn format_answer(&self, answer: &str) -> String {
        if self.continues {
            format!("{}\n\n{}\n\n{}", self.title, answer, CONTINUE_FOOTER)
        } else {
            format!("{}\n\n{}", self.title, answer)
        }
    }
}

/// `claude`, `groq`, `copilot`, ...
pub struct ChatCommand {
    backend: &'static ChatBackend,
    services: Arc<Services>,
}

impl ChatCommand {
    pub fn new(backend: &'static ChatBackend, services: Arc<Services>) -> Self {
        Self { backend, services }
    }

    fn prompt(&self, invocation: &Invocation) -> String {
        let typed = invocation.text();
        let replied = invocation
            .reply_context
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .map(str::trim)
            .filter(|b| !b.is_empty());

        match (self.backend.reply_context, replied) {
            (ReplyContextUse::WhenEmpty, Some(body)) if typed.is_empty() => body.to_string(),
            (ReplyContextUse::Append, Some(body)) if !typed.is_empty() => {
                format!("{}\n\n[Replied message]:\n{}", typed, body)
            }
            _ => typed,
        }
    }
}

#[async_trait]
impl Command for ChatCommand {
    fn name(&self) -> &'static str {
        self.backend.id
    }

    fn aliases(&self) -> &'static [&'static str] {
        self.backend.aliases
    }

    fn description(&self) -> &'static str {
        self.backend.description
    }

    fn usage(&self) -> &'static str {
        "<prompt>"
    }

    async fn execute(&self, invocation: &Invocation, sink: &dyn ReplySink) -> Result<(), CommandError> {
        let prompt = self.prompt(invocation);
        if prompt.is_empty() {
            return Err(CommandError::user_input(self.backend.missing_prompt));
        }

        let answer = self
            .backend
            .ask(&self.services, &prompt, &invocation.sender_id)
            .await
            .report(self.backend.failure)?;

        let message_id = sink.send(OutboundReply::text(self.backend.format_answer(&answer))).await?;

        if self.backend.continues {
            self.services
                .register_selection(
                    &message_id,
                    &invocation.sender_id,
                    SelectionKind::ChatThread,
                    SelectionPayload::Conversation {
                        backend: self.backend.id.to_string(),
                    },
                    vec![],
                )
                .await;
        }
        Ok(())
    }
}

/// Follow-up questions on a chat thread
pub struct ChatThreadHandler {
    services: Arc<Services>,
}

#[async_trait]
impl SelectionHandler for ChatThreadHandler {
    fn grammar(&self, _selection: &PendingSelection) -> Grammar {
        Grammar::FreeText
    }

    async fn resolve(
        &self,
        selection: &PendingSelection,
        choice: ReplyChoice,
        reply: &InboundReply,
        _scope: &mut ScopedResources,
        _sink: &dyn ReplySink,
    ) -> Result<Resolution, CommandError> {
        let SelectionPayload::Conversation { backend: id } = &selection.payload else {
            return Err(CommandError::internal("chat thread without conversation payload"));
        };
        let backend = backend(id).ok_or_else(|| CommandError::internal(format!("unknown chat backend {}", id)))?;
        let ReplyChoice::Text(prompt) = choice else {
            return Err(CommandError::internal("chat thread expects free text"));
        };

        let answer = backend
            .ask(&self.services, &prompt, &reply.sender_id)
            .await
            .report(backend.failure)?;

        Ok(Resolution::continue_with(
            OutboundReply::text(backend.format_answer(&answer)),
            selection.payload.clone(),
            vec![],
        ))
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Keep
    }
}

pub fn commands(services: Arc<Services>) -> Vec<Arc<dyn Command>> {
    BACKENDS
        .iter()
        .map(|backend| Arc::new(ChatCommand::new(backend, services.clone())) as Arc<dyn Command>)
        .collect()
}

pub fn handlers(services: Arc<Services>) -> Vec<(SelectionKind, Arc<dyn SelectionHandler>)> {
    vec![(SelectionKind::ChatThread, Arc::new(ChatThreadHandler { services }) as Arc<dyn SelectionHandler>)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MemorySink, ReplyContext};
    use crate::commands::testing::fixture;
    use crate::selection::{PendingSelectionStore, SelectionResolver, Outcome};
    use mockito::Matcher;

    #[test]
    fn test_extract_answer_rules() {
        let claude = backend("claude").unwrap();
        let ok = serde_json::json!({"status": "success", "reply": " hi "});
        assert_eq!(claude.extract_answer(&ok).unwrap(), "hi");
        let failed = serde_json::json!({"status": "error", "reply": "hi"});
        assert!(claude.extract_answer(&failed).is_err());

        let groq = backend("groq").unwrap();
        assert_eq!(
            groq.extract_answer(&serde_json::json!({})).unwrap(),
            "No response received from Groq AI."
        );

        let xdash = backend("xdash").unwrap();
        let nested = serde_json::json!({"answer": {"llm_response": "deep"}});
        assert_eq!(xdash.extract_answer(&nested).unwrap(), "deep");

        let gemini = backend("gemini").unwrap();
        assert!(gemini.extract_answer(&serde_json::json!({"status": false, "result": "x"})).is_err());
        assert!(!gemini.continues);
    }

    #[tokio::test]
    async fn test_chat_registers_thread_and_continues() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/groq")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ask".into(), "hello".into()),
                Matcher::UrlEncoded("uid".into(), "u1".into()),
            ]))
            .with_body(r#"{"answer": "Hi there"}"#)
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/groq")
            .match_query(Matcher::UrlEncoded("ask".into(), "and then?".into()))
            .with_body(r#"{"answer": "Then more"}"#)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let command = ChatCommand::new(backend("groq").unwrap(), f.services.clone());

        command
            .execute(&Invocation::new("groq", &["hello"], "u1"), &sink)
            .await
            .unwrap();
        let first = sink.last().unwrap();
        assert!(first.body.contains("Hi there"));
        assert!(first.body.ends_with(CONTINUE_FOOTER));
        assert!(f.store.get(&first.id).await.is_some());

        let mut resolver = SelectionResolver::new(f.store.clone(), f.services.cache.clone());
        for (kind, handler) in handlers(f.services.clone()) {
            resolver.register(kind, handler);
        }

        // blank reply is tolerated silently
        let outcome = resolver.resolve(&InboundReply::new(&first.id, "u1", "   "), &sink).await;
        assert_eq!(outcome, Outcome::Ignored);

        let outcome = resolver.resolve(&InboundReply::new(&first.id, "u1", "and then?"), &sink).await;
        let Outcome::Resolved { message_id, reply } = outcome else {
            panic!("expected resolution");
        };
        assert!(reply.body.contains("Then more"));
        assert!(f.store.get(&first.id).await.is_none());
        assert!(f.store.get(&message_id).await.is_some());
    }

    #[tokio::test]
    async fn test_copilot_uses_replied_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/copilot")
            .match_query(Matcher::UrlEncoded("message".into(), "what is rust".into()))
            .with_body(r#"{"answer": "A language"}"#)
            .create_async()
            .await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let command = ChatCommand::new(backend("copilot").unwrap(), f.services.clone());
        let invocation = Invocation::new("copilot", &[], "u1").with_reply_context(ReplyContext {
            attachments: vec![],
            body: Some("what is rust".into()),
        });

        command.execute(&invocation, &sink).await.unwrap();
        assert!(sink.last().unwrap().body.contains("A language"));
    }

    #[tokio::test]
    async fn test_missing_prompt_and_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/claude").match_query(Matcher::Any).with_status(500).create_async().await;

        let f = fixture(&server.url()).await;
        let sink = MemorySink::new();
        let command = ChatCommand::new(backend("claude").unwrap(), f.services.clone());

        let err = command.execute(&Invocation::new("claude", &[], "u1"), &sink).await.unwrap_err();
        assert!(err.user_message().starts_with("❓ Please provide a prompt"));

        let err = command.execute(&Invocation::new("claude", &["hi"], "u1"), &sink).await.unwrap_err();
        assert!(err.user_message().starts_with("❌ Failed to connect to Claude Sonnet 4.5."));
        assert_eq!(sink.count(), 0);
        assert!(f.store.is_empty().await);
    }
}
