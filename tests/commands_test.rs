//! End-to-end command tests
//!
//! Messages go through [`App::handle`] exactly as the hosts feed them, with
//! every backend pointed at one mock server.

use astralbot::commands::Services;
use astralbot::fetch::FetchClient;
use astralbot::resources::ResourceCache;
use astralbot::channels::ChannelError;
use astralbot::selection::{InMemorySelectionStore, Outcome, PendingSelectionStore};
use astralbot::telegram::correlation_key;
use astralbot::{App, Config, Endpoints, Handled, IncomingText, MemorySink, OutboundReply, ReplySink};
use async_trait::async_trait;
use mockito::Matcher;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, MessageId};
use tempfile::TempDir;

struct TestBot {
    app: Arc<App>,
    store: Arc<InMemorySelectionStore>,
    cache: Arc<ResourceCache>,
    _temp: TempDir,
}

async fn bot(base_url: &str) -> TestBot {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let fetch = FetchClient::new();
    let cache = ResourceCache::open(temp.path(), fetch.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    let store = Arc::new(InMemorySelectionStore::new(cache.clone(), None));
    let config = Config {
        cache_dir: temp.path().to_path_buf(),
        endpoints: Endpoints::all_at(base_url),
        ..Config::default()
    };
    let services = Arc::new(Services::new(Arc::new(config), fetch, cache.clone(), store.clone()));
    TestBot {
        app: App::with_services(services).unwrap(),
        store,
        cache,
        _temp: temp,
    }
}

fn from(sender: &str, text: &str, replied_to: Option<&str>) -> IncomingText {
    in_chat("chat", sender, text, replied_to)
}

fn in_chat(chat: &str, sender: &str, text: &str, replied_to: Option<&str>) -> IncomingText {
    IncomingText {
        text: text.to_string(),
        sender_id: sender.to_string(),
        chat_id: chat.to_string(),
        replied_to: replied_to.map(str::to_string),
        reply_context: None,
    }
}

/// Numbers messages per chat starting at 1, keyed the way the Telegram host keys them
struct ChatSink {
    chat: ChatId,
    next: AtomicI32,
    bodies: Mutex<Vec<String>>,
}

impl ChatSink {
    fn new(chat: i64) -> Self {
        Self {
            chat: ChatId(chat),
            next: AtomicI32::new(0),
            bodies: Mutex::new(Vec::new()),
        }
    }

    fn last_body(&self) -> Option<String> {
        self.bodies.lock().last().cloned()
    }
}

#[async_trait]
impl ReplySink for ChatSink {
    async fn send(&self, reply: OutboundReply) -> Result<String, ChannelError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.bodies.lock().push(reply.body);
        Ok(correlation_key(self.chat, MessageId(id)))
    }

    async fn delete(&self, _message_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

async fn mock_midjourney(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let base = server.url();
    let urls: Vec<String> = (1..=4).map(|i| format!("{}/img/{}.jpg", base, i)).collect();
    vec![
        server
            .mock("GET", "/mj")
            .match_query(Matcher::Any)
            .with_body(serde_json::json!({"status": "completed", "results": urls}).to_string())
            .create_async()
            .await,
        server
            .mock("GET", Matcher::Regex(r"^/img/".into()))
            .with_body(b"\x89PNG")
            .create_async()
            .await,
    ]
}

#[tokio::test]
async fn test_grid_pick_through_router() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_midjourney(&mut server).await;
    let bot = bot(&server.url()).await;
    let sink = MemorySink::new();

    let handled = bot.app.handle(from("u1", "/mj a cat", None), &sink).await;
    assert_eq!(handled, Handled::Command("mj".into()));
    let grid = sink.last().unwrap();
    assert!(bot.store.get(&grid.id).await.is_some());

    // someone else replying does nothing
    let foreign = bot.app.handle(from("u2", "U1", Some(&grid.id)), &sink).await;
    assert_eq!(foreign, Handled::Selection(Outcome::Ignored));

    let picked = bot.app.handle(from("u1", "u2", Some(&grid.id)), &sink).await;
    assert!(matches!(picked, Handled::Selection(Outcome::Resolved { .. })));
    assert_eq!(sink.last().unwrap().attachments.len(), 1);

    // entry is gone, so the same reply is now plain text
    let again = bot.app.handle(from("u1", "u2", Some(&grid.id)), &sink).await;
    assert_eq!(again, Handled::Nothing);
    assert_eq!(bot.cache.stats().live, 0);
}

#[tokio::test]
async fn test_command_in_reply_starts_new_run() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_midjourney(&mut server).await;
    let bot = bot(&server.url()).await;
    let sink = MemorySink::new();

    bot.app.handle(from("u1", "/mj a cat", None), &sink).await;
    let first = sink.last().unwrap().id;

    let handled = bot.app.handle(from("u1", "/mj a dog", Some(&first)), &sink).await;
    assert_eq!(handled, Handled::Command("mj".into()));
    let second = sink.last().unwrap().id;

    assert_ne!(first, second);
    assert_eq!(bot.store.len().await, 2);
}

#[tokio::test]
async fn test_same_message_id_in_two_chats() {
    let mut server = mockito::Server::new_async().await;
    let _groq = server
        .mock("GET", "/groq")
        .match_query(Matcher::Any)
        .with_body(r#"{"answer": "sure"}"#)
        .create_async()
        .await;
    let bot = bot(&server.url()).await;
    let chat_a = ChatSink::new(100);
    let chat_b = ChatSink::new(-200);

    bot.app.handle(in_chat("100", "u1", "/groq hello", None), &chat_a).await;
    bot.app.handle(in_chat("-200", "u2", "/groq hello", None), &chat_b).await;

    // both chats numbered their answer 1, yet the threads stay apart
    let key_a = correlation_key(ChatId(100), MessageId(1));
    let key_b = correlation_key(ChatId(-200), MessageId(1));
    assert_eq!(bot.store.get(&key_a).await.unwrap().owner_id, "u1");
    assert_eq!(bot.store.get(&key_b).await.unwrap().owner_id, "u2");

    let a = bot.app.handle(in_chat("100", "u1", "tell me more", Some(&key_a)), &chat_a).await;
    assert!(matches!(a, Handled::Selection(Outcome::Resolved { .. })), "chat A: {:?}", a);
    let b = bot.app.handle(in_chat("-200", "u2", "tell me more", Some(&key_b)), &chat_b).await;
    assert!(matches!(b, Handled::Selection(Outcome::Resolved { .. })), "chat B: {:?}", b);

    assert!(chat_a.last_body().unwrap().contains("sure"));
    assert!(chat_b.last_body().unwrap().contains("sure"));
    assert!(bot.store.get(&correlation_key(ChatId(100), MessageId(2))).await.is_some());
    assert!(bot.store.get(&correlation_key(ChatId(-200), MessageId(2))).await.is_some());
}

#[tokio::test]
async fn test_failures_answer_once() {
    let mut server = mockito::Server::new_async().await;
    let _lyrics = server
        .mock("GET", "/lyrics")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;
    let bot = bot(&server.url()).await;
    let sink = MemorySink::new();

    bot.app.handle(from("u1", "/lyrics apt", None), &sink).await;
    let visible = sink.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(
        visible[0].body,
        "❌ Lyrics lookup failed.\n(the service is having problems)"
    );

    bot.app.handle(from("u1", "/4k", None), &sink).await;
    assert_eq!(
        sink.last().unwrap().body,
        "❌ Provide an image URL or reply to an image to enhance it."
    );
    assert!(bot.store.is_empty().await);
}

#[tokio::test]
async fn test_goatstor_unreachable() {
    // nothing listens on port 9
    let bot = bot("http://127.0.0.1:9").await;
    let sink = MemorySink::new();

    bot.app.handle(from("u1", "/gs trending", None), &sink).await;
    let body = sink.last().unwrap().body;
    assert!(body.starts_with("╭───『 🐐 GoatStor 』───╮"));
    assert!(body.contains("🔌 Unable to reach GoatStor"));
}

#[tokio::test]
async fn test_help_lists_commands() {
    let bot = bot("http://127.0.0.1:9").await;
    let sink = MemorySink::new();

    bot.app.handle(from("u1", "/help", None), &sink).await;
    let help = sink.last().unwrap().body;
    for line in ["• /mj <prompt>", "• /lyrics <song name>", "• /goatstor"] {
        assert!(help.contains(line), "help is missing {:?}", line);
    }
}
