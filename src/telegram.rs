//! Telegram Bot integration
//!
//! Long-polls updates with an explicit Dispatcher, converts each text message
//! into an [`IncomingText`] and answers through a [`TelegramSink`], which
//! replies to the triggering message and uploads cached files as media.

use crate::app::{App, Handled, IncomingText};
use crate::channels::{Attachment, AttachmentKind, ChannelError, OutboundReply, ReplyContext, ReplySink};
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{InputFile, InputMedia, InputMediaDocument, InputMediaPhoto, MessageId, ReplyParameters, Update},
};

/// Telegram caption limit (characters)
const CAPTION_LIMIT: usize = 1024;
/// Telegram text message limit, kept a little under the real 4096
const TEXT_LIMIT: usize = 4000;

/// Bot-mode state shared with every handler invocation
struct BotData {
    app: Arc<App>,
    config: Arc<Config>,
    token: String,
}

/// Run Telegram bot with explicit Dispatcher for reliable polling
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN must be set for --telegram")?;

    let app = App::open(config).await?;
    let config = app.services().config.clone();

    tracing::info!("===========================================");
    tracing::info!("  Astral Telegram - Starting...");
    tracing::info!("===========================================");
    tracing::info!(
        "Allowed users: {}",
        if config.allowed_users.is_empty() {
            "ALL".to_string()
        } else {
            format!("{:?}", config.allowed_users)
        }
    );
    tracing::info!("Cache dir: {}", config.cache_dir.display());

    let sweeper = app.spawn_sweeper();
    let bot = Bot::new(token.clone());
    let data = Arc::new(BotData { app, config, token });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![data])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in message handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    sweeper.abort();
    tracing::warn!("Dispatcher stopped");
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<BotData>) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };

    tracing::debug!(
        "Message: user={}, chat={}, text={:?}",
        user_id,
        msg.chat.id.0,
        text.chars().take(50).collect::<String>()
    );

    if !data.config.is_allowed(user_id) {
        tracing::warn!("Unauthorized user: {}", user_id);
        return Ok(());
    }

    let replied = msg.reply_to_message();
    let reply_context = match replied {
        Some(parent) => Some(parent_context(&bot, &data.token, parent).await),
        None => None,
    };

    let incoming = IncomingText {
        text: text.to_string(),
        sender_id: user_id.to_string(),
        chat_id: msg.chat.id.0.to_string(),
        replied_to: replied.map(|m| correlation_key(msg.chat.id, m.id)),
        reply_context,
    };

    let sink = TelegramSink::new(bot, msg.chat.id, Some(msg.id));
    match data.app.handle(incoming, &sink).await {
        Handled::Nothing => {}
        handled => tracing::debug!("Handled: {:?}", handled),
    }
    Ok(())
}

/// Text and largest photo of the replied-to message
async fn parent_context(bot: &Bot, token: &str, parent: &Message) -> ReplyContext {
    let mut context = ReplyContext {
        attachments: Vec::new(),
        body: parent.text().or_else(|| parent.caption()).map(str::to_string),
    };

    if let Some(photo) = parent.photo().and_then(|sizes| sizes.last()) {
        match bot.get_file(photo.file.id.clone()).await {
            Ok(file) => context.attachments.push(Attachment {
                kind: AttachmentKind::Photo,
                url: format!("https://api.telegram.org/file/bot{}/{}", token, file.path),
                width: Some(photo.width),
                height: Some(photo.height),
            }),
            Err(e) => tracing::warn!("Could not resolve replied photo: {}", e),
        }
    }
    context
}

/// Reply sink bound to one chat, answering one message
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: ChatId, reply_to: Option<MessageId>) -> Self {
        Self { bot, chat_id, reply_to }
    }

    fn reply_parameters(&self) -> Option<ReplyParameters> {
        self.reply_to.map(ReplyParameters::new)
    }

    async fn send_text(&self, text: &str) -> Result<Message, ChannelError> {
        let mut request = self.bot.send_message(self.chat_id, text);
        if let Some(params) = self.reply_parameters() {
            request = request.reply_parameters(params);
        }
        request.await.map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn send_single(&self, path: &Path, caption: &str) -> Result<Message, ChannelError> {
        let file = InputFile::file(path);
        let params = self.reply_parameters();
        let upload = |e: teloxide::RequestError| ChannelError::MediaUploadFailed(e.to_string());

        match media_kind(path) {
            AttachmentKind::Photo => {
                let mut request = self.bot.send_photo(self.chat_id, file).caption(caption);
                if let Some(params) = params {
                    request = request.reply_parameters(params);
                }
                request.await.map_err(upload)
            }
            AttachmentKind::Audio => {
                let mut request = self.bot.send_audio(self.chat_id, file).caption(caption);
                if let Some(params) = params {
                    request = request.reply_parameters(params);
                }
                request.await.map_err(upload)
            }
            AttachmentKind::Video => {
                let mut request = self.bot.send_video(self.chat_id, file).caption(caption);
                if let Some(params) = params {
                    request = request.reply_parameters(params);
                }
                request.await.map_err(upload)
            }
            _ => {
                let mut request = self.bot.send_document(self.chat_id, file).caption(caption);
                if let Some(params) = params {
                    request = request.reply_parameters(params);
                }
                request.await.map_err(upload)
            }
        }
    }

    async fn send_group(&self, paths: &[&Path], caption: &str) -> Result<Message, ChannelError> {
        let media: Vec<InputMedia> = paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let file = InputFile::file(*path);
                let caption = if i == 0 { caption.to_string() } else { String::new() };
                match media_kind(path) {
                    AttachmentKind::Photo => InputMedia::Photo(InputMediaPhoto::new(file).caption(caption)),
                    _ => InputMedia::Document(InputMediaDocument::new(file).caption(caption)),
                }
            })
            .collect();

        let mut request = self.bot.send_media_group(self.chat_id, media);
        if let Some(params) = self.reply_parameters() {
            request = request.reply_parameters(params);
        }
        let sent = request
            .await
            .map_err(|e| ChannelError::MediaUploadFailed(e.to_string()))?;
        sent.into_iter()
            .next()
            .ok_or_else(|| ChannelError::MediaUploadFailed("empty media group".into()))
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn send(&self, reply: OutboundReply) -> Result<String, ChannelError> {
        let paths: Vec<&Path> = reply.attachments.iter().map(|h| h.path()).collect();

        let (caption, overflow) = split_at_chars(&reply.body, CAPTION_LIMIT);
        let sent = match paths.as_slice() {
            [] => {
                // long bodies go out in chunks; the last chunk keys any selection
                let mut last = None;
                for chunk in chunks(&reply.body, TEXT_LIMIT) {
                    last = Some(self.send_text(chunk).await?);
                }
                return last
                    .map(|m| correlation_key(self.chat_id, m.id))
                    .ok_or_else(|| ChannelError::SendFailed("empty message".into()));
            }
            [single] => self.send_single(single, caption).await?,
            many => self.send_group(many, caption).await?,
        };

        for chunk in chunks(overflow, TEXT_LIMIT) {
            self.send_text(chunk).await?;
        }
        Ok(correlation_key(self.chat_id, sent.id))
    }

    async fn delete(&self, message_id: &str) -> Result<(), ChannelError> {
        let (chat_id, id) =
            parse_correlation_key(message_id).ok_or_else(|| ChannelError::DeleteFailed(message_id.to_string()))?;
        self.bot
            .delete_message(chat_id, id)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::DeleteFailed(e.to_string()))
    }
}

/// Message IDs are only unique within one chat, so keys carry both: `<chat>:<message>`
pub fn correlation_key(chat_id: ChatId, message_id: MessageId) -> String {
    format!("{}:{}", chat_id.0, message_id.0)
}

/// Inverse of [`correlation_key`]
pub fn parse_correlation_key(key: &str) -> Option<(ChatId, MessageId)> {
    let (chat, message) = key.rsplit_once(':')?;
    Some((ChatId(chat.parse().ok()?), MessageId(message.parse().ok()?)))
}

/// Upload method for a cached file, from its extension
fn media_kind(path: &Path) -> AttachmentKind {
    use mime_guess::mime;

    let guessed = mime_guess::from_path(path).first_or_octet_stream();
    let kind = guessed.type_();
    if kind == mime::IMAGE && guessed.subtype() != mime::GIF {
        AttachmentKind::Photo
    } else if kind == mime::AUDIO {
        AttachmentKind::Audio
    } else if kind == mime::VIDEO {
        AttachmentKind::Video
    } else {
        AttachmentKind::Document
    }
}

/// Split after `max` characters (not bytes)
fn split_at_chars(text: &str, max: usize) -> (&str, &str) {
    match text.char_indices().nth(max) {
        Some((at, _)) => text.split_at(at),
        None => (text, ""),
    }
}

fn chunks(text: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (head, tail) = split_at_chars(rest, max);
        out.push(head);
        rest = tail;
    }
    out
}
