//! Message handlers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rtalk::{ChatClient, ConversationSummary, DeliveryStatus, Entry, Message, Notice, UserId};
use rust_i18n::t;
use serde::Serialize;

use crate::output::{format_clock, format_relative_time, PlainPrint, TableRow};

/// Inbox row.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub with: String,
    pub with_uid: String,
    pub last_message: String,
    pub last_time: DateTime<Utc>,
    pub unread: usize,
}

impl From<ConversationSummary> for ConversationInfo {
    fn from(c: ConversationSummary) -> Self {
        Self {
            with: c
                .other_user_name
                .unwrap_or_else(|| t!("unknown_user").to_string()),
            with_uid: c.other_user_id.to_string(),
            last_message: c.last_message,
            last_time: c.last_message_at,
            unread: c.unread_count,
        }
    }
}

impl TableRow for ConversationInfo {
    fn headers() -> Vec<&'static str> {
        vec!["With", "UID", "Last Message", "Last", "Unread"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.with.clone(),
            self.with_uid.clone(),
            self.last_message.clone(),
            format_relative_time(self.last_time),
            if self.unread > 0 {
                self.unread.to_string()
            } else {
                String::new()
            },
        ]
    }
}

impl PlainPrint for ConversationInfo {
    fn plain_print(&self) {
        let unread_marker = if self.unread > 0 {
            format!("● {} ", self.unread).red().to_string()
        } else {
            String::new()
        };
        println!(
            "{}{} {} {}",
            unread_marker,
            self.with.green(),
            format!("[UID: {}]", self.with_uid).dimmed(),
            format_relative_time(self.last_time).dimmed()
        );
        println!("   {}", self.last_message);
    }
}

/// Inbox result.
#[derive(Debug, Clone, Serialize)]
pub struct InboxResult {
    pub user: String,
    pub unread_total: usize,
    pub conversations: Vec<ConversationInfo>,
}

/// Transcript row.
#[derive(Debug, Clone, Serialize)]
pub struct MessageInfo {
    pub id: String,
    pub from_uid: String,
    pub is_mine: bool,
    pub content: String,
    pub time: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl MessageInfo {
    pub fn from_message(message: &Message, me: &UserId, status: DeliveryStatus) -> Self {
        Self {
            id: message.id.to_string(),
            from_uid: message.sender_id.to_string(),
            is_mine: message.is_from(me),
            content: message.content.clone(),
            time: message.created_at,
            status,
        }
    }

    pub fn from_entry(entry: &Entry, me: &UserId) -> Self {
        Self::from_message(&entry.message, me, entry.status)
    }

    fn sender(&self) -> String {
        if self.is_mine {
            t!("you_label").to_string()
        } else {
            self.from_uid.clone()
        }
    }
}

impl TableRow for MessageInfo {
    fn headers() -> Vec<&'static str> {
        vec!["From", "Content", "Time"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.sender(),
            self.content.clone(),
            format_relative_time(self.time),
        ]
    }
}

impl PlainPrint for MessageInfo {
    fn plain_print(&self) {
        let from_display = if self.is_mine {
            self.sender().green().to_string()
        } else {
            self.sender().cyan().to_string()
        };
        let pending = if self.status == DeliveryStatus::Pending {
            format!(" {}", t!("pending_label")).dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {}{}",
            from_display,
            format_clock(self.time).dimmed(),
            pending
        );
        for line in self.content.lines() {
            if !line.trim().is_empty() {
                println!("   {}", line);
            }
        }
    }
}

/// Conversation history result.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResult {
    pub with: String,
    pub with_uid: String,
    pub messages: Vec<MessageInfo>,
}

/// Send message result.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResult {
    pub to: String,
    pub message: Option<MessageInfo>,
}

/// Display name of a participant, falling back to "unknown user" when there
/// is no profile.
pub async fn display_name(client: &ChatClient, user: &UserId) -> String {
    match client.store().fetch_profile(user).await {
        Ok(Some(profile)) => profile.display_name().to_owned(),
        Ok(None) => t!("unknown_user").to_string(),
        Err(e) => {
            tracing::debug!("profile lookup for {} failed: {}", user, e);
            t!("unknown_user").to_string()
        }
    }
}

/// List the current user's conversations.
pub async fn inbox(client: &ChatClient) -> Result<InboxResult> {
    let result = client
        .inbox()
        .list()
        .send()
        .await
        .context("Failed to load conversations")?;

    Ok(InboxResult {
        user: result.user_id.to_string(),
        unread_total: result.unread_total,
        conversations: result.conversations.into_iter().map(Into::into).collect(),
    })
}

/// Load the transcript with another user.
pub async fn history(client: &ChatClient, with: &str) -> Result<HistoryResult> {
    let mut conversation = client
        .conversation(with)
        .open()
        .await
        .context("Failed to open conversation")?;

    if let Some(Notice::FetchFailure(error)) = conversation.last_notice() {
        conversation.teardown().await;
        anyhow::bail!("{}", t!("notice_fetch_failure", error = error));
    }

    let me = conversation.current_user().clone();
    let messages = conversation
        .entries()
        .iter()
        .map(|e| MessageInfo::from_entry(e, &me))
        .collect();
    conversation.teardown().await;

    let other = UserId::from(with);
    Ok(HistoryResult {
        with: display_name(client, &other).await,
        with_uid: other.to_string(),
        messages,
    })
}

/// Send a single message.
pub async fn send_message(client: &ChatClient, to: &str, content: &str) -> Result<SendMessageResult> {
    let mut conversation = client
        .conversation(to)
        .open()
        .await
        .context("Failed to open conversation")?;

    let me = conversation.current_user().clone();
    let sent = conversation.send(content).await;
    conversation.teardown().await;

    let message = sent
        .map_err(|e| anyhow::anyhow!("{}", t!("send_failed", error = e)))?
        .map(|m| MessageInfo::from_message(&m, &me, DeliveryStatus::Sent));

    Ok(SendMessageResult {
        to: to.to_owned(),
        message,
    })
}
