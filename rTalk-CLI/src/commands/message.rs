//! Message commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use rtalk::{DeliveryStatus, Message, Notice, UserId, ViewEvent};
use rust_i18n::t;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::handlers::message::{self as handlers, display_name, MessageInfo};
use crate::output::{print_json, print_table, OutputFormat, PlainPrint};
use crate::session::build_identified_session;

#[derive(Subcommand)]
pub enum MessageAction {
    /// List conversations
    #[command(alias = "ls")]
    Inbox,

    /// Show the transcript with a user
    History {
        /// Other participant's user ID
        #[arg(short, long)]
        with: String,
    },

    /// Send a message
    Send {
        /// Recipient user ID
        #[arg(short, long)]
        to: String,
        /// Message content
        content: String,
    },

    /// Chat interactively with a user
    Chat {
        /// Other participant's user ID
        #[arg(short, long)]
        with: String,
    },
}

pub async fn handle(action: MessageAction, format: OutputFormat, verbose: bool) -> Result<()> {
    match action {
        MessageAction::Inbox => inbox(format).await,
        MessageAction::History { with } => history(&with, format).await,
        MessageAction::Send { to, content } => send_message(&to, &content, format).await,
        MessageAction::Chat { with } => chat(&with, verbose).await,
    }
}

async fn inbox(format: OutputFormat) -> Result<()> {
    let session = build_identified_session()?;
    let result = handlers::inbox(&session.client).await?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
        return Ok(());
    }

    if result.conversations.is_empty() {
        println!("{}", t!("no_conversations"));
        return Ok(());
    }

    if matches!(format, OutputFormat::Plain) {
        println!(
            "{}\n",
            t!(
                "inbox_header",
                count = result.conversations.len(),
                unread = result.unread_total
            )
        );
    }

    print_table(result.conversations, format);
    Ok(())
}

async fn history(with: &str, format: OutputFormat) -> Result<()> {
    let session = build_identified_session()?;
    let result = handlers::history(&session.client, with).await?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
        return Ok(());
    }

    if matches!(format, OutputFormat::Plain) {
        println!(
            "{}\n",
            t!(
                "conversation_with",
                user = result.with.green(),
                count = result.messages.len()
            )
        );
    }

    print_table(result.messages, format);
    Ok(())
}

async fn send_message(to: &str, content: &str, format: OutputFormat) -> Result<()> {
    let session = build_identified_session()?;
    let result = handlers::send_message(&session.client, to, content).await?;
    session.persist()?;

    if matches!(format, OutputFormat::Json) {
        print_json(&result);
    } else if result.message.is_some() {
        println!("{}", t!("message_sent_to", user = result.to));
    } else {
        println!("{}", t!("nothing_to_send"));
    }
    Ok(())
}

async fn chat(with: &str, verbose: bool) -> Result<()> {
    let session = build_identified_session()?;
    let client = &session.client;

    let mut conversation = client
        .conversation(with)
        .open()
        .await
        .context("Failed to open conversation")?;
    let mut view = conversation.subscribe_view();
    let me = conversation.current_user().clone();

    let name = display_name(client, &UserId::from(with)).await;
    println!("{}\n", t!("chat_with", user = name.green()));
    for entry in conversation.entries() {
        MessageInfo::from_entry(&entry, &me).plain_print();
    }
    if let Some(notice) = conversation.last_notice() {
        print_notice(&notice);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let text = line.trim();
                if text == "/quit" {
                    break;
                }
                if let Err(e) = conversation.send(text).await {
                    eprintln!("{}", t!("input_kept", text = text).to_string().yellow());
                    tracing::debug!("send failed: {}", e);
                }
                session.persist()?;
            }
            event = view.recv() => match event {
                Ok(event) => show_event(event, &me, verbose),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("view skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    conversation.teardown().await;
    session.persist()?;
    println!("{}", t!("chat_closed").to_string().dimmed());
    Ok(())
}

fn show_event(event: ViewEvent, me: &UserId, verbose: bool) {
    match event {
        ViewEvent::Admitted(message) | ViewEvent::Confirmed(message) => print_message(&message, me),
        ViewEvent::Notice(notice) => print_notice(&notice),
        ViewEvent::Reconciled { added } if verbose => {
            tracing::info!("merged {} missed messages", added);
        }
        _ => {}
    }
}

fn print_message(message: &Message, me: &UserId) {
    MessageInfo::from_message(message, me, DeliveryStatus::Delivered).plain_print();
}

fn print_notice(notice: &Notice) {
    let text = match notice {
        Notice::FetchFailure(error) => t!("notice_fetch_failure", error = error),
        Notice::SendFailure(error) => t!("notice_send_failure", error = error),
        Notice::SubscriptionFailure(error) => t!("notice_subscription_failure", error = error),
        Notice::SubscriptionRestored => t!("notice_subscription_restored"),
    };
    if notice.is_failure() {
        eprintln!("{}", text.to_string().red());
    } else {
        eprintln!("{}", text.to_string().dimmed());
    }
}
