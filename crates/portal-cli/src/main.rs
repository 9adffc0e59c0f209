//! # portal-cli
//!
//! Terminal front-end for a single portal conversation. Lines typed on
//! stdin are sent as messages; a few slash commands control the session:
//!
//! - `/seen` marks the conversation seen
//! - `/retry` restarts reconnecting after the connection gave up
//! - `/dismiss` clears the error banner
//! - `/quit` closes the session
//!
//! Input is read a whole line at a time, so this view never sees individual
//! keystrokes and sends no `typing` signals of its own. It only shows the
//! peer's typing state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portal_chat::{ChatConfig, ChatError, ChatSession, HttpBackend, SessionView, WsConnector};
use portal_shared::{DeliveryState, Message, Room, ThreadId, UserId};

#[derive(Debug, Parser)]
#[command(name = "portal-cli", version, about = "Chat in one portal conversation")]
#[command(group(ArgGroup::new("conversation").required(true).args(["peer", "thread"])))]
struct Args {
    /// Id of the local user.
    #[arg(long)]
    local: String,

    /// Open the direct conversation with this user.
    #[arg(long)]
    peer: Option<String>,

    /// Open this group thread.
    #[arg(long)]
    thread: Option<String>,
}

impl Args {
    fn room(&self) -> anyhow::Result<Room> {
        let local = UserId::new(self.local.clone());
        match (&self.peer, &self.thread) {
            (Some(peer), _) => Ok(Room::direct(local, UserId::new(peer.clone()))),
            (None, Some(thread)) => Ok(Room::thread(local, ThreadId::new(thread.clone()))),
            (None, None) => anyhow::bail!("either --peer or --thread is required"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portal_cli=info,portal_chat=debug,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let args = Args::parse();
    let room = args.room()?;

    let config = ChatConfig::from_env();
    info!(
        api = %config.api_base_url,
        socket = %config.socket_url,
        authenticated = config.auth_token.is_some(),
        "Loaded configuration"
    );

    let backend = Arc::new(HttpBackend::new(&config).context("Invalid API URL")?);
    let connector = Arc::new(WsConnector::new(
        config.socket_url.clone(),
        config.auth_token.clone(),
    ));

    let mut session = ChatSession::open(&config, backend, connector, room.clone())
        .await
        .context("Failed to open conversation")?;
    info!(room = %room, "Conversation opened");

    if let Err(e) = session.mark_seen().await {
        warn!(error = %e, "Could not mark conversation seen");
    }

    let mut renderer = Renderer::new(room.local().clone());
    let mut revisions = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    renderer.render(&session.snapshot());

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                renderer.render(&session.snapshot());
                for notice in session.take_notices() {
                    println!("! {}", notice.describe());
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/seen" => {
                        if let Err(e) = session.mark_seen().await {
                            println!("! {e}");
                        }
                    }
                    "/retry" => session.retry_connection(),
                    "/dismiss" => session.dismiss_error(),
                    _ => send_line(&session, &line),
                }
            }
        }
    }

    session.close();
    info!("Bye");
    Ok(())
}

/// Append the line right away and persist it in the background.
fn send_line(session: &ChatSession<HttpBackend, WsConnector>, line: &str) {
    match session.begin_send(line) {
        Ok(pending) => {
            let pipeline = session.pipeline();
            tokio::spawn(async move {
                // Failures surface as a notice on the next render.
                let _ = pipeline.complete(pending).await;
            });
        }
        Err(ChatError::EmptyContent) => {}
        Err(ChatError::Offline) => println!("! offline, message not sent"),
        Err(e) => println!("! {e}"),
    }
}

/// Prints what changed between two views.
struct Renderer {
    local: UserId,
    printed: HashMap<String, DeliveryState>,
    online: Option<bool>,
    peer_typing: bool,
    banner: Option<String>,
}

impl Renderer {
    fn new(local: UserId) -> Self {
        Self {
            local,
            printed: HashMap::new(),
            online: None,
            peer_typing: false,
            banner: None,
        }
    }

    fn render(&mut self, view: &SessionView) {
        if view.banner != self.banner {
            if let Some(banner) = &view.banner {
                println!("!! {banner} (/dismiss to hide)");
            }
            self.banner = view.banner.clone();
        }

        if self.online != Some(view.online) {
            if view.online {
                println!("[online]");
            } else {
                println!("[offline] {:?}", view.connection);
            }
            self.online = Some(view.online);
        }

        for message in &view.messages {
            let key = render_key(message);
            match self.printed.get(&key) {
                None => println!("{}", self.format(message)),
                Some(state) if *state != message.delivery_state && message.sender_id == self.local => {
                    println!("  ({} {})", message.delivery_state.as_str(), short(&message.content));
                }
                Some(_) => {}
            }
            self.printed.insert(key, message.delivery_state);
        }

        if view.peer_typing != self.peer_typing {
            if view.peer_typing {
                println!("[typing…]");
            }
            self.peer_typing = view.peer_typing;
        }
    }

    fn format(&self, message: &Message) -> String {
        let who = if message.sender_id == self.local {
            "me".to_string()
        } else {
            message.sender_id.to_string()
        };
        format!(
            "{} <{}> {} [{}]",
            message.effective_time().format("%H:%M:%S"),
            who,
            message.content,
            message.delivery_state.as_str()
        )
    }
}

// A provisional record keeps its temporary id once confirmed.
fn render_key(message: &Message) -> String {
    match (&message.temporary_id, &message.id) {
        (Some(temp), _) => temp.to_string(),
        (None, Some(id)) => id.to_string(),
        (None, None) => format!("{}:{}", message.sender_id, message.content),
    }
}

fn short(content: &str) -> String {
    let mut out: String = content.chars().take(24).collect();
    if content.chars().count() > 24 {
        out.push('…');
    }
    out
}
