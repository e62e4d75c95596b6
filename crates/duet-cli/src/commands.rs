use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use duet_core::models::{ConversationSummary, Message, UserProfile};
use duet_core::{
    resume, sign_in, sign_in_federated, sign_up, Backend, ChatClient, CoreConfig, CoreError, SignUp,
};

use crate::Commands;

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("duet")
}

pub async fn run(data_dir: PathBuf, command: Commands) -> Result<()> {
    let backend = Backend::local(&CoreConfig::new(&data_dir))?;

    match command {
        Commands::SignUp {
            username,
            email,
            password,
            about,
        } => {
            let client = sign_up(
                &backend,
                &SignUp {
                    username: username.clone(),
                    email,
                    password,
                    about,
                },
            )
            .await?;
            println!("signed up as {} ({})", username, client.user_id());
        }

        Commands::SignIn { email, password } => {
            let client = sign_in(&backend, &email, &password).await?;
            let profile = client.profile().await?;
            println!("signed in as {}", profile.username);
        }

        Commands::SignInWith { provider, subject } => {
            let client = sign_in_federated(&backend, &provider, &subject).await?;
            let profile = client.profile().await?;
            println!("signed in as {} via {}", profile.username, provider);
        }

        Commands::SignOut => {
            let client = client(&backend).await?;
            client.sign_out().await?;
            println!("signed out");
        }

        Commands::Whoami => {
            let client = client(&backend).await?;
            let profile = client.profile().await?;
            println!("{} ({})", profile.username, profile.email);
            if !profile.about.is_empty() {
                println!("{}", profile.about);
            }
        }

        Commands::Users => {
            let client = client(&backend).await?;
            for user in client.list_users().await? {
                println!("{}", user.username);
            }
        }

        Commands::Find { username } => {
            let client = client(&backend).await?;
            match client.find_user(&username).await {
                Ok(user) => println!("{} ({})", user.username, user.id),
                Err(CoreError::UserNotFound) => println!("User not found."),
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Add { username } => {
            let client = client(&backend).await?;
            let peer = client.find_user(&username).await?;
            if let Some(entry) = client.conversation_with(&peer.id).await? {
                println!("already chatting with {} ({})", username, entry.conversation_id);
                return Ok(());
            }
            let conversation_id = client.create_conversation(&peer).await?;
            println!("started conversation {} with {}", conversation_id, username);
        }

        Commands::Chats => {
            let client = client(&backend).await?;
            print_chat_list(&client.chat_list().await?);
        }

        Commands::Open { username } => {
            let client = client(&backend).await?;
            let (conversation_id, peer) = conversation_for(&client, &username).await?;
            client.mark_seen(&conversation_id).await?;

            let me = client.profile().await?;
            for message in client.conversation(&conversation_id).await? {
                print_message(&me, &peer, &message);
            }
            if !client.can_compose(&peer.id).await? {
                println!("(you cannot text this user)");
            }
        }

        Commands::Send { username, text } => {
            let client = client(&backend).await?;
            let (conversation_id, peer) = conversation_for(&client, &username).await?;
            client
                .send_text(&conversation_id, &peer.id, &text.join(" "))
                .await?;
        }

        Commands::SendFile { username, path } => {
            let client = client(&backend).await?;
            let (conversation_id, peer) = conversation_for(&client, &username).await?;
            let data = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            client
                .send_attachment(&conversation_id, &peer.id, &data, &file_name(&path))
                .await?;
        }

        Commands::Hide { username } => {
            let client = client(&backend).await?;
            let (conversation_id, _) = conversation_for(&client, &username).await?;
            client.hide_conversation(&conversation_id).await?;
            println!("hidden");
        }

        Commands::Block { username } => {
            let client = client(&backend).await?;
            let peer = client.find_user(&username).await?;
            client.block(&peer.id).await?;
            println!("blocked {}", username);
        }

        Commands::Unblock { username } => {
            let client = client(&backend).await?;
            let peer = client.find_user(&username).await?;
            client.unblock(&peer.id).await?;
            println!("unblocked {}", username);
        }

        Commands::Profile {
            username,
            about,
            avatar,
        } => {
            let client = client(&backend).await?;
            if username.is_some() || about.is_some() {
                client
                    .update_profile(username.as_deref(), about.as_deref())
                    .await?;
            }
            if let Some(path) = avatar {
                let data = std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                client.set_avatar(&data, &file_name(&path)).await?;
            }

            let profile = client.profile().await?;
            println!("{} ({})", profile.username, profile.email);
            if !profile.about.is_empty() {
                println!("{}", profile.about);
            }
            if let Some(avatar) = &profile.avatar {
                println!("avatar: {}", avatar);
            }
        }

        Commands::Media { username } => {
            let client = client(&backend).await?;
            let (conversation_id, _) = conversation_for(&client, &username).await?;
            for url in client.shared_media(&conversation_id).await? {
                println!("{}", url);
            }
        }

        Commands::Watch { username } => {
            let client = client(&backend).await?;
            watch(&client, username.as_deref()).await?;
        }
    }

    Ok(())
}

/// Resume the persisted session or explain how to get one.
async fn client(backend: &Backend) -> Result<ChatClient> {
    match resume(backend).await {
        Ok(client) => Ok(client),
        Err(CoreError::NoSession) => bail!("not signed in; run `duet sign-in` first"),
        Err(err) => Err(err.into()),
    }
}

/// Resolve a username to the conversation the session user has with them.
async fn conversation_for(client: &ChatClient, username: &str) -> Result<(String, UserProfile)> {
    let peer = client.find_user(username).await?;
    match client.conversation_with(&peer.id).await? {
        Some(entry) => Ok((entry.conversation_id, peer)),
        None => bail!("no conversation with {username}; run `duet add {username}`"),
    }
}

/// Follow the chat list live; with a peer, follow that conversation too.
async fn watch(client: &ChatClient, username: Option<&str>) -> Result<()> {
    let mut index = client.index_feed().await?;

    match username {
        Some(username) => {
            let (conversation_id, peer) = conversation_for(client, username).await?;
            let me = client.profile().await?;
            let mut messages = client.message_feed(&conversation_id).await?;
            let mut shown = 0usize;

            loop {
                tokio::select! {
                    Some(list) = index.next() => print_chat_list(&list),
                    Some(sequence) = messages.next() => {
                        for message in &sequence[shown.min(sequence.len())..] {
                            print_message(&me, &peer, message);
                        }
                        shown = sequence.len();
                    }
                    else => break,
                }
            }
        }
        None => {
            while let Some(list) = index.next().await {
                print_chat_list(&list);
            }
        }
    }

    Ok(())
}

fn print_chat_list(summaries: &[ConversationSummary]) {
    println!("── chats ──");
    for summary in summaries {
        let marker = if summary.seen { ' ' } else { '●' };
        println!(
            "{} {:<16} {:<40} {}",
            marker,
            summary.peer.username,
            summary.last_message,
            format_time(summary.updated_at)
        );
    }
}

fn print_message(me: &UserProfile, peer: &UserProfile, message: &Message) {
    let who = if message.sender_id == me.id {
        &me.username
    } else {
        &peer.username
    };
    println!(
        "[{}] {}: {}",
        format_time(message.sent_at),
        who,
        message.preview()
    );
}

fn format_time(unix_seconds: u64) -> String {
    match Local.timestamp_opt(unix_seconds as i64, 0) {
        chrono::LocalResult::Single(time) => time.format("%H:%M").to_string(),
        _ => unix_seconds.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("attachment")
        .to_string()
}
