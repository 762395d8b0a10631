use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    api::SendTarget,
    composer::{ComposerSession, PendingUpload},
    credentials::{CredentialSet, FileCredentialStore},
    transport::HttpTransport,
    ChatClient, ClientEvent, ClientHandle,
};
use shared::{
    domain::{Narrow, NarrowClause, NarrowOperator, StreamId, UserId},
    protocol::{Message, MessageKind},
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(name = "chat-desk", about = "Browse and post to a chat server")]
struct Cli {
    /// Settings file; defaults to ./desktop.toml when present.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store credentials for later sessions.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        server_url: String,
    },
    /// Forget the stored credentials.
    Logout,
    Streams,
    Topics {
        #[arg(long)]
        stream_id: i64,
    },
    Users,
    /// Show one user by id.
    User {
        id: i64,
    },
    Presence,
    /// Latest direct message from each partner.
    Recent,
    Messages(MessagesArgs),
    Search {
        query: String,
    },
    Send(SendArgs),
    Upload {
        path: PathBuf,
    },
    Unread {
        /// Keep polling and print every change.
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Args, Debug)]
struct MessagesArgs {
    #[arg(long)]
    stream: Option<String>,
    #[arg(long, requires = "stream")]
    topic: Option<String>,
    #[arg(long, conflicts_with = "stream", value_delimiter = ',')]
    pm_with: Vec<String>,
    #[arg(long)]
    search: Option<String>,
    /// Extra pages of older history to fetch.
    #[arg(long, default_value_t = 0)]
    older: u32,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    stream: Option<String>,
    #[arg(long, requires = "stream")]
    topic: Option<String>,
    #[arg(long, conflicts_with = "stream", value_delimiter = ',')]
    to: Vec<String>,
    /// Files uploaded and linked into the message.
    #[arg(long)]
    attach: Vec<PathBuf>,
    #[arg(default_value = "")]
    content: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => config::load_settings_from(path, |name| std::env::var(name).ok())?,
        None => config::load_settings()?,
    };
    debug!(
        credentials = %settings.credentials_path.display(),
        page_size = settings.page_size,
        "desktop: settings loaded"
    );
    let client = ChatClient::new_with_dependencies(
        settings.client_config(),
        Arc::new(HttpTransport::new()),
        Arc::new(FileCredentialStore::new(settings.credentials_path.clone())),
        settings.fallback_credentials(),
    );
    client
        .restore_session()
        .await
        .context("failed to restore the stored session")?;

    match cli.command {
        Command::Login {
            email,
            api_key,
            server_url,
        } => login(&client, CredentialSet::new(email, api_key, server_url)).await,
        Command::Logout => {
            client.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Streams => {
            for stream in client.api().list_streams().await? {
                println!("{:>6}  {}", stream.stream_id, stream.name);
            }
            Ok(())
        }
        Command::Topics { stream_id } => {
            for topic in client.api().list_topics(StreamId(stream_id)).await? {
                println!("{:>8}  {}", topic.max_id, topic.name);
            }
            Ok(())
        }
        Command::Users => {
            if !client.directory().preload().await {
                bail!("could not load the user directory");
            }
            for user in client.directory().entries().await {
                println!("{:<32}  {}", user.full_name, user.email);
            }
            Ok(())
        }
        Command::User { id } => {
            let user = client.api().get_user(UserId(id)).await?;
            println!("{}  {} <{}>", user.user_id, user.full_name, user.email);
            let normalizer = client.normalizer().await?;
            if let Some(avatar) = client.directory().avatar_url(&user.email, &normalizer).await {
                println!("avatar: {avatar}");
            }
            Ok(())
        }
        Command::Presence => {
            let presence = client.api().realm_presence().await?;
            let mut emails = presence.presences.keys().cloned().collect::<Vec<_>>();
            emails.sort();
            for email in emails {
                println!("{:<40}  {:?}", email, presence.status_of(&email));
            }
            Ok(())
        }
        Command::Recent => {
            for message in client.api().recent_direct_messages().await? {
                print_message(&client, &message).await?;
            }
            Ok(())
        }
        Command::Messages(args) => show_messages(client, args).await,
        Command::Search { query } => {
            let mut messages = client.api().search_messages(&query).await?;
            messages.sort_by_key(|message| message.id);
            for message in &messages {
                print_message(&client, message).await?;
            }
            Ok(())
        }
        Command::Send(args) => send(&client, args).await,
        Command::Upload { path } => {
            let upload = PendingUpload::from_path(&path).await?;
            let uploaded = client
                .api()
                .upload_file(&upload.name, upload.bytes)
                .await
                .with_context(|| format!("failed to upload '{}'", path.display()))?;
            println!("[{}]({})", uploaded.filename, uploaded.uri);
            Ok(())
        }
        Command::Unread { watch } => unread(&client, watch).await,
    }
}

async fn login(client: &ChatClient, credentials: CredentialSet) -> Result<()> {
    client.sign_in(credentials).await?;
    let me = client
        .api()
        .get_self()
        .await
        .context("server rejected the credentials")?;
    println!("Signed in as {} <{}>", me.full_name, me.email);
    Ok(())
}

fn narrow_from(args: &MessagesArgs) -> Result<Narrow> {
    let mut narrow = match (&args.stream, &args.topic) {
        (Some(stream), Some(topic)) => Narrow::topic(stream, topic),
        (Some(stream), None) => Narrow::stream(stream),
        (None, _) if !args.pm_with.is_empty() => Narrow::direct(args.pm_with.iter()),
        (None, _) => Narrow::all(),
    };
    if let Some(query) = &args.search {
        narrow = narrow.with(NarrowClause::new(NarrowOperator::Search, query.trim()))?;
    }
    Ok(narrow)
}

async fn show_messages(client: Arc<ChatClient>, args: MessagesArgs) -> Result<()> {
    let handle: Arc<dyn ClientHandle> = client.clone();
    let narrow = narrow_from(&args)?;

    handle.select_narrow(narrow).await?;
    for _ in 0..args.older {
        let update = handle.load_older().await?;
        if !update.mutated() {
            break;
        }
    }

    let snapshot = handle.feed_snapshot().await;
    for message in &snapshot.messages {
        print_message(&client, message).await?;
    }
    if snapshot.messages.is_empty() {
        println!("No messages");
    }
    Ok(())
}

async fn print_message(client: &ChatClient, message: &Message) -> Result<()> {
    let place = match message.kind {
        MessageKind::Stream => format!(
            "#{} > {}",
            message
                .stream_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            message.topic_label().unwrap_or_default()
        ),
        MessageKind::Private => "direct".to_string(),
    };
    let sender = client.resolve_sender(message).await?;
    let sent = message
        .sent_at()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let body = client.render(message).await?;
    println!(
        "[{}] {sent} {} ({place}): {body}",
        message.id, sender.full_name
    );
    Ok(())
}

async fn send(client: &ChatClient, args: SendArgs) -> Result<()> {
    let target = match args.stream {
        Some(stream) => SendTarget::Stream {
            stream,
            topic: args.topic,
        },
        None if !args.to.is_empty() => SendTarget::Direct { recipients: args.to },
        None => bail!("pass --stream or --to"),
    };

    let mut composer = ComposerSession::new(client.config().max_upload_bytes);
    composer.set_buffer(args.content);

    let mut uploads = Vec::with_capacity(args.attach.len());
    for path in &args.attach {
        uploads.push(PendingUpload::from_path(path).await?);
    }
    for outcome in composer.attach(client.api(), uploads).await {
        if let Err(err) = outcome.result {
            warn!(file = %outcome.name, error = %err, "desktop: attachment skipped");
        }
    }

    match composer.send(client.api(), &target).await? {
        Some(id) => println!("Sent message {id}"),
        None => println!("Nothing to send"),
    }
    Ok(())
}

async fn unread(client: &ChatClient, watch: bool) -> Result<()> {
    if !watch {
        let counts = client.latest_unread_counts().await;
        print_counts(&counts);
        return Ok(());
    }

    let mut events = client.subscribe_events();
    client.start_unread_polling().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::UnreadCountsUpdated(counts)) => print_counts(&counts),
                Ok(ClientEvent::Error(message)) => eprintln!("error: {message}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.stop_unread_polling().await;
    Ok(())
}

fn print_counts(counts: &client_core::unread::UnreadCounts) {
    println!("unread: {}", counts.total());
    let mut streams = counts.per_stream.iter().collect::<Vec<_>>();
    streams.sort();
    for (stream_id, count) in streams {
        println!("  #{stream_id:<6} {count}");
    }
    let mut senders = counts.per_sender.iter().collect::<Vec<_>>();
    senders.sort();
    for (email, count) in senders {
        println!("  {email:<40} {count}");
    }
}
