use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hook_state::bridges::BookmarkListBridge;
use hook_state::config::HookConfig;
use hook_state::db::services::{NewBookmark, create_bookmark, delete_bookmark};
use hook_state::db::{self, StoreOptions};
use hook_state::encryption::EncryptionService;
use hook_state::models::{Credential, LoginState, Tag};
use hook_state::repositories::{CredentialRepository, TagRepository};
use hook_state::secure_store::{EncryptedFileSecureStore, MemorySecureStore, SecureStore};
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an in-memory store and secure store that vanish on exit
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the tag list
    #[command(subcommand)]
    Tags(TagsCommand),
    /// Store a credential and log in
    Login {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
    /// Forget the stored credential
    Logout,
    /// Re-validate the stored credential and print the login state
    Status,
    /// Manage bookmarks
    #[command(subcommand)]
    Bookmarks(BookmarksCommand),
}

#[derive(Subcommand, Debug)]
enum TagsCommand {
    List,
    Add { name: String },
    Rename { from: String, to: String },
    /// Replace the list with the given order, starting with `all`
    Reorder { names: Vec<String> },
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum BookmarksCommand {
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        favorite: bool,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    List {
        #[arg(long)]
        tag: Option<String>,
    },
    Delete { id: i32 },
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "hook.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Human-readable logs go to stderr so command output stays clean.
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn secure_store(config: &HookConfig, ephemeral: bool) -> CliResult<Arc<dyn SecureStore>> {
    if ephemeral {
        return Ok(Arc::new(MemorySecureStore::new()));
    }
    let encryption = EncryptionService::from_hex(&config.secure_store_key)?;
    Ok(Arc::new(EncryptedFileSecureStore::new(
        &config.secure_store_path,
        encryption,
    )))
}

fn print_tags(tags: &[Tag]) {
    for tag in tags {
        println!("{tag}");
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();
    let config = HookConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);

    let options = if args.ephemeral {
        StoreOptions::in_memory()
    } else {
        std::fs::create_dir_all(&config.data_dir)?;
        StoreOptions {
            database_url: config.database_url.clone(),
            max_connections: config.max_connections,
        }
    };
    let container = Arc::new(db::open(&options).await?);
    info!(ephemeral = args.ephemeral, "hook started.");

    match args.command {
        Command::Tags(command) => {
            let tags = TagRepository::new(Arc::clone(&container));
            tags.fetch().await?;
            let updated = match command {
                TagsCommand::List => tags.tags_stream().value(),
                TagsCommand::Add { name } => tags.add(Tag::new(name)).await?,
                TagsCommand::Rename { from, to } => tags.update(Tag::new(from), Tag::new(to)).await?,
                TagsCommand::Reorder { names } => {
                    tags.update_all(names.into_iter().map(Tag::new).collect()).await?
                }
                TagsCommand::Remove { name } => tags.remove(Tag::new(name)).await?,
            };
            print_tags(&updated);
        }
        Command::Login { id, name } => {
            let credentials = credential_repository(&config, args.ephemeral)?;
            credentials.save(Credential::new(id, name))?;
            print_login_state(&credentials.login_state_stream().value());
        }
        Command::Logout => {
            let credentials = credential_repository(&config, args.ephemeral)?;
            credentials.delete();
            print_login_state(&credentials.login_state_stream().value());
        }
        Command::Status => {
            let credentials = credential_repository(&config, args.ephemeral)?;
            print_login_state(&credentials.verify().await);
        }
        Command::Bookmarks(command) => match command {
            BookmarksCommand::Add {
                url,
                title,
                note,
                favorite,
                tags,
            } => {
                let bookmark = create_bookmark(
                    &container,
                    NewBookmark {
                        title: title.unwrap_or_else(|| url.clone()),
                        url,
                        note,
                        is_favorite: favorite,
                        tags: tags.into_iter().map(Tag::new).collect(),
                    },
                )
                .await?;
                println!("{}\t{}\t{}", bookmark.id, bookmark.host, bookmark.title);
            }
            BookmarksCommand::List { tag } => {
                let tag = tag.map(Tag::new).unwrap_or_else(Tag::all);
                let bridge = BookmarkListBridge::new(Arc::clone(&container), tag).await?;
                for index in 0..bridge.number_of_rows() {
                    if let Some(row) = bridge.row(index) {
                        let favorite = if row.is_favorite { "*" } else { " " };
                        println!(
                            "{}{}\t{}\t{}\t[{}]",
                            favorite,
                            row.id,
                            row.host,
                            row.title,
                            row.tags.join(", ")
                        );
                    }
                }
            }
            BookmarksCommand::Delete { id } => {
                delete_bookmark(&container, id).await?;
                println!("deleted {id}");
            }
        },
    }

    container.shutdown();
    Ok(())
}

fn credential_repository(config: &HookConfig, ephemeral: bool) -> CliResult<CredentialRepository> {
    Ok(CredentialRepository::new(
        secure_store(config, ephemeral)?,
        Arc::new(config.identity.authority()),
        config.bundle_identifier.clone(),
    ))
}

fn print_login_state(state: &LoginState) {
    match state {
        LoginState::LoggedIn { credential } => println!("logged in as {}", credential.name),
        LoginState::LoggedOut => println!("logged out"),
    }
}
