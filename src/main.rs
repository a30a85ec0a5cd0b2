use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use iconvault_lib::config::ENV_DATA_DIR;
use iconvault_lib::model::IconPatch;
use iconvault_lib::{init_logging_with, AppConfig, AppError, IconUpload, Library};

#[derive(Debug, Parser)]
#[command(name = "iconvault", about = "Icon asset library", version)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct StorageArgs {
    /// Directory holding one sub-directory per category.
    #[arg(long, global = true, value_name = "DIR")]
    storage_root: Option<PathBuf>,
    /// Directory for the JSON documents and the default database file.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,
    /// Use the JSON documents even if the database is reachable.
    #[arg(long, global = true)]
    no_database: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the active backend and record counts.
    Status,
    #[command(subcommand)]
    Categories(CategoryCommand),
    #[command(subcommand)]
    Icons(IconCommand),
}

#[derive(Debug, Subcommand)]
enum CategoryCommand {
    List {
        /// Include the number of icons in each category.
        #[arg(long)]
        counts: bool,
    },
    Create {
        name: String,
    },
    Rename {
        id: i64,
        name: String,
    },
    /// Delete a category; its icons move to the default category.
    Delete {
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
enum IconCommand {
    List {
        #[arg(long)]
        category: Option<i64>,
    },
    Get {
        id: i64,
    },
    /// Upload one or more image files into a category.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target category id; defaults to the default category.
        #[arg(long)]
        category: Option<i64>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Rename {
        id: i64,
        name: String,
    },
    /// Move an icon into another category.
    Move {
        id: i64,
        category: i64,
    },
    /// Edit tags, description or favorite flag.
    Tag {
        id: i64,
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        favorite: Option<bool>,
    },
    Delete {
        id: i64,
    },
    /// Write an icon's bytes to a file, by id or by `category/file` path.
    Export {
        #[arg(long, conflicts_with = "path", required_unless_present = "path")]
        id: Option<i64>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long, short)]
        out: PathBuf,
    },
}

impl StorageArgs {
    /// Environment configuration with command-line flags taking precedence.
    /// `--data-dir` is applied before derived defaults are computed.
    fn resolve(self) -> AppConfig {
        let data_dir = self.data_dir.map(|dir| dir.display().to_string());
        let mut config = AppConfig::from_lookup(|key| match (key, &data_dir) {
            (ENV_DATA_DIR, Some(dir)) => Some(dir.clone()),
            _ => std::env::var(key).ok(),
        });
        if let Some(root) = self.storage_root {
            config.storage_root = root;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if self.no_database {
            config.use_database = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.storage.resolve();

    let log_guard = match init_logging_with(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing::debug!(target: "iconvault", event = "cli_started");
    let outcome = run(config, cli.command).await;
    if let Err(err) = &outcome {
        tracing::warn!(target: "iconvault", event = "cli_failed", error = %err);
    }
    // Flush the file sink before reporting.
    drop(log_guard);

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = match err.downcast_ref::<AppError>() {
                Some(app) => json!({ "error": app }),
                None => json!({ "error": { "message": format!("{err:#}") } }),
            };
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| format!("{err:#}"))
            );
            ExitCode::FAILURE
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}

async fn run(config: AppConfig, command: Command) -> Result<()> {
    let library = Library::open(config).await?;
    match command {
        Command::Status => print(&library.status().await?),
        Command::Categories(cmd) => run_categories(&library, cmd).await,
        Command::Icons(cmd) => run_icons(&library, cmd).await,
    }
}

async fn run_categories(library: &Library, command: CategoryCommand) -> Result<()> {
    let store = library.categories();
    match command {
        CategoryCommand::List { counts: true } => print(&store.list_with_counts().await?),
        CategoryCommand::List { counts: false } => print(&store.list().await?),
        CategoryCommand::Create { name } => print(&store.create(&name).await?),
        CategoryCommand::Rename { id, name } => print(&store.rename(id, &name).await?),
        CategoryCommand::Delete { id } => print(&store.delete(id).await?),
    }
}

async fn run_icons(library: &Library, command: IconCommand) -> Result<()> {
    let store = library.icons();
    match command {
        IconCommand::List { category } => print(&store.list(category).await?),
        IconCommand::Get { id } => {
            let icon = store.get(id).await?;
            let url = icon.url_path();
            print(&json!({ "icon": icon, "url": url }))
        }
        IconCommand::Upload {
            files,
            category,
            tags,
            description,
        } => {
            let category_id = match category {
                Some(id) => id,
                None => library.categories().default_category().await?.id,
            };
            let mut uploads = Vec::with_capacity(files.len());
            for file in &files {
                let bytes = tokio::fs::read(file)
                    .await
                    .with_context(|| format!("read {}", file.display()))?;
                let original_filename = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut upload = IconUpload::new(original_filename, bytes);
                upload.tags = tags.clone();
                upload.description = description.clone();
                uploads.push(upload);
            }
            if uploads.len() == 1 {
                let upload = uploads.remove(0);
                print(&store.create(upload, category_id).await?)
            } else {
                print(&store.create_batch(uploads, category_id).await?)
            }
        }
        IconCommand::Rename { id, name } => print(&store.rename(id, &name).await?),
        IconCommand::Move { id, category } => print(&store.recategorize(id, category).await?),
        IconCommand::Tag {
            id,
            tags,
            description,
            favorite,
        } => {
            let patch = IconPatch {
                tags,
                description,
                is_favorite: favorite,
            };
            print(&store.update_metadata(id, patch).await?)
        }
        IconCommand::Delete { id } => print(&store.delete(id).await?),
        IconCommand::Export { id, path, out } => {
            let file = match (id, path) {
                (Some(id), _) => store.read(id).await?,
                (None, Some(path)) => store.read_by_path(&path).await?,
                (None, None) => anyhow::bail!("either --id or --path is required"),
            };
            tokio::fs::write(&out, &file.bytes)
                .await
                .with_context(|| format!("write {}", out.display()))?;
            print(&file)
        }
    }
}
