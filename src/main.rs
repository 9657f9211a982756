use std::sync::Arc;

use bacheca::config::{Config, ConfigError};
use bacheca::db;
use bacheca::error::{BachecaError, StoreError};
use bacheca::feed::postgres::PgChangeFeed;
use bacheca::join_link::{self, JoinLinkError};
use bacheca::services::actions::{self, ActionContext};
use bacheca::services::board;
use bacheca::services::engine::BoardEngine;
use bacheca::services::session::BoardSession;
use bacheca::store::RemoteStore;
use bacheca::store::postgres::PgStore;
use bacheca::types::{Actor, BoardElement, ConfigPatch, ElementKind, Position};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Board(#[from] BachecaError),
    #[error(transparent)]
    Link(#[from] JoinLinkError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Board(e.into())
    }
}

#[derive(Parser, Debug)]
#[command(name = "bacheca", about = "Bacheca board operator CLI")]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "BACHECA_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    Boards(BoardsCommand),
    Elements(ElementsCommand),
    /// Print the join link for a board.
    Link { board_id: Uuid },
    /// Join a board through its link and print the roster entry.
    Join {
        link: String,
        #[arg(long)]
        nickname: String,
    },
    /// Delete every element not authored by the instructor.
    Reset { board_id: Uuid },
    /// Open a live session and log every change until interrupted.
    Watch { board_id: Uuid },
}

#[derive(Args, Debug)]
struct BoardsCommand {
    #[command(subcommand)]
    command: BoardsSubcommand,
}

#[derive(Subcommand, Debug)]
enum BoardsSubcommand {
    List,
    Create {
        #[arg(long)]
        title: Option<String>,
    },
    Rename {
        board_id: Uuid,
        title: String,
    },
    Delete {
        board_id: Uuid,
    },
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    board_id: Uuid,
    #[arg(long)]
    allow_post_it: Option<bool>,
    #[arg(long)]
    allow_drawing: Option<bool>,
    #[arg(long)]
    allow_poll: Option<bool>,
    #[arg(long)]
    allow_exercise: Option<bool>,
    #[arg(long)]
    allow_link: Option<bool>,
    #[arg(long)]
    locked: Option<bool>,
}

impl From<&ConfigArgs> for ConfigPatch {
    fn from(args: &ConfigArgs) -> Self {
        Self {
            allow_post_it: args.allow_post_it,
            allow_drawing: args.allow_drawing,
            allow_poll: args.allow_poll,
            allow_exercise: args.allow_exercise,
            allow_link: args.allow_link,
            is_locked: args.locked,
        }
    }
}

#[derive(Args, Debug)]
struct ElementsCommand {
    #[command(subcommand)]
    command: ElementsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ElementsSubcommand {
    List {
        board_id: Uuid,
    },
    Add {
        board_id: Uuid,
        #[arg(long, help = "postit, sondaggio, esercizio or link")]
        kind: ElementKind,
        #[arg(long, requires = "y")]
        x: Option<f64>,
        #[arg(long, requires = "x")]
        y: Option<f64>,
    },
    Remove {
        board_id: Uuid,
        element_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(base) = cli.base_url {
        config.base_url = base.trim_end_matches('/').to_owned();
    }

    if let Command::Link { board_id } = cli.command {
        println!("{}", join_link::build(&config.base_url, board_id));
        return Ok(());
    }

    let pool = db::connect(config.require_database_url()?, config.db_max_connections).await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    match cli.command {
        Command::Migrate => {
            db::migrate(&pool).await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Boards(boards) => run_boards(store.as_ref(), boards).await,
        Command::Elements(elements) => run_elements(store, elements).await,
        Command::Link { .. } => Ok(()),
        Command::Join { link, nickname } => {
            let board_id = join_link::parse(&link)?;
            let (_, participant) = board::join_board(store.as_ref(), board_id, &nickname).await?;
            print_json(&participant)
        }
        Command::Reset { board_id } => {
            board::open_board(store.as_ref(), board_id).await?;
            let engine = BoardEngine::new(board_id, store);
            let removed = engine.reset_participant_elements().await?;
            println!("{removed}");
            Ok(())
        }
        Command::Watch { board_id } => run_watch(store, &pool, &config, board_id).await,
    }
}

async fn run_boards(store: &dyn RemoteStore, boards: BoardsCommand) -> Result<(), CliError> {
    let actor = Actor::Instructor;
    match boards.command {
        BoardsSubcommand::List => print_json(&board::list_boards(store).await?),
        BoardsSubcommand::Create { title } => print_json(&board::create_board(store, &actor, title.as_deref()).await?),
        BoardsSubcommand::Rename { board_id, title } => {
            print_json(&board::rename_board(store, &actor, board_id, &title).await?)
        }
        BoardsSubcommand::Delete { board_id } => {
            board::delete_board(store, &actor, board_id).await?;
            println!("deleted {board_id}");
            Ok(())
        }
        BoardsSubcommand::Config(args) => {
            let patch = ConfigPatch::from(&args);
            print_json(&board::update_config(store, &actor, args.board_id, patch).await?)
        }
    }
}

async fn run_elements(store: Arc<PgStore>, elements: ElementsCommand) -> Result<(), CliError> {
    let actor = Actor::Instructor;
    match elements.command {
        ElementsSubcommand::List { board_id } => {
            let listed = store.list_elements(board_id).await?;
            print_elements(&listed)
        }
        ElementsSubcommand::Add { board_id, kind, x, y } => {
            let current = board::open_board(store.as_ref(), board_id).await?;
            let engine = BoardEngine::new(board_id, store);
            let position = x.zip(y).map(|(x, y)| Position { x, y });
            let ctx = ActionContext::new(&engine, &actor, &current.config);
            let created = actions::add_element(ctx, kind, position).await?;
            print_elements(&[created])
        }
        ElementsSubcommand::Remove { board_id, element_id } => {
            let current = board::open_board(store.as_ref(), board_id).await?;
            let engine = BoardEngine::new(board_id, store);
            engine.load().await?;
            let ctx = ActionContext::new(&engine, &actor, &current.config);
            actions::delete_element(ctx, element_id).await?;
            println!("deleted {element_id}");
            Ok(())
        }
    }
}

async fn run_watch(store: Arc<PgStore>, pool: &PgPool, config: &Config, board_id: Uuid) -> Result<(), CliError> {
    let feed = PgChangeFeed::with_buffer(pool.clone(), config.feed_buffer);
    let session = BoardSession::open(store, &feed, board_id, Actor::Instructor).await?;
    let mut elements = session.engine().subscribe();
    let mut board_rx = session.watch_board();
    tracing::info!(%board_id, count = elements.borrow().len(), "watching board");

    loop {
        tokio::select! {
            changed = elements.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = elements.borrow_and_update().len();
                tracing::info!(%board_id, count, "elements changed");
            }
            changed = board_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(current) = board_rx.borrow_and_update().clone() else {
                    tracing::info!(%board_id, "board deleted");
                    break;
                };
                tracing::info!(%board_id, title = %current.title, locked = current.config.is_locked, "board changed");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        for notice in session.take_notices().await {
            tracing::warn!(%board_id, code = notice.code, message = %notice.message, "notice");
        }
    }

    session.close().await;
    Ok(())
}

fn print_elements(elements: &[BoardElement]) -> Result<(), CliError> {
    let rows = elements
        .iter()
        .map(BoardElement::to_row)
        .collect::<Result<Vec<_>, _>>()?;
    print_json(&rows)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
