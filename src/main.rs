//! tinyorm CLI - schema setup and a walkthrough of the persistence engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tinyorm::config::{self, OrmConfig};
use tinyorm::library::{library_types, Book, Publisher};
use tinyorm::{shared, Link, Session};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tinyorm")]
#[command(version = "0.0.1")]
#[command(about = "Minimal object-relational mapper for SQLite")]
#[command(long_about = r#"
tinyorm maps record types onto SQLite tables:
  • Create-if-absent tables and foreign keys from entity metadata
  • Save / merge / update / delete with merge-before-insert
  • Reads backed by a per-session identity cache

Example usage:
  tinyorm init --database library.db
  tinyorm demo
  tinyorm demo --database /tmp/library.db
"#)]
struct Cli {
    /// Enable verbose logging (every SQL statement)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the publisher/book walkthrough
    Demo {
        /// Path to the database file (defaults to the config, then in-memory)
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default tinyorm.toml
    Init {
        /// Path to the config file
        #[arg(short, long, default_value = "tinyorm.toml")]
        config: PathBuf,

        /// Database file the config points at
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Demo { database, config } => {
            let settings = match database {
                Some(path) => OrmConfig::with_database(path.to_string_lossy()),
                None => config::load_config(config.as_deref())?.unwrap_or_default(),
            };
            run_demo(&settings)?;
        }

        Commands::Init { config, database, force } => {
            let database = database.unwrap_or_else(|| config::default_database_path_in(std::path::Path::new(".")));
            let settings = OrmConfig::with_database(database.to_string_lossy());
            config::write_config(&config, &settings, force)?;
            println!("✅ Wrote {} (database: {})", config.display(), database.display());
        }
    }

    Ok(())
}

fn run_demo(settings: &OrmConfig) -> anyhow::Result<()> {
    if let Some(path) = settings.database_path() {
        config::ensure_db_dir(&path)?;
        tracing::info!("Using database {}", path.display());
    }

    let session = Session::from_config(settings)?;
    let types = library_types();
    let created = session.register(&types)?;
    let linked = session.create_relationships(&types)?;
    println!("Created {} tables", created);
    print!("{}", linked);

    let publisher = session.save(&shared(Publisher::new("Jakub")))?;
    let mut book = Book::new("whatever", chrono::Local::now().date_naive());
    book.publisher = Link::to(&publisher);
    let book = session.save(&shared(book))?;

    let key = book
        .borrow()
        .id
        .ok_or_else(|| anyhow::anyhow!("saved book has no key"))?;
    match session.find_by_id::<Book>(key)? {
        Some(found) => {
            let found = found.borrow();
            println!(
                "📖 Book #{}: {:?} ({:?}), publisher #{:?}",
                key,
                found.title,
                found.date,
                found.publisher.key()
            );
        }
        None => println!("Book #{} not found", key),
    }

    let books = session.find_dependents::<Publisher, Book>(&publisher)?;
    println!("🏢 {} has {} book(s)", publisher.borrow().name, books.len());
    publisher.borrow_mut().books = books;

    print!("{}", session.stats());
    session.close()?;
    Ok(())
}
