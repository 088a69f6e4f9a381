use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use entity_store_core::{Blog, Category, Entity, Post, catalog};
use entity_store_sqlite::{Database, Filter, MigrationPlan, StoreConfig};
use serde::Serialize;
use tracing::info;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
}

/// Entity types of the blog catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EntityKind {
    Blog,
    Post,
    Category,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Blog => Blog::ENTITY,
            EntityKind::Post => Post::ENTITY,
            EntityKind::Category => Category::ENTITY,
        };
        f.write_str(name)
    }
}

#[derive(Debug, Parser)]
#[command(name = "entity-store")]
#[command(about = "Blog entity store: schema migrations, seeding and queries over SQLite")]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database file path (overrides the configuration).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Show the pending migration plan without applying it.
    Plan(FormatArgs),
    /// Show schema version, pending steps and row counts.
    Status(FormatArgs),
    /// List applied migrations.
    History(FormatArgs),
    /// Insert the sample data if the database has no blogs.
    Seed,
    /// Open, migrate, seed and run the read checks.
    Demo(DemoArgs),
    /// List entities, optionally bounded by primary key.
    Query(QueryArgs),
    /// Load the entities related to one entity.
    Related(RelatedArgs),
    /// Drop all tables and the migration history.
    Reset(ResetArgs),
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Output format.
    #[arg(long, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct DemoArgs {
    /// Delete the database file before opening it.
    #[arg(long)]
    fresh: bool,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Entity type.
    entity: EntityKind,
    /// Smallest primary key to include.
    #[arg(long)]
    min_id: Option<i64>,
    /// Largest primary key to include.
    #[arg(long)]
    max_id: Option<i64>,
    /// Maximum number of rows.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct RelatedArgs {
    /// Entity type of the owner.
    entity: EntityKind,
    /// Primary key of the owner.
    id: i64,
    /// Relationship name (e.g. posts, blog, categories).
    relationship: String,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Confirm dropping every table.
    #[arg(long)]
    yes: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("entity_store=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref(), cli.db.as_ref()).and_then(|config| match cli.command {
        Command::Migrate => run_migrate(&config),
        Command::Plan(args) => run_plan(&config, args),
        Command::Status(args) => run_status(&config, args),
        Command::History(args) => run_history(&config, args),
        Command::Seed => run_seed(&config),
        Command::Demo(args) => run_demo(config, args),
        Command::Query(args) => run_query(&config, args),
        Command::Related(args) => run_related(&config, args),
        Command::Reset(args) => run_reset(&config, args),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Loads the configuration file (or defaults) and applies `--db`.
fn load_config(path: Option<&PathBuf>, db: Option<&PathBuf>) -> Result<StoreConfig, String> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(db) = db {
        config.database = db.clone();
    }
    Ok(config)
}

/// Opens the database keeping its contents; only `demo` honors `fresh_start`.
fn open(config: &StoreConfig) -> Result<Database, String> {
    open_with(&StoreConfig {
        fresh_start: false,
        ..config.clone()
    })
}

fn open_with(config: &StoreConfig) -> Result<Database, String> {
    Database::open(config, catalog::blog_model())
        .map_err(|e| format!("Failed to open database '{}': {e}", config.database.display()))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {e}"))
}

// ---------------------------------------------------------------------------
// migration commands
// ---------------------------------------------------------------------------

fn run_migrate(config: &StoreConfig) -> Result<(), String> {
    let mut db = open(config)?;
    let outcome = db
        .run_migrations()
        .map_err(|e| format!("Migration failed: {e}"))?;
    if outcome.applied {
        println!(
            "Migration applied: {} ({} steps, version {})",
            outcome.migration_name.as_deref().unwrap_or("-"),
            outcome.step_count,
            format_version(outcome.to_version)
        );
    } else {
        println!("Schema is up to date (version {}).", format_version(outcome.to_version));
    }
    Ok(())
}

fn run_plan(config: &StoreConfig, args: FormatArgs) -> Result<(), String> {
    let mut db = open(config)?;
    let plan = db
        .plan_migrations()
        .map_err(|e| format!("Failed to plan migrations: {e}"))?;
    match args.format {
        CliOutputFormat::Json => println!("{}", to_json(&plan)?),
        CliOutputFormat::Text => print_plan(&plan),
    }
    Ok(())
}

fn print_plan(plan: &MigrationPlan) {
    if plan.is_empty() {
        println!("No pending steps (version {}).", format_version(plan.base_version));
        return;
    }
    println!(
        "Pending migration: version {} -> {}",
        format_version(plan.base_version),
        plan.target_version()
    );
    for (index, step) in plan.steps.iter().enumerate() {
        println!("  {}. {}", index + 1, step.describe());
    }
}

fn run_status(config: &StoreConfig, args: FormatArgs) -> Result<(), String> {
    let mut db = open(config)?;
    let status = db
        .status()
        .map_err(|e| format!("Failed to get migration status: {e}"))?;
    if args.format == CliOutputFormat::Json {
        println!("{}", to_json(&status)?);
        return Ok(());
    }
    println!("Migration Status:");
    println!("  Tables exist: {}", if status.tables_exist { "yes" } else { "no" });
    println!("  Current version: {}", format_version(status.current_version));
    println!("  Pending steps: {}", status.pending_steps);
    println!("  Model matches: {}", if status.model_matches { "yes" } else { "no" });
    for (table, count) in &status.row_counts {
        println!("  {table}: {count} rows");
    }
    Ok(())
}

fn run_history(config: &StoreConfig, args: FormatArgs) -> Result<(), String> {
    let mut db = open(config)?;
    let history = db
        .history()
        .map_err(|e| format!("Failed to read migration history: {e}"))?;
    if args.format == CliOutputFormat::Json {
        println!("{}", to_json(&history)?);
        return Ok(());
    }
    if history.is_empty() {
        println!("No migrations applied.");
    }
    for migration in &history {
        println!(
            "  v{} {} [{}] {} steps at {} ({})",
            migration.version,
            migration.name,
            migration.provider,
            migration.step_count,
            migration.applied_at,
            &migration.model_hash[..migration.model_hash.len().min(12)]
        );
    }
    Ok(())
}

fn run_reset(config: &StoreConfig, args: ResetArgs) -> Result<(), String> {
    if !args.yes {
        return Err("reset drops every table; pass --yes to confirm".to_string());
    }
    let mut db = open(config)?;
    db.reset().map_err(|e| format!("Reset failed: {e}"))?;
    println!("All tables dropped from '{}'.", config.database.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// data commands
// ---------------------------------------------------------------------------

fn run_seed(config: &StoreConfig) -> Result<(), String> {
    let mut db = open(config)?;
    let report = db.seed_if_empty().map_err(|e| format!("Seed failed: {e}"))?;
    if !report.seeded {
        println!("Database already has data; nothing seeded.");
        return Ok(());
    }
    println!("Seed complete:");
    println!("  Blogs inserted: {}", report.blogs);
    println!("  Categories inserted: {}", report.categories);
    println!("  Posts inserted: {}", report.posts);
    println!("  Associations inserted: {}", report.associations);
    Ok(())
}

/// The startup flow: open, migrate, seed, then read back.
fn run_demo(mut config: StoreConfig, args: DemoArgs) -> Result<(), String> {
    if args.fresh {
        config.fresh_start = true;
    }
    let mut db = open_with(&config)?;

    if config.auto_migrate {
        db.run_migrations().map_err(|e| format!("Migration failed: {e}"))?;
    } else {
        let plan = db
            .plan_migrations()
            .map_err(|e| format!("Failed to plan migrations: {e}"))?;
        if !plan.is_empty() {
            return Err(format!(
                "schema has {} pending steps and auto_migrate is off; run `entity-store migrate` first",
                plan.len()
            ));
        }
    }
    if config.seed {
        db.seed_if_empty().map_err(|e| format!("Seed failed: {e}"))?;
    }

    let fail = |e: entity_store_sqlite::StoreError| format!("Read check failed: {e}");

    let blogs = db
        .query::<Blog>()
        .and_then(|q| q.filter(Filter::ge("id", 1_i64)).fetch_all())
        .map_err(fail)?;
    println!("Blogs with id >= 1: {}", blogs.len());
    for blog in &blogs {
        println!("  {} {}", blog.id.unwrap_or_default(), blog.name);
    }

    let second = db
        .query::<Blog>()
        .and_then(|q| q.filter(Filter::eq("id", 2_i64)).first())
        .map_err(fail)?;
    match second {
        Some(blog) => println!("Blog with id = 2: {}", blog.name),
        None => println!("Blog with id = 2: none"),
    }

    let early = db
        .query::<Post>()
        .and_then(|q| q.filter(Filter::le("id", 2_i64)).fetch_all())
        .map_err(fail)?;
    println!("Posts with id <= 2: {}", titles(&early));

    if let Some(first) = blogs.first() {
        let posts: Vec<Post> = db.load_related(first, "posts").map_err(fail)?;
        println!("Posts of blog {}: {}", first.name, titles(&posts));
    }

    let category = db
        .query::<Category>()
        .and_then(|q| q.filter(Filter::eq("id", 1_i64)).first())
        .map_err(fail)?;
    if let Some(category) = category {
        let posts: Vec<Post> = db.load_related(&category, "posts").map_err(fail)?;
        println!("Posts in category {}: {}", category.tag_name, titles(&posts));
    }

    db.close().map_err(|e| format!("Failed to close database: {e}"))?;
    info!("demo complete");
    Ok(())
}

fn titles(posts: &[Post]) -> String {
    if posts.is_empty() {
        return "none".to_string();
    }
    posts
        .iter()
        .map(|p| p.title.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_query(config: &StoreConfig, args: QueryArgs) -> Result<(), String> {
    let db = open(config)?;
    let mut filter = Filter::all();
    if let Some(min) = args.min_id {
        filter = filter.and(Filter::ge("id", min));
    }
    if let Some(max) = args.max_id {
        filter = filter.and(Filter::le("id", max));
    }

    let output = match args.entity {
        EntityKind::Blog => query_json::<Blog>(&db, filter, args.limit)?,
        EntityKind::Post => query_json::<Post>(&db, filter, args.limit)?,
        EntityKind::Category => query_json::<Category>(&db, filter, args.limit)?,
    };
    println!("{output}");
    Ok(())
}

fn query_json<E: Entity + Serialize>(db: &Database, filter: Filter, limit: Option<usize>) -> Result<String, String> {
    let mut query = db
        .query::<E>()
        .map_err(|e| format!("Query failed: {e}"))?
        .filter(filter);
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    let rows = query.fetch_all().map_err(|e| format!("Query failed: {e}"))?;
    to_json(&rows)
}

fn run_related(config: &StoreConfig, args: RelatedArgs) -> Result<(), String> {
    let db = open(config)?;
    let output = match (args.entity, args.relationship.as_str()) {
        (EntityKind::Blog, "posts") => related_json::<Blog, Post>(&db, args.id, "posts")?,
        (EntityKind::Post, "blog") => related_json::<Post, Blog>(&db, args.id, "blog")?,
        (EntityKind::Post, "categories") => related_json::<Post, Category>(&db, args.id, "categories")?,
        (EntityKind::Category, "posts") => related_json::<Category, Post>(&db, args.id, "posts")?,
        (entity, relationship) => {
            return Err(format!("{entity} has no relationship '{relationship}'"));
        }
    };
    println!("{output}");
    Ok(())
}

fn related_json<E: Entity, R: Entity + Serialize>(db: &Database, id: i64, relationship: &str) -> Result<String, String> {
    let owner = db.find_by_id::<E>(id).map_err(|e| e.to_string())?;
    let related: Vec<R> = db
        .load_related(&owner, relationship)
        .map_err(|e| format!("Failed to load {relationship}: {e}"))?;
    to_json(&related)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_version(version: Option<i64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}
