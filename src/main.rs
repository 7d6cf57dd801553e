use anyhow::Result;
use clap::Parser;
use relnet::db::{migrate, Db};
use relnet::graph::PetgraphAlgorithms;
use relnet::model::EntityFilter;
use relnet::provider::SqliteStore;
use relnet::{Config, NetworkOrchestrator, NetworkRequest};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "relnet")]
#[command(about = "Discover the kinship and association network around two or more entities")]
struct Args {
    /// Query entity ids
    #[arg(required = true, num_args = 2..)]
    ids: Vec<i64>,

    /// Expansion depth (0-2); defaults to network.default_max_hops
    #[arg(long)]
    hops: Option<u8>,

    /// Skip kinship links
    #[arg(long)]
    no_kinship: bool,

    /// Skip association links
    #[arg(long)]
    no_association: bool,

    /// Keep only discovered entities with index year >= this
    #[arg(long)]
    year_min: Option<i32>,

    /// Keep only discovered entities with index year <= this
    #[arg(long)]
    year_max: Option<i32>,

    /// Print the visualization view instead of the full result
    #[arg(long)]
    view: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    let migrations_dir = config.database.migrations_dir.clone();
    let applied = db
        .with_connection(move |conn| match migrations_dir {
            Some(dir) => migrate::run_migrations(conn, &dir),
            None => migrate::run_embedded_migrations(conn),
        })
        .await?;
    if applied > 0 {
        log::info!("Applied {} migrations", applied);
    }

    let store = Arc::new(SqliteStore::new(db));
    let orchestrator = NetworkOrchestrator::new(
        store.clone(),
        store,
        Arc::new(PetgraphAlgorithms),
        &config,
    );

    let mut request = NetworkRequest::from_config(args.ids, &config.network);
    if let Some(hops) = args.hops {
        request = request.with_max_hops(hops);
    }
    if args.no_kinship {
        request = request.with_kinship(false);
    }
    if args.no_association {
        request = request.with_association(false);
    }
    if args.year_min.is_some() || args.year_max.is_some() {
        request = request.with_filter(EntityFilter {
            index_year_min: args.year_min,
            index_year_max: args.year_max,
            ..EntityFilter::default()
        });
    }

    let result = orchestrator.build_network(&request).await?;
    let output = if args.view {
        orchestrator.view(&result).to_json()?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", output);
    Ok(())
}
