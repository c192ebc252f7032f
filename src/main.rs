use clap::{Args, Parser, Subcommand};
use da_stats::{config, data, server, stats, LngLat, StatsResponse, StatsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the stats API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run one stats query and print the result as JSON
    Query {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[command(flatten)]
        selection: Selection,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Selection {
    /// Point as LNG,LAT (repeatable)
    #[arg(long = "lnglat", value_name = "LNG,LAT", value_parser = parse_lnglat, allow_hyphen_values = true)]
    lnglats: Vec<LngLat>,
    /// Dissemination area id (repeatable)
    #[arg(long = "id", value_name = "ID")]
    ids: Vec<String>,
}

fn parse_lnglat(s: &str) -> Result<LngLat, String> {
    let (lng, lat) = s.split_once(',')
        .ok_or_else(|| format!("expected LNG,LAT but got '{}'", s))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("bad longitude '{}': {}", lng, e))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude '{}': {}", lat, e))?;
    Ok(LngLat::new(lng, lat))
}

fn run_query(store: &dyn StatsStore, selection: &Selection) -> anyhow::Result<StatsResponse> {
    let response = if selection.lnglats.is_empty() {
        stats::get_stats_for_area_ids(store, &selection.ids)?
    } else {
        stats::get_stats_for_points(store, &selection.lnglats)?
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `query` output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            info!("Serving stats with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let store = data::load_store(&app_config)?;
            info!(
                areas = store.area_count(),
                age_group_rows = store.age_group_count(),
                "data loaded"
            );

            server::start_server(app_config, Arc::new(store)).await?;
        }
        Commands::Query { config, selection } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let store = data::load_store(&app_config)?;

            let response = run_query(&store, selection)?;
            if response.aggregate().is_some_and(|groups| groups.is_all_null()) {
                warn!("no age-group rows matched the query");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
