use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use strum::IntoEnumIterator;
use tracing::{error, info};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qr_processor::{
    args::Args,
    database::{db::DbClient, store::OutcomeStore},
    model::{rating_service::RatingService, structures::entity_class::EntityClass}
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_tracing(&args.log_level);

    let client = Arc::new(
        DbClient::connect(&args.connection_string)
            .await
            .expect("Expected valid database connection")
    );

    let service = RatingService::new(client.clone(), client.clone(), args.rating_config());

    // The leaderboard starts empty each process; seed it before serving
    // rank queries or applying updates
    for class in EntityClass::iter() {
        service
            .rebuild_leaderboard(class)
            .await
            .expect("Expected leaderboard rebuild to succeed");
    }

    if args.full_recompute {
        let summary = service
            .run_periodic_recompute()
            .await
            .expect("Expected periodic recompute to succeed");
        info!(
            "Updated {} entities ({} outcomes) in {}ms",
            summary.entities_updated, summary.outcomes_processed, summary.duration_ms
        );
    } else {
        let pending = client
            .list_unprocessed(Utc::now().fixed_offset())
            .await
            .expect("Expected pending outcomes to load");
        info!("Processing {} pending outcomes", pending.len());

        for outcome in pending {
            if let Err(e) = service.apply_match_outcome(&outcome).await {
                error!("Failed to apply outcome {}: {}", outcome.id, e);
            }
        }
    }
}

fn init_tracing(log_level: &str) {
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}
