//! notifeed-recount: Recompute denormalized unseen counts
//!
//! Recounts the visible window of each given user's feed under the feed
//! lock, rewriting and publishing the count where it drifted.
//!
//! ## Usage
//! ```text
//! notifeed-recount <user_id>...
//! ```
//!
//! ## Configuration
//! - NOTIFEED_CONFIG: Path to a YAML config file (optional)
//! - NOTIFEED__STORAGE__TYPE, NOTIFEED__MESSAGING__TYPE, ...: overrides
//! - NOTIFEED_LOG: Log filter (default: info)

use tracing::{error, info};

use notifeed::config::Config;
use notifeed::feed::FeedBackend;
use notifeed::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let user_ids: Vec<String> = std::env::args().skip(1).collect();
    if user_ids.is_empty() {
        eprintln!("usage: notifeed-recount <user_id>...");
        std::process::exit(2);
    }

    let config = Config::load(None)?;
    let backend = FeedBackend::from_config(&config).await?;

    let mut failures = 0usize;
    for user_id in &user_ids {
        match backend.feed(user_id.as_str()).refresh_count().await {
            Ok(count) => {
                info!(user_id = %user_id, count = count, "Count refreshed");
                println!("{}\t{}", user_id, count);
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Count refresh failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} of {} recounts failed", failures, user_ids.len()).into());
    }
    Ok(())
}
