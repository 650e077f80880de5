//! Interface tests for the notification feed engine using Cucumber.
//!
//! Scenarios run the engine over the in-memory backends, which record every
//! structural operation and published envelope.
//!
//! ```bash
//! cargo test --test interfaces
//! ```

mod steps;

use cucumber::World;
use steps::notification_feed::NotificationFeedWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running NotificationFeed Interface Tests ===\n");
    NotificationFeedWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/notification_feed.feature")
        .await;
}
