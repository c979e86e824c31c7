//! Prints the stored totals, recent analyses and daily counters.

use dotenv::dotenv;
use std::env;

use sentiment_server::db::SentimentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://sentiment_analysis.db".to_string());
    let days: i64 = match env::args().nth(1) {
        Some(raw) => raw.parse()?,
        None => 7,
    };

    println!("Connecting to: {}", db_url);
    let store = SentimentStore::connect(&db_url, 1).await?;

    let stats = store.stats().await?;
    println!(
        "Totals: {} analyses ({} positive, {} negative, {} neutral)",
        stats.total, stats.positive, stats.negative, stats.neutral
    );

    println!("Recent:");
    for recent in &stats.recent {
        println!(
            "- [{}] {} {:.3} {}",
            recent.timestamp.format("%Y-%m-%d %H:%M:%S"),
            recent.sentiment,
            recent.score,
            recent.text
        );
    }

    println!("Last {} days:", days);
    for day in store.daily_counters(days).await? {
        println!(
            "- {}: {} total, {} positive, {} negative, {} neutral",
            day.date, day.analysis_count, day.positive_count, day.negative_count, day.neutral_count
        );
    }

    store.close().await;
    Ok(())
}
