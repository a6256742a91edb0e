// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

use std::time::Duration;

use nostr_fetch_engine::prelude::*;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter("info,nostr_fetch_engine::engine::core=trace")
        .init();

    let pool = RelayPool::default();

    let relays = vec![
        RelayUrl::parse("wss://relay.damus.io")?,
        RelayUrl::parse("wss://nos.lol")?,
        RelayUrl::parse("wss://relay.nostr.band")?,
    ];

    for relay in &relays {
        pool.add_relay(relay.clone(), RelayOptions::default())
            .await?;
    }
    pool.connect(Some(Duration::from_secs(5))).await;

    let engine = Engine::new(pool, EngineOptions::default());

    let keys = Keys::generate();

    let filter = Filter::new().kind(Kind::TextNote).limit(20);
    let outcome = engine
        .fetch(relays.clone(), filter, Some(Duration::from_secs(5)))
        .await?;
    println!(
        "fetched {} notes (all relays reached EOSE: {})",
        outcome.events.len(),
        outcome.all_eose
    );

    let enriched = enrichment::enrich(&engine, relays.clone(), outcome.events, false).await;
    for item in enriched.iter().take(5) {
        let name = item
            .author
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{} by {}: {} reactions, {} replies",
            item.event.id, name, item.reactions.total, item.reply_count
        );
    }

    let relay_list = engine.fetch_relay_list(keys.public_key(), relays).await;
    println!("relay list for generated key: {relay_list:?}");

    Ok(())
}
