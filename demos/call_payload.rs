//! Calls against a live RES gateway over WebSocket
//!
//! ```text
//! cargo run --example call_payload -- ws://localhost:8080
//! cargo run --example call_payload -- --settings client.yaml
//! ```
//!
//! Creates a book through `library.books.new`, keeps the produced model under a
//! handle, and asks the service for a typed payload.

use resgate::prelude::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Book {
    title: String,
    author: String,
}

#[derive(Debug, Deserialize)]
struct Stats {
    count: u32,
}

fn load_config() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [flag, path] if flag == "--settings" => ClientSettings::from_yaml_file(path)?.into_config(),
        [uri] => Ok(ClientConfig::for_uri(uri.clone())),
        _ => Ok(ClientConfig::for_uri("ws://localhost:8080")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = load_config()?.with_response_timeout(Duration::from_secs(3));
    let client = Client::new(config);

    println!("🔌 Connecting...");
    tokio::time::timeout(Duration::from_secs(10), client.connected()).await??;
    println!("✅ Connected\n");

    let book = client
        .call_for_model(
            "library.books",
            "new",
            json!({"title": "The Left Hand of Darkness", "author": "Ursula K. Le Guin"}),
            ModelCallbacks::<Book>::new()
                .on_initial(|book| println!("📗 Created {} by {}", book.title, book.author))
                .on_changed(|book| println!("✏️  Now titled {}", book.title)),
        )
        .await?;

    match client
        .call_for_payload::<Stats>("library.books", "stats", ())
        .await
    {
        Ok(stats) => println!("📊 {} books in the library", stats.count),
        Err(ResError::Remote(e)) => println!("⚠️  stats unavailable: {} ({})", e.message, e.code),
        Err(e) => return Err(e.into()),
    }

    if let Some(handle) = book {
        println!("\n👀 Watching {} for 5s", handle.rid());
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.dispose();
    }

    client.close();
    Ok(())
}
