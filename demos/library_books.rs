//! Library demo: keep a local list of books in sync with a collection
//!
//! A scripted in-memory server answers the subscription and then adds and removes
//! books. Run with `RUST_LOG=resgate=debug` to see the client's logs.

use resgate::prelude::*;
use resgate::protocol::message::RequestFrame;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
struct Book {
    title: String,
    author: String,
}

/// Answer every request the way a small library service would
async fn serve(peer: MemoryPeer) {
    peer.connect();
    peer.accept_handshake("1.2.0").await;

    while let Some(request) = peer.next_request_within(Duration::from_secs(5)).await {
        answer(&peer, &request);
        if request.method == "subscribe.library.books" {
            tokio::time::sleep(Duration::from_millis(100)).await;
            peer.event(
                "library.books",
                "add",
                json!({
                    "idx": 0,
                    "value": {"rid": "library.book.3"},
                    "models": {"library.book.3": {"title": "Dune", "author": "Frank Herbert"}}
                }),
            );
            peer.event("library.book.1", "change", json!({"values": {"title": "Neuromancer (2nd ed.)"}}));
            peer.event("library.books", "remove", json!({"idx": 2}));
        }
    }
}

fn answer(peer: &MemoryPeer, request: &RequestFrame) {
    match request.method.as_str() {
        "subscribe.library.books" => peer.respond(
            request.id,
            json!({
                "models": {
                    "library.book.1": {"title": "Neuromancer", "author": "William Gibson"},
                    "library.book.2": {"title": "Hyperion", "author": "Dan Simmons"}
                },
                "collections": {
                    "library.books": [{"rid": "library.book.1"}, {"rid": "library.book.2"}]
                }
            }),
        ),
        "unsubscribe.library.books" => peer.respond(request.id, Value::Null),
        other => peer.respond_error(request.id, "system.notFound", &format!("No handler for {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("📚 Library books demo\n");

    let (transport, events, peer) = MemoryTransport::pair();
    let client = Client::with_transport(ClientConfig::for_uri("memory://library"), transport, events);
    tokio::spawn(serve(peer));

    // Local mirror maintained from callbacks only
    let shelf: Arc<Mutex<Vec<Book>>> = Arc::default();
    let (on_initial, on_added, on_changed, on_removed) =
        (shelf.clone(), shelf.clone(), shelf.clone(), shelf.clone());

    let books = client
        .subscribe_collection(
            "library.books",
            CollectionCallbacks::<Book>::new()
                .on_initial(move |books| {
                    println!("📋 Initial shelf: {} books", books.len());
                    *on_initial.lock().unwrap() = books;
                })
                .on_added(move |idx, book| {
                    println!("➕ {} by {} at {}", book.title, book.author, idx);
                    on_added.lock().unwrap().insert(idx, book);
                })
                .on_changed(move |idx, book| {
                    println!("✏️  Book {} is now {}", idx, book.title);
                    on_changed.lock().unwrap()[idx] = book;
                })
                .on_removed(move |idx| {
                    let removed = on_removed.lock().unwrap().remove(idx);
                    println!("➖ {} removed", removed.title);
                }),
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("\n📖 Shelf:");
    for book in shelf.lock().unwrap().iter() {
        println!("   - {} ({})", book.title, book.author);
    }

    let cached: Vec<Book> = client.cached_collection("library.books")?;
    println!("\n🗄️  Cache holds {} books", cached.len());

    books.dispose();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();

    Ok(())
}
