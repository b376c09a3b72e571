//! Re-authentication across reconnects
//!
//! Registers an auth action that runs on every reconnection before subscriptions
//! are replayed, then makes the scripted in-memory server drop the link twice.

use resgate::prelude::*;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Profile {
    name: String,
}

async fn answer_until_idle(peer: &MemoryPeer) {
    while let Some(request) = peer.next_request_within(Duration::from_millis(200)).await {
        println!("   server <- {}", request.method);
        match request.method.as_str() {
            "version" => peer.respond(request.id, json!({"protocol": "1.2.0"})),
            "auth.usersession.login" => peer.respond(request.id, json!({"payload": {"user": "ada"}})),
            "subscribe.usersession.profile" => peer.respond(
                request.id,
                json!({"models": {"usersession.profile": {"name": "Ada"}}}),
            ),
            m if m.starts_with("unsubscribe.") => peer.respond(request.id, Value::Null),
            _ => peer.respond_error(request.id, "system.notFound", "Not found"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🔐 Auth + reconnect demo\n");

    let (transport, events, peer) = MemoryTransport::pair();
    let client = Client::with_transport(ClientConfig::for_uri("memory://auth"), transport, events);

    let mut lifecycle = Box::pin(client.event_stream());
    tokio::spawn(async move {
        while let Some(envelope) = lifecycle.next().await {
            println!("📣 {}", envelope.event.kind());
        }
    });

    peer.connect();
    answer_until_idle(&peer).await;

    let login = client.auth_action(
        |session: Session| {
            async move {
                let user: Value = session
                    .auth_for_payload("usersession", "login", json!({"token": "s3cr3t"}))
                    .await?;
                println!("🔑 Logged in as {}", user["user"]);
                Ok::<(), ResError>(())
            }
            .boxed()
        },
        true,
    );
    let (hook, _) = tokio::join!(login, answer_until_idle(&peer));
    let hook = hook?;

    let profile = client
        .subscribe_model(
            "usersession.profile",
            ModelCallbacks::<Profile>::new().on_initial(|p| println!("👤 Profile: {}", p.name)),
        );
    let (profile, _) = tokio::join!(profile, answer_until_idle(&peer));
    let profile = profile?;

    for round in 1..=2 {
        println!("\n🔌 Dropping the link ({})", round);
        peer.disconnect();
        peer.connect();
        answer_until_idle(&peer).await;
        println!("   state: {:?}", client.state());
    }

    profile.dispose();
    hook.dispose();
    answer_until_idle(&peer).await;
    client.close();

    Ok(())
}
