//! End-to-end tests of the client against a scripted in-memory RES server
//!
//! Each test drives the [`MemoryPeer`] by hand: it reads the requests the client
//! sends, answers them and pushes events, then checks the callbacks, the cache
//! and the connection state.

mod harness;

use harness::*;
use resgate::prelude::*;

// =============================================================================
// Collections
// =============================================================================

#[tokio::test]
async fn test_collection_events_keep_local_mirror() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let (on_initial, on_added, on_removed) = (log.clone(), log.clone(), log.clone());
    let callbacks = CollectionCallbacks::<Book>::new()
        .on_initial(move |books| {
            let titles: Vec<String> = books.into_iter().map(|b| b.title).collect();
            on_initial.push(format!("initial {}", titles.join(",")));
        })
        .on_added(move |idx, book| on_added.push(format!("added {} {}", idx, book.title)))
        .on_removed(move |idx| on_removed.push(format!("removed {}", idx)));

    let (books, _) = tokio::join!(
        t.client.subscribe_collection("library.books", callbacks),
        async {
            let request = t.expect_request("subscribe.library.books").await;
            t.peer.respond(
                request.id,
                json!({
                    "models": {"library.book.1": {"title": "A", "author": "X"}},
                    "collections": {"library.books": [{"rid": "library.book.1"}]}
                }),
            );
        }
    );
    let books = books.unwrap();
    assert_eq!(books.rid(), "library.books");
    assert_eq!(log.entries(), vec!["initial A"]);

    t.peer.event(
        "library.books",
        "add",
        json!({"idx": 0, "value": {"title": "B", "author": "Y"}}),
    );
    eventually(|| log.count("added") == 1).await;
    assert_eq!(log.entries()[1], "added 0 B");

    let mirror: Vec<Book> = t.client.cached_collection("library.books").unwrap();
    assert_eq!(mirror, vec![Book::new("B", "Y"), Book::new("A", "X")]);

    t.peer.event("library.books", "remove", json!({"idx": 1}));
    eventually(|| log.count("removed") == 1).await;
    assert_eq!(log.entries()[2], "removed 1");

    let mirror: Vec<Book> = t.client.cached_collection("library.books").unwrap();
    assert_eq!(mirror, vec![Book::new("B", "Y")]);
}

#[tokio::test]
async fn test_added_reference_is_resolved_with_event_models() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let on_added = log.clone();
    let callbacks = CollectionCallbacks::<Book>::new()
        .on_added(move |idx, book| on_added.push(format!("added {} {}", idx, book.author)));

    let (_books, _) = tokio::join!(
        t.client.subscribe_collection("library.books", callbacks),
        async {
            let request = t.expect_request("subscribe.library.books").await;
            t.peer
                .respond(request.id, json!({"collections": {"library.books": []}}));
        }
    );

    t.peer.event(
        "library.books",
        "add",
        json!({
            "idx": 0,
            "value": {"rid": "library.book.2"},
            "models": {"library.book.2": {"title": "B", "author": "Y"}}
        }),
    );
    eventually(|| log.count("added") == 1).await;
    assert_eq!(log.entries(), vec!["added 0 Y"]);

    let book: Option<Book> = t.client.cached_model("library.book.2").unwrap();
    assert_eq!(book, Some(Book::new("B", "Y")));
}

// =============================================================================
// Models and propagation
// =============================================================================

#[tokio::test]
async fn test_change_of_referenced_model_reaches_parent() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let (on_initial, on_changed) = (log.clone(), log.clone());
    let callbacks = ModelCallbacks::<Value>::new()
        .on_initial(move |view| on_initial.push(format!("initial {}", view["author"]["name"])))
        .on_changed(move |view| {
            on_changed.push(format!(
                "changed {} {}",
                view["title"].as_str().unwrap_or_default(),
                view["author"]["name"].as_str().unwrap_or_default()
            ))
        });

    let (_book, _) = tokio::join!(
        t.client.subscribe_model("library.book.1", callbacks),
        async {
            let request = t.expect_request("subscribe.library.book.1").await;
            t.peer.respond(
                request.id,
                json!({
                    "models": {
                        "library.book.1": {"title": "A", "author": {"rid": "library.author.1"}},
                        "library.author.1": {"name": "X"}
                    }
                }),
            );
        }
    );
    assert_eq!(log.entries(), vec![r#"initial "X""#]);

    t.peer
        .event("library.author.1", "change", json!({"values": {"name": "Z"}}));
    eventually(|| log.count("changed") == 1).await;
    assert_eq!(log.entries()[1], "changed A Z");

    t.peer
        .event("library.book.1", "change", json!({"values": {"title": "B"}}));
    eventually(|| log.count("changed") == 2).await;
    assert_eq!(log.entries()[2], "changed B Z");
}

#[tokio::test]
async fn test_second_handle_shares_server_subscription() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let first_log = log.clone();
    let (first, _) = tokio::join!(
        t.client.subscribe_model(
            "library.book.1",
            ModelCallbacks::<Book>::new()
                .on_initial(move |book| first_log.push(format!("first {}", book.title))),
        ),
        async {
            let request = t.expect_request("subscribe.library.book.1").await;
            t.peer.respond(request.id, book_result(1, "A", "X"));
        }
    );
    let first = first.unwrap();

    let second_log = log.clone();
    let second = t
        .client
        .subscribe_model(
            "library.book.1",
            ModelCallbacks::<Book>::new()
                .on_initial(move |book| second_log.push(format!("second {}", book.title))),
        )
        .await
        .unwrap();
    t.expect_silence().await;
    assert_eq!(log.entries(), vec!["first A", "second A"]);

    first.dispose();
    t.expect_silence().await;

    second.dispose();
    let request = t.expect_request("unsubscribe.library.book.1").await;
    t.peer.respond(request.id, Value::Null);
    t.expect_silence().await;

    assert!(first.is_disposed());
    assert!(second.is_disposed());
}

#[tokio::test]
async fn test_dropping_handle_unsubscribes() {
    let t = client_with_peer();
    t.connect().await;

    let (book, _) = tokio::join!(
        t.client
            .subscribe_model("library.book.1", ModelCallbacks::<Book>::new()),
        async {
            let request = t.expect_request("subscribe.library.book.1").await;
            t.peer.respond(request.id, book_result(1, "A", "X"));
        }
    );

    drop(book);
    let request = t.expect_request("unsubscribe.library.book.1").await;
    t.peer.respond(request.id, Value::Null);
}

// =============================================================================
// Offline handles
// =============================================================================

#[tokio::test]
async fn test_subscription_made_offline_is_sent_on_connect() {
    let t = client_with_peer();

    let log = Log::default();
    let on_initial = log.clone();
    let book = t
        .client
        .subscribe_model(
            "library.book.1",
            ModelCallbacks::<Book>::new().on_initial(move |book| on_initial.push(book.title)),
        )
        .await
        .unwrap();
    assert_eq!(t.client.state(), ConnectionState::Disconnected);
    assert!(log.entries().is_empty());

    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
    let request = t.expect_request("subscribe.library.book.1").await;
    assert_eq!(request.id, 2);
    t.peer.respond(request.id, book_result(1, "A", "X"));

    within(t.client.connected()).await.unwrap();
    assert_eq!(log.entries(), vec!["A"]);
    assert!(!book.is_disposed());
}

#[tokio::test]
async fn test_dispose_while_offline_sends_nothing() {
    let t = client_with_peer();

    let book = t
        .client
        .subscribe_model("library.book.1", ModelCallbacks::<Book>::new())
        .await
        .unwrap();
    book.dispose();
    book.dispose();
    t.expect_silence().await;

    t.connect().await;
    t.expect_silence().await;
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test]
async fn test_resync_delivers_one_initial_per_rid() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let (book_log, books_log) = (log.clone(), log.clone());

    let (_book, _) = tokio::join!(
        t.client.subscribe_model(
            "library.book.1",
            ModelCallbacks::<Book>::new().on_initial(move |_| book_log.push("book initial")),
        ),
        async {
            let request = t.expect_request("subscribe.library.book.1").await;
            t.peer.respond(request.id, book_result(1, "A", "X"));
        }
    );
    let (_books, _) = tokio::join!(
        t.client.subscribe_collection(
            "library.books",
            CollectionCallbacks::<Book>::new().on_initial(move |_| books_log.push("books initial")),
        ),
        async {
            let request = t.expect_request("subscribe.library.books").await;
            t.peer.respond(
                request.id,
                json!({"collections": {"library.books": [{"rid": "library.book.1"}]}}),
            );
        }
    );
    assert_eq!(log.entries(), vec!["book initial", "books initial"]);

    let mut events = t.client.events();
    t.peer.disconnect();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::ConnectionLost)).await;
    assert_eq!(t.client.state(), ConnectionState::Disconnected);

    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();

    let request = t.expect_request("subscribe.library.book.1").await;
    t.peer.respond(request.id, book_result(1, "A2", "X"));
    let request = t.expect_request("subscribe.library.books").await;
    t.peer.respond(
        request.id,
        json!({
            "models": {"library.book.1": {"title": "A2", "author": "X"}},
            "collections": {"library.books": [{"rid": "library.book.1"}]}
        }),
    );

    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    assert_eq!(t.client.state(), ConnectionState::Connected);
    assert_eq!(log.count("book initial"), 2);
    assert_eq!(log.count("books initial"), 2);
    t.expect_silence().await;

    let book: Option<Book> = t.client.cached_model("library.book.1").unwrap();
    assert_eq!(book, Some(Book::new("A2", "X")));
}

#[tokio::test]
async fn test_reconnect_hook_runs_before_resubscribe() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let hook_log = log.clone();
    let (hook, _) = tokio::join!(
        t.client.auth_action(
            move |session: Session| {
                let log = hook_log.clone();
                async move {
                    log.push("hook");
                    session
                        .auth("usersession", "login", json!({"token": "secret"}))
                        .await
                }
                .boxed()
            },
            true,
        ),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            assert_eq!(request.params, Some(json!({"token": "secret"})));
            t.peer.respond(request.id, Value::Null);
        }
    );
    let hook = hook.unwrap();
    assert_eq!(log.count("hook"), 1);

    let (_book, _) = tokio::join!(
        t.client
            .subscribe_model("library.book.1", ModelCallbacks::<Book>::new()),
        async {
            let request = t.expect_request("subscribe.library.book.1").await;
            t.peer.respond(request.id, book_result(1, "A", "X"));
        }
    );

    let mut events = t.client.events();
    t.peer.disconnect();
    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();

    let request = t.expect_request("auth.usersession.login").await;
    t.peer.respond(request.id, Value::Null);
    let request = t.expect_request("subscribe.library.book.1").await;
    t.peer.respond(request.id, book_result(1, "A", "X"));
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    assert_eq!(log.count("hook"), 2);

    hook.dispose();
    t.peer.disconnect();
    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();

    let request = t.expect_request("subscribe.library.book.1").await;
    t.peer.respond(request.id, book_result(1, "A", "X"));
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    assert_eq!(log.count("hook"), 2);
}

#[tokio::test]
async fn test_auth_action_registered_offline_runs_once() {
    let t = client_with_peer();

    let log = Log::default();
    let hook_log = log.clone();
    let (hook, _) = tokio::join!(
        t.client.auth_action(
            move |session: Session| {
                let log = hook_log.clone();
                async move {
                    log.push("login");
                    session
                        .auth("usersession", "login", json!({"token": "secret"}))
                        .await
                }
                .boxed()
            },
            true,
        ),
        async {
            t.expect_silence().await;
            t.peer.connect();
            t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
            let request = t.expect_request("auth.usersession.login").await;
            t.peer.respond(request.id, Value::Null);
            t.expect_silence().await;
        }
    );
    let _hook = hook.unwrap();
    assert_eq!(log.count("login"), 1);
    assert_eq!(t.client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_auth_action_with_separate_reauth() {
    let t = client_with_peer();
    t.connect().await;

    let (hook, _) = tokio::join!(
        t.client.auth_action_with(
            |session: Session| {
                async move {
                    session
                        .auth("usersession", "login", json!({"password": "pw"}))
                        .await
                }
                .boxed()
            },
            |session: Session| {
                async move {
                    session
                        .auth("usersession", "relogin", json!({"token": "t"}))
                        .await
                }
                .boxed()
            },
        ),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            t.peer.respond(request.id, Value::Null);
        }
    );
    let hook = hook.unwrap();
    t.expect_silence().await;

    let mut events = t.client.events();
    t.peer.disconnect();
    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
    let request = t.expect_request("auth.usersession.relogin").await;
    t.peer.respond(request.id, Value::Null);
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;

    hook.dispose();
    t.peer.disconnect();
    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    t.expect_silence().await;
}

#[tokio::test]
async fn test_failed_initial_auth_registers_nothing() {
    let t = client_with_peer();
    t.connect().await;

    let (hook, _) = tokio::join!(
        t.client.auth_action_with(
            |session: Session| {
                async move { session.auth("usersession", "login", Value::Null).await }.boxed()
            },
            |session: Session| {
                async move { session.auth("usersession", "relogin", Value::Null).await }.boxed()
            },
        ),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            t.peer
                .respond_error(request.id, "system.accessDenied", "Wrong password");
        }
    );
    match hook {
        Err(ResError::Remote(err)) => assert_eq!(err.code, "system.accessDenied"),
        other => panic!("expected access denied, got {:?}", other),
    }

    let mut events = t.client.events();
    t.peer.disconnect();
    t.peer.connect();
    t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    t.expect_silence().await;
}

// =============================================================================
// get
// =============================================================================

#[tokio::test]
async fn test_get_does_not_subscribe() {
    let t = client_with_peer();
    t.connect().await;

    let (book, _) = tokio::join!(t.client.get_model::<Book>("library.book.1"), async {
        let request = t.expect_request("get.library.book.1").await;
        t.peer.respond(request.id, book_result(1, "A", "X"));
    });
    assert_eq!(book.unwrap(), Some(Book::new("A", "X")));
    t.expect_silence().await;

    let (books, _) = tokio::join!(t.client.get_collection::<Book>("library.books"), async {
        let request = t.expect_request("get.library.books").await;
        t.peer.respond(
            request.id,
            json!({
                "models": {"library.book.2": {"title": "B", "author": "Y"}},
                "collections": {"library.books": [{"rid": "library.book.1"}, {"rid": "library.book.2"}]}
            }),
        );
    });
    assert_eq!(
        books.unwrap(),
        vec![Book::new("A", "X"), Book::new("B", "Y")]
    );
}

#[tokio::test]
async fn test_get_waits_for_connection() {
    let t = client_with_peer();

    let (book, _) = tokio::join!(t.client.get_model::<Book>("library.book.1"), async {
        t.expect_silence().await;
        t.peer.connect();
        t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
        let request = t.expect_request("get.library.book.1").await;
        t.peer.respond(request.id, book_result(1, "A", "X"));
    });
    assert_eq!(book.unwrap(), Some(Book::new("A", "X")));
}

#[tokio::test]
async fn test_get_retries_after_timeout() {
    let t = client_with_timeout(std::time::Duration::from_millis(150));
    t.connect().await;

    let (book, _) = tokio::join!(t.client.get_model::<Book>("library.book.1"), async {
        let first = t.expect_request("get.library.book.1").await;
        let second = t.expect_request("get.library.book.1").await;
        assert_ne!(first.id, second.id);
        t.peer.respond(second.id, book_result(1, "A", "X"));
    });
    assert_eq!(book.unwrap(), Some(Book::new("A", "X")));
}

#[tokio::test]
async fn test_get_retries_across_reconnection() {
    let t = client_with_peer();
    t.connect().await;

    let (book, _) = tokio::join!(t.client.get_model::<Book>("library.book.1"), async {
        t.expect_request("get.library.book.1").await;
        t.peer.disconnect();
        t.peer.connect();
        t.peer.accept_handshake(SERVER_VERSION).await.unwrap();
        let request = t.expect_request("get.library.book.1").await;
        t.peer.respond(request.id, book_result(1, "A", "X"));
    });
    assert_eq!(book.unwrap(), Some(Book::new("A", "X")));
}

// =============================================================================
// call / auth
// =============================================================================

#[derive(Debug, Deserialize, PartialEq)]
struct Count {
    count: u32,
}

#[tokio::test]
async fn test_call_merges_and_releases_produced_resource() {
    let t = client_with_peer();
    t.connect().await;

    let (result, _) = tokio::join!(
        t.client
            .call("library.books", "new", json!({"title": "C", "author": "Z"})),
        async {
            let request = t.expect_request("call.library.books.new").await;
            assert_eq!(request.params, Some(json!({"title": "C", "author": "Z"})));
            t.peer.respond(
                request.id,
                json!({
                    "rid": "library.book.3",
                    "models": {"library.book.3": {"title": "C", "author": "Z"}}
                }),
            );
        }
    );
    result.unwrap();

    let request = t.expect_request("unsubscribe.library.book.3").await;
    t.peer.respond(request.id, Value::Null);

    let book: Option<Book> = t.client.cached_model("library.book.3").unwrap();
    assert_eq!(book, Some(Book::new("C", "Z")));
}

#[tokio::test]
async fn test_call_for_model_keeps_produced_resource() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let on_initial = log.clone();
    let (handle, _) = tokio::join!(
        t.client.call_for_model(
            "library.books",
            "new",
            json!({"title": "D", "author": "W"}),
            ModelCallbacks::<Book>::new().on_initial(move |book| on_initial.push(book.title)),
        ),
        async {
            let request = t.expect_request("call.library.books.new").await;
            t.peer.respond(
                request.id,
                json!({
                    "rid": "library.book.4",
                    "models": {"library.book.4": {"title": "D", "author": "W"}}
                }),
            );
        }
    );
    let handle = handle.unwrap().expect("produced resource");
    assert_eq!(handle.rid(), "library.book.4");
    assert_eq!(log.entries(), vec!["D"]);
    t.expect_silence().await;

    handle.dispose();
    t.expect_request("unsubscribe.library.book.4").await;
}

#[tokio::test]
async fn test_call_for_model_without_resource() {
    let t = client_with_peer();
    t.connect().await;

    let (handle, _) = tokio::join!(
        t.client.call_for_model(
            "library.book.1",
            "touch",
            (),
            ModelCallbacks::<Book>::new(),
        ),
        async {
            let request = t.expect_request("call.library.book.1.touch").await;
            assert_eq!(request.params, None);
            t.peer.respond(request.id, Value::Null);
        }
    );
    assert!(handle.unwrap().is_none());
    t.expect_silence().await;
}

#[tokio::test]
async fn test_call_and_auth_payloads() {
    let t = client_with_peer();
    t.connect().await;

    let (count, _) = tokio::join!(
        t.client.call_for_payload::<Count>("library.books", "count", ()),
        async {
            let request = t.expect_request("call.library.books.count").await;
            t.peer.respond(request.id, json!({"payload": {"count": 3}}));
        }
    );
    assert_eq!(count.unwrap(), Count { count: 3 });

    let (raw, _) = tokio::join!(
        t.client
            .auth_for_raw_payload("usersession", "login", json!({"user": "ada"})),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            t.peer
                .respond(request.id, json!({"payload": {"token": "abc"}}));
        }
    );
    assert_eq!(raw.unwrap(), json!({"token": "abc"}));

    let (raw, _) = tokio::join!(
        t.client.call_for_raw_payload("library.books", "ping", ()),
        async {
            let request = t.expect_request("call.library.books.ping").await;
            t.peer.respond(request.id, Value::Null);
        }
    );
    assert_eq!(raw.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_string_payloads_are_compact_json() {
    let t = client_with_peer();
    t.connect().await;

    let (text, _) = tokio::join!(
        t.client.call_for_string_payload("library.books", "count", ()),
        async {
            let request = t.expect_request("call.library.books.count").await;
            t.peer
                .respond(request.id, json!({"payload": {"count": 3, "shelves": [1, 2]}}));
        }
    );
    assert_eq!(text.unwrap(), r#"{"count":3,"shelves":[1,2]}"#);

    let (text, _) = tokio::join!(
        t.client
            .auth_for_string_payload("usersession", "login", json!({"user": "ada"})),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            t.peer.respond(request.id, json!({"payload": "abc"}));
        }
    );
    assert_eq!(text.unwrap(), r#""abc""#);

    let (text, _) = tokio::join!(
        t.client.call_for_string_payload("library.books", "ping", ()),
        async {
            let request = t.expect_request("call.library.books.ping").await;
            t.peer.respond(request.id, Value::Null);
        }
    );
    assert_eq!(text.unwrap(), "null");
}

#[tokio::test]
async fn test_auth_for_collection_registers_handle() {
    let t = client_with_peer();
    t.connect().await;

    let log = Log::default();
    let on_initial = log.clone();
    let (handle, _) = tokio::join!(
        t.client.auth_for_collection(
            "usersession",
            "login",
            json!({"token": "t"}),
            CollectionCallbacks::<String>::new()
                .on_initial(move |roles| on_initial.push(roles.join(","))),
        ),
        async {
            let request = t.expect_request("auth.usersession.login").await;
            t.peer.respond(
                request.id,
                json!({
                    "rid": "usersession.roles",
                    "collections": {"usersession.roles": ["reader", "admin"]}
                }),
            );
        }
    );
    let handle = handle.unwrap().expect("produced resource");
    assert_eq!(handle.kind(), ResourceKind::Collection);
    assert_eq!(log.entries(), vec!["reader,admin"]);
}
