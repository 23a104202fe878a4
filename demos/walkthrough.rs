//! Emitter walkthrough
//!
//! 1. Subscribing named and wildcard listeners.
//! 2. Shaping an event with an operation chain.
//! 3. Debouncing a noisy event.
//! 4. Awaiting a single event with `once`.
//!
//! Run with `RUST_LOG=evpipe=trace` to see the diagnostics.
use evpipe::{CancellationToken, Emitter, Envelope, OnceError, OnceOptions};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Event {
    Search,
    Temperature,
    Ready,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let emitter: Emitter<Event, String> = Emitter::new();

    // 1. Listeners
    emitter.subscribe(Event::Temperature, |reading: &String| {
        println!("[Temperature] {reading}");
    });
    emitter.subscribe_any(|envelope: &Envelope<Event, String>| {
        println!("[Any] {:?} -> {}", envelope.name, envelope.data);
    });

    // 2. Chain: trim, drop empties, annotate
    emitter
        .operations(Event::Temperature)
        .transform(|raw| raw.trim().to_owned())
        .filter(|reading| !reading.is_empty())
        .transform(|reading| format!("{reading} C"))
        .log_labeled("temperature");

    emitter.emit(Event::Temperature, "  21.5 ".to_owned());
    let delivered = emitter.emit(Event::Temperature, "   ".to_owned());
    println!("blank reading delivered: {delivered}");

    // 3. Debounce: only the last keystroke is searched
    emitter.subscribe(Event::Search, |query: &String| {
        println!("[Search] querying for {query:?}");
    });
    emitter
        .operations(Event::Search)
        .debounce(Duration::from_millis(50));

    for query in ["r", "ru", "rus", "rust"] {
        emitter.emit(Event::Search, query.to_owned());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 4. Once, with a timeout and an abort signal
    let ready = emitter.once(
        Event::Ready,
        OnceOptions::new().timeout(Duration::from_millis(200)),
    );
    let producer = emitter.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.emit(Event::Ready, "warmed up".to_owned());
    });
    match ready.await {
        Ok(status) => println!("[Ready] {status}"),
        Err(err) => println!("[Ready] failed: {err}"),
    }

    let shutdown = CancellationToken::new();
    let never = emitter.once(Event::Ready, OnceOptions::new().signal(shutdown.clone()));
    shutdown.cancel();
    assert_eq!(never.await, Err(OnceError::Aborted));

    emitter.remove_all_listeners(None);
    println!("listeners left: {:?}", emitter.active_event_names());
}
