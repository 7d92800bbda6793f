//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small catalogue and test the full
//! crawl cycle end-to-end against an in-memory store.

use shelfscan::config::{parse_config, Config};
use shelfscan::crawler::{
    crawl, Coordinator, CrawlController, CrawlState, StartMode, Termination,
    LISTING_CHECKPOINT_KEY,
};
use shelfscan::storage::{lock, open_storage, shared, SharedStorage, SqliteStorage, Storage};
use shelfscan::{ChangeEvent, ShelfError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(server_uri: &str, db_path: &str) -> Config {
    parse_config(&format!(
        r#"
        [crawler]
        start-url = "{}/"
        concurrency = 4
        retry-attempts = 2
        retry-backoff-ms = 10
        request-timeout-secs = 5

        [user-agent]
        value = "ShelfscanTest/1.0"

        [storage]
        database-path = "{}"
        "#,
        server_uri, db_path
    ))
    .expect("test config should be valid")
}

fn create_coordinator(server: &MockServer) -> (Arc<Coordinator>, SharedStorage) {
    let config = create_test_config(&server.uri(), ":memory:");
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let coordinator = Coordinator::new(&config, storage.clone()).unwrap();
    (Arc::new(coordinator), storage)
}

fn listing_html(links: &[&str], next: Option<&str>) -> String {
    let books: String = links
        .iter()
        .map(|href| {
            format!(
                r#"<li><article class="product_pod"><h3><a href="{}">book</a></h3></article></li>"#,
                href
            )
        })
        .collect();
    let pager = next
        .map(|href| format!(r#"<ul class="pager"><li class="next"><a href="{}">next</a></li></ul>"#, href))
        .unwrap_or_default();

    format!(
        "<html><body><section><ol class=\"row\">{}</ol></section>{}</body></html>",
        books, pager
    )
}

fn detail_html(name: &str, price: &str) -> String {
    format!(
        r#"<html><body>
        <ul class="breadcrumb"><li><a>Home</a></li><li><a>Books</a></li><li><a>Poetry</a></li></ul>
        <div class="product_main"><h1>{name}</h1>
            <p class="instock availability">In stock (3 available)</p>
            <p class="star-rating Four"></p>
        </div>
        <table class="table table-striped">
            <tr><th>Price (excl. tax)</th><td>£{price}</td></tr>
            <tr><th>Price (incl. tax)</th><td>£{price}</td></tr>
            <tr><th>Number of reviews</th><td>0</td></tr>
        </table>
        </body></html>"#
    )
}

async fn mount_page(server: &MockServer, page: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serves page-1 with two books and no next page
async fn mount_two_book_catalogue(server: &MockServer) {
    mount_page(
        server,
        "/catalogue/page-1.html",
        listing_html(&["book-a_1/index.html", "book-b_2/index.html"], None),
    )
    .await;
    mount_page(
        server,
        "/catalogue/book-a_1/index.html",
        detail_html("Book A", "10.00"),
    )
    .await;
    mount_page(
        server,
        "/catalogue/book-b_2/index.html",
        detail_html("Book B", "20.00"),
    )
    .await;
}

#[tokio::test]
async fn test_first_crawl_inserts_every_book() {
    let server = MockServer::start().await;
    mount_two_book_catalogue(&server).await;
    let (coordinator, storage) = create_coordinator(&server);

    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.pages_processed, 1);
    assert_eq!(report.visited, 2);
    assert_eq!(report.events.len(), 2);
    assert!(report.events.iter().all(ChangeEvent::is_new));

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_books().unwrap(), 2);
    assert_eq!(store.count_snapshots().unwrap(), 2);
    assert_eq!(store.count_history().unwrap(), 0);

    let book_a = store
        .find_book_by_url(&format!("{}/catalogue/book-a_1/index.html", server.uri()))
        .unwrap()
        .expect("book A should be stored");
    assert_eq!(book_a.name(), "Book A");
    assert_eq!(book_a.book.price.including_tax, 10.0);
    assert_eq!(book_a.book.category.as_deref(), Some("Poetry"));
    assert_eq!(book_a.book.rating, Some(4));

    let checkpoint = store.load_checkpoint(LISTING_CHECKPOINT_KEY).unwrap().unwrap();
    assert_eq!(checkpoint.value, None);
}

#[tokio::test]
async fn test_recrawl_of_unchanged_pages_only_archives() {
    let server = MockServer::start().await;
    mount_two_book_catalogue(&server).await;
    let (coordinator, storage) = create_coordinator(&server);

    coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();
    let before = lock(&storage)
        .unwrap()
        .list_books(&Default::default())
        .unwrap();

    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert!(report.events.is_empty());

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_snapshots().unwrap(), 4);
    assert_eq!(store.count_history().unwrap(), 0);
    assert_eq!(store.list_books(&Default::default()).unwrap(), before);
}

#[tokio::test]
async fn test_price_change_is_recorded_in_history() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/catalogue/page-1.html",
        listing_html(&["book-a_1/index.html"], None),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/book-a_1/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("Book A", "10.00")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/catalogue/book-a_1/index.html",
        detail_html("Book A", "12.50"),
    )
    .await;

    let (coordinator, storage) = create_coordinator(&server);

    let first = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();
    let original = first.events[0].book().clone();

    let second = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.events.len(), 1);
    match &second.events[0] {
        ChangeEvent::Updated { book, previous } => {
            assert_eq!(previous, &original);
            assert_eq!(book.book.price.including_tax, 12.5);
            assert!(book.has_changed);
        }
        other => panic!("expected an update, got {:?}", other),
    }

    let store = lock(&storage).unwrap();
    let history = store.history_for_book(original.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous, original);

    let live = store.get_book(original.id).unwrap();
    assert_eq!(live.book.price.including_tax, 12.5);
    assert_eq!(store.count_books().unwrap(), 1);
}

#[tokio::test]
async fn test_pagination_and_duplicate_links() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/catalogue/page-1.html",
        listing_html(&["a_1/index.html", "b_2/index.html"], Some("page-2.html")),
    )
    .await;
    mount_page(
        &server,
        "/catalogue/page-2.html",
        listing_html(&["b_2/index.html", "c_3/index.html"], None),
    )
    .await;
    for (slug, name) in [("a_1", "A"), ("c_3", "C")] {
        mount_page(
            &server,
            &format!("/catalogue/{}/index.html", slug),
            detail_html(name, "5.00"),
        )
        .await;
    }
    Mock::given(method("GET"))
        .and(path("/catalogue/b_2/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("B", "5.00")))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, storage) = create_coordinator(&server);
    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.pages_processed, 2);
    assert_eq!(report.visited, 3);
    assert_eq!(report.events.len(), 3);
    assert_eq!(coordinator.status().visited_count, 3);

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_books().unwrap(), 3);
    assert_eq!(
        store
            .load_checkpoint(LISTING_CHECKPOINT_KEY)
            .unwrap()
            .unwrap()
            .value,
        None
    );
}

#[tokio::test]
async fn test_listing_cycle_ends_traversal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_html(&["a_1/index.html"], Some("page-2.html"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_html(&["b_2/index.html"], Some("page-1.html"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/catalogue/a_1/index.html", detail_html("A", "1.00")).await;
    mount_page(&server, "/catalogue/b_2/index.html", detail_html("B", "2.00")).await;

    let (coordinator, storage) = create_coordinator(&server);
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.run(StartMode::Fresh, CancellationToken::new()),
    )
    .await
    .expect("a listing cycle must not keep the run alive")
    .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.pages_processed, 2);
    assert_eq!(report.events.len(), 2);

    let checkpoint = lock(&storage)
        .unwrap()
        .load_checkpoint(LISTING_CHECKPOINT_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.value, None);
}

#[tokio::test]
async fn test_resume_from_saved_checkpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/catalogue/page-2.html",
        listing_html(&["c_3/index.html"], None),
    )
    .await;
    mount_page(&server, "/catalogue/c_3/index.html", detail_html("C", "3.00")).await;

    let (coordinator, storage) = create_coordinator(&server);
    lock(&storage)
        .unwrap()
        .save_checkpoint(
            LISTING_CHECKPOINT_KEY,
            Some(&format!("{}/catalogue/page-2.html", server.uri())),
        )
        .unwrap();

    let report = coordinator
        .run(StartMode::Resume, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.pages_processed, 1);
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].book().name(), "C");
}

#[tokio::test]
async fn test_resume_of_finished_traversal_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (coordinator, storage) = create_coordinator(&server);
    lock(&storage)
        .unwrap()
        .save_checkpoint(LISTING_CHECKPOINT_KEY, None)
        .unwrap();

    let report = coordinator
        .run(StartMode::Resume, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.termination, Termination::AlreadyFinished);
}

#[tokio::test]
async fn test_stop_finishes_current_page_then_ends() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_html(&["a_1/index.html"], Some("page-2.html")))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/catalogue/a_1/index.html", detail_html("A", "1.00")).await;

    let (coordinator, storage) = create_coordinator(&server);
    let controller = CrawlController::new(coordinator);

    controller.start(StartMode::Auto).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(controller.stop());
    let status = controller.status();
    assert_eq!(status.state, CrawlState::Stopping);
    assert!(status.running);

    let report = controller.wait().await.unwrap().unwrap();
    assert_eq!(report.termination, Termination::Stopped);
    assert_eq!(report.pages_processed, 1);
    assert_eq!(report.events.len(), 1);
    assert_eq!(controller.status().state, CrawlState::Stopped);

    let checkpoint = lock(&storage)
        .unwrap()
        .load_checkpoint(LISTING_CHECKPOINT_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(
        checkpoint.value,
        Some(format!("{}/catalogue/page-2.html", server.uri()))
    );
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_html(&[], None))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let (coordinator, _) = create_coordinator(&server);
    let controller = CrawlController::new(coordinator.clone());

    controller.start(StartMode::Auto).unwrap();
    assert!(matches!(
        controller.start(StartMode::Auto),
        Err(ShelfError::AlreadyRunning)
    ));
    assert!(matches!(
        coordinator.run(StartMode::Auto, CancellationToken::new()).await,
        Err(ShelfError::AlreadyRunning)
    ));

    controller.wait().await.unwrap();
    assert!(!controller.status().running);
}

#[tokio::test]
async fn test_unavailable_listing_ends_run_softly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let (coordinator, storage) = create_coordinator(&server);
    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.termination,
        Termination::ListingUnavailable {
            url: format!("{}/catalogue/page-1.html", server.uri())
        }
    );
    assert_eq!(report.pages_processed, 0);

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_books().unwrap(), 0);
    assert!(store.load_checkpoint(LISTING_CHECKPOINT_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_unparseable_listing_keeps_earlier_events() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/catalogue/page-1.html",
        listing_html(&["a_1/index.html"], Some("page-2.html")),
    )
    .await;
    mount_page(
        &server,
        "/catalogue/page-2.html",
        "<html><body><h1>Down for maintenance</h1></body></html>".to_string(),
    )
    .await;
    mount_page(&server, "/catalogue/a_1/index.html", detail_html("A", "1.00")).await;

    let (coordinator, _) = create_coordinator(&server);
    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        report.termination,
        Termination::ListingParseFailed { .. }
    ));
    assert_eq!(report.pages_processed, 1);
    assert_eq!(report.events.len(), 1);
}

#[tokio::test]
async fn test_failing_books_are_skipped() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/catalogue/page-1.html",
        listing_html(
            &["good_1/index.html", "gone_2/index.html", "blank_3/index.html"],
            None,
        ),
    )
    .await;
    mount_page(&server, "/catalogue/good_1/index.html", detail_html("Good", "2.00")).await;
    Mock::given(method("GET"))
        .and(path("/catalogue/gone_2/index.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/catalogue/blank_3/index.html",
        "<html><body><p>no title</p></body></html>".to_string(),
    )
    .await;

    let (coordinator, storage) = create_coordinator(&server);
    let report = coordinator
        .run(StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.visited, 3);
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].book().name(), "Good");

    let store = lock(&storage).unwrap();
    assert_eq!(store.count_books().unwrap(), 1);
    // The unparseable page was fetched but never reached the upsert engine
    assert_eq!(store.count_snapshots().unwrap(), 1);
}

#[tokio::test]
async fn test_crawl_persists_to_database_file() {
    let server = MockServer::start().await;
    mount_two_book_catalogue(&server).await;

    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("books.db");
    let config = create_test_config(&server.uri(), db_path.to_str().unwrap());

    let report = crawl(&config, StartMode::Auto, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.events.len(), 2);

    let storage = open_storage(&db_path).unwrap();
    assert_eq!(storage.count_books().unwrap(), 2);
    assert_eq!(storage.count_snapshots().unwrap(), 2);
}
