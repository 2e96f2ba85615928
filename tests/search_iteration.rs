//! One iteration against a mock search service

use std::sync::Arc;
use std::time::{Duration, Instant};

use search_load::executor::build_client;
use search_load::{
    ExecutorConfig, RequestKind, RunRecorder, SearchWorkload, WordList, WordPicker, Workload,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor_config(base_url: String) -> ExecutorConfig {
    ExecutorConfig {
        base_url,
        request_timeout: Duration::from_secs(5),
        ..ExecutorConfig::default()
    }
}

fn workload(words: &[&str], config: ExecutorConfig) -> (SearchWorkload, Arc<RunRecorder>) {
    let words = WordList::new(words.iter().map(|w| w.to_string()).collect()).unwrap();
    let recorder = Arc::new(RunRecorder::new());
    let client = build_client(&config, config.reuse_connections).unwrap();
    let workload =
        SearchWorkload::new(Arc::new(words), Arc::clone(&recorder), config, client).unwrap();
    (workload, recorder)
}

#[tokio::test]
async fn search_for_hello_sends_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "hello"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>results</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let (workload, recorder) = workload(&["hello"], executor_config(server.uri()));
    let outcome = workload
        .run_iteration(&mut WordPicker::for_unit(1, 0))
        .await;

    assert_eq!(outcome.word_index, 0);
    assert_eq!(outcome.failed_requests, 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/search");
    let q: Vec<_> = requests[0].url.query_pairs().collect();
    assert_eq!(q.len(), 1);
    assert_eq!(q[0].0, "q");
    assert_eq!(q[0].1, "hello");

    assert_eq!(recorder.count(RequestKind::Search), 1);
    assert_eq!(recorder.count(RequestKind::Liveness), 0);
    assert_eq!(recorder.body_bytes(RequestKind::Search), 14);
}

#[tokio::test]
async fn reserved_characters_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rock & roll?"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (workload, recorder) = workload(&["rock & roll?"], executor_config(server.uri()));
    workload
        .run_iteration(&mut WordPicker::for_unit(1, 0))
        .await;

    assert_eq!(recorder.failures(RequestKind::Search), 0);
}

#[tokio::test]
async fn liveness_then_pause_then_search() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExecutorConfig {
        liveness: true,
        inter_request_delay: Some(Duration::from_millis(200)),
        ..executor_config(server.uri())
    };
    let (workload, recorder) = workload(&["alloy", "law"], config);

    let start = Instant::now();
    workload
        .run_iteration(&mut WordPicker::for_unit(9, 0))
        .await;
    assert!(start.elapsed() >= Duration::from_millis(200));

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, ["/", "/search"]);
    assert!(requests[0].url.query().is_none());
    assert_eq!(recorder.count(RequestKind::Liveness), 1);
    assert_eq!(recorder.count(RequestKind::Search), 1);
}

#[tokio::test]
async fn failed_liveness_does_not_skip_search() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExecutorConfig {
        liveness: true,
        ..executor_config(server.uri())
    };
    let (workload, recorder) = workload(&["steel"], config);
    let outcome = workload
        .run_iteration(&mut WordPicker::for_unit(2, 0))
        .await;

    assert_eq!(outcome.failed_requests, 1);
    assert_eq!(recorder.failures(RequestKind::Liveness), 1);
    assert_eq!(recorder.failures(RequestKind::Search), 0);
}

#[tokio::test]
async fn non_success_search_is_recorded_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (workload, recorder) = workload(&["pewter"], executor_config(server.uri()));
    let outcome = workload
        .run_iteration(&mut WordPicker::for_unit(3, 0))
        .await;

    assert_eq!(outcome.failed_requests, 1);
    assert_eq!(recorder.failures(RequestKind::Search), 1);
}

#[tokio::test]
async fn discarded_bodies_are_not_retained() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64 * 1024)))
        .mount(&server)
        .await;

    let config = ExecutorConfig {
        discard_response_bodies: true,
        reuse_connections: false,
        ..executor_config(server.uri())
    };
    let (workload, recorder) = workload(&["brass"], config);
    for unit in 0..3 {
        let outcome = workload
            .run_iteration(&mut WordPicker::for_unit(4, unit))
            .await;
        assert_eq!(outcome.failed_requests, 0);
    }

    // status still inspected, no body bytes kept
    assert_eq!(recorder.count(RequestKind::Search), 3);
    assert_eq!(recorder.failures(RequestKind::Search), 0);
    assert_eq!(recorder.body_bytes(RequestKind::Search), 0);
}

#[tokio::test]
async fn connection_errors_are_recorded() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let (workload, recorder) = workload(&["zinc"], executor_config(format!("http://127.0.0.1:{port}")));
    let outcome = workload
        .run_iteration(&mut WordPicker::for_unit(5, 0))
        .await;

    assert_eq!(outcome.failed_requests, 1);
    assert_eq!(recorder.failures(RequestKind::Search), 1);

    let summary = recorder.summary(
        &search_load::ScenarioConfig::Closed {
            workers: 1,
            loop_delay: Duration::ZERO,
            duration: None,
        },
        &search_load::ScheduleReport::default(),
    );
    assert_eq!(summary.requests[&RequestKind::Search].transport_errors, 1);
}

#[tokio::test]
async fn book_filters_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "allomancy"))
        .and(query_param("book", "aol"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExecutorConfig {
        books: vec!["aol".into()],
        ..executor_config(server.uri())
    };
    let (workload, recorder) = workload(&["allomancy"], config);
    workload
        .run_iteration(&mut WordPicker::for_unit(6, 0))
        .await;

    assert_eq!(recorder.failures(RequestKind::Search), 0);
}
