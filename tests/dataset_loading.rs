//! Word list loading from URLs and local files

use std::io::Write;

use search_load::dataset::load;
use search_load::{DatasetSource, LoadError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn loads_dictionary_object_from_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/words_dictionary.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"aardvark": 1, "abacus": 1, "zephyr": 1}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = DatasetSource::parse(&format!("{}/words_dictionary.json", server.uri()));
    let words = load(&source, &client()).await.unwrap();

    assert_eq!(
        words.iter().collect::<Vec<_>>(),
        ["aardvark", "abacus", "zephyr"]
    );
}

#[tokio::test]
async fn loads_flat_array_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"["hello", "world", "hello"]"#).unwrap();

    let source = DatasetSource::parse(file.path().to_str().unwrap());
    let words = load(&source, &client()).await.unwrap();

    assert_eq!(words.len(), 3);
    assert_eq!(&words[1], "world");
}

#[tokio::test]
async fn non_success_status_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = DatasetSource::parse(&format!("{}/missing.json", server.uri()));
    let err = load(&source, &client()).await.unwrap_err();

    assert!(matches!(err, LoadError::DatasetStatus { status: 404, .. }), "{err}");
}

#[tokio::test]
async fn malformed_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let source = DatasetSource::parse(&format!("{}/words.json", server.uri()));
    let err = load(&source, &client()).await.unwrap_err();

    assert!(matches!(err, LoadError::DatasetParse(_)), "{err}");
}

#[tokio::test]
async fn unreachable_url_is_fatal() {
    // bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let source = DatasetSource::parse(&format!("http://127.0.0.1:{port}/words.json"));
    let err = load(&source, &client()).await.unwrap_err();

    assert!(matches!(err, LoadError::DatasetFetch { .. }), "{err}");
}

#[tokio::test]
async fn missing_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = DatasetSource::Path(dir.path().join("nope.json"));

    let err = load(&source, &client()).await.unwrap_err();

    assert!(matches!(err, LoadError::DatasetRead { .. }), "{err}");
}
