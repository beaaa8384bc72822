//! DeepL adapter against a mock HTTP server.

use std::time::Duration;

use mass_translate_server::translate::deepl::DeepLClient;
use mass_translate_server::translate::{
    ProviderError, ProviderId, TranslationRequest, TranslationResponse, Translator,
};
use mockito::{Matcher, Server};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const KEY: &str = "test-key";

fn client(server: &Server) -> DeepLClient {
    DeepLClient::new(KEY, Some(&server.url()))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5))
        .with_backoff_base(Duration::from_millis(1))
}

fn text_request(from: &str, to: &str, segments: &[&str]) -> TranslationRequest {
    TranslationRequest::text(
        ProviderId::DeepL,
        from,
        to,
        segments.iter().map(|s| s.to_string()).collect(),
    )
}

#[tokio::test]
async fn translates_text_segments_in_order() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/translate")
        .match_header("authorization", "DeepL-Auth-Key test-key")
        .match_body(Matcher::Json(json!({
            "text": ["hello", "world"],
            "source_lang": "EN",
            "target_lang": "DE"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"translations": [
                {"detected_source_language": "EN", "text": "Hallo"},
                {"detected_source_language": "EN", "text": "Welt"}
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let out = client(&server)
        .translate(&text_request("EN", "DE", &["hello", "world"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        out,
        TranslationResponse::Text {
            translations: vec!["Hallo".into(), "Welt".into()]
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_source_language_is_not_sent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/translate")
        .match_body(Matcher::Json(json!({"text": ["hello"], "target_lang": "DE"})))
        .with_status(200)
        .with_body(json!({"translations": [{"text": "Hallo"}]}).to_string())
        .create_async()
        .await;

    let out = client(&server)
        .translate(&text_request("", "DE", &["hello"]), &CancellationToken::new())
        .await;
    assert!(out.is_ok());
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_languages_are_typed() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v2/translate")
        .match_body(Matcher::PartialJson(json!({"source_lang": "XX"})))
        .with_status(400)
        .with_body(json!({"message": "Value for 'source_lang' not supported."}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/v2/translate")
        .match_body(Matcher::PartialJson(json!({"target_lang": "YY"})))
        .with_status(400)
        .with_body(json!({"message": "Value for 'target_lang' not supported."}).to_string())
        .create_async()
        .await;
    let client = client(&server);
    let cancel = CancellationToken::new();

    let err = client
        .translate(&text_request("XX", "DE", &["hello"]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidSource(_)));

    let err = client
        .translate(&text_request("EN", "YY", &["hello"]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidTarget(_)));
}

#[tokio::test]
async fn quota_and_auth_errors_are_not_retryable() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/translate")
        .with_status(456)
        .with_body(json!({"message": "Quota exceeded"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let err = client(&server)
        .translate(&text_request("EN", "DE", &["hello"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Other { retryable: false, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/v2/translate")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("POST", "/v2/translate")
        .with_status(200)
        .with_body(json!({"translations": [{"text": "Hallo"}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let out = client(&server)
        .translate(&text_request("EN", "DE", &["hello"]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        out,
        TranslationResponse::Text {
            translations: vec!["Hallo".into()]
        }
    );
    failing.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn persistent_server_errors_give_up() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/translate")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let err = client(&server)
        .translate(&text_request("EN", "DE", &["hello"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Other { retryable: true, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn arity_mismatch_is_an_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v2/translate")
        .with_status(200)
        .with_body(json!({"translations": [{"text": "Hallo"}]}).to_string())
        .create_async()
        .await;

    let err = client(&server)
        .translate(&text_request("EN", "DE", &["hello", "world"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Other { .. }));
}

#[tokio::test]
async fn cancelled_request_is_not_sent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/translate")
        .expect(0)
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client(&server)
        .translate(&text_request("EN", "DE", &["hello"]), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::cancelled());
    mock.assert_async().await;
}

#[tokio::test]
async fn document_is_uploaded_polled_and_downloaded() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/v2/document")
        .match_header("authorization", "DeepL-Auth-Key test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("filename=\"doc.docx\"".into()),
            Matcher::Regex("original bytes".into()),
            Matcher::Regex("name=\"target_lang\"".into()),
        ]))
        .with_status(200)
        .with_body(json!({"document_id": "D1", "document_key": "K1"}).to_string())
        .create_async()
        .await;
    let translating = server
        .mock("POST", "/v2/document/D1")
        .match_body(Matcher::Json(json!({"document_key": "K1"})))
        .with_status(200)
        .with_body(
            json!({"document_id": "D1", "status": "translating", "seconds_remaining": 1})
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let done = server
        .mock("POST", "/v2/document/D1")
        .with_status(200)
        .with_body(
            json!({"document_id": "D1", "status": "done", "billed_characters": 14}).to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let download = server
        .mock("POST", "/v2/document/D1/result")
        .match_body(Matcher::Json(json!({"document_key": "K1"})))
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body("translated bytes")
        .create_async()
        .await;

    let request = TranslationRequest::file(
        ProviderId::DeepL,
        "",
        "DE",
        "doc.docx".into(),
        b"original bytes".to_vec(),
    );
    let out = client(&server)
        .translate(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        out,
        TranslationResponse::File {
            filename: "doc.docx".into(),
            data: b"translated bytes".to_vec()
        }
    );
    upload.assert_async().await;
    translating.assert_async().await;
    done.assert_async().await;
    download.assert_async().await;
}

#[tokio::test]
async fn document_error_status_is_reported() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v2/document")
        .with_status(200)
        .with_body(json!({"document_id": "D2", "document_key": "K2"}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/v2/document/D2")
        .with_status(200)
        .with_body(
            json!({"document_id": "D2", "status": "error", "error_message": "Invalid file data."})
                .to_string(),
        )
        .create_async()
        .await;

    let request = TranslationRequest::file(
        ProviderId::DeepL,
        "EN",
        "DE",
        "notes.txt".into(),
        b"x".to_vec(),
    );
    let err = client(&server)
        .translate(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::other("Invalid file data."));
}
