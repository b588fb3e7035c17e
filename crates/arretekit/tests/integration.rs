//! Integration tests for ArreteKit using wiremock

use arretekit::client::BROWSER_ACCEPT;
use arretekit::{
    store_from_config, Archiver, Config, DecreeRecord, DownloadError, DriverState,
    HttpListingPage, Ledger, ObjectStore, PaginationDriver, PdfFetcher, RedirectDownloader,
    S3Store, StorageConfig,
};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, header_exists, method, path, path_regex, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BODY: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n%%EOF";

fn downloader() -> RedirectDownloader {
    RedirectDownloader::new(Duration::from_secs(5))
        .unwrap()
        .with_redirect_delay(Duration::ZERO)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

fn pdf() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(PDF_BODY.to_vec(), "application/pdf")
}

#[tokio::test]
async fn test_script_redirect_resolves_to_pdf() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/telechargement/2025-01535"))
        .respond_with(html(
            r#"<html><script>window.location.href='/files/arrete_ndeg2025-01535.pdf';</script></html>"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/arrete_ndeg2025-01535.pdf"))
        .and(header("referer", mock_server.uri().as_str()))
        .respond_with(pdf())
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("2025-01535.pdf");
    let url = format!("{}/telechargement/2025-01535", mock_server.uri());

    let file = downloader().fetch_pdf(&url, &dest).await.unwrap();

    assert_eq!(file.hops, 1);
    assert_eq!(file.size_bytes, PDF_BODY.len() as u64);
    assert_eq!(file.final_url.path(), "/files/arrete_ndeg2025-01535.pdf");
    assert_eq!(std::fs::read(&dest).unwrap(), PDF_BODY);
}

#[tokio::test]
async fn test_meta_refresh_then_anchor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gate"))
        .respond_with(html(
            r#"<html><head><meta http-equiv="Refresh" content="0; URL='/landing'"></head></html>"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(html(
            r#"<html><body><a href="/docs/a.PDF?v=2">Télécharger le document</a></body></html>"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/a.PDF"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(PDF_BODY.to_vec(), "application/octet-stream"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.pdf");
    let file = downloader()
        .fetch_pdf(&format!("{}/gate", mock_server.uri()), &dest)
        .await
        .unwrap();

    assert_eq!(file.hops, 2);
    assert!(arretekit::is_valid_pdf_file(&dest).await);
}

#[tokio::test]
async fn test_non_pdf_payload_is_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/fake.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"<html>blocked</html>".to_vec(), "application/pdf"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("fake.pdf");
    let result = downloader()
        .fetch_pdf(&format!("{}/fake.pdf", mock_server.uri()), &dest)
        .await;

    match result {
        Err(DownloadError::NotPdf(head)) => assert_eq!(head, b"<htm"),
        other => panic!("expected NotPdf, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_hops_keep_browser_accept_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/telechargement/2025-01535"))
        .and(header("accept", BROWSER_ACCEPT))
        .respond_with(html(
            r#"<html><script>window.location.href='/files/arrete_ndeg2025-01535.pdf';</script></html>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/arrete_ndeg2025-01535.pdf"))
        .and(header("accept", BROWSER_ACCEPT))
        .respond_with(pdf())
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("2025-01535.pdf");
    let url = format!("{}/telechargement/2025-01535", mock_server.uri());

    let file = downloader().fetch_pdf(&url, &dest).await.unwrap();
    assert_eq!(file.hops, 1);
}

#[tokio::test]
async fn test_script_redirect_to_non_pdf_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/telechargement/2025-01536"))
        .respond_with(html(
            r#"<html><script>window.location.href='/files/arrete_ndeg2025-01536.pdf';</script></html>"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/arrete_ndeg2025-01536.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"Access denied by firewall".to_vec(), "application/pdf"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("2025-01536.pdf");
    let result = downloader()
        .fetch_pdf(&format!("{}/telechargement/2025-01536", mock_server.uri()), &dest)
        .await;

    match result {
        Err(DownloadError::NotPdf(head)) => assert_eq!(head, b"Acce"),
        other => panic!("expected NotPdf, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_redirect_budget_exhausted() {
    let mock_server = MockServer::start().await;

    for hop in 0..6 {
        Mock::given(method("GET"))
            .and(path(format!("/hop/{hop}")))
            .respond_with(html(&format!(
                r#"<script>window.location = "/hop/{}";</script>"#,
                hop + 1
            )))
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("loop.pdf");
    let result = downloader()
        .fetch_pdf(&format!("{}/hop/0", mock_server.uri()), &dest)
        .await;

    assert!(matches!(result, Err(DownloadError::TooManyRedirects(5))));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_forbidden_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/blocked.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = downloader()
        .fetch_pdf(
            &format!("{}/blocked.pdf", mock_server.uri()),
            &dir.path().join("blocked.pdf"),
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DownloadError::Forbidden));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_html_without_redirect() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(html("<html><body><p>Rien ici</p></body></html>"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = downloader()
        .fetch_pdf(
            &format!("{}/empty", mock_server.uri()),
            &dir.path().join("x.pdf"),
        )
        .await;

    assert!(matches!(result, Err(DownloadError::NoRedirectFound(_))));
}

fn listing_page(first: u32, next: Option<u32>) -> String {
    let mut body = String::from(r#"<html><body><div class="view-content">"#);
    for number in [first, first + 1] {
        body.push_str(&format!(
            r#"<article class="arrete-card">
                 <h3>Arrêté n° 2025-{number:05} réglementant la circulation rue {number}</h3>
                 <span class="date">18/11/2025</span>
                 <a href="/files/arrete_ndeg2025-{number:05}.pdf">Télécharger</a>
               </article>"#
        ));
    }
    body.push_str("</div>");
    if let Some(next) = next {
        body.push_str(&format!(
            r#"<ul class="pager"><li class="pager__item--next"><a href="?page={next}">Suivant</a></li></ul>"#
        ));
    }
    body.push_str("</body></html>");
    body
}

#[tokio::test]
async fn test_pagination_stops_at_ceiling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/arretes"))
        .and(query_param_is_missing("page"))
        .respond_with(html(&listing_page(1, Some(1))))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/arretes"))
        .and(query_param("page", "1"))
        .respond_with(html(&listing_page(3, Some(2))))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/arretes"))
        .and(query_param("page", "2"))
        .respond_with(html(&listing_page(5, None)))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = Config {
        scrape_delay: Duration::ZERO,
        max_pages: Some(2),
        ..Config::new(Url::parse(&format!("{}/arretes", mock_server.uri())).unwrap())
    };
    let page = HttpListingPage::new(Duration::from_secs(5)).unwrap();
    let run = PaginationDriver::new(&config).run(page).await;

    assert_eq!(run.state, DriverState::Done);
    assert_eq!(run.pages_visited, 2);
    let numbers: Vec<&str> = run.records.iter().map(|r| r.number.as_str()).collect();
    assert_eq!(numbers, ["2025-00001", "2025-00002", "2025-00003", "2025-00004"]);
    assert_eq!(run.traffic_count(), 4);
    assert!(run.records[0].pdf_url.starts_with(&mock_server.uri()));
}

#[tokio::test]
async fn test_pagination_keeps_records_on_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/arretes"))
        .and(query_param_is_missing("page"))
        .respond_with(html(&listing_page(1, Some(1))))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/arretes"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = Config {
        scrape_delay: Duration::ZERO,
        ..Config::new(Url::parse(&format!("{}/arretes", mock_server.uri())).unwrap())
    };
    let page = HttpListingPage::new(Duration::from_secs(5)).unwrap();
    let run = PaginationDriver::new(&config).run(page).await;

    assert_eq!(run.state, DriverState::Failed);
    assert_eq!(run.pages_visited, 1);
    assert_eq!(run.records.len(), 2);
    assert!(run.error.unwrap().contains("HTTP 500"));
}

fn s3_store(mock_server: &MockServer) -> S3Store {
    let config = StorageConfig {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        bucket: "decrees".to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some(Url::parse(&mock_server.uri()).unwrap()),
    };
    S3Store::new(&config, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_s3_head_and_list() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/decrees/arretes/2025/present.pdf"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "4096"))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/decrees/arretes/2025/absent.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/decrees"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "arretes/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>decrees</Name>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>arretes/2025/present.pdf</Key><Size>4096</Size></Contents>
  <Contents><Key>arretes/2024/old.pdf</Key><Size>1024</Size></Contents>
</ListBucketResult>"#,
            "application/xml",
        ))
        .mount(&mock_server)
        .await;

    let store = s3_store(&mock_server);

    let info = store.exists("arretes/2025/present.pdf").await.unwrap();
    assert_eq!(info.map(|i| i.size), Some(4096));
    assert!(store.exists("arretes/2025/absent.pdf").await.unwrap().is_none());

    let listed = store.list("arretes/").await.unwrap();
    let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, ["arretes/2025/present.pdf", "arretes/2024/old.pdf"]);
    assert_eq!(
        store.url_for("arretes/2024/old.pdf"),
        "s3://decrees/arretes/2024/old.pdf"
    );
}

#[tokio::test]
async fn test_archive_end_to_end() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/telechargement/1"))
        .respond_with(html(r#"<a href="/files/arrete_1.pdf">PDF</a>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/arrete_1.pdf"))
        .respond_with(pdf())
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/telechargement/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex(r"^/decrees/arretes/2025/.+\.pdf$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/decrees/arretes/2025/2025-00001_[0-9a-f]{8}\.pdf$"))
        .and(header_exists("authorization"))
        .and(header("content-type", "application/pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        scrape_delay: Duration::ZERO,
        pdf_max_attempts: 1,
        ..Config::from_lookup(|_| None).unwrap()
    };
    let archiver = Archiver::new(Box::new(s3_store(&mock_server)), Box::new(downloader()), &config)
        .with_retry_backoff(Duration::ZERO);

    let mut records = vec![
        DecreeRecord::new(
            "2025-00001",
            "Arrêté n° 2025-00001 réglementant la circulation",
            "18/11/2025",
            format!("{}/arretes", mock_server.uri()),
            format!("{}/telechargement/1", mock_server.uri()),
            "",
        ),
        DecreeRecord::new(
            "2025-00002",
            "Arrêté n° 2025-00002 portant interdiction",
            "18/11/2025",
            format!("{}/arretes", mock_server.uri()),
            format!("{}/telechargement/2", mock_server.uri()),
            "",
        ),
    ];

    let summary = archiver.archive(&mut records, false).await;

    assert_eq!(summary.archived, 1);
    assert_eq!(summary.failed, 1);
    let stored = records[0].storage_url.as_deref().unwrap();
    assert!(stored.starts_with("s3://decrees/arretes/2025/2025-00001_"));
    assert!(records[0].storage_size_kb.is_some());
    assert_eq!(
        records[1].storage_url.as_deref(),
        Some("ERROR: PDF download failed (Unexpected HTTP status 404)")
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_dry_run_archive_keeps_ledger_unchanged() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/arrete_ndeg2025-00003.pdf"))
        .respond_with(pdf())
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        scrape_delay: Duration::ZERO,
        pdf_max_attempts: 1,
        ..Config::from_lookup(|_| None).unwrap()
    };
    assert!(config.dry_run);

    let ledger = Ledger::new(config.ledger_path());
    ledger
        .save(&[DecreeRecord::new(
            "2025-00003",
            "Arrêté n° 2025-00003 réglementant la circulation",
            "18/11/2025",
            format!("{}/arretes", mock_server.uri()),
            format!("{}/files/arrete_ndeg2025-00003.pdf", mock_server.uri()),
            "",
        )])
        .unwrap();
    let before = std::fs::read_to_string(ledger.path()).unwrap();

    let archiver = Archiver::new(
        store_from_config(&config).unwrap(),
        Box::new(downloader()),
        &config,
    )
    .with_retry_backoff(Duration::ZERO);
    let mut records = ledger.load().unwrap();
    let summary = archiver.archive(&mut records, false).await;
    ledger.save(&records).unwrap();

    assert_eq!(summary.simulated, 1);
    assert_eq!(summary.archived, 0);
    assert_eq!(summary.failed, 0);
    assert!(records[0].storage_url.is_none());
    assert!(records[0].storage_size_kb.is_none());
    assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), before);
}
