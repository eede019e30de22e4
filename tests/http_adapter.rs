//! HTTP adapter integration tests against a mock portal.

mod common;

use common::{html_response, landing_page, login_page};
use sei_dl::{AdapterError, DebugConfig, FormNode, PortalAdapter, PortalConfig, UnitName};
use std::collections::BTreeMap;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn portal_config(server: &MockServer) -> PortalConfig {
    PortalConfig {
        base_url: server.uri(),
        unit_name: UnitName::new("SEPLAG/AUTOMATIZAMG"),
        ..Default::default()
    }
}

fn adapter(server: &MockServer) -> sei_dl::HttpPortalAdapter {
    sei_dl::HttpPortalAdapter::new(&portal_config(server), "28", &DebugConfig::default())
        .expect("adapter builds")
}

#[tokio::test]
async fn login_posts_documented_fields_with_org_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sip/login.php"))
        .respond_with(html_response(&login_page()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sip/login.php"))
        .and(body_string_contains("txtUsuario=anon"))
        .and(body_string_contains("pwdSenha=s3cret"))
        .and(body_string_contains("hdnAcao=2"))
        .and(header("cookie", "SIP_U_GOVMG_SEI=28"))
        .respond_with(html_response(&landing_page()))
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    let config = portal_config(&server);
    adapter.fetch(&config.login_url(), &[]).await.expect("login page");

    let form = FormNode {
        action: config.login_url(),
        method: "post".to_string(),
        fields: BTreeMap::from([
            ("txtUsuario".to_string(), "anon".to_string()),
            ("pwdSenha".to_string(), "s3cret".to_string()),
            ("selOrgao".to_string(), "28".to_string()),
            ("hdnAcao".to_string(), "2".to_string()),
            ("Acessar".to_string(), "Acessar".to_string()),
        ]),
        ..Default::default()
    };
    let landing = adapter.submit_form(&form, &[]).await.expect("login submit");
    assert!(landing.contains_text("Sair"));
    assert!(
        landing
            .link_containing("acao=procedimento_controlar")
            .is_some()
    );
}

#[tokio::test]
async fn pages_are_decoded_as_iso_8859_1() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(html_response("<html><body><p>Ofício de solicitação</p></body></html>"))
        .mount(&server)
        .await;

    let page = adapter(&server)
        .fetch("controlador.php", &[])
        .await
        .expect("page fetches");
    assert!(
        page.contains_text("Ofício de solicitação"),
        "latin-1 bytes decode to the accented text, got: {}",
        page.text
    );
}

#[tokio::test]
async fn relative_hrefs_resolve_under_the_portal_root() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(html_response("<html><body>ok</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server)
        .fetch(
            "controlador.php",
            &[("acao".to_string(), "procedimento_controlar".to_string())],
        )
        .await
        .expect("relative path resolves");
}

#[tokio::test]
async fn binary_fetch_carries_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"%PDF-1.7 body".to_vec(),
            "application/pdf",
        ))
        .mount(&server)
        .await;

    let payload = adapter(&server)
        .fetch_binary("controlador.php?acao=exibir_arquivo&id=1")
        .await
        .expect("binary fetches");
    assert!(payload.looks_like_pdf());
    assert_eq!(payload.bytes, b"%PDF-1.7 body");
}

#[tokio::test]
async fn landing_on_the_login_form_signals_session_expiry() {
    let server = MockServer::start().await;
    // An in-session URL answering with the login form (password field present)
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(html_response(&login_page()))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch("controlador.php?acao=procedimento_controlar", &[])
        .await
        .expect_err("expired session is an error");
    assert!(matches!(err, AdapterError::SessionExpired));
}

#[tokio::test]
async fn failure_statuses_map_to_classified_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch("controlador.php", &[])
        .await
        .expect_err("5xx is an error");
    assert!(err.is_transient(), "5xx should feed the retry loops");
    match err {
        AdapterError::Http { status, .. } => assert_eq!(status, 503),
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn debug_html_dumps_are_written_when_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .respond_with(html_response("<html><body>dumped</body></html>"))
        .mount(&server)
        .await;

    let debug = DebugConfig {
        enabled: true,
        save_html: true,
        html_dir: dir.path().to_path_buf(),
    };
    let adapter = sei_dl::HttpPortalAdapter::new(&portal_config(&server), "28", &debug)
        .expect("adapter builds");
    adapter.fetch("controlador.php", &[]).await.expect("fetch");

    let dumped: Vec<_> = std::fs::read_dir(dir.path()).expect("dir readable").collect();
    assert_eq!(dumped.len(), 1, "one page, one dump");
}
