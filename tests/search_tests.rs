use std::time::Duration;

use cnae_prospector::config::Config;
use cnae_prospector::errors::AppError;
use cnae_prospector::search::SearchService;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_config(
    registry_uri: &str,
    ws_uri: &str,
    open_uri: &str,
    ws_key: Option<&str>,
) -> Config {
    Config {
        registry_client_id: Some("test-client".to_string()),
        registry_client_secret: Some("test-secret".to_string()),
        registry_auth_url: format!("{}/oauth/token", registry_uri),
        registry_base_url: registry_uri.to_string(),
        cnpj_ws_base_url: ws_uri.to_string(),
        cnpj_ws_api_key: ws_key.map(String::from),
        open_registry_base_url: open_uri.to_string(),
        enable_places: false,
        places_api_key: None,
        places_base_url: "http://127.0.0.1:9".to_string(),
        enable_phone_validation: false,
        phone_validation_api_key: None,
        phone_validation_base_url: "http://127.0.0.1:9".to_string(),
        enable_email_validation: false,
        email_validation_api_key: None,
        email_validation_base_url: "http://127.0.0.1:9".to_string(),
        email_cache_ttl: Duration::from_secs(3600),
        email_min_interval: Duration::from_millis(1),
        email_max_retries: 3,
        enable_domain_discovery: false,
        domain_search_api_key: None,
        domain_search_base_url: "http://127.0.0.1:9".to_string(),
        enable_company_enrichment: false,
        company_enrichment_api_key: None,
        company_enrichment_base_url: "http://127.0.0.1:9".to_string(),
        rate_limit_requests: 50,
        rate_limit_period: Duration::from_secs(1),
        cache_ttl: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Complete listing item in the primary registry's flat shape: no gaps, so
/// the merge step makes no extra calls.
fn primary_record(cnpj: &str, name: &str) -> Value {
    json!({
        "cnpj": cnpj,
        "razao_social": name,
        "situacao_cadastral": "ATIVA",
        "logradouro": "Rua das Flores",
        "numero": "123",
        "bairro": "Centro",
        "municipio": "Uberlândia",
        "uf": "MG",
        "cep": "38400100",
        "telefone": "3432221111",
        "email": "contato@empresa.com.br",
        "cnae_principal": "5611201",
        "cnae_principal_descricao": "Restaurantes e similares"
    })
}

/// Complete listing item in the secondary registry's nested shape.
fn ws_record(cnpj: &str, name: &str) -> Value {
    json!({
        "razao_social": name,
        "estabelecimento": {
            "cnpj": cnpj,
            "situacao_cadastral": "Ativa",
            "tipo_logradouro": "Avenida",
            "logradouro": "Brasil",
            "numero": "500",
            "bairro": "Saraiva",
            "cep": "38400500",
            "ddd1": "34",
            "telefone1": "32224444",
            "email": "contato@empresa.com.br",
            "cidade": {"nome": "Uberlândia"},
            "estado": {"sigla": "MG"},
            "atividade_principal": {
                "subclasse": "5611201",
                "descricao": "Restaurantes e similares"
            }
        }
    })
}

#[tokio::test]
async fn primary_listing_supplies_results() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .and(query_param("cnae_principal", "5611201"))
        .and(query_param("uf", "MG"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                primary_record("00000000000191", "EMPRESA UM LTDA"),
                primary_record("19131243000197", "EMPRESA DOIS LTDA")
            ]
        })))
        .mount(&registry)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service
        .search_by_cnae("5611-2/01", Some("MG"), None, 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for record in results.iter() {
        assert_eq!(record.source, "Nuvem Fiscal");
        assert!(record.has_address());
    }
}

#[tokio::test]
async fn city_filter_uses_ibge_municipality_code() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    // Uberlândia/MG resolves from the static table, so the open registry
    // sees no municipality request
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .and(query_param("municipio", "3170107"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [primary_record("00000000000191", "EMPRESA UM LTDA")]
        })))
        .expect(1)
        .mount(&registry)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service
        .search_by_cnae("5611201", Some("MG"), Some("Uberlândia"), 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn empty_primary_listing_falls_back_to_secondary() {
    let registry = MockServer::start().await;
    let ws = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/pesquisa"))
        .and(query_param("cnae_principal", "5611201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                ws_record("00000000000191", "EMPRESA UM LTDA"),
                ws_record("19131243000197", "EMPRESA DOIS LTDA"),
                ws_record("11222333000181", "EMPRESA TRES LTDA")
            ]
        })))
        .mount(&ws)
        .await;

    let config = create_test_config(&registry.uri(), &ws.uri(), &open.uri(), Some("ws-key"));
    let service = SearchService::new(&config);

    let results = service
        .search_by_cnae("5611201", Some("MG"), None, 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    for record in results.iter() {
        assert_eq!(record.source, "CNPJ.ws");
    }
}

#[tokio::test]
async fn failed_primary_listing_without_secondary_reaches_open_registry() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "cnpj": "00000000000191",
                "razao_social": "EMPRESA UM LTDA",
                "descricao_situacao_cadastral": "ATIVA",
                "logradouro": "Rua das Flores",
                "numero": "123",
                "bairro": "Centro",
                "municipio": "Uberlândia",
                "uf": "MG",
                "cep": "38400-100",
                "ddd_telefone_1": "3432221111",
                "email": "contato@empresa.com.br",
                "cnae_fiscal": 5611201,
                "cnae_fiscal_descricao": "Restaurantes e similares"
            }
        ])))
        .mount(&open)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service.search_by_cnae("5611201", None, None, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.records()[0].source, "BrasilAPI");
}

#[tokio::test]
async fn auth_failure_skips_every_provider() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&registry)
        .await;
    // No listing may be attempted with a missing token
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(0)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&open)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service.search_by_cnae("5611201", None, None, 10).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token"
        })))
        .expect(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [primary_record("00000000000191", "EMPRESA UM LTDA")]
        })))
        .expect(1)
        .mount(&registry)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let first = service.search_by_cnae("5611201", None, None, 10).await.unwrap();
    let second = service.search_by_cnae("5611201", None, None, 10).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
}

#[tokio::test]
async fn empty_outcome_is_not_cached() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(2)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&open)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    assert!(service.search_by_cnae("5611201", None, None, 10).await.unwrap().is_empty());
    assert!(service.search_by_cnae("5611201", None, None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn listing_is_capped_to_requested_limit() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                primary_record("00000000000191", "EMPRESA UM LTDA"),
                primary_record("19131243000197", "EMPRESA DOIS LTDA"),
                primary_record("11222333000181", "EMPRESA TRES LTDA")
            ]
        })))
        .mount(&registry)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service.search_by_cnae("5611201", None, None, 2).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn malformed_cnae_is_rejected_before_any_call() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token"
        })))
        .expect(0)
        .mount(&registry)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    match service.search_by_cnae("56112", None, None, 10).await {
        Err(AppError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {:?}", other.map(|r| r.len())),
    }
}

#[tokio::test]
async fn gappy_record_is_completed_from_detail_lookups() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    // Listing record arrives without phone and email
    Mock::given(method("GET"))
        .and(path("/cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "cnpj": "00000000000191",
                "razao_social": "EMPRESA UM LTDA",
                "logradouro": "Rua das Flores",
                "numero": "123",
                "bairro": "Centro",
                "municipio": "Uberlândia",
                "uf": "MG",
                "cep": "38400100",
                "cnae_principal": "5611201",
                "cnae_principal_descricao": "Restaurantes e similares"
            }]
        })))
        .mount(&registry)
        .await;
    // Primary detail supplies the email; the phone gap survives it
    Mock::given(method("GET"))
        .and(path("/cnpj/00000000000191"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cnpj": "00000000000191",
            "razao_social": "EMPRESA UM LTDA",
            "email": "contato@empresa.com.br"
        })))
        .expect(1)
        .mount(&registry)
        .await;
    // Open detail supplies the phone; its conflicting email must not
    // overwrite the one already filled
    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1/00000000000191"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cnpj": "00000000000191",
            "razao_social": "EMPRESA UM LTDA",
            "ddd_telefone_1": "3432221111",
            "email": "outro@empresa.com.br"
        })))
        .expect(1)
        .mount(&open)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let results = service
        .search_by_cnae("5611201", Some("MG"), None, 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let record = &results.records()[0];
    assert_eq!(record.email.as_deref(), Some("contato@empresa.com.br"));
    assert_eq!(record.phone.as_deref(), Some("3432221111"));
    assert_eq!(record.source, "Nuvem Fiscal; BrasilAPI");
}

#[tokio::test]
async fn direct_lookup_degrades_when_open_registry_is_unreachable() {
    let registry = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj/00000000000191"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&registry)
        .await;

    // The open registry points at a closed port: the transport failure must
    // degrade to an empty answer, not an error
    let config = create_test_config(
        &registry.uri(),
        "http://127.0.0.1:9",
        "http://127.0.0.1:9",
        None,
    );
    let service = SearchService::new(&config);

    let result = service.fetch_by_cnpj("00000000000191").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn direct_lookup_falls_back_to_open_registry() {
    let registry = MockServer::start().await;
    let open = MockServer::start().await;
    mount_token(&registry).await;
    Mock::given(method("GET"))
        .and(path("/cnpj/00000000000191"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1/00000000000191"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cnpj": "00000000000191",
            "razao_social": "EMPRESA UM LTDA",
            "descricao_situacao_cadastral": "ATIVA",
            "logradouro": "Rua das Flores",
            "numero": "123",
            "bairro": "Centro",
            "municipio": "Uberlândia",
            "uf": "MG",
            "cep": "38400-100",
            "ddd_telefone_1": "3432221111",
            "email": "contato@empresa.com.br",
            "cnae_fiscal": 5611201,
            "cnae_fiscal_descricao": "Restaurantes e similares",
            "qsa": [{"nome_socio": "Maria Silva", "qualificacao_socio": "Sócio-Administrador"}]
        })))
        .mount(&open)
        .await;

    let config = create_test_config(&registry.uri(), "http://127.0.0.1:9", &open.uri(), None);
    let service = SearchService::new(&config);

    let record = service
        .fetch_by_cnpj("00.000.000/0001-91")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.source, "BrasilAPI");
    assert_eq!(record.partners.len(), 1);
    assert_eq!(record.partners[0].name, "Maria Silva");
}
