//! End-to-end tests over the in-process gateway.
//!
//! The library is built programmatically (no packages, no network):
//! the administrative-gender code system and value set, a concept map,
//! a self-importing value set for the cycle path, and the UCUM provider.

use ferrotx_server::{AppConfig, build_app_with_library};
use ferrotx_terminology::backends::UcumCodeSystem;
use ferrotx_terminology::library::{
    Library, PackageCodeSystems, ResourceStore, SharedFactory,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;

fn build_library() -> Arc<Library> {
    let mut builder = Library::builder();
    let ids = builder.id_space();

    let mut cs_store = ResourceStore::new("CodeSystem");
    cs_store
        .add(
            json!({
                "resourceType": "CodeSystem",
                "id": "administrative-gender",
                "url": "http://hl7.org/fhir/administrative-gender",
                "version": "4.0.1",
                "status": "active",
                "caseSensitive": true,
                "content": "complete",
                "valueSet": "http://hl7.org/fhir/ValueSet/administrative-gender",
                "concept": [
                    {"code": "male", "display": "Male",
                     "designation": [{"language": "de", "value": "Männlich"}]},
                    {"code": "female", "display": "Female",
                     "designation": [{"language": "de", "value": "Weiblich"}]},
                    {"code": "other", "display": "Other"},
                    {"code": "unknown", "display": "Unknown"}
                ]
            }),
            &ids,
        )
        .unwrap();
    builder.add_package_code_systems(PackageCodeSystems {
        package_id: "test.fixtures#1.0.0".into(),
        fhir_majors: vec![],
        is_core: false,
        store: cs_store,
    });

    let mut vs_store = ResourceStore::new("ValueSet");
    vs_store
        .add(
            json!({
                "resourceType": "ValueSet",
                "id": "administrative-gender",
                "url": "http://hl7.org/fhir/ValueSet/administrative-gender",
                "version": "4.0.1",
                "status": "active",
                "compose": {
                    "include": [{"system": "http://hl7.org/fhir/administrative-gender"}]
                }
            }),
            &ids,
        )
        .unwrap();
    vs_store
        .add(
            json!({
                "resourceType": "ValueSet",
                "id": "ouroboros",
                "url": "http://example.org/vs/ouroboros",
                "compose": {
                    "include": [{"valueSet": ["http://example.org/vs/ouroboros"]}]
                }
            }),
            &ids,
        )
        .unwrap();
    builder.add_value_set_store(vs_store);

    let mut cm_store = ResourceStore::new("ConceptMap");
    cm_store
        .add(
            json!({
                "resourceType": "ConceptMap",
                "id": "local-gender",
                "url": "http://example.org/cm/local-gender",
                "group": [{
                    "source": "http://example.org/cs/local-gender",
                    "target": "http://hl7.org/fhir/administrative-gender",
                    "element": [
                        {"code": "A", "target": [
                            {"code": "X", "equivalence": "equivalent"}
                        ]}
                    ]
                }]
            }),
            &ids,
        )
        .unwrap();
    builder.add_concept_map_store(cm_store);

    let ucum = UcumCodeSystem::new(Some("2.1".to_string()))
        .with_common_units(vec!["mg".into(), "g".into(), "mL".into(), "L".into()]);
    builder
        .register_code_system(
            "http://unitsofmeasure.org",
            Some("2.1"),
            false,
            Arc::new(SharedFactory::new(Arc::new(ucum))),
        )
        .unwrap();

    builder.build()
}

async fn start_server() -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let config = AppConfig::default();
    let app = build_app_with_library(&config, build_library()).expect("build app");

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

async fn get_json(client: &reqwest::Client, url: &str) -> (reqwest::StatusCode, Value) {
    let response = client.get(url).send().await.expect("request");
    let status = response.status();
    let body = response.json().await.expect("json body");
    (status, body)
}

fn parameter<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body.get("parameter")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(|n| n.as_str()) == Some(name))
}

#[tokio::test]
async fn subsumes_equivalent_and_not_subsumed() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    // Same code: equivalent.
    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/CodeSystem/$subsumes?system=http://hl7.org/fhir/administrative-gender&codeA=male&codeB=male"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "outcome").unwrap()["valueCode"], "equivalent");

    // Unrelated codes: not-subsumed.
    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/CodeSystem/$subsumes?system=http://hl7.org/fhir/administrative-gender&codeA=male&codeB=female"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "outcome").unwrap()["valueCode"], "not-subsumed");

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn subsumes_status_split_for_missing_parameters() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    // Missing system: 404.
    let (status, body) = get_json(
        &client,
        &format!("{base}/r4/CodeSystem/$subsumes?codeA=male&codeB=female"),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["code"], "not-found");

    // Missing codeA: 400.
    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/CodeSystem/$subsumes?system=http://hl7.org/fhir/administrative-gender&codeB=female"
        ),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["issue"][0]["code"], "invalid");

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn validate_code_in_value_set() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/ValueSet/$validate-code?url=http://hl7.org/fhir/ValueSet/administrative-gender&code=male&system=http://hl7.org/fhir/administrative-gender"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "result").unwrap()["valueBoolean"], true);
    assert_eq!(parameter(&body, "display").unwrap()["valueString"], "Male");

    // Not a member is still HTTP 200 with result=false.
    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/ValueSet/$validate-code?url=http://hl7.org/fhir/ValueSet/administrative-gender&code=martian&system=http://hl7.org/fhir/administrative-gender"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "result").unwrap()["valueBoolean"], false);

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn ucum_lookup_returns_canonical_property() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!("{base}/r4/CodeSystem/$lookup?system=http://unitsofmeasure.org&code=mg"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "display").unwrap()["valueString"], "milligram");

    let properties: Vec<&Value> = body["parameter"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["name"] == "property")
        .collect();
    let canonical = properties
        .iter()
        .find(|p| {
            p["part"]
                .as_array()
                .map(|parts| parts.iter().any(|part| part["valueCode"] == "canonical"))
                .unwrap_or(false)
        })
        .expect("canonical property");
    let value = canonical["part"]
        .as_array()
        .unwrap()
        .iter()
        .find(|part| part["name"] == "value")
        .unwrap();
    // milligram = gram times a power of ten
    assert_eq!(value["valueCode"], "10*-3.g");

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn cyclic_value_set_expansion_reports_business_rule() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!("{base}/r4/ValueSet/$expand?url=http://example.org/vs/ouroboros"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["code"], "business-rule");
    assert!(
        body["issue"][0]["diagnostics"]
            .as_str()
            .unwrap()
            .contains("http://example.org/vs/ouroboros")
    );

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn translate_reports_equivalence_on_r4() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/ConceptMap/$translate?url=http://example.org/cm/local-gender&system=http://example.org/cs/local-gender&code=A"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(parameter(&body, "result").unwrap()["valueBoolean"], true);
    let matched = parameter(&body, "match").unwrap();
    let parts = matched["part"].as_array().unwrap();
    assert!(parts.iter().any(|p| p["name"] == "equivalence" && p["valueCode"] == "equivalent"));
    assert!(parts.iter().any(|p| {
        p["name"] == "concept" && p["valueCoding"]["code"] == "X"
    }));

    // The R5 mount reports the relationship vocabulary instead.
    let (_, body) = get_json(
        &client,
        &format!(
            "{base}/r5/ConceptMap/$translate?url=http://example.org/cm/local-gender&system=http://example.org/cs/local-gender&code=A"
        ),
    )
    .await;
    let matched = parameter(&body, "match").unwrap();
    let parts = matched["part"].as_array().unwrap();
    assert!(parts.iter().any(|p| p["name"] == "relationship"));

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn expansion_paging_and_language_selection() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/ValueSet/$expand?url=http://hl7.org/fhir/ValueSet/administrative-gender&offset=1&count=2"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["expansion"]["total"], 4);
    let contains = body["expansion"]["contains"].as_array().unwrap();
    assert_eq!(contains.len(), 2);
    assert_eq!(contains[0]["code"], "female");

    // Accept-Language picks the German designation as display.
    let response = client
        .get(format!(
            "{base}/r4/ValueSet/$expand?url=http://hl7.org/fhir/ValueSet/administrative-gender"
        ))
        .header("accept-language", "de, en;q=0.5")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let contains = body["expansion"]["contains"].as_array().unwrap();
    let male = contains.iter().find(|c| c["code"] == "male").unwrap();
    assert_eq!(male["display"], "Männlich");

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn batch_fans_out_and_isolates_failures() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "GET",
             "url": "CodeSystem/$subsumes?system=http://hl7.org/fhir/administrative-gender&codeA=male&codeB=male"}},
            {"request": {"method": "GET",
             "url": "CodeSystem/$lookup?system=http://nowhere.example.org&code=x"}},
            {"request": {"method": "POST", "url": "ValueSet/$validate-code"},
             "resource": {"resourceType": "Parameters", "parameter": [
                {"name": "url", "valueUri": "http://hl7.org/fhir/ValueSet/administrative-gender"},
                {"name": "code", "valueCode": "female"},
                {"name": "system", "valueUri": "http://hl7.org/fhir/administrative-gender"}
             ]}}
        ]
    });

    let response = client
        .post(format!("{base}/r4/"))
        .header("content-type", "application/fhir+json")
        .json(&bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "batch-response");
    let entries = body["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 3);

    assert_eq!(entries[0]["response"]["status"], "200 OK");
    assert_eq!(
        parameter(&entries[0]["resource"], "outcome").unwrap()["valueCode"],
        "equivalent"
    );
    // The failing entry does not fail the batch.
    assert_eq!(entries[1]["response"]["status"], "404");
    assert_eq!(entries[1]["resource"]["resourceType"], "OperationOutcome");
    assert_eq!(
        parameter(&entries[2]["resource"], "result").unwrap()["valueBoolean"],
        true
    );

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn request_id_is_mirrored_and_metadata_served() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/r4/metadata"))
        .header("x-request-id", "test-request-77")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "test-request-77"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["resourceType"], "CapabilityStatement");
    assert_eq!(body["fhirVersion"], "4.0.1");

    // Every response carries a generated id when none was sent.
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn search_and_read_resources() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &format!("{base}/r4/CodeSystem?url=http://hl7.org/fhir/administrative-gender"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["resourceType"], "Bundle");
    assert_eq!(body["total"], 1);
    let id = body["entry"][0]["resource"]["id"].as_str().unwrap().to_string();

    let (status, resource) =
        get_json(&client, &format!("{base}/r4/CodeSystem/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(resource["url"], "http://hl7.org/fhir/administrative-gender");

    let (status, _) = get_json(&client, &format!("{base}/r4/CodeSystem/does-not-exist")).await;
    assert_eq!(status, 404);

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn count_pages_the_expansion() {
    let (base, stop, server) = start_server().await;
    let client = reqwest::Client::new();

    let body = json!({
        "resourceType": "Parameters",
        "parameter": [
            {"name": "url", "valueUri": "http://hl7.org/fhir/ValueSet/administrative-gender"},
            {"name": "count", "valueInteger": 2}
        ]
    });
    let response = client
        .post(format!("{base}/r4/ValueSet/$expand"))
        .header("content-type", "application/fhir+json")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["expansion"]["contains"].as_array().unwrap().len(), 2);
    assert_eq!(body["expansion"]["total"], 4);

    let _ = stop.send(());
    let _ = server.await;
}

#[tokio::test]
async fn size_cap_fails_or_truncates_per_limited_expansion() {
    // A server configured with a 2-code cap.
    let mut config = AppConfig::default();
    config.limits.expansion_limit = 2;
    let app = build_app_with_library(&config, build_library()).expect("build app");
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    // Over the cap without limitedExpansion: too-costly.
    let (status, body) = get_json(
        &client,
        &format!("{base}/r4/ValueSet/$expand?url=http://hl7.org/fhir/ValueSet/administrative-gender"),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(body["issue"][0]["code"], "too-costly");

    // With limitedExpansion: truncated plus the too-costly marker.
    let (status, body) = get_json(
        &client,
        &format!(
            "{base}/r4/ValueSet/$expand?url=http://hl7.org/fhir/ValueSet/administrative-gender&limitedExpansion=true"
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["expansion"]["contains"].as_array().unwrap().len(), 2);
    let extensions = body["expansion"]["extension"].as_array().unwrap();
    assert!(extensions.iter().any(|e| {
        e["url"] == "http://hl7.org/fhir/StructureDefinition/valueset-toocostly"
            && e["valueBoolean"] == true
    }));

    let _ = tx.send(());
    let _ = server.await;
}
