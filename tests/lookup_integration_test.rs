use httpmock::prelude::*;
use nh_rep_finder::config::toml_config::{AppConfig, BaseSourceKind};
use nh_rep_finder::{build_service, GeoPoint, LookupService, Stage, VoteValue};
use serde_json::{json, Value};
use std::io::Write;
use tempfile::NamedTempFile;

const ADDRESS: &str = "667 NH RT 120, Cornish, NH 03745";
const BASE_CSV: &str = "base_district,floterial_district\nSullivan 02,Sullivan 10\n";
const TOWN_CSV: &str = "town,county,district\nCornish,Sullivan,Sullivan 10\n";

fn csv_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn config(server: &MockServer, base: &NamedTempFile, town: &NamedTempFile) -> AppConfig {
    let mut config = AppConfig::default();
    config.geocoder.census_url = server.url("/geocoder");
    config.geocoder.nominatim_url = server.base_url();
    config.openstates.base_url = server.base_url();
    config.openstates.api_key = Some("test-key".to_string());
    config.openstates.use_people_geo = false;
    config.overlay.base_csv = Some(base.path().to_string_lossy().into_owned());
    config.overlay.town_csv = Some(town.path().to_string_lossy().into_owned());
    config.geocoder.nominatim_min_interval_ms = 0;
    config.http.min_interval_ms = 0;
    config.http.retry_delay_ms = 50;
    config
}

async fn service(config: &AppConfig) -> LookupService {
    build_service(config).await.unwrap().service
}

fn person(id: &str, district: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Rep {}", id),
        "party": [{"name": "Republican"}],
        "current_role": {"org_classification": "lower", "district": district},
        "offices": [{"voice": "603-555-0100"}]
    })
}

async fn mock_census(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/geocoder/locations/address")
                .query_param("city", "Cornish");
            then.status(200).json_body(json!({"result": {"addressMatches": [{
                "coordinates": {"x": -72.38, "y": 43.47},
                "addressComponents": {"city": "CORNISH"}
            }]}}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/geocoder/geographies/coordinates");
            then.status(200).json_body(json!({"result": {"geographies": {
                "State Legislative Districts - Lower": [{"BASENAME": "Sullivan 02"}]
            }}}));
        })
        .await;
}

async fn mock_reverse(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/reverse");
            then.status(200).json_body(json!({
                "address": {"town": "Cornish", "county": "Sullivan County"}
            }));
        })
        .await;
}

async fn mock_district<'a>(
    server: &'a MockServer,
    district: &str,
    status: u16,
    body: Value,
) -> httpmock::Mock<'a> {
    let district = district.to_string();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/people").query_param("district", district);
            then.status(status).json_body(body);
        })
        .await
}

fn labels(values: &[nh_rep_finder::DistrictLabel]) -> Vec<&str> {
    values.iter().map(|l| l.as_str()).collect()
}

#[tokio::test]
async fn test_cornish_resolves_base_and_floterial() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    // The same member sits in both seats' results and must appear once.
    let base = mock_district(&server, "Sullivan 2", 200, json!({"results": [person("ocd-person/a", "Sullivan 2")]})).await;
    let floterial = mock_district(
        &server,
        "Sullivan 10",
        200,
        json!({"results": [person("ocd-person/b", "Sullivan 10"), person("ocd-person/a", "Sullivan 10")]}),
    )
    .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let service = service(&config(&server, &base_csv, &town_csv)).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    base.assert_async().await;
    floterial.assert_async().await;
    assert_eq!(result.base_district.as_ref().unwrap().as_str(), "Sullivan 2");
    assert_eq!(labels(&result.districts()), vec!["Sullivan 2", "Sullivan 10"]);
    assert_eq!(result.legislators.len(), 2);
    assert_eq!(result.legislators[0].district.as_str(), "Sullivan 2");
    assert_eq!(result.legislators[0].phone.as_deref(), Some("603-555-0100"));
    assert_eq!(result.diagnostics.town.as_deref(), Some("Cornish"));
    assert_eq!(result.diagnostics.geocoder.as_deref(), Some("census"));
    assert_eq!(result.diagnostics.base_source, "census");
    assert!(result.diagnostics.failed_districts.is_empty());
    assert!(!result.diagnostics.overlay_degraded);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["floterial_districts"], json!(["Sullivan 10"]));
}

#[tokio::test]
async fn test_one_failing_district_is_isolated() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": [person("b", "Sullivan 10")]})).await;
    let broken = mock_district(&server, "Sullivan 11", 503, json!({"detail": "down"})).await;

    let base_csv = csv_file("base_district,floterial_district\nSullivan 2,Sullivan 10; Sullivan 11\n");
    let town_csv = csv_file(TOWN_CSV);
    let service = service(&config(&server, &base_csv, &town_csv)).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    assert_eq!(labels(&result.districts()), vec!["Sullivan 2", "Sullivan 10", "Sullivan 11"]);
    assert_eq!(result.legislators.len(), 2);
    assert_eq!(result.diagnostics.failed_districts.len(), 1);
    assert_eq!(result.diagnostics.failed_districts[0].district.as_str(), "Sullivan 11");
    assert!(result.diagnostics.failed_districts[0].error.contains("503"));
    // One retry, then give up.
    broken.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_empty_address_makes_no_calls() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.path_matches(regex::Regex::new(".*").unwrap());
            then.status(200).json_body(json!({}));
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let service = service(&config(&server, &base_csv, &town_csv)).await;
    let err = service.lookup("").await.unwrap_err();

    assert_eq!(err.stage, Stage::Input);
    assert!(err.is_client_error());
    let body = serde_json::to_value(err.body()).unwrap();
    assert_eq!(body["stage"], "input");
    assert_eq!(body["type"], "ClientInputError");
    any.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_falls_back_to_nominatim() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/geocoder/locations/address");
            then.status(500);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/geocoder/geographies/coordinates");
            then.status(200).json_body(json!({"result": {"geographies": {
                "State Legislative Districts - Lower": [{"BASENAME": "Sullivan 2"}]
            }}}));
        })
        .await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET).path("/search");
            then.status(200).json_body(json!([{
                "lat": "43.47", "lon": "-72.38",
                "address": {"town": "Cornish", "county": "Sullivan County"}
            }]));
        })
        .await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": []})).await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let service = service(&config(&server, &base_csv, &town_csv)).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    search.assert_async().await;
    assert_eq!(result.diagnostics.geocoder.as_deref(), Some("nominatim"));
    assert_eq!(labels(&result.districts()), vec!["Sullivan 2", "Sullivan 10"]);
    assert_eq!(result.legislators.len(), 1);
}

#[tokio::test]
async fn test_both_geocoders_failing_reports_geocode_stage() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/geocoder/locations/address");
            then.status(200).json_body(json!({"result": {"addressMatches": []}}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/search");
            then.status(200).json_body(json!([]));
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let service = service(&config(&server, &base_csv, &town_csv)).await;
    let err = service.lookup(ADDRESS).await.unwrap_err();

    assert_eq!(err.stage, Stage::Geocode);
    assert_eq!(err.body().kind, "GeocodeFailed");
    assert!(err.body().message.contains("nominatim"));
}

#[tokio::test]
async fn test_malformed_csv_rows_are_skipped() {
    let server = MockServer::start_async().await;
    let base_csv = csv_file(
        "\u{feff}\"base_district\",floterial_district\n,Sullivan 12\nSullivan 2,Sullivan 10\nnot a district,Sullivan 11\nSullivan 3\n",
    );
    let town_csv = csv_file("Town,County,District\nCornish,Sullivan County,10\n,Sullivan,11\n");
    let service = service(&config(&server, &base_csv, &town_csv)).await;

    let stats = service.overlay_stats().await;
    assert_eq!(stats.base_to_floterial_count, 1);
    assert_eq!(stats.town_to_floterial_count, 1);
    assert_eq!(stats.base_keys_sample, vec!["Sullivan 2"]);
    assert_eq!(stats.town_keys_sample, vec!["Cornish,Sullivan"]);
}

#[tokio::test]
async fn test_unreachable_overlay_degrades_to_base_only() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/reverse");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/overlay/base.csv");
            then.status(404);
        })
        .await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": []})).await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.overlay.base_csv = Some(server.url("/overlay/base.csv"));
    let service = service(&config).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    assert!(result.diagnostics.overlay_degraded);
    // Reverse geocoding failed, but the census match supplied the town, so
    // the town table still contributes.
    assert_eq!(labels(&result.districts()), vec!["Sullivan 2", "Sullivan 10"]);
}

#[tokio::test]
async fn test_people_geo_records_are_merged() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": []})).await;
    let geo = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/people.geo")
                .header("X-API-KEY", "test-key");
            then.status(200).json_body(json!({"results": [
                person("a", "Sullivan 2"),
                person("b", "Sullivan 10"),
                {"id": "s", "name": "Senator", "current_role": {"org_classification": "upper", "district": "5"}}
            ]}));
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.openstates.use_people_geo = true;
    let service = service(&config).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    geo.assert_async().await;
    assert!(result.diagnostics.point_source_used);
    let ids: Vec<_> = result.legislators.iter().map(|r| r.identity_key()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_people_geo_base_and_signal_share_one_call() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": []})).await;
    let geo = server
        .mock_async(|when, then| {
            when.method(GET).path("/people.geo");
            then.status(200).json_body(json!({"results": [person("a", "Sullivan 2")]}));
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.resolver.base_source = BaseSourceKind::PeopleGeo;
    config.openstates.use_people_geo = true;
    let service = service(&config).await;
    let result = service.lookup(ADDRESS).await.unwrap();

    assert_eq!(result.diagnostics.base_source, "people.geo");
    assert_eq!(result.base_district.as_ref().unwrap().as_str(), "Sullivan 2");
    assert!(result.diagnostics.point_source_used);
    geo.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_census_outage_returns_people_geo_records() {
    let server = MockServer::start_async().await;
    let census = server
        .mock_async(|when, then| {
            when.method(GET).path("/geocoder/geographies/coordinates");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/reverse");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/people.geo");
            then.status(200).json_body(json!({"results": [person("ocd-person/s1", "Sullivan 1")]}));
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.openstates.use_people_geo = true;
    let service = service(&config).await;
    let result = service.lookup_point(GeoPoint::new(43.3, -72.3)).await.unwrap();

    census.assert_async().await;
    assert!(result.base_district.is_none());
    assert!(result.diagnostics.point_fallback);
    assert!(result.diagnostics.base_error.as_deref().unwrap().contains("503"));
    assert_eq!(result.legislators.len(), 1);
    assert_eq!(result.legislators[0].district.as_str(), "Sullivan 1");

    // Without people.geo the same outage is reported against the base stage.
    config.openstates.use_people_geo = false;
    let service = build_service(&config).await.unwrap().service;
    let err = service.lookup_point(GeoPoint::new(43.3, -72.3)).await.unwrap_err();
    assert_eq!(err.stage, Stage::BaseDistrict);
    assert_eq!(serde_json::to_value(err.body()).unwrap()["stage"], "base_district");
}

#[tokio::test]
async fn test_key_votes_attached_to_lookup() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("ocd-person/a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": [person("ocd-person/b", "Sullivan 10")]})).await;
    let votes = server
        .mock_async(|when, then| {
            when.method(GET).path("/house_key_votes.csv");
            then.status(200)
                .body("name,district,HB 1234,SB 12\nRep ocd-person/a,Sullivan 02,Yea,Nay\n");
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.votes.csv = Some(server.url("/house_key_votes.csv"));
    let components = build_service(&config).await.unwrap();
    let first = components.service.lookup(ADDRESS).await.unwrap();
    let second = components.service.lookup(ADDRESS).await.unwrap();

    votes.assert_hits_async(1).await;
    assert!(!first.diagnostics.votes_degraded);
    assert_eq!(first.legislators[0].vote_map["HB 1234"], VoteValue::For);
    assert_eq!(first.legislators[0].vote_map["SB 12"], VoteValue::Against);
    assert!(first.legislators[1].vote_map.is_empty());
    assert_eq!(second.legislators[0].vote_map, first.legislators[0].vote_map);

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["legislators"][0]["vote_map"]["SB 12"], "Against");

    let raw = components.votes.unwrap().raw_csv().await.unwrap();
    assert!(raw.starts_with("name,district"));
}

#[tokio::test]
async fn test_missing_vote_csv_degrades_lookup() {
    let server = MockServer::start_async().await;
    mock_census(&server).await;
    mock_reverse(&server).await;
    mock_district(&server, "Sullivan 2", 200, json!({"results": [person("a", "Sullivan 2")]})).await;
    mock_district(&server, "Sullivan 10", 200, json!({"results": []})).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/house_key_votes.csv");
            then.status(404);
        })
        .await;

    let (base_csv, town_csv) = (csv_file(BASE_CSV), csv_file(TOWN_CSV));
    let mut config = config(&server, &base_csv, &town_csv);
    config.votes.csv = Some(server.url("/house_key_votes.csv"));
    let result = service(&config).await.lookup(ADDRESS).await.unwrap();

    assert!(result.diagnostics.votes_degraded);
    assert_eq!(result.legislators.len(), 1);
    assert!(result.legislators[0].vote_map.is_empty());
}
