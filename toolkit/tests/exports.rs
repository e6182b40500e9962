mod common;

use std::fs;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use toolkit::export::{backup, export_csv, fetch_all, read_backup, write_backup};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves three asset rows two at a time, whatever page size is asked for.
async fn mount_capped_assets(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("offset", "0"))
        .and(query_param("order", "id.asc"))
        .respond_with(page(json!([{"id": "a1"}, {"id": "a2"}]), 0, 3))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("offset", "2"))
        .respond_with(page(json!([{"id": "a3"}]), 2, 3))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetch_all_reads_every_page() {
    let (server, client) = setup().await;
    mount_capped_assets(&server).await;

    let rows = fetch_all(&client, "assets", 2).await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a3"]);
}

#[tokio::test]
async fn pages_capped_below_page_size_are_not_mistaken_for_the_end() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a1"}])))
        .mount(&server)
        .await;
    mount_capped_assets(&server).await;

    let doc = backup(&client, &["assets".to_string()], 5).await;
    assert!(doc.skipped.is_empty());
    assert_eq!(doc.backup_info.record_count, 3);
    assert_eq!(doc.tables["assets"].data.len(), 3);
}

#[tokio::test]
async fn without_a_count_paging_runs_to_an_empty_page() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a1"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("offset", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a2"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = fetch_all(&client, "assets", 10).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn backup_skips_absent_tables_and_keeps_counts_consistent() {
    let (server, client) = setup().await;
    mount_rows(
        &server,
        "companies",
        json!([{"id": "c1", "name": "Acme, Inc.", "code": null}]),
    )
    .await;
    mount_rows(&server, "locations", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/legacy_parts"))
        .respond_with(missing_table("legacy_parts"))
        .mount(&server)
        .await;

    let tables: Vec<String> = ["companies", "locations", "legacy_parts"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let doc = backup(&client, &tables, 100).await;

    assert_eq!(doc.backup_info.table_count, 2);
    assert_eq!(doc.backup_info.record_count, 1);
    assert_eq!(doc.backup_info.source, server.uri());
    assert_eq!(doc.skipped.len(), 1);
    assert_eq!(doc.skipped[0].table, "legacy_parts");
    assert_eq!(
        doc.tables["locations"].table_info.columns,
        vec!["id", "name", "created_at"]
    );

    let dir = tempfile::tempdir().unwrap();
    let (json_path, txt_path) = write_backup(&doc, dir.path()).unwrap();
    let parsed = read_backup(&json_path).unwrap();
    assert_eq!(parsed, doc);
    assert!(parsed.inconsistent_tables().is_empty());
    assert!(fs::read_to_string(txt_path).unwrap().contains("legacy_parts"));
}

#[tokio::test]
async fn csv_export_writes_one_file_per_table() {
    let (server, client) = setup().await;
    mount_rows(
        &server,
        "work_orders",
        json!([
            {"id": "WO-1", "title": "Replace seal, \"north\" pump", "actual_hours": 1.5},
            {"id": "WO-2", "title": "Inspect", "actual_hours": null}
        ]),
    )
    .await;
    mount_rows(&server, "locations", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream timeout"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let tables: Vec<String> = ["work_orders", "locations", "broken"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let report = export_csv(&client, &tables, 100, dir.path()).await.unwrap();

    assert_eq!(
        report.files,
        vec![("work_orders".to_string(), 2), ("locations".to_string(), 0)]
    );
    assert_eq!(report.total_rows(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("upstream timeout"));

    let work_orders = fs::read_to_string(report.directory.join("work_orders.csv")).unwrap();
    assert_eq!(
        work_orders,
        "id,title,actual_hours\nWO-1,\"Replace seal, \"\"north\"\" pump\",1.5\nWO-2,Inspect,\n"
    );
    let locations = fs::read_to_string(report.directory.join("locations.csv")).unwrap();
    assert_eq!(locations, "id,name,created_at\n");
    assert!(report.directory.join("export_summary.txt").exists());
    assert!(!report.directory.join("broken.csv").exists());
}
