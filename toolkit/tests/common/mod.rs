#![allow(dead_code)]

use serde_json::{json, Value};
use toolkit::{Config, RestClient};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::{method, path};

pub const ANON_KEY: &str = "anon-test-key";

/// Mock server plus a client pointed at it.
pub async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let client = RestClient::new(&config_for(&server)).unwrap();
    (server, client)
}

pub fn config_for(server: &MockServer) -> Config {
    let uri = server.uri();
    Config::from_lookup(move |k: &str| match k {
        "SUPABASE_URL" => Some(uri.clone()),
        "SUPABASE_ANON_KEY" => Some(ANON_KEY.to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn table_path(table: &str) -> String {
    format!("/rest/v1/{}", table)
}

pub fn postgrest_error(status: u16, code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "code": code,
        "message": message,
        "details": null,
        "hint": null,
    }))
}

pub fn missing_table(table: &str) -> ResponseTemplate {
    postgrest_error(
        404,
        "42P01",
        &format!("relation \"public.{}\" does not exist", table),
    )
}

pub fn missing_column(table: &str, column: &str) -> ResponseTemplate {
    postgrest_error(
        400,
        "42703",
        &format!("column {}.{} does not exist", table, column),
    )
}

pub fn missing_function(function: &str) -> ResponseTemplate {
    postgrest_error(
        404,
        "PGRST202",
        &format!(
            "Could not find the function public.{}(sql) in the schema cache",
            function
        ),
    )
}

/// `rows` as one page of a `total`-row result, with its `Content-Range`.
pub fn page(rows: Value, offset: usize, total: usize) -> ResponseTemplate {
    let len = rows.as_array().map(Vec::len).unwrap_or(0);
    let range = if len == 0 {
        format!("*/{}", total)
    } else {
        format!("{}-{}/{}", offset, offset + len - 1, total)
    };
    ResponseTemplate::new(200)
        .insert_header("Content-Range", range.as_str())
        .set_body_json(rows)
}

/// Any GET on `table` answers with all of `rows`.
pub async fn mount_rows(server: &MockServer, table: &str, rows: Value) {
    let total = rows.as_array().map(Vec::len).unwrap_or(0);
    Mock::given(method("GET"))
        .and(path(table_path(table)))
        .respond_with(page(rows, 0, total))
        .mount(server)
        .await;
}
