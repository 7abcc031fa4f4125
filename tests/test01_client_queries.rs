mod common;

use clickhouse_http_middleware::prelude::*;
use futures_util::TryStreamExt;
use reqwest::Method;
use serde_json::{Value, json};

use common::open_client;

#[tokio::test]
async fn query_posts_formatted_sql_with_session_and_defaults() -> Result<(), ClickhouseError> {
    let h = open_client(Some(4)).await?;
    h.stub.push_response(200, "");

    let res = h
        .client
        .query(
            "CREATE TABLE t (id UInt32, name String) ENGINE = Memory COMMENT ?",
            &[json!("o'neil")],
            Some("my-query"),
        )
        .await?;
    assert_eq!(res, QueryResponse::Plain(String::new()));

    let sent = h.stub.requests().remove(0);
    assert_eq!(sent.method, Method::POST);
    assert_eq!(
        sent.body.as_deref(),
        Some(r"CREATE TABLE t (id UInt32, name String) ENGINE = Memory COMMENT 'o\'neil'")
    );
    assert_eq!(sent.param("query_id").as_deref(), Some("my-query"));
    assert!(sent.param("session_id").is_some());
    assert_eq!(sent.param("session_timeout").as_deref(), Some("60"));
    assert_eq!(
        sent.param("output_format_json_quote_64bit_integers").as_deref(),
        Some("0")
    );
    assert_eq!(sent.param("enable_http_compression").as_deref(), Some("1"));
    assert_eq!(sent.param("query"), None);
    assert_eq!(sent.headers["x-clickhouse-database"], "analytics");
    assert_eq!(sent.headers["x-clickhouse-user"], "writer");
    assert_eq!(sent.headers["x-clickhouse-key"], "pw");
    assert_eq!(sent.headers["content-type"], "application/json");
    Ok(())
}

#[tokio::test]
async fn generated_query_ids_are_unique() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.client.query("SELECT 1", &[], None).await?;
    h.client.query("SELECT 1", &[], None).await?;
    let sent = h.stub.requests();
    assert_ne!(sent[0].param("query_id"), sent[1].param("query_id"));
    // One-slot pool: both requests reuse the same session.
    assert_eq!(sent[0].param("session_id"), sent[1].param("session_id"));
    Ok(())
}

#[tokio::test]
async fn select_json_appends_format_and_parses() -> Result<(), ClickhouseError> {
    let h = open_client(Some(2)).await?;
    h.stub.push_response(
        200,
        r#"{"meta":[{"name":"n","type":"UInt64"}],"data":[{"n":1},{"n":2}],"rows":2}"#,
    );

    let res = h
        .client
        .select_json("SELECT number AS n FROM numbers(?);;", &[json!(2)], None)
        .await?;
    assert_eq!(
        h.stub.requests()[0].body.as_deref(),
        Some("SELECT number AS n FROM numbers(2) FORMAT JSON")
    );
    assert_eq!(res.rows(), Some(2));
    assert_eq!(res.data(), Some(&vec![json!({"n": 1}), json!({"n": 2})]));
    let tagged = res.into_json();
    assert_eq!(tagged["status"], "ok");
    assert_eq!(tagged["type"], "json");
    Ok(())
}

#[tokio::test]
async fn server_error_carries_code_and_message() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.stub
        .push_response(404, "Code: 60, DB::Exception: Table default.x doesn't exist");

    let err = h
        .client
        .query("SELECT * FROM x", &[], None)
        .await
        .unwrap_err();
    let req = err.as_request_error().expect("request error");
    assert_eq!(req.status_code, 404);
    assert_eq!(req.code, Some(60));
    assert_eq!(req.message.as_deref(), Some("Table default.x doesn't exist"));

    // The session went back to the pool.
    assert_eq!(h.client.session_status().map(|s| s.available), Some(1));
    Ok(())
}

#[tokio::test]
async fn plain_text_responses_are_successes() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.stub.push_response(200, "1\tfoo\n2\tbar\n");
    let res = h
        .client
        .query("SELECT * FROM t FORMAT TabSeparated", &[], None)
        .await?;
    assert_eq!(res.text(), Some("1\tfoo\n2\tbar\n"));
    Ok(())
}

#[tokio::test]
async fn blank_sql_fails_before_any_request() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    let err = h.client.query("   ", &[], None).await.unwrap_err();
    assert!(matches!(err, ClickhouseError::MissingQuery));
    assert!(err.is_validation());
    let err = h.client.select_json("", &[], None).await.unwrap_err();
    assert!(matches!(err, ClickhouseError::MissingQuery));
    assert_eq!(h.stub.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn ping_expects_ok_marker() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.stub.push_response(200, "Ok.\n");
    let res = h.client.ping().await?;
    assert_eq!(res.text(), Some("Ok."));
    let sent = h.stub.requests().remove(0);
    assert_eq!(sent.method, Method::GET);
    assert_eq!(sent.path, "/ping");
    assert!(sent.body.is_none());

    h.stub.push_response(200, "Hello");
    assert!(matches!(
        h.client.ping().await,
        Err(ClickhouseError::ConnectionError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn operations_require_open() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.client.close().await;
    assert!(h.stub.is_closed());
    assert!(matches!(
        h.client.query("SELECT 1", &[], None).await,
        Err(ClickhouseError::NotOpen)
    ));
    assert!(matches!(h.client.ping().await, Err(ClickhouseError::NotOpen)));
    assert_eq!(h.client.session_status(), None);

    // Reopening restores service.
    h.client.open().await?;
    h.client.query("SELECT 1", &[], None).await?;
    assert_eq!(h.connector.connects(), 2);
    Ok(())
}

#[tokio::test]
async fn query_stream_decodes_json_rows() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.stub.push_response(200, "{\"n\":\"0\"}\n{\"n\":\"1\"}\n");

    let stream = h
        .client
        .query_stream("SELECT number AS n FROM numbers(2) FORMAT JSONEachRow", &[], None)
        .await?;
    assert_eq!(h.client.session_status().map(|s| s.available), Some(0));
    let rows: Vec<Value> = stream.json_rows().try_collect().await?;
    assert_eq!(rows, vec![json!({"n": "0"}), json!({"n": "1"})]);
    assert_eq!(h.client.session_status().map(|s| s.available), Some(1));
    Ok(())
}

#[tokio::test]
async fn query_stream_reports_error_status_up_front() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    h.stub
        .push_response(500, "Code: 62. DB::Exception: Syntax error: failed at position 1\n");
    let err = h
        .client
        .query_stream("SELEC 1", &[], None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(err.as_request_error().and_then(|e| e.code), Some(62));
    assert_eq!(h.client.session_status().map(|s| s.available), Some(1));
    Ok(())
}

struct UppercaseFormatter;

impl SqlFormatter for UppercaseFormatter {
    fn format(&self, sql: &str, _params: &[Value]) -> Result<String, ClickhouseError> {
        Ok(sql.to_uppercase())
    }
}

#[tokio::test]
async fn custom_formatter_is_used() -> Result<(), ClickhouseError> {
    let stub = clickhouse_http_middleware::test_utils::StubTransport::new();
    let connector = std::sync::Arc::new(
        clickhouse_http_middleware::test_utils::StubConnector::new(stub.clone()),
    );
    let client = Client::with_connector(common::config(Some(1)), connector)?
        .with_formatter(std::sync::Arc::new(UppercaseFormatter))?;
    client.open().await?;
    client.query("select 1", &[], None).await?;
    assert_eq!(stub.requests()[0].body.as_deref(), Some("SELECT 1"));
    Ok(())
}

#[tokio::test]
async fn formatter_cannot_be_swapped_on_a_shared_client() -> Result<(), ClickhouseError> {
    let h = open_client(Some(1)).await?;
    let _shared = h.client.clone();
    let err = h
        .client
        .clone()
        .with_formatter(std::sync::Arc::new(UppercaseFormatter))
        .unwrap_err();
    assert!(matches!(err, ClickhouseError::ConfigError(_)));
    Ok(())
}
