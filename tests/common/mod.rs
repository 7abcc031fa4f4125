#![allow(dead_code)]

use std::sync::Arc;

use clickhouse_http_middleware::prelude::*;
use clickhouse_http_middleware::test_utils::{StubConnector, StubTransport};

pub struct Harness {
    pub client: Client,
    pub stub: StubTransport,
    pub connector: Arc<StubConnector>,
}

pub fn config(pool_size: Option<usize>) -> ClientConfig {
    ClientConfig::builder()
        .host("ch.test")
        .database("analytics")
        .user("writer")
        .password("pw")
        .pool_size(pool_size)
        .finish()
}

/// Opened client backed by a scripted transport.
pub async fn open_client(pool_size: Option<usize>) -> Result<Harness, ClickhouseError> {
    let stub = StubTransport::new();
    let connector = Arc::new(StubConnector::new(stub.clone()));
    let client = Client::with_connector(config(pool_size), connector.clone())?;
    client.open().await?;
    Ok(Harness {
        client,
        stub,
        connector,
    })
}
