//! PostgreSQL split read tests
//!
//! Each test starts its own PostgreSQL container.
//! Run with: cargo test --features postgres -- --ignored

mod harness;

use harness::postgres::{backend_pid, in_transaction, open_cursors};
use harness::*;
use pretty_assertions::assert_eq;
use rivven_snapshot::common::{
    CdcError, ChannelEventSink, Lsn, MemorySchemaProvider, NoopProgressReporter, PositionSource,
    RowCursor, RowStream, SchemaProvider, SnapshotResult, SnapshotSplitReadConfig,
    SnapshotSplitReadTask, SplitDescriptor, SplitEvent, SplitKeyType, SplitReadContext, TableId,
    TableSchema,
};
use rivven_snapshot::postgres::{
    PostgresPositionSource, PostgresRowCursor, PostgresSchemaProvider,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn table(name: &str) -> TableId {
    TableId::new("public", name)
}

async fn drain(mut rx: mpsc::Receiver<SplitEvent<Lsn>>) -> Vec<SplitEvent<Lsn>> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn rows(events: &[SplitEvent<Lsn>]) -> Vec<Vec<Value>> {
    events
        .iter()
        .filter_map(|e| match e {
            SplitEvent::DataChange(dc) => Some(dc.row.values().to_vec()),
            _ => None,
        })
        .collect()
}

/// Run one split on a fresh session and check the session is left clean.
async fn run_split(
    pg: &PostgresTestContainer,
    split: SplitDescriptor,
    schemas: Option<Arc<dyn SchemaProvider>>,
    fetch_size: usize,
) -> anyhow::Result<(SnapshotResult<Lsn>, Vec<SplitEvent<Lsn>>)> {
    let client = pg.new_client().await?;
    let schemas: Arc<dyn SchemaProvider> = match schemas {
        Some(schemas) => schemas,
        None => Arc::new(PostgresSchemaProvider::new(client.clone())),
    };
    let (sink, rx) = ChannelEventSink::channel(1024);

    let task = SnapshotSplitReadTask::new(
        split,
        PostgresPositionSource::new(client.clone()),
        PostgresRowCursor::new(client.clone()),
        sink,
        NoopProgressReporter,
        schemas,
    )
    .with_config(SnapshotSplitReadConfig::builder().fetch_size(fetch_size).build());

    let result = task.execute(&mut SplitReadContext::default()).await;
    let events = drain(rx).await;
    assert_eq!(open_cursors(&client).await?, 0);
    Ok((result, events))
}

async fn create_orders(pg: &PostgresTestContainer) -> anyhow::Result<()> {
    pg.execute(
        "CREATE TABLE orders (id bigint PRIMARY KEY, note text NOT NULL);
         INSERT INTO orders SELECT g, 'note ' || g FROM generate_series(1, 25) g;",
    )
    .await
}

#[tokio::test]
#[ignore]
async fn test_pg_split_fetched_in_batches() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    create_orders(&pg).await?;

    let split = SplitDescriptor::new("orders-1", table("orders"), "id", SplitKeyType::Int64)
        .with_start(5)
        .with_end(20)
        .with_exclusive_end();
    let (result, events) = run_split(&pg, split, None, 4).await?;

    assert!(result.is_completed(), "{result:?}");
    assert_eq!(events.assert_bracketed("orders-1", &table("orders")), 15);
    let rows = rows(&events);
    let keys: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(keys, (5..20).map(|k| json!(k)).collect::<Vec<_>>());
    assert_eq!(rows[0], vec![json!(5), json!("note 5")]);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_empty_split() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    create_orders(&pg).await?;

    let split = SplitDescriptor::new("orders-empty", table("orders"), "id", SplitKeyType::Int64)
        .with_start(1000)
        .with_end(2000);
    let (result, events) = run_split(&pg, split, None, 8).await?;

    assert!(result.is_completed());
    assert_eq!(events.assert_bracketed("orders-empty", &table("orders")), 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_lost_session_fails_and_stays_failed() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    create_orders(&pg).await?;

    let client = pg.new_client().await?;
    let admin = pg.new_client().await?;
    let pid = backend_pid(&client).await?;

    let schema = PostgresSchemaProvider::new(client.clone())
        .table_schema(&table("orders"))
        .await?;
    let split = SplitDescriptor::new("orders-all", table("orders"), "id", SplitKeyType::Int64);
    let mut stream = PostgresRowCursor::new(client.clone())
        .open(&split, &schema, 2)
        .await?;

    assert!(stream.next_row().await?.is_some());
    assert!(stream.next_row().await?.is_some());
    assert!(in_transaction(&admin, pid).await?);

    admin
        .execute("SELECT pg_terminate_backend($1)", &[&pid])
        .await?;

    let err = stream.next_row().await.err().expect("fetch after termination");
    assert!(matches!(err, CdcError::ScanFailed { .. }), "{err:?}");
    assert!(err.is_retriable());

    let again = stream.next_row().await.err().expect("stream stays failed");
    let poisoned = matches!(
        &again,
        CdcError::ScanFailed { message, .. } if message.contains("already failed")
    );
    assert!(poisoned, "{again:?}");
    assert!(stream.close().await.is_err());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_dropped_column_narrows_row() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    pg.execute(
        "CREATE TABLE wide (id integer PRIMARY KEY, a text, b text, c text);
         INSERT INTO wide VALUES (1, 'a1', 'b1', 'c1'), (2, 'a2', 'b2', NULL);
         ALTER TABLE wide DROP COLUMN b;",
    )
    .await?;

    let split = SplitDescriptor::new("wide-all", table("wide"), "id", SplitKeyType::Int32);
    let (result, events) = run_split(&pg, split, None, 16).await?;

    assert!(result.is_completed());
    assert_eq!(
        rows(&events),
        vec![
            vec![json!(1), json!("a1"), json!("c1")],
            vec![json!(2), json!("a2"), Value::Null],
        ]
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_rows_follow_schema_column_order() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    pg.execute(
        "CREATE TABLE wide (id integer PRIMARY KEY, a text, c text);
         INSERT INTO wide VALUES (1, 'a1', 'c1');",
    )
    .await?;

    let provider = MemorySchemaProvider::new();
    provider
        .register(
            TableSchema::new(table("wide"))
                .with_column("c", "text")
                .with_column("id", "integer")
                .with_column("a", "text"),
        )
        .await;

    let provider: Arc<dyn SchemaProvider> = Arc::new(provider);
    let split = SplitDescriptor::new("wide-all", table("wide"), "id", SplitKeyType::Int32);
    let (result, events) = run_split(&pg, split, Some(provider), 16).await?;

    assert!(result.is_completed());
    assert_eq!(rows(&events), vec![vec![json!("c1"), json!(1), json!("a1")]]);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_types_without_binary_decoding_arrive_as_text() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    pg.execute(
        "CREATE TYPE mood AS ENUM ('sad', 'happy');
         CREATE TABLE odd (
             id integer PRIMARY KEY,
             amount numeric,
             feeling mood,
             span interval,
             addr inet,
             tags integer[],
             at timetz
         );
         INSERT INTO odd VALUES
             (1, 'NaN', 'happy', '1 day 2 hours', '10.0.0.1', '{1,2,3}', '10:30:00+02'),
             (2, 'Infinity', 'sad', '90 minutes', '192.168.0.0/24', '{}', '23:59:59-05'),
             (3, 123456789012345678901234567890.123456789, NULL, NULL, NULL, NULL, NULL);",
    )
    .await?;

    let split = SplitDescriptor::new("odd-all", table("odd"), "id", SplitKeyType::Int32);
    let (result, events) = run_split(&pg, split, None, 2).await?;

    assert!(result.is_completed(), "{result:?}");
    assert_eq!(
        rows(&events),
        vec![
            vec![
                json!(1),
                json!("NaN"),
                json!("happy"),
                json!("1 day 02:00:00"),
                json!("10.0.0.1"),
                json!("{1,2,3}"),
                json!("10:30:00+02"),
            ],
            vec![
                json!(2),
                json!("Infinity"),
                json!("sad"),
                json!("01:30:00"),
                json!("192.168.0.0/24"),
                json!("{}"),
                json!("23:59:59-05"),
            ],
            vec![
                json!(3),
                json!("123456789012345678901234567890.123456789"),
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null,
            ],
        ]
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_adjacent_big_numeric_keys() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    pg.execute(
        "CREATE TABLE ledger (id numeric PRIMARY KEY);
         INSERT INTO ledger VALUES
             (100000000000000000000), (100000000000000000001),
             (100000000000000000002), (100000000000000000003);",
    )
    .await?;

    let split = SplitDescriptor::new("ledger-1", table("ledger"), "id", SplitKeyType::Numeric)
        .with_start("100000000000000000001")
        .with_end("100000000000000000003")
        .with_exclusive_end();
    let (result, events) = run_split(&pg, split, None, 16).await?;

    assert!(result.is_completed(), "{result:?}");
    assert_eq!(
        rows(&events),
        vec![
            vec![json!("100000000000000000001")],
            vec![json!("100000000000000000002")],
        ]
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_dropped_stream_rolls_back() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    create_orders(&pg).await?;

    let client = pg.new_client().await?;
    let admin = pg.new_client().await?;
    let pid = backend_pid(&client).await?;

    let schema = PostgresSchemaProvider::new(client.clone())
        .table_schema(&table("orders"))
        .await?;
    let split = SplitDescriptor::new("orders-all", table("orders"), "id", SplitKeyType::Int64);
    let mut stream = PostgresRowCursor::new(client.clone())
        .open(&split, &schema, 4)
        .await?;
    assert!(stream.next_row().await?.is_some());
    assert_eq!(open_cursors(&client).await?, 1);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!in_transaction(&admin, pid).await?);
    assert_eq!(open_cursors(&client).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pg_position_and_schema() -> anyhow::Result<()> {
    init_test_logging();
    let pg = PostgresTestContainer::start().await?;
    let client = pg.new_client().await?;
    let positions = PostgresPositionSource::new(client.clone());

    let before = positions.current_position().await?;
    create_orders(&pg).await?;
    let after = positions.current_position().await?;
    assert!(after > before, "{before} -> {after}");

    let schemas = PostgresSchemaProvider::new(client);
    let schema = schemas.table_schema(&table("orders")).await?;
    assert_eq!(schema.column_names(), vec!["id", "note"]);
    assert!(!schema.columns[1].nullable);

    let missing = schemas.table_schema(&table("missing")).await.unwrap_err();
    assert!(matches!(missing, CdcError::Schema(_)));
    Ok(())
}
