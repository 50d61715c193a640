//! End-to-end scenarios against a live PostgreSQL server.
//!
//! Run with a local server accepting password auth for the test role:
//! `cargo test --test integration -- --ignored`

use pglane::{Config, DatabaseErrorKind, ParamStyle, PgError, TransactionStatus, Value};

const HOST: &str = "localhost";
const PORT: u16 = 5432;
const USER: &str = "pglane";
const PASSWORD: &str = "pglane_test";
const DATABASE: &str = "pglane_test";

fn config() -> Config {
    Config::new(USER)
        .host(HOST)
        .port(PORT)
        .database(DATABASE)
        .password(PASSWORD)
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_temp_table_round_trip() {
    let mut conn = config().connect().await.unwrap();
    let mut cur = conn.cursor();

    cur.execute("CREATE TEMP TABLE t(id int, name varchar)", &[]).await.unwrap();
    cur.execute("INSERT INTO t VALUES (1, 'hello')", &[]).await.unwrap();
    assert_eq!(cur.rows_affected(), 1);

    cur.execute("SELECT * FROM t WHERE id = %s", &[Value::Int4(1)]).await.unwrap();
    let row = cur.fetchone().expect("one row");
    assert_eq!(row.get(0), Some(&Value::Int4(1)));
    assert_eq!(row.get_named("name"), Some(&Value::Text("hello".to_string())));
    assert!(cur.fetchone().is_none());

    drop(cur);
    conn.commit().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_failed_transaction_gate() {
    let mut conn = config().connect().await.unwrap();
    let mut cur = conn.cursor();

    let err = cur.execute("SELECT 1/0", &[]).await.unwrap_err();
    match err {
        PgError::Database(e) => {
            assert_eq!(e.code, "22012");
            assert_eq!(e.kind(), DatabaseErrorKind::Data);
        }
        other => panic!("expected database error, got {:?}", other),
    }

    // The block is failed; anything but rollback is refused locally.
    let err = cur.execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PgError::InFailedTransaction));

    drop(cur);
    conn.rollback().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    let mut cur = conn.cursor();
    cur.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(cur.fetchone().unwrap().get(0), Some(&Value::Int4(1)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_int_array_same_value_in_both_formats() {
    let mut conn = config().connect().await.unwrap();
    let mut cur = conn.cursor();
    let expected = Value::Array(vec![Value::Int4(1), Value::Int4(2), Value::Null, Value::Int4(4)]);

    // Simple-query path: text format.
    cur.execute("SELECT '{1,2,NULL,4}'::int[]", &[]).await.unwrap();
    assert_eq!(cur.fetchone().unwrap().get(0), Some(&expected));

    // Extended path: the registry asks for binary arrays.
    cur.execute("SELECT '{1,2,NULL,4}'::int[] WHERE %s", &[Value::Bool(true)]).await.unwrap();
    assert_eq!(cur.fetchone().unwrap().get(0), Some(&expected));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_vacuum_uses_the_simple_path() {
    let mut conn = config().connect().await.unwrap();
    conn.set_autocommit(true);
    let mut cur = conn.cursor();
    // VACUUM cannot run inside a transaction block; this only works because
    // a parameter-less execute is a single simple-query round trip with no
    // implicit BEGIN under autocommit.
    cur.execute("VACUUM", &[]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with ssl = off"]
async fn test_ssl_refusal_is_reported() {
    let err = config().ssl(true).connect().await.unwrap_err();
    match err {
        PgError::Protocol(msg) => assert!(msg.contains("SSL refused"), "got {:?}", msg),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_cancel_running_query() {
    let mut conn = config().connect().await.unwrap();
    let token = conn.cancel_token();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        token.cancel().await.unwrap();
    });

    let mut cur = conn.cursor();
    let err = cur.execute("SELECT pg_sleep(60)", &[]).await.unwrap_err();
    match err {
        PgError::Database(e) => {
            assert_eq!(e.code, "57014");
            assert_eq!(e.kind(), DatabaseErrorKind::Operational);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    drop(cur);
    canceller.await.unwrap();

    conn.rollback().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_autocommit_off_opens_a_block() {
    let mut conn = config().connect().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    let mut cur = conn.cursor();
    cur.execute("SELECT 1", &[]).await.unwrap();
    drop(cur);
    assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);

    conn.rollback().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_statement_cache_parses_once() {
    let mut conn = config().connect().await.unwrap();
    let mut cur = conn.cursor();
    cur.execute("SELECT %s::int + 1", &[Value::Int4(1)]).await.unwrap();
    cur.execute("SELECT %s::int + 1", &[Value::Int4(2)]).await.unwrap();
    assert_eq!(cur.fetchone().unwrap().get(0), Some(&Value::Int4(3)));
    drop(cur);
    // Same SQL, same inferred OIDs: one cached statement, one Parse.
    assert_eq!(conn.statement_cache_len(), 1);

    let mut cur = conn.cursor();
    cur.execute("SELECT %s::int + 1", &[Value::Int8(2)]).await.unwrap();
    drop(cur);
    // Different parameter OIDs prepare a second statement.
    assert_eq!(conn.statement_cache_len(), 2);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_named_paramstyle() {
    let mut conn = config().paramstyle(ParamStyle::Named).connect().await.unwrap();
    let mut cur = conn.cursor();
    cur.execute_named(
        "SELECT :a::int + :b::int, :a::int",
        &[("a", Value::Int4(2)), ("b", Value::Int4(3))],
    )
    .await
    .unwrap();
    let row = cur.fetchone().unwrap();
    assert_eq!(row.get(0), Some(&Value::Int4(5)));
    assert_eq!(row.get(1), Some(&Value::Int4(2)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_numeric_and_timestamp_round_trip() {
    let mut conn = config().connect().await.unwrap();
    let mut cur = conn.cursor();

    cur.execute("SELECT %s::numeric", &[Value::Numeric(pglane::Numeric::new("123.456"))])
        .await
        .unwrap();
    assert_eq!(
        cur.fetchone().unwrap().get(0),
        Some(&Value::Numeric(pglane::Numeric::new("123.456")))
    );

    let ts = pglane::Timestamp::from_pg_usec(151_496_634_000_000);
    cur.execute("SELECT %s::timestamp", &[Value::Timestamp(ts)]).await.unwrap();
    assert_eq!(cur.fetchone().unwrap().get(0), Some(&Value::Timestamp(ts)));
}
