//! End-to-end units of work against sqlite.

use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;

use sqltx::context::{Context, ContextError};
use sqltx::db::{Database, DatabaseConfig};
use sqltx::driver::{DriverError, SqliteConfig, SqlitePool};
use sqltx::transaction::{TransactionError, TransactionResult};

#[derive(Debug, Deserialize, PartialEq)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

fn setup() -> (TempDir, SqlitePool, Database) {
    let dir = TempDir::new().unwrap();
    let pool = SqlitePool::open(SqliteConfig::new(dir.path().join("bank.db")).max_connections(2)).unwrap();
    pool.execute_batch(
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL);
         CREATE TABLE transfers (
             id INTEGER PRIMARY KEY,
             account_id INTEGER NOT NULL REFERENCES accounts(id) DEFERRABLE INITIALLY DEFERRED,
             amount INTEGER NOT NULL
         );",
    )
    .unwrap();
    let db = Database::new(pool.clone(), DatabaseConfig::new("bank"));
    (dir, pool, db)
}

fn count(pool: &SqlitePool, table: &str) -> i64 {
    let rs = pool.query(&format!("SELECT COUNT(*) AS n FROM {table}"), &[]).unwrap();
    rs.first_value().and_then(Value::as_i64).unwrap()
}

#[test_log::test]
fn test_nested_rollback_keeps_outer_work() {
    let (_dir, pool, db) = setup();

    let result: TransactionResult<()> = db.transaction(|ctx, tx| {
        tx.exec("INSERT INTO accounts (owner, balance) VALUES (?, ?)", &[json!("ada"), json!(100)])?;

        let inner: TransactionResult<()> = db.transaction_ctx(ctx, |_ctx, tx| {
            tx.exec("INSERT INTO accounts (owner, balance) VALUES (?, ?)", &[json!("alan"), json!(50)])?;
            tx.exec("INSERT INTO accounts (owner) VALUES (?)", &[json!("nobody")])?;
            Ok(())
        });
        assert!(matches!(inner, Err(TransactionError::Driver(DriverError::Sqlite(_)))));

        let accounts: Vec<Account> = tx.get_structs("SELECT * FROM accounts", &[])?;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].owner, "ada");
        Ok(())
    });

    result.unwrap();
    assert_eq!(count(&pool, "accounts"), 1);
    assert_eq!(pool.available(), pool.created());
}

#[test_log::test]
fn test_outer_failure_discards_released_levels() {
    let (_dir, pool, db) = setup();

    let result: TransactionResult<()> = db.transaction(|ctx, _tx| {
        let inner: TransactionResult<()> = db.transaction_ctx(ctx, |_ctx, tx| {
            tx.exec("INSERT INTO accounts (owner, balance) VALUES ('grace', 10)", &[])?;
            Ok(())
        });
        inner?;
        Err(TransactionError::Count("audit rejected".into()))
    });

    assert!(result.is_err());
    assert_eq!(count(&pool, "accounts"), 0);
}

#[test_log::test]
fn test_deferred_constraint_fails_commit() {
    let (_dir, pool, db) = setup();

    let result: TransactionResult<i64> = db.transaction(|_ctx, tx| {
        let res = tx.exec("INSERT INTO transfers (account_id, amount) VALUES (?, ?)", &[json!(42), json!(5)])?;
        Ok(res.last_insert_id.unwrap_or_default())
    });

    assert!(matches!(result, Err(TransactionError::Driver(DriverError::Sqlite(_)))));
    assert_eq!(count(&pool, "transfers"), 0);
    // The connection went back to the pool out of its transaction.
    assert_eq!(pool.available(), pool.created());
}

#[test_log::test]
fn test_cancelled_context_rolls_back() {
    let (_dir, pool, db) = setup();
    let (ctx, cancel) = Context::background().with_cancel();

    let result: TransactionResult<()> = db.transaction_ctx(&ctx, |_ctx, tx| {
        tx.exec("INSERT INTO accounts (owner, balance) VALUES ('ada', 1)", &[])?;
        cancel.cancel();
        tx.exec("INSERT INTO accounts (owner, balance) VALUES ('alan', 2)", &[])?;
        Ok(())
    });

    match result {
        Err(TransactionError::Driver(DriverError::Context(err))) => assert_eq!(err, ContextError::Cancelled),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(count(&pool, "accounts"), 0);
}

#[test_log::test]
fn test_count_and_scan_inside_unit() {
    let (_dir, _pool, db) = setup();

    let result: TransactionResult<(i64, Option<Account>)> = db.transaction(|_ctx, tx| {
        for (owner, balance) in [("ada", 30), ("alan", 20), ("grace", 10)] {
            tx.exec("INSERT INTO accounts (owner, balance) VALUES (?, ?)", &[json!(owner), json!(balance)])?;
        }
        let rich = tx.get_count("SELECT owner FROM accounts WHERE balance >= ? ORDER BY owner", &[json!(20)])?;
        let poorest = tx.get_scan("SELECT * FROM accounts ORDER BY balance", &[])?;
        Ok((rich, poorest))
    });

    let (rich, poorest) = result.unwrap();
    assert_eq!(rich, 2);
    assert_eq!(
        poorest,
        Some(Account {
            id: 3,
            owner: "grace".into(),
            balance: 10
        })
    );
}
