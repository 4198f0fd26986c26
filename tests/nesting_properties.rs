//! Property tests over random trees of nested units of work.
//!
//! Each unit runs one statement, then its children, then succeeds or fails.
//! Child failures are absorbed by the parent, so the outcome of every level
//! is decided only by its own flag.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use sqltx::context::Context;
use sqltx::db::{Database, DatabaseConfig};
use sqltx::driver::MemoryDriver;
use sqltx::trace::MemorySink;
use sqltx::transaction::{tx_from_ctx, TransactionError};

#[derive(Debug, Clone)]
struct Unit {
    fail: bool,
    children: Vec<Unit>,
}

#[derive(Debug)]
enum UnitError {
    Failed,
    Tx(TransactionError),
}

impl From<TransactionError> for UnitError {
    fn from(e: TransactionError) -> Self {
        UnitError::Tx(e)
    }
}

fn unit_strategy() -> impl Strategy<Value = Unit> {
    let leaf = any::<bool>().prop_map(|fail| Unit {
        fail,
        children: Vec::new(),
    });
    leaf.prop_recursive(4, 32, 4, |inner| {
        (any::<bool>(), prop::collection::vec(inner, 0..4))
            .prop_map(|(fail, children)| Unit { fail, children })
    })
}

fn run(db: &Database, ctx: &Context, unit: &Unit) -> Result<(), UnitError> {
    db.transaction_ctx(ctx, |ctx, tx| {
        tx.exec("UPDATE t SET n = n + ?", &[json!(1)])?;
        for child in &unit.children {
            let _ = run(db, ctx, child);
        }
        if unit.fail {
            Err(UnitError::Failed)
        } else {
            Ok(())
        }
    })
}

fn expected(unit: &Unit, depth: usize, out: &mut Vec<String>) {
    if depth == 0 {
        out.push("BEGIN".into());
    } else {
        out.push(format!("SAVEPOINT transaction{depth}"));
    }
    out.push("UPDATE t SET n = n + ?".into());
    for child in &unit.children {
        expected(child, depth + 1, out);
    }
    out.push(match (depth, unit.fail) {
        (0, false) => "COMMIT".into(),
        (0, true) => "ROLLBACK".into(),
        (d, false) => format!("RELEASE SAVEPOINT transaction{d}"),
        (d, true) => format!("ROLLBACK TO SAVEPOINT transaction{d}"),
    });
}

fn setup() -> (MemoryDriver, Arc<MemorySink>, Database) {
    let driver = MemoryDriver::new();
    let sink = Arc::new(MemorySink::new());
    let db = Database::new(driver.clone(), DatabaseConfig::default()).with_trace_sink(sink.clone());
    (driver, sink, db)
}

proptest! {
    #[test]
    fn test_statement_sequence_matches_tree(unit in unit_strategy()) {
        let (driver, _sink, db) = setup();

        let result = run(&db, &Context::background(), &unit);
        prop_assert_eq!(result.is_ok(), !unit.fail);

        let mut want = Vec::new();
        expected(&unit, 0, &mut want);
        prop_assert_eq!(driver.statements(), want);
        prop_assert_eq!(driver.open_transactions(), 0);
    }

    #[test]
    fn test_one_physical_transaction_per_tree(unit in unit_strategy()) {
        let (driver, sink, db) = setup();

        let _ = run(&db, &Context::background(), &unit);

        prop_assert_eq!(driver.count("BEGIN"), 1);
        prop_assert_eq!(driver.count("COMMIT") + driver.count("ROLLBACK"), 1);
        let records = sink.records();
        let tx_id = records[0].tx_id.clone();
        prop_assert!(tx_id.is_some());
        prop_assert!(records.iter().all(|r| r.tx_id == tx_id));
    }

    #[test]
    fn test_counter_returns_to_zero(unit in unit_strategy()) {
        let (_driver, _sink, db) = setup();
        let tx = db.begin().unwrap();
        let ctx = sqltx::transaction::with_tx(tx.ctx(), &tx);

        let _ = run(&db, &ctx, &unit);

        prop_assert_eq!(tx.depth(), 0);
        prop_assert!(!tx.is_finalized());
        prop_assert!(tx_from_ctx(&ctx, "default").unwrap().same_handle(&tx));
        tx.rollback().unwrap();
    }
}
