//! Binding transaction handles into contexts.
//!
//! A context carries at most one handle per database group, stored under a
//! key namespaced by the group name. Looking a handle up returns a view of it
//! tied to the lookup context, so later statements log against the most
//! nested context without mutating the shared handle.

use crate::context::{Context, ContextKey};

use super::handle::{Tx, TxCore};

const KEY_PREFIX: &str = "TransactionObjectForGroup_";

fn key_for_group(group: &str) -> ContextKey {
    ContextKey::new(format!("{KEY_PREFIX}{group}"))
}

/// Attach `tx` to `ctx` under its group.
///
/// Binding is idempotent: if `ctx` already carries a handle for the group it
/// is returned unchanged, and if the handle's own context already carries
/// one, that context is returned. Only otherwise is a new context derived.
pub fn with_tx(ctx: &Context, tx: &Tx) -> Context {
    let group = tx.group();
    if tx_from_ctx(ctx, group).is_some() {
        return ctx.clone();
    }
    if tx_from_ctx(tx.ctx(), group).is_some() {
        return tx.ctx().clone();
    }
    ctx.with_shared_value(key_for_group(group), tx.core.clone())
}

/// The handle bound to `ctx` for `group`, viewed through `ctx`.
pub fn tx_from_ctx(ctx: &Context, group: &str) -> Option<Tx> {
    if ctx.is_empty() {
        return None;
    }
    let core = ctx.value::<TxCore>(&key_for_group(group))?;
    Some(Tx::from_core(core, ctx.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseConfig};
    use crate::driver::MemoryDriver;

    fn setup() -> Database {
        Database::new(MemoryDriver::new(), DatabaseConfig::new("orders"))
    }

    #[test]
    fn test_empty_context_has_no_handle() {
        assert!(tx_from_ctx(&Context::background(), "orders").is_none());
    }

    #[test]
    fn test_bind_and_lookup() {
        let db = setup();
        let tx = db.begin().unwrap();

        let ctx = with_tx(&Context::background(), &tx);
        let found = tx_from_ctx(&ctx, "orders").unwrap();
        assert!(found.same_handle(&tx));
        assert!(tx_from_ctx(&ctx, "users").is_none());
        tx.rollback().unwrap();
    }

    #[test]
    fn test_lookup_views_handle_through_lookup_context() {
        let db = setup();
        let tx = db.begin().unwrap();
        let bound = with_tx(&Context::background(), &tx);

        let nested = bound.with_value(ContextKey::from_static("request"), 7u32);
        let found = tx_from_ctx(&nested, "orders").unwrap();
        assert!(Context::ptr_eq(found.ctx(), &nested));
        // The original view keeps its own context.
        assert!(!Context::ptr_eq(tx.ctx(), &nested));
        tx.rollback().unwrap();
    }

    #[test]
    fn test_binding_is_idempotent() {
        let db = setup();
        let tx = db.begin().unwrap();
        let ctx = Context::background();

        let once = with_tx(&ctx, &tx);
        let twice = with_tx(&once, &tx);
        assert!(Context::ptr_eq(&once, &twice));

        // A handle whose own context is bound returns that context.
        let bound = tx.with_ctx(once.clone());
        let other = with_tx(&Context::background(), &bound);
        assert!(Context::ptr_eq(&other, &once));
        tx.rollback().unwrap();
    }
}
