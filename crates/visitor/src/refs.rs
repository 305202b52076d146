//! The reference registry.
//!
//! Two named tables inside the host registry anchor host values the
//! debugger holds on to: `__debugger_ref` for explicit references
//! (loaded chunks, ref-mode copies) and `__debugger_watch` for watch
//! results. Both are created on first use. A handle is the integer
//! slot the value was appended at; the debugger reaches it back through
//! a registry-indirecting path.

use crate::path::ValuePath;
use host::{HostState, TypeTag, REGISTRY_INDEX};

pub(crate) const REF_TABLE: &str = "__debugger_ref";
pub(crate) const WATCH_TABLE: &str = "__debugger_watch";

/// Make sure `registry[name]` is a table, leaving it on top.
fn ensure_slot(host: &mut HostState, name: &str) {
    if host.get_field(REGISTRY_INDEX, name) == TypeTag::Nil {
        host.pop(1);
        host.new_table();
        host.push_value(-1);
        host.set_field(REGISTRY_INDEX, name);
    }
}

/// Anchor the value on top of the host stack in `registry[name]`,
/// leaving the value in place. Uses three stack slots.
fn anchor(host: &mut HostState, name: &str) -> i64 {
    ensure_slot(host, name); // value, anchor-table
    host.push_value(-2); // value, anchor-table, value
    let handle = host.ref_register(-2); // value, anchor-table
    host.pop(1); // value
    handle
}

/// Anchor the host stack top in the ref table; the value stays on the
/// stack. Returns the handle and the path that reaches it back.
pub(crate) fn ref_value(host: &mut HostState) -> (i64, ValuePath) {
    let handle = anchor(host, REF_TABLE);
    (handle, ValuePath::registry_slot(REF_TABLE, handle))
}

/// Release a ref-table handle. Idempotent; silent when the table was
/// never created.
pub(crate) fn unref_value(host: &mut HostState, handle: i64) {
    if handle < 0 {
        return;
    }
    if host.get_field(REGISTRY_INDEX, REF_TABLE) == TypeTag::Table {
        host.unref(-1, handle);
    }
    host.pop(1);
}

/// Anchor the value at `idx` in the watch table; returns the handle.
pub(crate) fn add_watch(host: &mut HostState, idx: i32) -> i64 {
    host.push_value(idx);
    let handle = anchor(host, WATCH_TABLE);
    host.pop(1);
    handle
}

/// Drop every watch anchor at once by clearing the registry slot.
pub(crate) fn clean_watch(host: &mut HostState) {
    host.push_nil();
    host.set_field(REGISTRY_INDEX, WATCH_TABLE);
}
