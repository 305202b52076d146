//! The table introspector.
//!
//! Bucket-level access to a live host table's internal layout: the hash
//! part is addressed by bucket position `[0, hash_size)`, with the slot
//! at `hash_size` itself addressing the zero slot (integer key `0`) when
//! present. This is the only module that reads table internals; every
//! other component goes through the host's raw get/set surface.

use host::{HostState, TableHandle, Value};

pub(crate) fn array_size(t: &TableHandle) -> usize {
    t.borrow().array_size()
}

pub(crate) fn hash_size(t: &TableHandle) -> u32 {
    t.borrow().hash_size() as u32
}

pub(crate) fn has_zero(t: &TableHandle) -> bool {
    t.borrow().has_zero()
}

/// Push the key stored at `bucket`. False for a dead or out-of-range
/// bucket.
pub(crate) fn get_k(host: &mut HostState, t: &TableHandle, bucket: u32) -> bool {
    let hsize = hash_size(t);
    if bucket < hsize {
        match t.borrow().node_key(bucket as usize) {
            Some(key) => {
                host.push_host_value(key);
                true
            }
            None => false,
        }
    } else if bucket == hsize && has_zero(t) {
        host.push_host_value(Value::Integer(0));
        true
    } else {
        false
    }
}

/// Push the value stored at `bucket`.
pub(crate) fn get_v(host: &mut HostState, t: &TableHandle, bucket: u32) -> bool {
    let hsize = hash_size(t);
    if bucket < hsize {
        match t.borrow().node_value(bucket as usize) {
            Some(value) => {
                host.push_host_value(value);
                true
            }
            None => false,
        }
    } else if bucket == hsize {
        match t.borrow().zero_value() {
            Some(value) => {
                host.push_host_value(value);
                true
            }
            None => false,
        }
    } else {
        false
    }
}

/// Push the pair stored at `bucket`: value first, key on top.
pub(crate) fn get_kv(host: &mut HostState, t: &TableHandle, bucket: u32) -> bool {
    let pair = t
        .borrow()
        .node_key(bucket as usize)
        .zip(t.borrow().node_value(bucket as usize));
    match pair {
        Some((key, value)) => {
            host.push_host_value(value);
            host.push_host_value(key);
            true
        }
        None => false,
    }
}

/// Push the zero-slot pair: value first, the integer key `0` on top.
pub(crate) fn get_zero(host: &mut HostState, t: &TableHandle) -> bool {
    match t.borrow().zero_value() {
        Some(value) => {
            host.push_host_value(value);
            host.push_host_value(Value::Integer(0));
            true
        }
        None => false,
    }
}

/// Replace the value at `bucket` of the table at `t_idx` with the value
/// on top of the host stack, in place. Pops the value on success only.
pub(crate) fn set_v(host: &mut HostState, t_idx: i32, bucket: u32) -> bool {
    let t = match host.to_table(t_idx) {
        Some(t) => t,
        None => return false,
    };
    let value = match host.value_at(-1) {
        Some(v) => v,
        None => return false,
    };
    let hsize = hash_size(&t);
    let ok = if bucket < hsize {
        t.borrow_mut().set_node_value(bucket as usize, value)
    } else if bucket == hsize {
        t.borrow_mut().set_zero_value(value)
    } else {
        false
    };
    if ok {
        host.pop(1);
    }
    ok
}
