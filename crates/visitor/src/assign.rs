//! The path assigner.
//!
//! [`assign`] writes the value on top of the host stack into the
//! location a path denotes. The value is consumed on success *and* on
//! failure: callers push exactly one value and the stack always ends
//! one below its starting depth. Call sites depend on that contract,
//! so a refused assignment still swallows its input.

use crate::eval::evaluate;
use crate::introspect;
use crate::path::{PathRef, Step};
use host::{HostState, TypeTag};

/// Assign the host stack top to the location `path` denotes. Returns
/// whether the write happened; either way the value is consumed.
pub(crate) fn assign(host: &mut HostState, path: PathRef<'_>) -> bool {
    let top = host.top();
    if assign_step(host, path) {
        true
    } else {
        host.set_top(top - 1);
        false
    }
}

/// One dispatch attempt. On success the stack is already balanced at
/// entry depth minus one; on failure intermediate values may remain for
/// the caller to trim.
fn assign_step(host: &mut HostState, path: PathRef<'_>) -> bool {
    let step = match path.step() {
        Ok(step) => step,
        Err(_) => return false,
    };
    match step {
        Step::FrameLocal { frame, slot } => {
            host.set_local(frame as usize, slot as i32).is_some()
        }
        // Roots and key positions are not assignable.
        Step::Global | Step::Registry | Step::FrameFunc { .. } | Step::StackSlot { .. }
        | Step::IndexKey { .. } => false,
        Step::IndexInt { key, inner } => {
            let t = evaluate(host, inner);
            if t != TypeTag::Table {
                return false;
            }
            host.push_integer(key); // key, table, value
            host.push_value(-3); // value, key, table, value
            if host.raw_set(-3).is_err() {
                return false;
            }
            host.pop(2);
            true
        }
        Step::IndexStr { key, inner } => {
            let t = evaluate(host, inner);
            if t != TypeTag::Table {
                return false;
            }
            host.push_bytes(key);
            host.push_value(-3);
            if host.raw_set(-3).is_err() {
                return false;
            }
            host.pop(2);
            true
        }
        Step::IndexVal { bucket, inner } => {
            let t = evaluate(host, inner);
            if t != TypeTag::Table {
                return false;
            }
            host.insert(-2); // table, value
            if !introspect::set_v(host, -2, bucket) {
                return false;
            }
            host.pop(1);
            true
        }
        Step::Upvalue { index, inner } => {
            let t = evaluate(host, inner);
            if t != TypeTag::Function {
                return false;
            }
            host.insert(-2); // function, value
            if host.set_upvalue(-2, index).is_none() {
                return false;
            }
            host.pop(1);
            true
        }
        Step::Metatable { base, inner } => {
            match inner {
                Some(inner) => {
                    let t = evaluate(host, inner);
                    if t != TypeTag::Table && t != TypeTag::UserData {
                        return false;
                    }
                }
                None => match base {
                    TypeTag::Nil => host.push_nil(),
                    TypeTag::Boolean => host.push_boolean(false),
                    TypeTag::Number => host.push_integer(0),
                    TypeTag::String => host.push_str(""),
                    TypeTag::LightUserData => host.push_light_userdata(0),
                    _ => return false,
                },
            }
            host.insert(-2); // receiver, value
            let mt = host.type_of(-1);
            if mt != TypeTag::Nil && mt != TypeTag::Table {
                return false;
            }
            host.set_metatable(-2);
            host.pop(1);
            true
        }
        Step::UserValue { slot, inner } => {
            let t = evaluate(host, inner);
            if t != TypeTag::UserData {
                return false;
            }
            host.insert(-2); // userdata, value
            host.set_user_value(-2, slot);
            host.pop(1);
            true
        }
    }
}
