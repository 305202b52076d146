//! The path evaluator.
//!
//! [`evaluate`] materializes the value a path denotes onto the host
//! stack: net +1 push on success, net 0 on failure. The caller must
//! have reserved at least two free host stack slots; evaluation of
//! deeper paths needs no more because every step rebalances before
//! recursing outward.

use crate::introspect;
use crate::path::{PathRef, Step};
use common::Logger;
use host::{HostState, TypeTag, REGISTRY_INDEX, RIDX_GLOBALS};
use std::sync::OnceLock;

fn log() -> &'static Logger {
    static LOG: OnceLock<Logger> = OnceLock::new();
    LOG.get_or_init(|| common::create_logger("visitor"))
}

/// Push the value denoted by `path` and return its type, or return
/// `TypeTag::None` pushing nothing.
pub(crate) fn evaluate(host: &mut HostState, path: PathRef<'_>) -> TypeTag {
    let step = match path.step() {
        Ok(step) => step,
        Err(err) => {
            common::log_detail!(log(), "undecodable path: {}", err);
            return TypeTag::None;
        }
    };
    match step {
        Step::FrameLocal { frame, slot } => match host.get_local(frame as usize, slot as i32) {
            Some(_) => host.type_of(-1),
            None => TypeTag::None,
        },
        Step::FrameFunc { frame } => {
            if host.frame_func(frame as usize) {
                TypeTag::Function
            } else {
                TypeTag::None
            }
        }
        Step::Global => host.raw_geti(REGISTRY_INDEX, RIDX_GLOBALS),
        Step::Registry => host.push_value(REGISTRY_INDEX),
        Step::StackSlot { slot } => host.push_value(slot),
        Step::IndexInt { key, inner } => {
            let t = evaluate(host, inner);
            if t == TypeTag::None {
                return TypeTag::None;
            }
            if t != TypeTag::Table {
                // only a table can be indexed
                host.pop(1);
                return TypeTag::None;
            }
            host.push_integer(key);
            host.raw_get(-2);
            host.replace(-2);
            host.type_of(-1)
        }
        Step::IndexStr { key, inner } => {
            let t = evaluate(host, inner);
            if t == TypeTag::None {
                return TypeTag::None;
            }
            if t != TypeTag::Table {
                host.pop(1);
                return TypeTag::None;
            }
            host.push_bytes(key);
            host.raw_get(-2);
            host.replace(-2);
            host.type_of(-1)
        }
        Step::IndexKey { bucket, inner } | Step::IndexVal { bucket, inner } => {
            let want_key = matches!(step, Step::IndexKey { .. });
            let t = evaluate(host, inner);
            if t == TypeTag::None {
                return TypeTag::None;
            }
            if t != TypeTag::Table {
                host.pop(1);
                return TypeTag::None;
            }
            let table = match host.to_table(-1) {
                Some(table) => table,
                None => {
                    host.pop(1);
                    return TypeTag::None;
                }
            };
            let ok = if want_key {
                introspect::get_k(host, &table, bucket)
            } else {
                introspect::get_v(host, &table, bucket)
            };
            if !ok {
                host.pop(1);
                return TypeTag::None;
            }
            host.remove(-2);
            host.type_of(-1)
        }
        Step::Upvalue { index, inner } => {
            let t = evaluate(host, inner);
            if t == TypeTag::None {
                return TypeTag::None;
            }
            if t != TypeTag::Function {
                // only a function has upvalues
                host.pop(1);
                return TypeTag::None;
            }
            match host.get_upvalue(-1, index) {
                Some(_) => {
                    host.replace(-2);
                    host.type_of(-1)
                }
                None => {
                    host.pop(1);
                    TypeTag::None
                }
            }
        }
        Step::Metatable { base, inner } => {
            match inner {
                Some(inner) => {
                    let t = evaluate(host, inner);
                    if t == TypeTag::None {
                        return TypeTag::None;
                    }
                    if t != TypeTag::Table && t != TypeTag::UserData {
                        host.pop(1);
                        return TypeTag::None;
                    }
                }
                // The shared per-type metatable is reached through a
                // dummy receiver of that type.
                None => match base {
                    TypeTag::Nil => host.push_nil(),
                    TypeTag::Boolean => host.push_boolean(false),
                    TypeTag::Number => host.push_integer(0),
                    TypeTag::String => host.push_str(""),
                    TypeTag::LightUserData => host.push_light_userdata(0),
                    _ => return TypeTag::None,
                },
            }
            if host.get_metatable(-1) {
                host.replace(-2);
                TypeTag::Table
            } else {
                host.pop(1);
                host.push_nil();
                TypeTag::Nil
            }
        }
        Step::UserValue { slot, inner } => {
            let t = evaluate(host, inner);
            if t == TypeTag::None {
                return TypeTag::None;
            }
            if t != TypeTag::UserData {
                host.pop(1);
                return TypeTag::None;
            }
            let t = host.get_user_value(-1, slot);
            if t == TypeTag::None {
                host.pop(1);
                return TypeTag::None;
            }
            host.replace(-2);
            t
        }
    }
}
