//! The cross-interpreter copier.
//!
//! Primitive values cross the interpreter boundary by copy; aggregates
//! never do. Reading out of the host, an aggregate becomes a
//! registry-anchored path or a display placeholder. Writing into the
//! host, a path evaluates and a debugger-built table is reconstructed
//! by deep copy (the `eval`/`watch` argument case only).

use crate::eval::evaluate;
use crate::path::ValuePath;
use crate::refs;
use crate::VisitorError;
use host::{HostState, TypeTag, Value, NO_REF};

/// A debugger-interpreter value. `Path` is the opaque reference into
/// the host; `Table` only ever travels debugger-to-host, as an argument
/// to the call operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DbgValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(Vec<u8>),
    LightUserData(usize),
    Path(ValuePath),
    Table(Vec<(DbgValue, DbgValue)>),
}

impl DbgValue {
    /// The debugger-side type name, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DbgValue::Nil => "nil",
            DbgValue::Boolean(_) => "boolean",
            DbgValue::Integer(_) | DbgValue::Float(_) => "number",
            DbgValue::Str(_) => "string",
            DbgValue::LightUserData(_) => "userdata",
            DbgValue::Path(_) => "userdata",
            DbgValue::Table(_) => "table",
        }
    }
}

/// Copy the host stack top into the debugger, if its type is primitive.
/// The host value stays on the stack. Integer tagging is preserved.
pub(crate) fn copy_to_debugger(host: &HostState) -> Option<DbgValue> {
    match host.value_at(-1)? {
        Value::Nil => Some(DbgValue::Nil),
        Value::Boolean(b) => Some(DbgValue::Boolean(b)),
        Value::Integer(i) => Some(DbgValue::Integer(i)),
        Value::Float(f) => Some(DbgValue::Float(f)),
        Value::Str(s) => Some(DbgValue::Str(s.to_vec())),
        Value::LightUserData(p) => Some(DbgValue::LightUserData(p)),
        _ => None,
    }
}

/// Push a debugger value onto the host stack: primitives push directly,
/// a path evaluates. Returns the pushed type; `None` means nothing was
/// pushed (an unresolvable path, or a debugger table - the argument
/// copier handles those).
pub(crate) fn push_to_host(host: &mut HostState, v: &DbgValue) -> Result<TypeTag, VisitorError> {
    if !host.check_stack(1) {
        return Err(VisitorError::StackOverflow);
    }
    match v {
        DbgValue::Nil => {
            host.push_nil();
            Ok(TypeTag::Nil)
        }
        DbgValue::Boolean(b) => {
            host.push_boolean(*b);
            Ok(TypeTag::Boolean)
        }
        DbgValue::Integer(i) => {
            host.push_integer(*i);
            Ok(TypeTag::Number)
        }
        DbgValue::Float(f) => {
            host.push_float(*f);
            Ok(TypeTag::Number)
        }
        DbgValue::Str(s) => {
            host.push_bytes(s);
            Ok(TypeTag::String)
        }
        DbgValue::LightUserData(p) => {
            host.push_light_userdata(*p);
            Ok(TypeTag::LightUserData)
        }
        DbgValue::Path(p) => {
            if !host.check_stack(3) {
                return Err(VisitorError::StackOverflow);
            }
            Ok(evaluate(host, p.view()))
        }
        DbgValue::Table(_) => Ok(TypeTag::None),
    }
}

/// Display placeholder for a host aggregate: `"<typename>: 0x<addr>"`.
fn placeholder(host: &HostState) -> Vec<u8> {
    let tag = host.type_of(-1);
    let ptr = host.to_pointer(-1).unwrap_or(0);
    format!("{}: 0x{:x}", tag.type_name(), ptr).into_bytes()
}

/// Copy the host stack top out to the debugger: primitives by value;
/// aggregates as a fresh registry reference when `by_ref`, else as a
/// placeholder string. Returns the copied value and the handle
/// ([`NO_REF`] unless one was created). The host value stays on the
/// stack.
pub(crate) fn copy_value(host: &mut HostState, by_ref: bool) -> (DbgValue, i64) {
    if let Some(v) = copy_to_debugger(host) {
        return (v, NO_REF);
    }
    if by_ref {
        let (handle, path) = refs::ref_value(host);
        (DbgValue::Path(path), handle)
    } else {
        (DbgValue::Str(placeholder(host)), NO_REF)
    }
}

/// Argument copier for the call operations: like [`push_to_host`], but
/// a debugger table is reconstructed in the host by deep copy. Always
/// either pushes exactly one value or returns `TypeTag::None` pushing
/// nothing.
pub(crate) fn push_arg(host: &mut HostState, v: &DbgValue) -> Result<TypeTag, VisitorError> {
    let t = push_to_host(host, v)?;
    if t != TypeTag::None {
        return Ok(t);
    }
    let pairs = match v {
        DbgValue::Table(pairs) => pairs,
        _ => return Ok(TypeTag::None),
    };
    if !host.check_stack(3) {
        return Err(VisitorError::StackOverflow);
    }
    host.new_table();
    for (key, value) in pairs {
        let kt = push_arg(host, key)?;
        if kt == TypeTag::None {
            continue;
        }
        if kt == TypeTag::Nil {
            host.pop(1);
            continue;
        }
        let vt = push_arg(host, value)?;
        if vt == TypeTag::None {
            host.pop(1);
            continue;
        }
        // NaN keys are silently dropped, like nil ones.
        let _ = host.raw_set(-3);
    }
    Ok(TypeTag::Table)
}
