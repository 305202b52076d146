//! The visitor operation surface.
//!
//! Every operation takes the host state, debugger-side arguments
//! (primitives, paths, or both), and returns copied primitives and/or
//! fresh paths. Most read operations come in pairs: the plain form
//! always answers with a path, the `v` form copies the value out when
//! its type is primitive.
//!
//! Stack contract: every operation leaves the host stack at its entry
//! depth. User errors (bad argument shapes) and stack-overflow
//! reservations raise [`VisitorError`]; unresolvable paths are quiet
//! empty answers.

use crate::assign;
use crate::copy::{self, DbgValue};
use crate::eval::evaluate;
use crate::introspect;
use crate::path::{PathRef, Step, ValuePath};
use crate::refs;
use crate::VisitorError;
use common::Logger;
use host::{HostState, TypeTag};

bitflags::bitflags! {
    /// Parsed activation-info option letters (`Slnfutr`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoMask: u8 {
        const SOURCE = 1 << 0;
        const CURRENT_LINE = 1 << 1;
        const NAME = 1 << 2;
        const FUNC = 1 << 3;
        const PARAMS = 1 << 4;
        const TAIL_CALL = 1 << 5;
        const TRANSFER = 1 << 6;
    }
}

/// Option letters may name at most seven of `Slnfutr`.
fn parse_options(options: &str) -> Result<InfoMask, VisitorError> {
    if options.len() > 7 {
        return Err(VisitorError::Argument("invalid option".to_string()));
    }
    let mut mask = InfoMask::empty();
    for ch in options.chars() {
        mask |= match ch {
            'S' => InfoMask::SOURCE,
            'l' => InfoMask::CURRENT_LINE,
            'n' => InfoMask::NAME,
            'f' => InfoMask::FUNC,
            'u' => InfoMask::PARAMS,
            't' => InfoMask::TAIL_CALL,
            'r' => InfoMask::TRANSFER,
            _ => return Err(VisitorError::Argument("invalid option".to_string())),
        };
    }
    Ok(mask)
}

/// Activation info, populated according to the requested option
/// letters; unrequested fields stay `None`.
#[derive(Debug, Clone, Default)]
pub struct InfoReport {
    pub source: Option<Vec<u8>>,
    pub short_src: Option<String>,
    pub linedefined: Option<i32>,
    pub lastlinedefined: Option<i32>,
    pub what: Option<String>,
    pub currentline: Option<i32>,
    pub name: Option<String>,
    pub namewhat: Option<String>,
    pub nparams: Option<u8>,
    pub istailcall: Option<bool>,
    pub ftransfer: Option<u32>,
    pub ntransfer: Option<u32>,
    pub func: Option<ValuePath>,
}

/// Result of running a loaded chunk or watched expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Value(DbgValue),
    Error(Vec<u8>),
}

/// Result of `watch`: every returned value is anchored in the watch
/// registry and comes back as a path.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Values(Vec<DbgValue>),
    Error(Vec<u8>),
}

/// Result of `load`: a ref-anchored chunk, or the loader's message.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Chunk(DbgValue),
    Error(Vec<u8>),
}

/// Observable status of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Running,
    Suspended,
    Normal,
    Dead,
    Invalid,
}

impl std::fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoroutineStatus::Running => "running",
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
            CoroutineStatus::Invalid => "invalid",
        };
        write!(f, "{}", s)
    }
}

type Symbolizer = Box<dyn Fn(usize) -> Option<String>>;

/// The visitor: the debugger's window into a paused host.
pub struct Visitor {
    symbolize: Option<Symbolizer>,
    log: Logger,
}

impl Default for Visitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitor {
    pub fn new() -> Visitor {
        Visitor {
            symbolize: None,
            log: common::create_logger("visitor"),
        }
    }

    /// Install the native-symbol resolver backing `cfunctioninfo`.
    pub fn set_symbolizer(&mut self, f: impl Fn(usize) -> Option<String> + 'static) {
        self.symbolize = Some(Box::new(f));
    }

    /// The pre-built path to the globals table.
    pub fn globals() -> ValuePath {
        ValuePath::globals()
    }

    /// The pre-built path to the host registry.
    pub fn registry() -> ValuePath {
        ValuePath::registry()
    }

    // ------------------------------------------------------------------
    // Locals
    // ------------------------------------------------------------------

    /// `(name, path)` of local `index` in frame `frame`, or nothing.
    pub fn getlocal(
        &self,
        host: &mut HostState,
        frame: i64,
        index: i64,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        self.getlocal_impl(host, frame, index, true)
    }

    /// Like `getlocal`, but copies primitive values out.
    pub fn getlocalv(
        &self,
        host: &mut HostState,
        frame: i64,
        index: i64,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        self.getlocal_impl(host, frame, index, false)
    }

    fn getlocal_impl(
        &self,
        host: &mut HostState,
        frame: i64,
        index: i64,
        getref: bool,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        if frame < 0 || frame > u16::MAX as i64 {
            return Err(VisitorError::Argument("frame must fit in u16".to_string()));
        }
        if index == 0 || index > u8::MAX as i64 || -index > u8::MAX as i64 {
            return Err(VisitorError::Argument("index must fit in u8".to_string()));
        }
        if !host.check_stack(1) {
            return Err(VisitorError::StackOverflow);
        }
        let name = match host.get_local(frame as usize, index as i32) {
            Some(name) => name,
            None => return Ok(None),
        };
        if !getref {
            if let Some(v) = copy::copy_to_debugger(host) {
                host.pop(1);
                return Ok(Some((name, v)));
            }
        }
        host.pop(1);
        let path = ValuePath::frame_local(frame as u16, index as i16);
        Ok(Some((name, DbgValue::Path(path))))
    }

    // ------------------------------------------------------------------
    // Upvalues
    // ------------------------------------------------------------------

    /// `(name, path)` of upvalue `index` of the function `func`
    /// denotes, or nothing.
    pub fn getupvalue(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        index: i64,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        self.getupvalue_impl(host, func, index, true)
    }

    /// Like `getupvalue`, but copies primitive values out.
    pub fn getupvaluev(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        index: i64,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        self.getupvalue_impl(host, func, index, false)
    }

    fn getupvalue_impl(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        index: i64,
        getref: bool,
    ) -> Result<Option<(String, DbgValue)>, VisitorError> {
        if index < 1 || index > u16::MAX as i64 {
            return Err(VisitorError::Argument("index must fit in u16".to_string()));
        }
        let func_path = match func {
            DbgValue::Path(p) => p,
            _ => return Ok(None),
        };
        let t = copy::push_to_host(host, func)?;
        if t == TypeTag::None {
            return Ok(None);
        }
        if t != TypeTag::Function {
            host.pop(1);
            return Ok(None);
        }
        let name = match host.get_upvalue(-1, index as u16) {
            Some(name) => name,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        if !getref {
            if let Some(v) = copy::copy_to_debugger(host) {
                host.pop(2);
                return Ok(Some((name, v)));
            }
        }
        host.pop(2);
        Ok(Some((name, DbgValue::Path(func_path.upvalue(index as u16)))))
    }

    // ------------------------------------------------------------------
    // Metatables
    // ------------------------------------------------------------------

    /// The metatable path of whatever `subject` denotes. The plain form
    /// answers without probing; this is always a path, never a copy.
    pub fn getmetatable(
        &self,
        host: &mut HostState,
        subject: &DbgValue,
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.getmetatable_impl(host, subject, true)
    }

    /// Like `getmetatable`, but answers nothing when the receiver has
    /// no metatable.
    pub fn getmetatablev(
        &self,
        host: &mut HostState,
        subject: &DbgValue,
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.getmetatable_impl(host, subject, false)
    }

    fn getmetatable_impl(
        &self,
        host: &mut HostState,
        subject: &DbgValue,
        getref: bool,
    ) -> Result<Option<DbgValue>, VisitorError> {
        if !host.check_stack(2) {
            return Err(VisitorError::StackOverflow);
        }
        let t = copy::push_to_host(host, subject)?;
        if t == TypeTag::None {
            return Ok(None);
        }
        if !getref {
            if !host.get_metatable(-1) {
                host.pop(1);
                return Ok(None);
            }
            host.pop(2);
        } else {
            host.pop(1);
        }
        if t == TypeTag::Table || t == TypeTag::UserData {
            match subject {
                DbgValue::Path(p) => Ok(Some(DbgValue::Path(p.metatable(t)))),
                // A primitive can never have evaluated to an aggregate.
                _ => Ok(None),
            }
        } else {
            Ok(Some(DbgValue::Path(ValuePath::type_metatable(t))))
        }
    }

    // ------------------------------------------------------------------
    // User values
    // ------------------------------------------------------------------

    /// `(path, true)` for user value `n` of the userdata `ud` denotes.
    pub fn getuservalue(
        &self,
        host: &mut HostState,
        ud: &DbgValue,
        n: i64,
    ) -> Result<Option<(DbgValue, bool)>, VisitorError> {
        self.getuservalue_impl(host, ud, n, true)
    }

    /// Like `getuservalue`, but copies primitive values out and answers
    /// nothing for an absent slot.
    pub fn getuservaluev(
        &self,
        host: &mut HostState,
        ud: &DbgValue,
        n: i64,
    ) -> Result<Option<(DbgValue, bool)>, VisitorError> {
        self.getuservalue_impl(host, ud, n, false)
    }

    fn getuservalue_impl(
        &self,
        host: &mut HostState,
        ud: &DbgValue,
        n: i64,
        getref: bool,
    ) -> Result<Option<(DbgValue, bool)>, VisitorError> {
        if n < 1 || n > u16::MAX as i64 {
            return Err(VisitorError::Argument("index must fit in u16".to_string()));
        }
        if !host.check_stack(2) {
            return Err(VisitorError::StackOverflow);
        }
        let t = copy::push_to_host(host, ud)?;
        if t == TypeTag::None {
            return Ok(None);
        }
        if t != TypeTag::UserData {
            host.pop(1);
            return Ok(None);
        }
        if !getref {
            let ut = host.get_user_value(-1, n as u16);
            if ut == TypeTag::None {
                host.pop(1);
                return Ok(None);
            }
            if let Some(v) = copy::copy_to_debugger(host) {
                host.pop(2);
                return Ok(Some((v, true)));
            }
            host.pop(1);
        }
        host.pop(1);
        match ud {
            DbgValue::Path(p) => Ok(Some((DbgValue::Path(p.user_value(n as u16)), true))),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Raw `t[key]` for an integer key. Nothing when `t` does not
    /// resolve to a table.
    pub fn index(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: i64,
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.index_impl(host, t, key, true)
    }

    /// Like `index`, but copies primitive values out.
    pub fn indexv(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: i64,
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.index_impl(host, t, key, false)
    }

    fn index_impl(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: i64,
        getref: bool,
    ) -> Result<Option<DbgValue>, VisitorError> {
        if key <= 0 {
            return Err(VisitorError::Argument("key must be positive".to_string()));
        }
        if !host.check_stack(3) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = copy::push_to_host(host, t)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Table {
            host.pop(1);
            return Ok(None);
        }
        host.push_integer(key);
        host.raw_get(-2);
        let copied = if getref { None } else { copy::copy_to_debugger(host) };
        host.pop(2);
        match copied {
            Some(v) => Ok(Some(v)),
            None => match t {
                DbgValue::Path(p) => Ok(Some(DbgValue::Path(p.index_int(key)))),
                _ => Ok(None),
            },
        }
    }

    /// Raw `t[key]` for a string key.
    pub fn field(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: &[u8],
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.field_impl(host, t, key, true)
    }

    /// Like `field`, but copies primitive values out.
    pub fn fieldv(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: &[u8],
    ) -> Result<Option<DbgValue>, VisitorError> {
        self.field_impl(host, t, key, false)
    }

    fn field_impl(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        key: &[u8],
        getref: bool,
    ) -> Result<Option<DbgValue>, VisitorError> {
        if !host.check_stack(3) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = copy::push_to_host(host, t)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Table {
            host.pop(1);
            return Ok(None);
        }
        host.push_bytes(key);
        host.raw_get(-2);
        let copied = if getref { None } else { copy::copy_to_debugger(host) };
        host.pop(2);
        match copied {
            Some(v) => Ok(Some(v)),
            None => match t {
                DbgValue::Path(p) => Ok(Some(DbgValue::Path(p.index_str(key)))),
                _ => Ok(None),
            },
        }
    }

    // ------------------------------------------------------------------
    // Table enumeration
    // ------------------------------------------------------------------

    /// Enumerate the hash part (and zero slot) of the table `t`
    /// denotes, in internal bucket order. Emits a flat list: three
    /// entries per pair `[key, value_path, value_copy]`. At most
    /// `max_n` pairs.
    pub fn tablehash(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        max_n: Option<u32>,
    ) -> Result<Option<Vec<DbgValue>>, VisitorError> {
        self.tablehash_impl(host, t, max_n, true)
    }

    /// Value form: two entries per pair `[key, value_copy]`.
    pub fn tablehashv(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        max_n: Option<u32>,
    ) -> Result<Option<Vec<DbgValue>>, VisitorError> {
        self.tablehash_impl(host, t, max_n, false)
    }

    fn tablehash_impl(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        max_n: Option<u32>,
        getref: bool,
    ) -> Result<Option<Vec<DbgValue>>, VisitorError> {
        let mut budget = max_n.unwrap_or(u32::MAX) as i64;
        if !host.check_stack(4) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = copy::push_to_host(host, t)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Table {
            host.pop(1);
            return Ok(None);
        }
        let t_path = match t {
            DbgValue::Path(p) => p.clone(),
            _ => {
                host.pop(1);
                return Ok(None);
            }
        };
        let table = match host.to_table(-1) {
            Some(table) => table,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        let mut out = Vec::new();
        let hsize = introspect::hash_size(&table);
        for bucket in 0..hsize {
            if !introspect::get_kv(host, &table, bucket) {
                continue;
            }
            budget -= 1;
            if budget < 0 {
                host.pop(3);
                return Ok(Some(out));
            }
            self.emit_pair(host, &t_path, bucket, getref, &mut out);
        }
        if introspect::get_zero(host, &table) {
            budget -= 1;
            if budget < 0 {
                host.pop(3);
                return Ok(Some(out));
            }
            self.emit_pair(host, &t_path, hsize, getref, &mut out);
        }
        host.pop(1);
        Ok(Some(out))
    }

    /// Consume the `[value, key]` pair on the host stack into the
    /// output list.
    fn emit_pair(
        &self,
        host: &mut HostState,
        t_path: &ValuePath,
        bucket: u32,
        getref: bool,
        out: &mut Vec<DbgValue>,
    ) {
        // Key on top: copy if primitive, else a key-position path.
        let key = match copy::copy_to_debugger(host) {
            Some(v) => v,
            None => DbgValue::Path(t_path.index_key(bucket)),
        };
        host.pop(1);
        out.push(key);
        // Value: ref form emits the value path and then the copy (or
        // the path again for aggregates); value form just the copy.
        let copied = copy::copy_to_debugger(host);
        let value_path = DbgValue::Path(t_path.index_val(bucket));
        if getref {
            out.push(value_path.clone());
            out.push(copied.unwrap_or(value_path));
        } else {
            out.push(copied.unwrap_or(value_path));
        }
        host.pop(1);
    }

    /// `(array_size, hash_size_including_zero)` of the table `t`
    /// denotes.
    pub fn tablesize(
        &self,
        host: &mut HostState,
        t: &DbgValue,
    ) -> Result<Option<(usize, usize)>, VisitorError> {
        let tag = copy::push_to_host(host, t)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Table {
            host.pop(1);
            return Ok(None);
        }
        let table = match host.to_table(-1) {
            Some(table) => table,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        let sizes = (
            introspect::array_size(&table),
            introspect::hash_size(&table) as usize + if introspect::has_zero(&table) { 1 } else { 0 },
        );
        host.pop(1);
        Ok(Some(sizes))
    }

    /// Scan hash buckets from `start` for the next string key; returns
    /// the key bytes and the bucket position after it.
    pub fn tablekey(
        &self,
        host: &mut HostState,
        t: &DbgValue,
        start: i64,
    ) -> Result<Option<(Vec<u8>, u32)>, VisitorError> {
        let start = start.max(0) as u64;
        if !host.check_stack(2) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = copy::push_to_host(host, t)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Table {
            host.pop(1);
            return Ok(None);
        }
        let table = match host.to_table(-1) {
            Some(table) => table,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        let hsize = introspect::hash_size(&table);
        let mut bucket = start.min(hsize as u64) as u32;
        while bucket < hsize {
            if introspect::get_k(host, &table, bucket) {
                if let Some(bytes) = host.to_bytes(-1) {
                    let key = bytes.to_vec();
                    host.pop(2);
                    return Ok(Some((key, bucket + 1)));
                }
                host.pop(1);
            }
            bucket += 1;
        }
        host.pop(1);
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Userdata buffers
    // ------------------------------------------------------------------

    /// A byte slice of the raw buffer of the userdata `ud` denotes.
    pub fn udread(
        &self,
        host: &mut HostState,
        ud: &DbgValue,
        offset: i64,
        count: i64,
    ) -> Result<Option<Vec<u8>>, VisitorError> {
        let tag = copy::push_to_host(host, ud)?;
        if tag == TypeTag::None {
            return Err(VisitorError::Argument("need userdata".to_string()));
        }
        if tag != TypeTag::UserData {
            host.pop(1);
            return Err(VisitorError::Argument("need userdata".to_string()));
        }
        let handle = match host.to_userdata(-1) {
            Some(h) => h,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        let len = handle.borrow().data.len() as i64;
        if offset < 0 || offset >= len || count <= 0 {
            host.pop(1);
            return Ok(None);
        }
        let count = count.min(len - offset);
        let bytes = handle.borrow().data[offset as usize..(offset + count) as usize].to_vec();
        host.pop(1);
        Ok(Some(bytes))
    }

    /// Write `data` into the raw buffer at `offset`. In partial mode
    /// writes what fits and returns the count; in exact mode refuses
    /// out-of-bounds writes entirely (`None`).
    pub fn udwrite(
        &self,
        host: &mut HostState,
        ud: &DbgValue,
        offset: i64,
        data: &[u8],
        allow_partial: bool,
    ) -> Result<Option<usize>, VisitorError> {
        let tag = copy::push_to_host(host, ud)?;
        if tag == TypeTag::None {
            return Err(VisitorError::Argument("need userdata".to_string()));
        }
        if tag != TypeTag::UserData {
            host.pop(1);
            return Err(VisitorError::Argument("need userdata".to_string()));
        }
        let handle = match host.to_userdata(-1) {
            Some(h) => h,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        host.pop(1);
        let len = handle.borrow().data.len() as i64;
        if allow_partial {
            if offset < 0 || offset >= len {
                return Ok(Some(0));
            }
            let n = (data.len() as i64).min(len - offset) as usize;
            handle.borrow_mut().data[offset as usize..offset as usize + n]
                .copy_from_slice(&data[..n]);
            Ok(Some(n))
        } else {
            if offset < 0 || offset + data.len() as i64 > len {
                return Ok(None);
            }
            handle.borrow_mut().data[offset as usize..offset as usize + data.len()]
                .copy_from_slice(data);
            Ok(Some(data.len()))
        }
    }

    // ------------------------------------------------------------------
    // Values and assignment
    // ------------------------------------------------------------------

    /// The copied primitive `v` denotes, a placeholder string for
    /// aggregates, or nil when the path does not resolve.
    pub fn value(&self, host: &mut HostState, v: &DbgValue) -> Result<DbgValue, VisitorError> {
        let tag = copy::push_to_host(host, v)?;
        if tag == TypeTag::None {
            return Ok(DbgValue::Nil);
        }
        let (out, _) = copy::copy_value(host, false);
        host.pop(1);
        Ok(out)
    }

    /// Write `value` at the location `path` denotes. An unresolvable
    /// path-valued `value` assigns nil.
    pub fn assign(
        &self,
        host: &mut HostState,
        path: &DbgValue,
        value: &DbgValue,
    ) -> Result<bool, VisitorError> {
        if !host.check_stack(2) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = copy::push_to_host(host, value)?;
        if tag == TypeTag::None {
            match value {
                DbgValue::Path(_) => host.push_nil(),
                other => {
                    return Err(VisitorError::Argument(format!(
                        "invalid value type {}",
                        other.kind_name()
                    )))
                }
            }
        }
        if !host.check_stack(3) {
            host.pop(1);
            return Err(VisitorError::StackOverflow);
        }
        let path = match path {
            DbgValue::Path(p) => p,
            other => {
                host.pop(1);
                return Err(VisitorError::Argument(format!(
                    "value path expected, got {}",
                    other.kind_name()
                )));
            }
        };
        let ok = assign::assign(host, path.view());
        if !ok {
            common::log_detail!(self.log, "assignment refused: {:?}", path);
        }
        Ok(ok)
    }

    /// The observable type of `v`: debugger primitives classify
    /// locally, paths evaluate.
    pub fn type_of(&self, host: &mut HostState, v: &DbgValue) -> Result<&'static str, VisitorError> {
        let path = match v {
            DbgValue::Nil => return Ok("nil"),
            DbgValue::Boolean(_) => return Ok("boolean"),
            DbgValue::Integer(_) => return Ok("integer"),
            DbgValue::Float(_) => return Ok("float"),
            DbgValue::Str(_) => return Ok("string"),
            DbgValue::LightUserData(_) => return Ok("lightuserdata"),
            DbgValue::Table(_) => {
                return Err(VisitorError::Argument("unexpected type: table".to_string()))
            }
            DbgValue::Path(p) => p,
        };
        if !host.check_stack(3) {
            return Err(VisitorError::StackOverflow);
        }
        let tag = evaluate(host, path.view());
        let name = match tag {
            TypeTag::None => return Ok("unknown"),
            TypeTag::Function => {
                let native = host
                    .to_closure(-1)
                    .map(|c| c.borrow().is_native)
                    .unwrap_or(false);
                if native {
                    "c function"
                } else {
                    "function"
                }
            }
            TypeTag::Number => {
                if host.is_integer(-1) {
                    "integer"
                } else {
                    "float"
                }
            }
            TypeTag::LightUserData => "lightuserdata",
            other => other.type_name(),
        };
        host.pop(1);
        Ok(name)
    }

    // ------------------------------------------------------------------
    // Activation info
    // ------------------------------------------------------------------

    /// Activation info for a stack level (integer subject) or a
    /// function path, populated per the option letters `Slnfutr`.
    pub fn getinfo(
        &self,
        host: &mut HostState,
        subject: &DbgValue,
        options: &str,
    ) -> Result<Option<InfoReport>, VisitorError> {
        let mask = parse_options(options)?;
        let (info, frame) = match subject {
            DbgValue::Integer(frame) => {
                if *frame < 0 || *frame > u16::MAX as i64 {
                    return Err(VisitorError::Argument("frame must fit in u16".to_string()));
                }
                match host.frame_report(*frame as usize) {
                    Some(info) => (info, Some(*frame as u16)),
                    None => return Ok(None),
                }
            }
            DbgValue::Path(_) => {
                let t = copy::push_to_host(host, subject)?;
                if t != TypeTag::Function {
                    if t != TypeTag::None {
                        host.pop(1);
                    }
                    return Err(VisitorError::Argument(format!(
                        "need a function reference, got {}",
                        t.type_name()
                    )));
                }
                if mask.contains(InfoMask::FUNC) {
                    host.pop(1);
                    return Err(VisitorError::Argument("invalid option".to_string()));
                }
                match host.function_report() {
                    Some(info) => (info, None),
                    None => return Ok(None),
                }
            }
            other => {
                return Err(VisitorError::Argument(format!(
                    "need stack level or function reference, got {}",
                    other.kind_name()
                )))
            }
        };

        let mut report = InfoReport::default();
        if mask.contains(InfoMask::SOURCE) {
            report.source = Some(info.source.clone());
            report.short_src = Some(info.short_src.clone());
            report.linedefined = Some(info.linedefined);
            report.lastlinedefined = Some(info.lastlinedefined);
            report.what = Some(info.what.to_string());
        }
        if mask.contains(InfoMask::CURRENT_LINE) {
            report.currentline = Some(info.currentline);
        }
        if mask.contains(InfoMask::NAME) {
            report.name = Some(info.name.clone().unwrap_or_else(|| "?".to_string()));
            report.namewhat = Some(info.namewhat.to_string());
        }
        if mask.contains(InfoMask::FUNC) {
            // Only reachable for frame subjects.
            report.func = frame.map(ValuePath::frame_func);
        }
        if mask.contains(InfoMask::PARAMS) {
            report.nparams = Some(info.nparams);
        }
        if mask.contains(InfoMask::TAIL_CALL) {
            report.istailcall = Some(info.is_tail_call);
        }
        if mask.contains(InfoMask::TRANSFER) {
            report.ftransfer = Some(info.ftransfer);
            report.ntransfer = Some(info.ntransfer);
        }
        Ok(Some(report))
    }

    // ------------------------------------------------------------------
    // Loading and calling
    // ------------------------------------------------------------------

    /// Load a chunk in the host and anchor it as a reference.
    pub fn load(&self, host: &mut HostState, source: &[u8]) -> Result<LoadOutcome, VisitorError> {
        if !host.check_stack(3) {
            return Err(VisitorError::StackOverflow);
        }
        match host.load_chunk(source) {
            Err(msg) => Ok(LoadOutcome::Error(msg)),
            Ok(()) => {
                let (_, path) = refs::ref_value(host);
                host.pop(1);
                Ok(LoadOutcome::Chunk(DbgValue::Path(path)))
            }
        }
    }

    /// Call the function `func` denotes with `args`, all copied into
    /// the host (tables by deep copy). Returns the single result copied
    /// out, or the error message.
    pub fn eval(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        args: &[DbgValue],
    ) -> Result<EvalOutcome, VisitorError> {
        let base = host.top();
        if !host.check_stack(args.len() + 1) {
            return Err(VisitorError::StackOverflow);
        }
        self.push_call(host, func, args, base)?;
        match host.pcall(args.len(), 1) {
            Err(_) => {
                let msg = error_bytes(host);
                host.pop(1);
                Ok(EvalOutcome::Error(msg))
            }
            Ok(()) => {
                let (v, _) = copy::copy_value(host, false);
                host.pop(1);
                Ok(EvalOutcome::Value(v))
            }
        }
    }

    /// Like `eval`, but keeps every result, anchoring each in the watch
    /// registry.
    pub fn watch(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        args: &[DbgValue],
    ) -> Result<WatchOutcome, VisitorError> {
        let base = host.top();
        if !host.check_stack(args.len() + 1) {
            return Err(VisitorError::StackOverflow);
        }
        self.push_call(host, func, args, base)?;
        match host.pcall(args.len(), host::MULTRET) {
            Err(_) => {
                let msg = error_bytes(host);
                host.pop(1);
                Ok(WatchOutcome::Error(msg))
            }
            Ok(()) => {
                let rets = (host.top() - base) as usize;
                if !host.check_stack(3) {
                    host.set_top(base);
                    return Err(VisitorError::StackOverflow);
                }
                let mut out = Vec::with_capacity(rets);
                for i in 0..rets {
                    let handle = refs::add_watch(host, base + 1 + i as i32);
                    out.push(DbgValue::Path(ValuePath::registry_slot(
                        refs::WATCH_TABLE,
                        handle,
                    )));
                }
                host.set_top(base);
                Ok(WatchOutcome::Values(out))
            }
        }
    }

    /// Push `func` and `args`, failing with a clean stack when the
    /// function argument does not denote a function.
    fn push_call(
        &self,
        host: &mut HostState,
        func: &DbgValue,
        args: &[DbgValue],
        base: i32,
    ) -> Result<(), VisitorError> {
        let t = match copy::push_arg(host, func) {
            Ok(t) => t,
            Err(e) => {
                host.set_top(base);
                return Err(e);
            }
        };
        if t == TypeTag::None {
            host.push_nil();
        }
        if t != TypeTag::Function {
            host.set_top(base);
            return Err(VisitorError::Argument("need function".to_string()));
        }
        for arg in args {
            match copy::push_arg(host, arg) {
                Ok(TypeTag::None) => host.push_nil(),
                Ok(_) => {}
                Err(e) => {
                    host.set_top(base);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Drop every watch anchor at once.
    pub fn cleanwatch(&self, host: &mut HostState) {
        refs::clean_watch(host);
    }

    /// Release a reference previously handed out through a
    /// ref-anchored path (a `load` result or a ref-mode copy).
    pub fn unref(&self, host: &mut HostState, path: &ValuePath) -> bool {
        let handle = match ref_handle(path.view()) {
            Some(handle) => handle,
            None => return false,
        };
        refs::unref_value(host, handle);
        true
    }

    // ------------------------------------------------------------------
    // Coroutines, GC, native symbols
    // ------------------------------------------------------------------

    /// Observable status of the coroutine `co` denotes.
    pub fn costatus(
        &self,
        host: &mut HostState,
        co: &DbgValue,
    ) -> Result<CoroutineStatus, VisitorError> {
        let tag = copy::push_to_host(host, co)?;
        if tag == TypeTag::None {
            return Ok(CoroutineStatus::Invalid);
        }
        if tag != TypeTag::Thread {
            host.pop(1);
            return Ok(CoroutineStatus::Invalid);
        }
        let thread = match host.to_thread(-1) {
            Some(t) => t,
            None => {
                host.pop(1);
                return Ok(CoroutineStatus::Invalid);
            }
        };
        host.pop(1);
        if host.is_current_thread(&thread) {
            return Ok(CoroutineStatus::Running);
        }
        let state = thread.borrow();
        Ok(match state.status {
            host::CoStatus::Yielded => CoroutineStatus::Suspended,
            host::CoStatus::Dead => CoroutineStatus::Dead,
            host::CoStatus::Ok => {
                if !state.frames.is_empty() {
                    // Frames but not running: awaiting a callee.
                    CoroutineStatus::Normal
                } else if state.stack.is_empty() {
                    CoroutineStatus::Dead
                } else {
                    // Values staged but never resumed.
                    CoroutineStatus::Suspended
                }
            }
        })
    }

    /// Approximate host allocation, recombined from the host's
    /// kibibyte and remainder counters.
    pub fn gccount(&self, host: &HostState) -> i64 {
        ((host.gc_count() << 10) + host.gc_count_rem()) as i64
    }

    /// Symbolized name of the native function `f` denotes, through the
    /// installed resolver.
    pub fn cfunctioninfo(
        &self,
        host: &mut HostState,
        f: &DbgValue,
    ) -> Result<Option<String>, VisitorError> {
        let tag = copy::push_to_host(host, f)?;
        if tag == TypeTag::None {
            return Ok(None);
        }
        if tag != TypeTag::Function {
            host.pop(1);
            return Ok(None);
        }
        let closure = match host.to_closure(-1) {
            Some(c) => c,
            None => {
                host.pop(1);
                return Ok(None);
            }
        };
        host.pop(1);
        let closure = closure.borrow();
        if !closure.is_native {
            return Ok(None);
        }
        let ptr = closure.entry as usize;
        Ok(self.symbolize.as_ref().and_then(|resolve| resolve(ptr)))
    }
}

/// Decode the handle out of a registry-ref path
/// (`registry[__debugger_ref][handle]`).
fn ref_handle(path: PathRef<'_>) -> Option<i64> {
    match path.step().ok()? {
        Step::IndexInt { key, inner } => match inner.step().ok()? {
            Step::IndexStr { key: name, inner } if name == refs::REF_TABLE.as_bytes() => {
                match inner.step().ok()? {
                    Step::Registry => Some(key),
                    _ => None,
                }
            }
            _ => None,
        },
        _ => None,
    }
}

/// Render a host error value (on top of the stack) as message bytes.
fn error_bytes(host: &HostState) -> Vec<u8> {
    match host.value_at(-1) {
        Some(host::Value::Str(s)) => s.to_vec(),
        Some(host::Value::Integer(i)) => i.to_string().into_bytes(),
        Some(host::Value::Float(f)) => f.to_string().into_bytes(),
        Some(other) => format!("(error object is a {} value)", other.type_tag().type_name())
            .into_bytes(),
        None => b"(no error message)".to_vec(),
    }
}
