//! The host state and its stack-based API.
//!
//! [`HostState`] mirrors the C API of an embedded scripting runtime:
//! values are pushed onto and popped off a value stack, addressed by
//! 1-based absolute indices, negative from-top indices, or the registry
//! pseudo-index. Call frames carry named locals (windows into the
//! stack) and varargs; while the host is paused, a debugger inspects
//! and mutates them through the queries below.
//!
//! Every operation documents its stack effect; the debugger side builds
//! balanced protocols out of these primitives.

use crate::table::{Table, TableKeyError};
use crate::value::{
    ClosureHandle, TableHandle, ThreadHandle, TypeTag, UserData, UserDataHandle, Value,
};
use common::Logger;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Pseudo-index addressing the registry table.
pub const REGISTRY_INDEX: i32 = i32::MIN + 1000;

/// Registry slot of the main thread.
pub const RIDX_MAINTHREAD: i64 = 1;
/// Registry slot of the globals table.
pub const RIDX_GLOBALS: i64 = 2;

/// Ask `pcall` for all results.
pub const MULTRET: i32 = -1;

/// Sentinel handle: no reference was created.
pub const NO_REF: i64 = -2;
/// Sentinel handle returned when a nil value is ref'd.
pub const REF_NIL: i64 = -1;

const DEFAULT_STACK_LIMIT: usize = 1_000_000;

/// Error raised by a native function inside a protected call. Carries
/// the error value (usually a message string).
#[derive(Debug, Clone)]
pub struct CallError(Value);

impl CallError {
    pub fn new(value: Value) -> CallError {
        CallError(value)
    }

    pub fn value(&self) -> Value {
        self.0.clone()
    }
}

impl From<&str> for CallError {
    fn from(msg: &str) -> CallError {
        CallError(Value::str(msg))
    }
}

impl From<String> for CallError {
    fn from(msg: String) -> CallError {
        CallError(Value::Str(Rc::from(msg.into_bytes().as_slice())))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::Str(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            other => write!(f, "{:?}", other),
        }
    }
}

impl std::error::Error for CallError {}

/// Raw status of a coroutine, as stored on the thread object. The
/// debugger-visible status additionally distinguishes `normal` and
/// pre-first-resume threads (see the visitor's coroutine query).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    Ok,
    Yielded,
    Dead,
}

/// State owned by one thread/coroutine: its value stack and call
/// frames. The running thread's state lives inline in [`HostState`];
/// `ThreadState` instances describe the others.
pub struct ThreadState {
    pub status: CoStatus,
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
}

impl ThreadState {
    pub fn new() -> ThreadState {
        ThreadState {
            status: CoStatus::Ok,
            stack: Vec::new(),
            frames: Vec::new(),
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

/// A call frame. `base` is the 0-based stack position of the first
/// local; `local_names[i]` names the value at `base + i`.
pub struct Frame {
    pub func: Value,
    pub base: usize,
    pub local_names: Vec<String>,
    pub varargs: Vec<Value>,
    pub currentline: i32,
    pub name: Option<String>,
    pub namewhat: &'static str,
    pub is_tail_call: bool,
    pub ftransfer: u32,
    pub ntransfer: u32,
}

impl Frame {
    pub fn new(func: Value, base: usize) -> Frame {
        Frame {
            func,
            base,
            local_names: Vec::new(),
            varargs: Vec::new(),
            currentline: -1,
            name: None,
            namewhat: "",
            is_tail_call: false,
            ftransfer: 0,
            ntransfer: 0,
        }
    }
}

/// Everything an activation-info query can report about a frame or a
/// bare function.
#[derive(Debug, Clone)]
pub struct ActivationInfo {
    pub source: Vec<u8>,
    pub short_src: String,
    pub what: &'static str,
    pub linedefined: i32,
    pub lastlinedefined: i32,
    pub currentline: i32,
    pub name: Option<String>,
    pub namewhat: &'static str,
    pub nparams: u8,
    pub is_vararg: bool,
    pub is_tail_call: bool,
    pub ftransfer: u32,
    pub ntransfer: u32,
}

type Loader = Box<dyn Fn(&[u8]) -> Result<ClosureHandle, String>>;

/// The host interpreter state.
pub struct HostState {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    registry: TableHandle,
    globals: TableHandle,
    main: ThreadHandle,
    type_metatables: [Option<TableHandle>; 10],
    loader: Option<Loader>,
    stack_limit: usize,
    alloc_bytes: usize,
    log: Logger,
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

impl HostState {
    pub fn new() -> HostState {
        let registry = Table::handle();
        let globals = Table::handle();
        let main: ThreadHandle = Rc::new(RefCell::new(ThreadState::new()));
        registry
            .borrow_mut()
            .raw_set(Value::Integer(RIDX_MAINTHREAD), Value::Thread(main.clone()))
            .expect("integer key");
        registry
            .borrow_mut()
            .raw_set(Value::Integer(RIDX_GLOBALS), Value::Table(globals.clone()))
            .expect("integer key");
        HostState {
            stack: Vec::new(),
            frames: Vec::new(),
            registry,
            globals,
            main,
            type_metatables: Default::default(),
            loader: None,
            stack_limit: DEFAULT_STACK_LIMIT,
            alloc_bytes: 128,
            log: common::create_logger("host"),
        }
    }

    /// Install the chunk loader backing `load_chunk`.
    pub fn set_loader(&mut self, loader: impl Fn(&[u8]) -> Result<ClosureHandle, String> + 'static) {
        self.loader = Some(Box::new(loader));
    }

    /// Lower the stack cap (tests use this to exercise overflow paths).
    pub fn set_stack_limit(&mut self, limit: usize) {
        self.stack_limit = limit;
    }

    pub fn globals(&self) -> TableHandle {
        self.globals.clone()
    }

    pub fn registry(&self) -> TableHandle {
        self.registry.clone()
    }

    // ------------------------------------------------------------------
    // Index resolution
    // ------------------------------------------------------------------

    fn resolve(&self, idx: i32) -> Option<usize> {
        let len = self.stack.len() as i64;
        let idx = idx as i64;
        if idx > 0 && idx <= len {
            Some((idx - 1) as usize)
        } else if idx < 0 && -idx <= len {
            Some((len + idx) as usize)
        } else {
            None
        }
    }

    fn slot(&self, idx: i32) -> Option<Value> {
        if idx == REGISTRY_INDEX {
            return Some(Value::Table(self.registry.clone()));
        }
        self.resolve(idx).map(|p| self.stack[p].clone())
    }

    fn push(&mut self, v: Value) {
        assert!(
            self.stack.len() < self.stack_limit,
            "host stack overflow: check_stack was not honored"
        );
        self.stack.push(v);
    }

    // ------------------------------------------------------------------
    // Stack discipline
    // ------------------------------------------------------------------

    /// Current stack depth (the index of the top value).
    pub fn top(&self) -> i32 {
        self.stack.len() as i32
    }

    /// True when `extra` more slots fit under the cap.
    pub fn check_stack(&self, extra: usize) -> bool {
        self.stack.len() + extra <= self.stack_limit
    }

    pub fn pop(&mut self, n: usize) {
        let len = self.stack.len();
        assert!(n <= len, "pop past stack bottom");
        self.stack.truncate(len - n);
    }

    pub fn set_top(&mut self, idx: i32) {
        if idx >= 0 {
            let want = idx as usize;
            if want <= self.stack.len() {
                self.stack.truncate(want);
            } else {
                while self.stack.len() < want {
                    self.push(Value::Nil);
                }
            }
        } else {
            let len = self.stack.len() as i64;
            let want = len + 1 + idx as i64;
            assert!(want >= 0, "set_top past stack bottom");
            self.stack.truncate(want as usize);
        }
    }

    /// Move the top value into position `idx`, shifting values up.
    pub fn insert(&mut self, idx: i32) {
        let pos = self.resolve(idx).expect("insert: invalid index");
        let v = self.stack.pop().expect("insert: empty stack");
        self.stack.insert(pos, v);
    }

    /// Pop the top value and write it over position `idx`.
    pub fn replace(&mut self, idx: i32) {
        let pos = self.resolve(idx).expect("replace: invalid index");
        let v = self.stack.pop().expect("replace: empty stack");
        self.stack[pos] = v;
    }

    /// Remove the value at `idx`, shifting values down.
    pub fn remove(&mut self, idx: i32) {
        let pos = self.resolve(idx).expect("remove: invalid index");
        self.stack.remove(pos);
    }

    // ------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_integer(&mut self, i: i64) {
        self.push(Value::Integer(i));
    }

    pub fn push_float(&mut self, f: f64) {
        self.push(Value::Float(f));
    }

    pub fn push_bytes(&mut self, b: &[u8]) {
        self.alloc_bytes += 24 + b.len();
        self.push(Value::bytes(b));
    }

    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_light_userdata(&mut self, p: usize) {
        self.push(Value::LightUserData(p));
    }

    /// Push a copy of the value at `idx`. Returns the pushed type, or
    /// `None` (pushing nothing) for an invalid index.
    pub fn push_value(&mut self, idx: i32) -> TypeTag {
        match self.slot(idx) {
            Some(v) => {
                let t = v.type_tag();
                self.push(v);
                t
            }
            None => TypeTag::None,
        }
    }

    /// Push an arbitrary value built by the embedder.
    pub fn push_host_value(&mut self, v: Value) {
        self.push(v);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn type_of(&self, idx: i32) -> TypeTag {
        self.slot(idx).map(|v| v.type_tag()).unwrap_or(TypeTag::None)
    }

    /// The value at `idx`, or `None` for an invalid index.
    pub fn value_at(&self, idx: i32) -> Option<Value> {
        self.slot(idx)
    }

    pub fn is_integer(&self, idx: i32) -> bool {
        matches!(self.slot(idx), Some(Value::Integer(_)))
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        !matches!(self.slot(idx), None | Some(Value::Nil) | Some(Value::Boolean(false)))
    }

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        match self.slot(idx)? {
            Value::Integer(i) => Some(i),
            Value::Float(f) if f.trunc() == f => Some(f as i64),
            _ => None,
        }
    }

    pub fn to_float(&self, idx: i32) -> Option<f64> {
        match self.slot(idx)? {
            Value::Integer(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn to_bytes(&self, idx: i32) -> Option<Rc<[u8]>> {
        match self.slot(idx)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_light_userdata(&self, idx: i32) -> Option<usize> {
        match self.slot(idx)? {
            Value::LightUserData(p) => Some(p),
            _ => None,
        }
    }

    pub fn to_table(&self, idx: i32) -> Option<TableHandle> {
        match self.slot(idx)? {
            Value::Table(h) => Some(h),
            _ => None,
        }
    }

    pub fn to_closure(&self, idx: i32) -> Option<ClosureHandle> {
        match self.slot(idx)? {
            Value::Function(h) => Some(h),
            _ => None,
        }
    }

    pub fn to_userdata(&self, idx: i32) -> Option<UserDataHandle> {
        match self.slot(idx)? {
            Value::UserData(h) => Some(h),
            _ => None,
        }
    }

    pub fn to_thread(&self, idx: i32) -> Option<ThreadHandle> {
        match self.slot(idx)? {
            Value::Thread(h) => Some(h),
            _ => None,
        }
    }

    pub fn to_pointer(&self, idx: i32) -> Option<usize> {
        self.slot(idx)?.as_ptr()
    }

    /// Raw length: string bytes, userdata buffer size, table border.
    pub fn rawlen(&self, idx: i32) -> usize {
        match self.slot(idx) {
            Some(Value::Str(s)) => s.len(),
            Some(Value::UserData(h)) => h.borrow().data.len(),
            Some(Value::Table(h)) => h.borrow().border(),
            _ => 0,
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    pub fn new_table(&mut self) -> TableHandle {
        self.alloc_bytes += 64;
        let h = Table::handle();
        self.push(Value::Table(h.clone()));
        h
    }

    pub fn new_userdata(&mut self, size: usize, nuvalue: usize) -> UserDataHandle {
        self.alloc_bytes += 40 + size + 16 * nuvalue;
        let h = UserData::new(size, nuvalue);
        self.push(Value::UserData(h.clone()));
        h
    }

    pub fn new_thread(&mut self) -> ThreadHandle {
        self.alloc_bytes += 160;
        let h: ThreadHandle = Rc::new(RefCell::new(ThreadState::new()));
        self.push(Value::Thread(h.clone()));
        h
    }

    /// Approximate bytes allocated by the host so far.
    pub fn gc_bytes(&self) -> usize {
        self.alloc_bytes
    }

    /// Kibibyte part of the allocation counter.
    pub fn gc_count(&self) -> usize {
        self.alloc_bytes >> 10
    }

    /// Remainder part of the allocation counter, in bytes.
    pub fn gc_count_rem(&self) -> usize {
        self.alloc_bytes & 0x3ff
    }

    // ------------------------------------------------------------------
    // Raw table access
    // ------------------------------------------------------------------

    fn table_at(&self, idx: i32) -> TableHandle {
        match self.slot(idx) {
            Some(Value::Table(h)) => h,
            other => panic!(
                "expected table at index {}, found {}",
                idx,
                other.map(|v| v.type_tag()).unwrap_or(TypeTag::None).type_name()
            ),
        }
    }

    /// `t[k]` with `t` at `t_idx` and `k` on top; pops the key and
    /// pushes the result. Returns the result's type.
    pub fn raw_get(&mut self, t_idx: i32) -> TypeTag {
        let t = self.table_at(t_idx);
        let key = self.stack.pop().expect("raw_get: key expected on top");
        let v = t.borrow().raw_get(&key);
        let tag = v.type_tag();
        self.push(v);
        tag
    }

    /// `t[k] = v` with `k` at `-2` and `v` on top; pops both.
    pub fn raw_set(&mut self, t_idx: i32) -> Result<(), TableKeyError> {
        let t = self.table_at(t_idx);
        let value = self.stack.pop().expect("raw_set: value expected");
        let key = self.stack.pop().expect("raw_set: key expected");
        let result = t.borrow_mut().raw_set(key, value);
        result
    }

    /// `t[i]`; pushes the result and returns its type.
    pub fn raw_geti(&mut self, t_idx: i32, i: i64) -> TypeTag {
        let t = self.table_at(t_idx);
        let v = t.borrow().raw_get(&Value::Integer(i));
        let tag = v.type_tag();
        self.push(v);
        tag
    }

    /// `t[i] = v` with `v` on top; pops it.
    pub fn raw_seti(&mut self, t_idx: i32, i: i64) {
        let t = self.table_at(t_idx);
        let value = self.stack.pop().expect("raw_seti: value expected");
        t.borrow_mut()
            .raw_set(Value::Integer(i), value)
            .expect("integer keys are always valid");
    }

    /// `t[name]`; pushes the result and returns its type.
    pub fn get_field(&mut self, t_idx: i32, name: &str) -> TypeTag {
        let t = self.table_at(t_idx);
        let v = t.borrow().raw_get(&Value::str(name));
        let tag = v.type_tag();
        self.push(v);
        tag
    }

    /// `t[name] = v` with `v` on top; pops it.
    pub fn set_field(&mut self, t_idx: i32, name: &str) {
        let t = self.table_at(t_idx);
        let value = self.stack.pop().expect("set_field: value expected");
        t.borrow_mut()
            .raw_set(Value::str(name), value)
            .expect("string keys are always valid");
    }

    // ------------------------------------------------------------------
    // Metatables and user values
    // ------------------------------------------------------------------

    /// Push the metatable of the value at `idx`, if it has one.
    /// Primitive types share one metatable per type.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let v = match self.slot(idx) {
            Some(v) => v,
            None => return false,
        };
        let mt = match &v {
            Value::Table(h) => h.borrow().metatable.clone(),
            Value::UserData(h) => h.borrow().metatable.clone(),
            other => self.type_metatables[other.type_tag() as usize].clone(),
        };
        match mt {
            Some(h) => {
                self.push(Value::Table(h));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and install it as the metatable of the
    /// value at `idx`. Primitive receivers set the shared per-type
    /// metatable.
    pub fn set_metatable(&mut self, idx: i32) {
        let v = self.slot(idx).expect("set_metatable: invalid index");
        let mt = match self.stack.pop().expect("set_metatable: metatable expected") {
            Value::Nil => None,
            Value::Table(h) => Some(h),
            other => panic!(
                "set_metatable: nil or table expected, found {}",
                other.type_tag().type_name()
            ),
        };
        match &v {
            Value::Table(h) => h.borrow_mut().metatable = mt,
            Value::UserData(h) => h.borrow_mut().metatable = mt,
            other => self.type_metatables[other.type_tag() as usize] = mt,
        }
    }

    /// Push the `n`-th user value of the userdata at `idx` (1-based).
    /// Returns `None` (pushing nothing) when the slot does not exist.
    pub fn get_user_value(&mut self, idx: i32, n: u16) -> TypeTag {
        let ud = match self.to_userdata(idx) {
            Some(h) => h,
            None => return TypeTag::None,
        };
        if n == 0 {
            return TypeTag::None;
        }
        let v = match ud.borrow().user_values.get(n as usize - 1) {
            Some(v) => v.clone(),
            None => return TypeTag::None,
        };
        let tag = v.type_tag();
        self.push(v);
        tag
    }

    /// Pop a value into the `n`-th user-value slot of the userdata at
    /// `idx`. The value is consumed even when the slot does not exist;
    /// returns whether the write happened.
    pub fn set_user_value(&mut self, idx: i32, n: u16) -> bool {
        // Resolve the receiver while the value still sits on top.
        let ud = self.to_userdata(idx);
        let v = self.stack.pop().expect("set_user_value: value expected");
        let ud = match ud {
            Some(h) => h,
            None => return false,
        };
        if n == 0 {
            return false;
        }
        let mut ud = ud.borrow_mut();
        match ud.user_values.get_mut(n as usize - 1) {
            Some(slot) => {
                *slot = v;
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Frames and debug queries
    // ------------------------------------------------------------------

    /// Enter a frame whose locals are the topmost `local_names.len()`
    /// stack values. Used by the embedder to stage a paused call stack
    /// and by `pcall` internally.
    pub fn enter_frame(&mut self, func: Value, local_names: &[&str]) {
        assert!(self.stack.len() >= local_names.len(), "locals not pushed");
        let base = self.stack.len() - local_names.len();
        let mut frame = Frame::new(func, base);
        frame.local_names = local_names.iter().map(|s| s.to_string()).collect();
        self.frames.push(frame);
    }

    /// Leave the innermost frame, dropping its locals.
    pub fn leave_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        self.stack.truncate(frame.base);
        Some(frame)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Mutable access to the frame at `level` (0 = innermost), for the
    /// embedder to fill in line/name/vararg details.
    pub fn frame_at_mut(&mut self, level: usize) -> Option<&mut Frame> {
        let len = self.frames.len();
        self.frames.get_mut(len.checked_sub(1 + level)?)
    }

    fn frame_index(&self, level: usize) -> Option<usize> {
        self.frames.len().checked_sub(1 + level)
    }

    /// Fetch local `n` of the frame at `level`: positive `n` is a named
    /// local, negative a vararg. Pushes the value and returns the
    /// variable name, or returns `None` pushing nothing.
    pub fn get_local(&mut self, level: usize, n: i32) -> Option<String> {
        let fidx = self.frame_index(level)?;
        if n > 0 {
            let i = (n - 1) as usize;
            let f = &self.frames[fidx];
            if i >= f.local_names.len() || f.base + i >= self.stack.len() {
                return None;
            }
            let name = f.local_names[i].clone();
            let value = self.stack[f.base + i].clone();
            self.push(value);
            Some(name)
        } else if n < 0 {
            let i = (-(n as i64) - 1) as usize;
            let value = self.frames[fidx].varargs.get(i)?.clone();
            self.push(value);
            Some("(vararg)".to_string())
        } else {
            None
        }
    }

    /// Pop the top value into local `n` of the frame at `level`.
    /// On failure the value is left in place and `None` returned.
    pub fn set_local(&mut self, level: usize, n: i32) -> Option<String> {
        let fidx = self.frame_index(level)?;
        if n > 0 {
            let i = (n - 1) as usize;
            let f = &self.frames[fidx];
            if i >= f.local_names.len() || f.base + i >= self.stack.len() {
                return None;
            }
            let name = f.local_names[i].clone();
            let pos = f.base + i;
            let value = self.stack.pop().expect("set_local: value expected");
            self.stack[pos] = value;
            Some(name)
        } else if n < 0 {
            let i = (-(n as i64) - 1) as usize;
            if i >= self.frames[fidx].varargs.len() {
                return None;
            }
            let value = self.stack.pop().expect("set_local: value expected");
            self.frames[fidx].varargs[i] = value;
            Some("(vararg)".to_string())
        } else {
            None
        }
    }

    /// Push the function running in the frame at `level`.
    pub fn frame_func(&mut self, level: usize) -> bool {
        match self.frame_index(level) {
            Some(fidx) => {
                let f = self.frames[fidx].func.clone();
                self.push(f);
                true
            }
            None => false,
        }
    }

    /// Activation info of the frame at `level`.
    pub fn frame_report(&self, level: usize) -> Option<ActivationInfo> {
        let f = &self.frames[self.frame_index(level)?];
        let mut info = match &f.func {
            Value::Function(h) => closure_report(h),
            _ => return None,
        };
        info.currentline = f.currentline;
        info.name = f.name.clone();
        info.namewhat = f.namewhat;
        info.is_tail_call = f.is_tail_call;
        info.ftransfer = f.ftransfer;
        info.ntransfer = f.ntransfer;
        Some(info)
    }

    /// Activation info of the function on top of the stack; pops it.
    pub fn function_report(&mut self) -> Option<ActivationInfo> {
        let h = self.to_closure(-1)?;
        self.pop(1);
        Some(closure_report(&h))
    }

    /// Fetch upvalue `n` (1-based) of the function at `idx`. Pushes the
    /// value and returns its name.
    pub fn get_upvalue(&mut self, idx: i32, n: u16) -> Option<String> {
        let h = self.to_closure(idx)?;
        if n == 0 {
            return None;
        }
        let (name, value) = {
            let c = h.borrow();
            let uv = c.upvalues.get(n as usize - 1)?;
            let name = uv.name.clone();
            let value = uv.cell.borrow().clone();
            (name, value)
        };
        self.push(value);
        Some(name)
    }

    /// Pop the top value into upvalue `n` of the function at `idx`.
    /// On failure the value is left in place and `None` returned.
    pub fn set_upvalue(&mut self, idx: i32, n: u16) -> Option<String> {
        let h = self.to_closure(idx)?;
        if n == 0 {
            return None;
        }
        let c = h.borrow();
        let uv = match c.upvalues.get(n as usize - 1) {
            Some(uv) => uv,
            None => return None,
        };
        let name = uv.name.clone();
        let cell = uv.cell.clone();
        drop(c);
        let value = self.stack.pop().expect("set_upvalue: value expected");
        *cell.borrow_mut() = value;
        Some(name)
    }

    /// Push upvalue `n` of the closure running in the innermost frame.
    /// Native functions use this to reach their closed-over cells.
    pub fn push_upvalue(&mut self, n: usize) -> bool {
        if n == 0 {
            return false;
        }
        let value = match self.frames.last() {
            Some(Frame {
                func: Value::Function(h),
                ..
            }) => match h.borrow().upvalues.get(n - 1) {
                Some(uv) => uv.cell.borrow().clone(),
                None => return false,
            },
            _ => return false,
        };
        self.push(value);
        true
    }

    /// Absolute 1-based stack index of argument `i` of the running
    /// native call.
    pub fn arg_index(&self, i: usize) -> i32 {
        let base = self.frames.last().expect("no active call").base;
        (base + i) as i32
    }

    // ------------------------------------------------------------------
    // Calls and loading
    // ------------------------------------------------------------------

    /// Protected call: `func` and `nargs` arguments on top. On success
    /// they are replaced by the results, adjusted to `nresults`
    /// (`MULTRET` keeps all). On error the stack is cut back and the
    /// error value pushed.
    pub fn pcall(&mut self, nargs: usize, nresults: i32) -> Result<(), CallError> {
        let top = self.stack.len();
        assert!(top >= nargs + 1, "pcall: function and arguments expected");
        let func_pos = top - nargs - 1;
        let closure = match &self.stack[func_pos] {
            Value::Function(h) => h.clone(),
            other => {
                let err = CallError::from(format!(
                    "attempt to call a {} value",
                    other.type_tag().type_name()
                ));
                self.stack.truncate(func_pos);
                self.push(err.value());
                return Err(err);
            }
        };
        let entry = closure.borrow().entry;
        self.frames
            .push(Frame::new(Value::Function(closure), func_pos + 1));
        let result = entry(self, nargs);
        self.frames.pop();
        match result {
            Ok(nret) => {
                let top = self.stack.len();
                assert!(top >= func_pos + nret, "native call returned more results than pushed");
                self.stack.drain(func_pos..top - nret);
                if nresults >= 0 {
                    let want = func_pos + nresults as usize;
                    while self.stack.len() > want {
                        self.stack.pop();
                    }
                    while self.stack.len() < want {
                        self.push(Value::Nil);
                    }
                }
                Ok(())
            }
            Err(err) => {
                common::log_detail!(self.log, "protected call failed: {}", err);
                self.stack.truncate(func_pos);
                self.push(err.value());
                Err(err)
            }
        }
    }

    /// Build a closure from `source` via the installed loader and push
    /// it. On failure nothing is pushed and the message is returned.
    pub fn load_chunk(&mut self, source: &[u8]) -> Result<(), Vec<u8>> {
        let loader = match self.loader.as_ref() {
            Some(l) => l,
            None => return Err(b"no chunk loader installed".to_vec()),
        };
        let built = loader(source);
        match built {
            Ok(closure) => {
                self.alloc_bytes += 64 + 16 * closure.borrow().upvalues.len();
                self.push(Value::Function(closure));
                Ok(())
            }
            Err(msg) => Err(msg.into_bytes()),
        }
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Pop the top value and anchor it in the table at `t_idx`,
    /// returning the integer handle ([`REF_NIL`] for nil).
    pub fn ref_register(&mut self, t_idx: i32) -> i64 {
        let t = self.table_at(t_idx);
        let v = self.stack.pop().expect("ref_register: value expected");
        if v.is_nil() {
            return REF_NIL;
        }
        let handle = t.borrow().border() as i64 + 1;
        t.borrow_mut()
            .raw_set(Value::Integer(handle), v)
            .expect("integer keys are always valid");
        handle
    }

    /// Release a handle previously returned by `ref_register`.
    /// Negative handles are ignored.
    pub fn unref(&mut self, t_idx: i32, handle: i64) {
        if handle < 0 {
            return;
        }
        let t = self.table_at(t_idx);
        t.borrow_mut()
            .raw_set(Value::Integer(handle), Value::Nil)
            .expect("integer keys are always valid");
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// True when `co` is the thread currently running the host.
    pub fn is_current_thread(&self, co: &ThreadHandle) -> bool {
        Rc::ptr_eq(co, &self.main)
    }
}

fn closure_report(h: &ClosureHandle) -> ActivationInfo {
    let c = h.borrow();
    ActivationInfo {
        source: c.info.source.clone(),
        short_src: c.info.short_src.clone(),
        what: c.info.what,
        linedefined: c.info.linedefined,
        lastlinedefined: c.info.lastlinedefined,
        currentline: -1,
        name: None,
        namewhat: "",
        nparams: c.info.nparams,
        is_vararg: c.info.is_vararg,
        is_tail_call: false,
        ftransfer: 0,
        ntransfer: 0,
    }
}
