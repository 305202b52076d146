//! The value-path codec.
//!
//! A [`ValuePath`] is a self-contained binary route from a well-known
//! root (a call frame, the globals table, the registry, a raw stack
//! slot) through chains of indexing, upvalue, metatable, and user-value
//! steps. Paths hold no live references into the host: they can be
//! copied freely, stored on the debugger side, and evaluated later
//! against the paused host.
//!
//! Steps are encoded outermost-first, little-endian, one tag byte plus
//! a fixed payload (plus the key bytes for string indexing). The byte
//! buffer after a step's payload is itself a complete path - the
//! evaluator recurses on these suffix views.

use host::TypeTag;

const TAG_FRAME_LOCAL: u8 = 0x01;
const TAG_FRAME_FUNC: u8 = 0x02;
const TAG_GLOBAL: u8 = 0x03;
const TAG_REGISTRY: u8 = 0x04;
const TAG_STACK: u8 = 0x05;
const TAG_UPVALUE: u8 = 0x06;
const TAG_METATABLE: u8 = 0x07;
const TAG_USERVALUE: u8 = 0x08;
const TAG_INDEX_INT: u8 = 0x09;
const TAG_INDEX_STR: u8 = 0x0a;
const TAG_INDEX_KEY: u8 = 0x0b;
const TAG_INDEX_VAL: u8 = 0x0c;

/// Decoding failure. Paths built by this module never fail to decode;
/// this guards against corrupted buffers reaching the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    Truncated,
    BadTag(u8),
    BadType(u8),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Truncated => write!(f, "truncated path"),
            PathError::BadTag(t) => write!(f, "invalid step tag: 0x{:02x}", t),
            PathError::BadType(t) => write!(f, "invalid base type: {}", t),
        }
    }
}

impl std::error::Error for PathError {}

/// An owned, self-contained value path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ValuePath {
    bytes: Box<[u8]>,
}

/// A borrowed view of a path, positioned at any step boundary inside a
/// buffer.
#[derive(Clone, Copy)]
pub struct PathRef<'a>(pub(crate) &'a [u8]);

/// One decoded step. Composite variants carry the view of their inner
/// path.
#[derive(Clone, Copy)]
pub(crate) enum Step<'a> {
    FrameLocal { frame: u16, slot: i16 },
    FrameFunc { frame: u16 },
    Global,
    Registry,
    StackSlot { slot: i32 },
    Upvalue { index: u16, inner: PathRef<'a> },
    Metatable { base: TypeTag, inner: Option<PathRef<'a>> },
    UserValue { slot: u16, inner: PathRef<'a> },
    IndexInt { key: i64, inner: PathRef<'a> },
    IndexStr { key: &'a [u8], inner: PathRef<'a> },
    IndexKey { bucket: u32, inner: PathRef<'a> },
    IndexVal { bucket: u32, inner: PathRef<'a> },
}

fn read_u16(b: &[u8], off: usize) -> Result<u16, PathError> {
    if off + 2 > b.len() {
        return Err(PathError::Truncated);
    }
    Ok(u16::from_le_bytes([b[off], b[off + 1]]))
}

fn read_i16(b: &[u8], off: usize) -> Result<i16, PathError> {
    Ok(read_u16(b, off)? as i16)
}

fn read_u32(b: &[u8], off: usize) -> Result<u32, PathError> {
    if off + 4 > b.len() {
        return Err(PathError::Truncated);
    }
    Ok(u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]))
}

fn read_i32(b: &[u8], off: usize) -> Result<i32, PathError> {
    Ok(read_u32(b, off)? as i32)
}

fn read_i64(b: &[u8], off: usize) -> Result<i64, PathError> {
    if off + 8 > b.len() {
        return Err(PathError::Truncated);
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[off..off + 8]);
    Ok(i64::from_le_bytes(raw))
}

impl<'a> PathRef<'a> {
    /// Decode the outermost step.
    pub(crate) fn step(self) -> Result<Step<'a>, PathError> {
        let b = self.0;
        let tag = *b.first().ok_or(PathError::Truncated)?;
        match tag {
            TAG_FRAME_LOCAL => Ok(Step::FrameLocal {
                frame: read_u16(b, 1)?,
                slot: read_i16(b, 3)?,
            }),
            TAG_FRAME_FUNC => Ok(Step::FrameFunc {
                frame: read_u16(b, 1)?,
            }),
            TAG_GLOBAL => Ok(Step::Global),
            TAG_REGISTRY => Ok(Step::Registry),
            TAG_STACK => Ok(Step::StackSlot {
                slot: read_i32(b, 1)?,
            }),
            TAG_UPVALUE => {
                let index = read_u16(b, 1)?;
                Ok(Step::Upvalue {
                    index,
                    inner: PathRef(&b[3..]),
                })
            }
            TAG_METATABLE => {
                let raw = *b.get(1).ok_or(PathError::Truncated)?;
                let base = TypeTag::from_u8(raw).ok_or(PathError::BadType(raw))?;
                let inner = if base == TypeTag::Table || base == TypeTag::UserData {
                    Some(PathRef(&b[2..]))
                } else {
                    None
                };
                Ok(Step::Metatable { base, inner })
            }
            TAG_USERVALUE => {
                let slot = read_u16(b, 1)?;
                Ok(Step::UserValue {
                    slot,
                    inner: PathRef(&b[3..]),
                })
            }
            TAG_INDEX_INT => {
                let key = read_i64(b, 1)?;
                Ok(Step::IndexInt {
                    key,
                    inner: PathRef(&b[9..]),
                })
            }
            TAG_INDEX_STR => {
                let len = read_u32(b, 1)? as usize;
                let key = b.get(5..5 + len).ok_or(PathError::Truncated)?;
                Ok(Step::IndexStr {
                    key,
                    inner: PathRef(&b[5 + len..]),
                })
            }
            TAG_INDEX_KEY => Ok(Step::IndexKey {
                bucket: read_u32(b, 1)?,
                inner: PathRef(&b[5..]),
            }),
            TAG_INDEX_VAL => Ok(Step::IndexVal {
                bucket: read_u32(b, 1)?,
                inner: PathRef(&b[5..]),
            }),
            t => Err(PathError::BadTag(t)),
        }
    }

    /// Total encoded size of the path starting at this step. Constant
    /// work for roots, recursive through composite steps.
    pub(crate) fn encoded_len(self) -> Result<usize, PathError> {
        match self.step()? {
            Step::FrameLocal { .. } => Ok(5),
            Step::FrameFunc { .. } => Ok(3),
            Step::Global | Step::Registry => Ok(1),
            Step::StackSlot { .. } => Ok(5),
            Step::Upvalue { inner, .. } => Ok(3 + inner.encoded_len()?),
            Step::Metatable { inner, .. } => match inner {
                Some(inner) => Ok(2 + inner.encoded_len()?),
                None => Ok(2),
            },
            Step::UserValue { inner, .. } => Ok(3 + inner.encoded_len()?),
            Step::IndexInt { inner, .. } => Ok(9 + inner.encoded_len()?),
            Step::IndexStr { key, inner } => Ok(5 + key.len() + inner.encoded_len()?),
            Step::IndexKey { inner, .. } | Step::IndexVal { inner, .. } => {
                Ok(5 + inner.encoded_len()?)
            }
        }
    }
}

impl ValuePath {
    fn from_vec(bytes: Vec<u8>) -> ValuePath {
        ValuePath {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Prepend a step header (and any payload bytes) onto this path,
    /// copying the inner bytes verbatim.
    fn extend(&self, header: &[u8]) -> ValuePath {
        let mut bytes = Vec::with_capacity(header.len() + self.bytes.len());
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&self.bytes);
        ValuePath::from_vec(bytes)
    }

    pub(crate) fn view(&self) -> PathRef<'_> {
        PathRef(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        self.bytes.len()
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// The globals table.
    pub fn globals() -> ValuePath {
        ValuePath::from_vec(vec![TAG_GLOBAL])
    }

    /// The host registry table.
    pub fn registry() -> ValuePath {
        ValuePath::from_vec(vec![TAG_REGISTRY])
    }

    /// Local `slot` of call frame `frame`; negative slots address
    /// varargs.
    pub fn frame_local(frame: u16, slot: i16) -> ValuePath {
        let mut b = vec![TAG_FRAME_LOCAL];
        b.extend_from_slice(&frame.to_le_bytes());
        b.extend_from_slice(&slot.to_le_bytes());
        ValuePath::from_vec(b)
    }

    /// The function running in call frame `frame`.
    pub fn frame_func(frame: u16) -> ValuePath {
        let mut b = vec![TAG_FRAME_FUNC];
        b.extend_from_slice(&frame.to_le_bytes());
        ValuePath::from_vec(b)
    }

    /// A raw host stack slot (transient use only).
    pub fn stack_slot(slot: i32) -> ValuePath {
        let mut b = vec![TAG_STACK];
        b.extend_from_slice(&slot.to_le_bytes());
        ValuePath::from_vec(b)
    }

    // ------------------------------------------------------------------
    // Composite steps
    // ------------------------------------------------------------------

    /// `self[key]`, raw integer indexing.
    pub fn index_int(&self, key: i64) -> ValuePath {
        let mut h = vec![TAG_INDEX_INT];
        h.extend_from_slice(&key.to_le_bytes());
        self.extend(&h)
    }

    /// `self[key]`, raw string indexing.
    pub fn index_str(&self, key: &[u8]) -> ValuePath {
        let mut h = vec![TAG_INDEX_STR];
        h.extend_from_slice(&(key.len() as u32).to_le_bytes());
        h.extend_from_slice(key);
        self.extend(&h)
    }

    /// The key stored at hash bucket `bucket` of the table `self`.
    pub fn index_key(&self, bucket: u32) -> ValuePath {
        let mut h = vec![TAG_INDEX_KEY];
        h.extend_from_slice(&bucket.to_le_bytes());
        self.extend(&h)
    }

    /// The value stored at hash bucket `bucket` of the table `self`.
    pub fn index_val(&self, bucket: u32) -> ValuePath {
        let mut h = vec![TAG_INDEX_VAL];
        h.extend_from_slice(&bucket.to_le_bytes());
        self.extend(&h)
    }

    /// Upvalue `index` (1-based) of the function `self`.
    pub fn upvalue(&self, index: u16) -> ValuePath {
        let mut h = vec![TAG_UPVALUE];
        h.extend_from_slice(&index.to_le_bytes());
        self.extend(&h)
    }

    /// The metatable of `self`, which must denote a table or userdata.
    pub fn metatable(&self, base: TypeTag) -> ValuePath {
        debug_assert!(base == TypeTag::Table || base == TypeTag::UserData);
        self.extend(&[TAG_METATABLE, base as u8])
    }

    /// The shared metatable of a primitive type; needs no inner path.
    pub fn type_metatable(base: TypeTag) -> ValuePath {
        debug_assert!(base != TypeTag::Table && base != TypeTag::UserData);
        ValuePath::from_vec(vec![TAG_METATABLE, base as u8])
    }

    /// User value `slot` (1-based) of the userdata `self`.
    pub fn user_value(&self, slot: u16) -> ValuePath {
        let mut h = vec![TAG_USERVALUE];
        h.extend_from_slice(&slot.to_le_bytes());
        self.extend(&h)
    }

    /// A registry-anchored reference: `registry[slot_name][handle]`.
    pub(crate) fn registry_slot(slot_name: &str, handle: i64) -> ValuePath {
        ValuePath::registry()
            .index_str(slot_name.as_bytes())
            .index_int(handle)
    }
}

impl std::fmt::Debug for ValuePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn fmt_ref(p: PathRef<'_>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match p.step() {
                Err(e) => write!(f, "<{}>", e),
                Ok(step) => match step {
                    Step::FrameLocal { frame, slot } => write!(f, "local({}, {})", frame, slot),
                    Step::FrameFunc { frame } => write!(f, "func({})", frame),
                    Step::Global => write!(f, "_G"),
                    Step::Registry => write!(f, "_REGISTRY"),
                    Step::StackSlot { slot } => write!(f, "stack({})", slot),
                    Step::Upvalue { index, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, ".up({})", index)
                    }
                    Step::Metatable { base, inner } => {
                        match inner {
                            Some(inner) => fmt_ref(inner, f)?,
                            None => write!(f, "<{}>", base.type_name())?,
                        }
                        write!(f, ".metatable")
                    }
                    Step::UserValue { slot, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, ".uv({})", slot)
                    }
                    Step::IndexInt { key, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, "[{}]", key)
                    }
                    Step::IndexStr { key, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, "[{:?}]", String::from_utf8_lossy(key))
                    }
                    Step::IndexKey { bucket, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, ".key({})", bucket)
                    }
                    Step::IndexVal { bucket, inner } => {
                        fmt_ref(inner, f)?;
                        write!(f, ".val({})", bucket)
                    }
                },
            }
        }
        fmt_ref(self.view(), f)
    }
}
