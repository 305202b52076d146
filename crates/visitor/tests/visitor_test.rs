//! End-to-end tests driving the visitor against a staged host.
//!
//! Each test builds a paused host state (globals, frames, loaded
//! chunks), runs visitor operations, and checks both the answers and
//! the host stack balance around every call.

use host::{CallError, Closure, CoStatus, HostState, Table, Value};
use visitor::{
    CoroutineStatus, DbgValue, EvalOutcome, LoadOutcome, Visitor, VisitorError, WatchOutcome,
};

fn set_global(host: &mut HostState, name: &str, value: Value) {
    host.globals()
        .borrow_mut()
        .raw_set(Value::str(name), value)
        .unwrap();
}

fn install_loader(host: &mut HostState) {
    host.set_loader(|source| {
        if source == b"return {}" {
            Ok(Closure::script(
                |host, _| {
                    host.new_table();
                    Ok(1)
                },
                b"=",
                0,
                0,
            ))
        } else if source == b"return 1 + 1" {
            Ok(Closure::script(
                |host, _| {
                    host.push_integer(2);
                    Ok(1)
                },
                b"=",
                0,
                0,
            ))
        } else if source == b"return function(t) return t.k end" {
            Ok(Closure::script(
                |host, nargs| {
                    if nargs < 1 {
                        host.push_nil();
                        return Ok(1);
                    }
                    let t = host.arg_index(1);
                    if host.type_of(t) == host::TypeTag::Table {
                        host.get_field(t, "k");
                    } else {
                        host.push_nil();
                    }
                    Ok(1)
                },
                b"=",
                0,
                0,
            ))
        } else if source == b"return 'a', 'b'" {
            Ok(Closure::script(
                |host, _| {
                    host.push_str("a");
                    host.push_str("b");
                    Ok(2)
                },
                b"=",
                0,
                0,
            ))
        } else if source == b"error('boom')" {
            Ok(Closure::script(
                |_, _| Err(CallError::from("boom")),
                b"=",
                0,
                0,
            ))
        } else {
            Err("syntax error near chunk start".to_string())
        }
    });
}

/// Run one operation and assert the host stack depth is unchanged.
macro_rules! balanced {
    ($host:expr, $op:expr) => {{
        let top_before = $host.top();
        let out = $op;
        assert_eq!($host.top(), top_before, "operation left the host stack unbalanced");
        out
    }};
}

// ----------------------------------------------------------------------
// Scenario: nested field reads
// ----------------------------------------------------------------------

#[test]
fn nested_field_read() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let inner = Table::handle();
    inner
        .borrow_mut()
        .raw_set(Value::str("baz"), Value::Integer(42))
        .unwrap();
    let mid = Table::handle();
    mid.borrow_mut()
        .raw_set(Value::str("bar"), Value::Table(inner))
        .unwrap();
    let foo = Table::handle();
    foo.borrow_mut()
        .raw_set(Value::str("bar"), Value::Table(mid.clone()))
        .unwrap();
    set_global(&mut host, "foo", Value::Table(foo));

    let g = DbgValue::Path(Visitor::globals());
    let p1 = balanced!(host, visitor.field(&mut host, &g, b"foo").unwrap()).unwrap();
    let p2 = balanced!(host, visitor.field(&mut host, &p1, b"bar").unwrap()).unwrap();
    let p3 = balanced!(host, visitor.field(&mut host, &p2, b"bar").unwrap()).unwrap();
    let v = balanced!(host, visitor.fieldv(&mut host, &p3, b"baz").unwrap()).unwrap();
    assert_eq!(v, DbgValue::Integer(42));

    // The ref form answers with a path even for primitives.
    match balanced!(host, visitor.field(&mut host, &p3, b"baz").unwrap()).unwrap() {
        DbgValue::Path(_) => {}
        other => panic!("expected a path, got {:?}", other),
    }

    // A missing chain link resolves to nil, not an error.
    let missing = balanced!(host, visitor.fieldv(&mut host, &g, b"nothing").unwrap()).unwrap();
    assert_eq!(missing, DbgValue::Nil);
}

// ----------------------------------------------------------------------
// Scenario: local mutation in a paused frame
// ----------------------------------------------------------------------

#[test]
fn local_read_and_mutate() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let f = Value::Function(Closure::native(|_, _| Ok(0)));
    host.push_integer(7);
    host.enter_frame(f, &["x"]);

    let (name, value) = balanced!(host, visitor.getlocalv(&mut host, 0, 1).unwrap()).unwrap();
    assert_eq!(name, "x");
    assert_eq!(value, DbgValue::Integer(7));

    let (_, path) = balanced!(host, visitor.getlocal(&mut host, 0, 1).unwrap()).unwrap();
    let ok = {
        let top = host.top();
        let ok = visitor.assign(&mut host, &path, &DbgValue::Integer(99)).unwrap();
        assert_eq!(host.top(), top, "assign consumes exactly its own pushes");
        ok
    };
    assert!(ok);

    let (_, value) = balanced!(host, visitor.getlocalv(&mut host, 0, 1).unwrap()).unwrap();
    assert_eq!(value, DbgValue::Integer(99));

    // Out-of-range frames and slots answer nothing.
    assert!(balanced!(host, visitor.getlocalv(&mut host, 5, 1).unwrap()).is_none());
    assert!(balanced!(host, visitor.getlocalv(&mut host, 0, 2).unwrap()).is_none());

    // Argument bounds are user errors.
    assert!(matches!(
        visitor.getlocal(&mut host, -1, 1),
        Err(VisitorError::Argument(_))
    ));
    assert!(matches!(
        visitor.getlocal(&mut host, 0, 0),
        Err(VisitorError::Argument(_))
    ));
    assert!(matches!(
        visitor.getlocal(&mut host, 0, 300),
        Err(VisitorError::Argument(_))
    ));
}

#[test]
fn vararg_locals() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let f = Value::Function(Closure::native(|_, _| Ok(0)));
    host.enter_frame(f, &[]);
    host.frame_at_mut(0).unwrap().varargs.push(Value::str("extra"));

    let (name, value) = balanced!(host, visitor.getlocalv(&mut host, 0, -1).unwrap()).unwrap();
    assert_eq!(name, "(vararg)");
    assert_eq!(value, DbgValue::Str(b"extra".to_vec()));

    let (_, path) = balanced!(host, visitor.getlocal(&mut host, 0, -1).unwrap()).unwrap();
    assert!(visitor.assign(&mut host, &path, &DbgValue::Integer(1)).unwrap());
    let (_, value) = balanced!(host, visitor.getlocalv(&mut host, 0, -1).unwrap()).unwrap();
    assert_eq!(value, DbgValue::Integer(1));
}

// ----------------------------------------------------------------------
// Scenario: metatable cycle tolerance
// ----------------------------------------------------------------------

#[test]
fn metatable_cycle() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let t = Table::handle();
    t.borrow_mut().metatable = Some(t.clone());
    t.borrow_mut()
        .raw_set(Value::str("marker"), Value::Integer(1))
        .unwrap();
    set_global(&mut host, "t", Value::Table(t));

    let g = DbgValue::Path(Visitor::globals());
    let mut p = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();
    for _ in 0..3 {
        p = balanced!(host, visitor.getmetatable(&mut host, &p).unwrap()).unwrap();
    }
    // The triply-nested path still resolves to t itself.
    let marker = balanced!(host, visitor.fieldv(&mut host, &p, b"marker").unwrap()).unwrap();
    assert_eq!(marker, DbgValue::Integer(1));
    assert_eq!(visitor.type_of(&mut host, &p).unwrap(), "table");
}

#[test]
fn metatable_value_form_probes_existence() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    set_global(&mut host, "bare", Value::Table(Table::handle()));
    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"bare").unwrap()).unwrap();

    // Value form: no metatable, no answer. Ref form: always a path.
    assert!(balanced!(host, visitor.getmetatablev(&mut host, &p).unwrap()).is_none());
    assert!(balanced!(host, visitor.getmetatable(&mut host, &p).unwrap()).is_some());

    // Primitive receivers address the shared per-type metatable; while
    // none is installed the path resolves to nil.
    let s = DbgValue::Str(b"any string".to_vec());
    let mt = balanced!(host, visitor.getmetatable(&mut host, &s).unwrap()).unwrap();
    assert_eq!(visitor.type_of(&mut host, &mt).unwrap(), "nil");
    let string_mt = Table::handle();
    host.push_str("x");
    host.push_host_value(Value::Table(string_mt));
    host.set_metatable(-2);
    host.pop(1);
    assert_eq!(visitor.type_of(&mut host, &mt).unwrap(), "table");
}

// ----------------------------------------------------------------------
// Scenario: table enumeration completeness
// ----------------------------------------------------------------------

#[test]
fn table_enumeration() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let t = Table::handle();
    let table_key = Value::Table(Table::handle());
    t.borrow_mut().raw_set(Value::str("a"), Value::Integer(1)).unwrap();
    t.borrow_mut().raw_set(Value::str("b"), Value::Integer(2)).unwrap();
    t.borrow_mut()
        .raw_set(Value::Boolean(true), Value::Integer(3))
        .unwrap();
    t.borrow_mut().raw_set(table_key, Value::Integer(4)).unwrap();
    set_global(&mut host, "t", Value::Table(t));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();

    let (asize, hsize) = balanced!(host, visitor.tablesize(&mut host, &p).unwrap()).unwrap();
    assert_eq!((asize, hsize), (0, 4));

    // Value form: two entries per pair.
    let flat = balanced!(host, visitor.tablehashv(&mut host, &p, None).unwrap()).unwrap();
    assert_eq!(flat.len(), 8);
    let keys: Vec<&DbgValue> = flat.iter().step_by(2).collect();
    let values: Vec<&DbgValue> = flat.iter().skip(1).step_by(2).collect();
    assert!(keys.contains(&&DbgValue::Str(b"a".to_vec())));
    assert!(keys.contains(&&DbgValue::Str(b"b".to_vec())));
    assert!(keys.contains(&&DbgValue::Boolean(true)));
    // The table-valued key comes back as a key-position path.
    assert_eq!(
        keys.iter().filter(|k| matches!(k, DbgValue::Path(_))).count(),
        1
    );
    for i in 1..=4 {
        assert!(values.contains(&&DbgValue::Integer(i)));
    }

    // Ref form: three entries per pair, middle one a value path.
    let flat = balanced!(host, visitor.tablehash(&mut host, &p, None).unwrap()).unwrap();
    assert_eq!(flat.len(), 12);
    for chunk in flat.chunks(3) {
        assert!(matches!(chunk[1], DbgValue::Path(_)));
        // Evaluating the value path answers the stored value.
        let through_path = visitor.value(&mut host, &chunk[1]).unwrap();
        assert!(matches!(through_path, DbgValue::Integer(_)));
    }

    // The cap limits emitted pairs.
    let capped = balanced!(host, visitor.tablehashv(&mut host, &p, Some(2)).unwrap()).unwrap();
    assert_eq!(capped.len(), 4);
}

#[test]
fn table_enumeration_zero_slot() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let t = Table::handle();
    t.borrow_mut().raw_set(Value::str("a"), Value::Integer(1)).unwrap();
    t.borrow_mut()
        .raw_set(Value::Integer(0), Value::str("zero"))
        .unwrap();
    set_global(&mut host, "t", Value::Table(t));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();

    let (_, hsize) = visitor.tablesize(&mut host, &p).unwrap().unwrap();
    assert_eq!(hsize, 2);

    let flat = balanced!(host, visitor.tablehashv(&mut host, &p, None).unwrap()).unwrap();
    assert_eq!(flat.len(), 4);
    assert!(flat.contains(&DbgValue::Integer(0)));
    assert!(flat.contains(&DbgValue::Str(b"zero".to_vec())));
}

#[test]
fn tablekey_scans_string_keys() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let t = Table::handle();
    t.borrow_mut()
        .raw_set(Value::Boolean(true), Value::Integer(1))
        .unwrap();
    t.borrow_mut().raw_set(Value::str("s1"), Value::Integer(2)).unwrap();
    t.borrow_mut().raw_set(Value::str("s2"), Value::Integer(3)).unwrap();
    set_global(&mut host, "t", Value::Table(t));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();

    let (key, next) = balanced!(host, visitor.tablekey(&mut host, &p, 0).unwrap()).unwrap();
    assert_eq!(key, b"s1".to_vec());
    let (key, next) = balanced!(host, visitor.tablekey(&mut host, &p, next as i64).unwrap()).unwrap();
    assert_eq!(key, b"s2".to_vec());
    assert!(balanced!(host, visitor.tablekey(&mut host, &p, next as i64).unwrap()).is_none());
}

#[test]
fn array_part_via_index() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let t = Table::handle();
    t.borrow_mut().raw_set(Value::Integer(1), Value::str("one")).unwrap();
    t.borrow_mut().raw_set(Value::Integer(2), Value::str("two")).unwrap();
    set_global(&mut host, "t", Value::Table(t));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();

    let (asize, _) = visitor.tablesize(&mut host, &p).unwrap().unwrap();
    assert_eq!(asize, 2);
    for (i, expect) in [(1i64, b"one".as_ref()), (2i64, b"two".as_ref())] {
        let v = balanced!(host, visitor.indexv(&mut host, &p, i).unwrap()).unwrap();
        assert_eq!(v, DbgValue::Str(expect.to_vec()));
    }
    assert!(matches!(
        visitor.index(&mut host, &p, 0),
        Err(VisitorError::Argument(_))
    ));
    // Indexing through a non-table answers nothing.
    let n = DbgValue::Integer(3);
    assert!(balanced!(host, visitor.indexv(&mut host, &n, 1).unwrap()).is_none());
}

// ----------------------------------------------------------------------
// Scenario: eval with a table argument
// ----------------------------------------------------------------------

#[test]
fn eval_with_table_argument() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    install_loader(&mut host);

    let f = match balanced!(
        host,
        visitor
            .load(&mut host, b"return function(t) return t.k end")
            .unwrap()
    ) {
        LoadOutcome::Chunk(f) => f,
        LoadOutcome::Error(msg) => panic!("load failed: {:?}", String::from_utf8_lossy(&msg)),
    };

    let arg = DbgValue::Table(vec![(DbgValue::Str(b"k".to_vec()), DbgValue::Integer(5))]);
    let out = balanced!(host, visitor.eval(&mut host, &f, &[arg]).unwrap());
    assert_eq!(out, EvalOutcome::Value(DbgValue::Integer(5)));
}

#[test]
fn eval_errors_and_misuse() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    install_loader(&mut host);

    let f = match visitor.load(&mut host, b"error('boom')").unwrap() {
        LoadOutcome::Chunk(f) => f,
        LoadOutcome::Error(_) => panic!("load failed"),
    };
    let out = balanced!(host, visitor.eval(&mut host, &f, &[]).unwrap());
    assert_eq!(out, EvalOutcome::Error(b"boom".to_vec()));

    // A non-function subject is a user error, with the stack restored.
    let out = balanced!(host, visitor.eval(&mut host, &DbgValue::Integer(1), &[]));
    assert!(matches!(out, Err(VisitorError::Argument(_))));

    // Loader rejection surfaces as (nil, message).
    match balanced!(host, visitor.load(&mut host, b"not a chunk").unwrap()) {
        LoadOutcome::Error(msg) => {
            assert_eq!(msg, b"syntax error near chunk start".to_vec())
        }
        LoadOutcome::Chunk(_) => panic!("expected a load error"),
    }
}

#[test]
fn eval_simple_chunk() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    install_loader(&mut host);

    let f = match visitor.load(&mut host, b"return 1 + 1").unwrap() {
        LoadOutcome::Chunk(f) => f,
        LoadOutcome::Error(_) => panic!("load failed"),
    };
    let out = balanced!(host, visitor.eval(&mut host, &f, &[]).unwrap());
    assert_eq!(out, EvalOutcome::Value(DbgValue::Integer(2)));

    // The chunk is anchored: evaluating its path repeatedly works.
    assert_eq!(visitor.type_of(&mut host, &f).unwrap(), "function");
    // Releasing the anchor empties the registry slot.
    if let DbgValue::Path(p) = &f {
        assert!(visitor.unref(&mut host, p));
        assert_eq!(visitor.type_of(&mut host, &f).unwrap(), "nil");
    }
}

// ----------------------------------------------------------------------
// Scenario: watch persistence
// ----------------------------------------------------------------------

#[test]
fn watch_persistence() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    install_loader(&mut host);

    let f = match visitor.load(&mut host, b"return {}").unwrap() {
        LoadOutcome::Chunk(f) => f,
        LoadOutcome::Error(_) => panic!("load failed"),
    };
    let paths = match balanced!(host, visitor.watch(&mut host, &f, &[]).unwrap()) {
        WatchOutcome::Values(paths) => paths,
        WatchOutcome::Error(msg) => panic!("watch failed: {:?}", String::from_utf8_lossy(&msg)),
    };
    assert_eq!(paths.len(), 1);
    let w = &paths[0];

    // The anchored table resolves repeatedly.
    assert_eq!(visitor.type_of(&mut host, w).unwrap(), "table");
    assert_eq!(visitor.type_of(&mut host, w).unwrap(), "table");

    balanced!(host, visitor.cleanwatch(&mut host));
    assert_eq!(visitor.type_of(&mut host, w).unwrap(), "unknown");
    assert_eq!(visitor.value(&mut host, w).unwrap(), DbgValue::Nil);
}

#[test]
fn watch_multiple_results() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    install_loader(&mut host);

    let f = match visitor.load(&mut host, b"return 'a', 'b'").unwrap() {
        LoadOutcome::Chunk(f) => f,
        LoadOutcome::Error(_) => panic!("load failed"),
    };
    let paths = match balanced!(host, visitor.watch(&mut host, &f, &[]).unwrap()) {
        WatchOutcome::Values(paths) => paths,
        WatchOutcome::Error(_) => panic!("watch failed"),
    };
    assert_eq!(paths.len(), 2);
    assert_eq!(
        visitor.value(&mut host, &paths[0]).unwrap(),
        DbgValue::Str(b"a".to_vec())
    );
    assert_eq!(
        visitor.value(&mut host, &paths[1]).unwrap(),
        DbgValue::Str(b"b".to_vec())
    );
}

// ----------------------------------------------------------------------
// Userdata buffers
// ----------------------------------------------------------------------

#[test]
fn userdata_read_write() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let ud = host.new_userdata(8, 0);
    ud.borrow_mut().data.copy_from_slice(b"abcdefgh");
    host.pop(1);
    set_global(&mut host, "ud", Value::UserData(ud));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"ud").unwrap()).unwrap();

    assert_eq!(
        balanced!(host, visitor.udread(&mut host, &p, 2, 3).unwrap()).unwrap(),
        b"cde".to_vec()
    );
    // Reads past the end clamp.
    assert_eq!(
        visitor.udread(&mut host, &p, 6, 10).unwrap().unwrap(),
        b"gh".to_vec()
    );
    // Bad offsets answer nothing.
    assert!(visitor.udread(&mut host, &p, 8, 1).unwrap().is_none());
    assert!(visitor.udread(&mut host, &p, -1, 1).unwrap().is_none());

    // Exact write: all-or-nothing.
    assert_eq!(
        balanced!(host, visitor.udwrite(&mut host, &p, 1, b"XY", false).unwrap()),
        Some(2)
    );
    assert_eq!(
        visitor.udread(&mut host, &p, 0, 8).unwrap().unwrap(),
        b"aXYdefgh".to_vec()
    );
    assert_eq!(visitor.udwrite(&mut host, &p, 7, b"ZZ", false).unwrap(), None);
    assert_eq!(
        visitor.udread(&mut host, &p, 0, 8).unwrap().unwrap(),
        b"aXYdefgh".to_vec()
    );

    // Partial write: clamps and reports the count.
    assert_eq!(
        visitor.udwrite(&mut host, &p, 7, b"ZZ", true).unwrap(),
        Some(1)
    );
    assert_eq!(
        visitor.udread(&mut host, &p, 0, 8).unwrap().unwrap(),
        b"aXYdefgZ".to_vec()
    );
    assert_eq!(visitor.udwrite(&mut host, &p, 9, b"Q", true).unwrap(), Some(0));

    // Non-userdata subjects are user errors.
    assert!(matches!(
        visitor.udread(&mut host, &DbgValue::Path(Visitor::globals()), 0, 1),
        Err(VisitorError::Argument(_))
    ));
}

// ----------------------------------------------------------------------
// Upvalues and user values through the surface
// ----------------------------------------------------------------------

#[test]
fn upvalue_surface() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let c = Closure::native(|_, _| Ok(0));
    Closure::add_upvalue(&c, "counter", Value::Integer(10));
    set_global(&mut host, "f", Value::Function(c.clone()));

    let g = DbgValue::Path(Visitor::globals());
    let fp = balanced!(host, visitor.field(&mut host, &g, b"f").unwrap()).unwrap();

    let (name, v) = balanced!(host, visitor.getupvaluev(&mut host, &fp, 1).unwrap()).unwrap();
    assert_eq!(name, "counter");
    assert_eq!(v, DbgValue::Integer(10));

    let (_, up) = balanced!(host, visitor.getupvalue(&mut host, &fp, 1).unwrap()).unwrap();
    assert!(visitor.assign(&mut host, &up, &DbgValue::Integer(11)).unwrap());
    assert_eq!(*c.borrow().upvalues[0].cell.borrow(), Value::Integer(11));

    assert!(balanced!(host, visitor.getupvaluev(&mut host, &fp, 2).unwrap()).is_none());
    // Non-path subjects answer nothing.
    assert!(visitor
        .getupvalue(&mut host, &DbgValue::Integer(1), 1)
        .unwrap()
        .is_none());
}

#[test]
fn uservalue_surface() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let ud = host.new_userdata(0, 2);
    ud.borrow_mut().user_values[0] = Value::Integer(5);
    host.pop(1);
    set_global(&mut host, "ud", Value::UserData(ud.clone()));

    let g = DbgValue::Path(Visitor::globals());
    let p = balanced!(host, visitor.field(&mut host, &g, b"ud").unwrap()).unwrap();

    let (v, ok) = balanced!(host, visitor.getuservaluev(&mut host, &p, 1).unwrap()).unwrap();
    assert!(ok);
    assert_eq!(v, DbgValue::Integer(5));

    let (up, _) = balanced!(host, visitor.getuservalue(&mut host, &p, 2).unwrap()).unwrap();
    assert!(visitor.assign(&mut host, &up, &DbgValue::Str(b"uv".to_vec())).unwrap());
    assert_eq!(ud.borrow().user_values[1], Value::str("uv"));

    // Absent slots answer nothing in the value form.
    assert!(balanced!(host, visitor.getuservaluev(&mut host, &p, 3).unwrap()).is_none());
}

// ----------------------------------------------------------------------
// Assignment properties
// ----------------------------------------------------------------------

#[test]
fn assign_then_read_back() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    set_global(&mut host, "t", Value::Table(Table::handle()));
    let g = DbgValue::Path(Visitor::globals());
    let t = balanced!(host, visitor.field(&mut host, &g, b"t").unwrap()).unwrap();

    let field_path = balanced!(host, visitor.field(&mut host, &t, b"x").unwrap()).unwrap();
    for v in [
        DbgValue::Integer(7),
        DbgValue::Float(2.5),
        DbgValue::Boolean(false),
        DbgValue::Str(b"s".to_vec()),
    ] {
        assert!(visitor.assign(&mut host, &field_path, &v).unwrap());
        assert_eq!(visitor.value(&mut host, &field_path).unwrap(), v);
    }

    // Roots refuse assignment.
    assert!(!visitor.assign(&mut host, &g, &DbgValue::Integer(1)).unwrap());

    // Assigning a debugger table is a user error.
    assert!(matches!(
        visitor.assign(&mut host, &field_path, &DbgValue::Table(vec![])),
        Err(VisitorError::Argument(_))
    ));

    // An unresolvable path value assigns nil.
    let dangling = DbgValue::Path(
        Visitor::globals().index_str(b"no").index_str(b"where"),
    );
    assert!(visitor.assign(&mut host, &field_path, &dangling).unwrap());
    assert_eq!(visitor.value(&mut host, &field_path).unwrap(), DbgValue::Nil);
}

// ----------------------------------------------------------------------
// type(), value(), placeholders
// ----------------------------------------------------------------------

#[test]
fn type_classification() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    let allowed = [
        "nil",
        "boolean",
        "integer",
        "float",
        "string",
        "lightuserdata",
        "function",
        "c function",
        "table",
        "userdata",
        "thread",
        "unknown",
    ];

    set_global(&mut host, "t", Value::Table(Table::handle()));
    set_global(
        &mut host,
        "cf",
        Value::Function(Closure::native(|_, _| Ok(0))),
    );
    set_global(
        &mut host,
        "lf",
        Value::Function(Closure::script(|_, _| Ok(0), b"=", 1, 3)),
    );
    let co = host.new_thread();
    host.pop(1);
    set_global(&mut host, "co", Value::Thread(co));

    let g = DbgValue::Path(Visitor::globals());
    let mut seen = Vec::new();
    for v in [
        DbgValue::Nil,
        DbgValue::Boolean(true),
        DbgValue::Integer(1),
        DbgValue::Float(1.5),
        DbgValue::Str(b"s".to_vec()),
        DbgValue::LightUserData(8),
    ] {
        seen.push(visitor.type_of(&mut host, &v).unwrap());
    }
    for name in ["t", "cf", "lf", "co"] {
        let p = visitor.field(&mut host, &g, name.as_bytes()).unwrap().unwrap();
        seen.push(balanced!(host, visitor.type_of(&mut host, &p).unwrap()));
    }
    seen.push(
        visitor
            .type_of(&mut host, &DbgValue::Path(Visitor::globals().index_str(b"zz").index_int(1)))
            .unwrap(),
    );
    assert_eq!(
        seen,
        vec![
            "nil",
            "boolean",
            "integer",
            "float",
            "string",
            "lightuserdata",
            "table",
            "c function",
            "function",
            "thread",
            "unknown"
        ]
    );
    for s in seen {
        assert!(allowed.contains(&s));
    }

    assert!(matches!(
        visitor.type_of(&mut host, &DbgValue::Table(vec![])),
        Err(VisitorError::Argument(_))
    ));
}

#[test]
fn value_placeholder_for_aggregates() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    set_global(&mut host, "t", Value::Table(Table::handle()));
    let g = DbgValue::Path(Visitor::globals());
    let p = visitor.field(&mut host, &g, b"t").unwrap().unwrap();

    match balanced!(host, visitor.value(&mut host, &p).unwrap()) {
        DbgValue::Str(s) => {
            let s = String::from_utf8(s).unwrap();
            assert!(s.starts_with("table: 0x"), "unexpected placeholder {}", s);
        }
        other => panic!("expected placeholder, got {:?}", other),
    }

    // Primitives pass through value() unchanged.
    assert_eq!(
        visitor.value(&mut host, &DbgValue::Integer(3)).unwrap(),
        DbgValue::Integer(3)
    );
}

// ----------------------------------------------------------------------
// getinfo
// ----------------------------------------------------------------------

#[test]
fn getinfo_frame_and_function() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let f = Closure::script(|_, _| Ok(0), b"@game/init.script", 10, 40);
    f.borrow_mut().info.nparams = 2;
    host.enter_frame(Value::Function(f), &[]);
    {
        let frame = host.frame_at_mut(0).unwrap();
        frame.currentline = 22;
        frame.name = Some("update".to_string());
        frame.namewhat = "global";
    }

    let report = balanced!(
        host,
        visitor
            .getinfo(&mut host, &DbgValue::Integer(0), "Slnfutr")
            .unwrap()
    )
    .unwrap();
    assert_eq!(report.source.as_deref(), Some(b"@game/init.script".as_ref()));
    assert_eq!(report.short_src.as_deref(), Some("game/init.script"));
    assert_eq!(report.linedefined, Some(10));
    assert_eq!(report.lastlinedefined, Some(40));
    assert_eq!(report.what.as_deref(), Some("Lua"));
    assert_eq!(report.currentline, Some(22));
    assert_eq!(report.name.as_deref(), Some("update"));
    assert_eq!(report.namewhat.as_deref(), Some("global"));
    assert_eq!(report.nparams, Some(2));
    assert_eq!(report.istailcall, Some(false));
    assert_eq!(report.ftransfer, Some(0));
    let func_path = report.func.expect("requested 'f'");

    // The emitted function path resolves to the running function.
    assert_eq!(
        visitor.type_of(&mut host, &DbgValue::Path(func_path.clone())).unwrap(),
        "function"
    );

    // Function subjects: 'f' would double-reference.
    let report = balanced!(
        host,
        visitor
            .getinfo(&mut host, &DbgValue::Path(func_path.clone()), "Su")
            .unwrap()
    )
    .unwrap();
    assert_eq!(report.what.as_deref(), Some("Lua"));
    assert_eq!(report.nparams, Some(2));
    assert!(report.func.is_none());
    assert!(matches!(
        visitor.getinfo(&mut host, &DbgValue::Path(func_path), "f"),
        Err(VisitorError::Argument(_))
    ));

    // Absent frames answer nothing; bad subjects and options error.
    assert!(visitor
        .getinfo(&mut host, &DbgValue::Integer(9), "S")
        .unwrap()
        .is_none());
    assert!(matches!(
        visitor.getinfo(&mut host, &DbgValue::Integer(0), "Sz"),
        Err(VisitorError::Argument(_))
    ));
    assert!(matches!(
        visitor.getinfo(&mut host, &DbgValue::Boolean(true), "S"),
        Err(VisitorError::Argument(_))
    ));
}

// ----------------------------------------------------------------------
// Coroutines, GC, native symbols
// ----------------------------------------------------------------------

#[test]
fn coroutine_status() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    // The main thread, reached through the registry, is running.
    let main = DbgValue::Path(Visitor::registry().index_int(host::RIDX_MAINTHREAD));
    assert_eq!(
        balanced!(host, visitor.costatus(&mut host, &main).unwrap()),
        CoroutineStatus::Running
    );

    let co = host.new_thread();
    host.pop(1);
    set_global(&mut host, "co", Value::Thread(co.clone()));
    let g = DbgValue::Path(Visitor::globals());
    let p = visitor.field(&mut host, &g, b"co").unwrap().unwrap();

    // Fresh thread: no frames, empty stack.
    assert_eq!(
        balanced!(host, visitor.costatus(&mut host, &p).unwrap()),
        CoroutineStatus::Dead
    );

    // Staged values but never resumed: suspended.
    co.borrow_mut().stack.push(Value::Nil);
    assert_eq!(
        visitor.costatus(&mut host, &p).unwrap(),
        CoroutineStatus::Suspended
    );

    // Frames but not current: awaiting its callee.
    let f = Value::Function(Closure::native(|_, _| Ok(0)));
    co.borrow_mut().frames.push(host::Frame::new(f, 0));
    assert_eq!(
        visitor.costatus(&mut host, &p).unwrap(),
        CoroutineStatus::Normal
    );

    co.borrow_mut().frames.clear();
    co.borrow_mut().status = CoStatus::Yielded;
    assert_eq!(
        visitor.costatus(&mut host, &p).unwrap(),
        CoroutineStatus::Suspended
    );

    co.borrow_mut().status = CoStatus::Dead;
    assert_eq!(visitor.costatus(&mut host, &p).unwrap(), CoroutineStatus::Dead);

    // Non-threads and dangling paths are invalid.
    assert_eq!(
        visitor.costatus(&mut host, &DbgValue::Integer(1)).unwrap(),
        CoroutineStatus::Invalid
    );
    assert_eq!(
        visitor
            .costatus(&mut host, &DbgValue::Path(Visitor::globals().index_str(b"zz").index_int(1)))
            .unwrap(),
        CoroutineStatus::Invalid
    );
}

#[test]
fn gccount_tracks_allocation() {
    let mut host = HostState::new();
    let visitor = Visitor::new();

    let before = visitor.gccount(&host);
    assert!(before > 0);
    host.new_table();
    host.push_str("a fairly long string to notice in the counter");
    host.pop(2);
    let after = visitor.gccount(&host);
    assert!(after > before);
    assert_eq!(after as usize, host.gc_bytes());
}

#[test]
fn cfunction_symbolization() {
    let mut host = HostState::new();
    let mut visitor = Visitor::new();

    let native = Closure::native(|_, _| Ok(0));
    let loaded = Closure::script(|_, _| Ok(0), b"=", 0, 0);
    set_global(&mut host, "nf", Value::Function(native.clone()));
    set_global(&mut host, "lf", Value::Function(loaded));

    let g = DbgValue::Path(Visitor::globals());
    let nf = visitor.field(&mut host, &g, b"nf").unwrap().unwrap();
    let lf = visitor.field(&mut host, &g, b"lf").unwrap().unwrap();

    // Without a resolver, everything is anonymous.
    assert!(balanced!(host, visitor.cfunctioninfo(&mut host, &nf).unwrap()).is_none());

    let want = native.borrow().entry as usize;
    visitor.set_symbolizer(move |addr| {
        if addr == want {
            Some("host_update".to_string())
        } else {
            None
        }
    });
    assert_eq!(
        balanced!(host, visitor.cfunctioninfo(&mut host, &nf).unwrap()).as_deref(),
        Some("host_update")
    );
    // Loaded chunks have no native pointer to resolve.
    assert!(visitor.cfunctioninfo(&mut host, &lf).unwrap().is_none());
    // Non-functions answer nothing.
    assert!(visitor
        .cfunctioninfo(&mut host, &DbgValue::Integer(1))
        .unwrap()
        .is_none());
}

// ----------------------------------------------------------------------
// Stack overflow propagation
// ----------------------------------------------------------------------

#[test]
fn stack_overflow_is_reported_and_clean() {
    let mut host = HostState::new();
    let visitor = Visitor::new();
    set_global(&mut host, "t", Value::Table(Table::handle()));
    host.set_stack_limit(2);

    let g = DbgValue::Path(Visitor::globals());
    let err = visitor.field(&mut host, &g, b"t").unwrap_err();
    assert_eq!(err, VisitorError::StackOverflow);
    assert_eq!(err.to_string(), "stack overflow");
    assert_eq!(host.top(), 0);
}
