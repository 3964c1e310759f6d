//! Loader for `.asm-exported` dumps.
//!
//! The binary loader, disassembler, and pool walker run elsewhere and export
//! one text file with everything the lifter needs: the decoded object pool,
//! the class and function databases, thread-layout overrides, and the
//! per-function instruction listings. Sections are separated by blank lines;
//! every chunk after the `LISTING` header is one function.

use crate::dart_meta::{
    ClassDb, DartClass, DartField, DartFn, DartFunctionType, DartRecordType, DartType,
    DartTypeArguments, DartTypeParameter, FnKind, FunctionDb, StubKind,
};
use crate::disasm::{parse_instruction, AsmFunction};
use crate::lifter::LiftEnv;
use crate::log::*;
use crate::pool::{ObjectPool, PoolValue};
use crate::thread_info::ThreadLayout;
use std::rc::Rc;

/// Everything loaded from one export file.
pub struct AotDump {
    pub name: String,
    pub env: LiftEnv,
    pub functions: Vec<AsmFunction>,
}

fn parse_hex(tok: &str) -> u64 {
    u64::from_str_radix(tok.trim_start_matches("0x"), 16)
        .unwrap_or_else(|_| panic!("Expected a hex number, got {:?}", tok))
}

/// Load an exported dump into a lift-ready environment plus its function
/// listings.
pub fn load_from(exported: &str) -> AotDump {
    assert!(
        exported.starts_with("PROGRAM\n"),
        "Not an exported dump (missing PROGRAM header)"
    );
    assert!(exported.contains("LISTING\n"), "Export has no LISTING section");

    let mut program_section = None;
    let mut thread_section = None;
    let mut pool_section = None;
    let mut classes_section = None;
    let mut functions_section = None;
    let mut listing_chunks: Vec<&str> = vec![];
    let mut in_listing = false;

    for section in exported.trim().split("\n\n") {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        if in_listing {
            listing_chunks.push(section);
            continue;
        }
        let (header, body) = match section.split_once('\n') {
            Some((h, b)) => (h.trim(), b),
            None => (section, ""),
        };
        match header {
            "PROGRAM" => program_section = Some(body),
            "THREAD" => thread_section = Some(body),
            "POOL" => pool_section = Some(body),
            "CLASSES" => classes_section = Some(body),
            "FUNCTIONS" => functions_section = Some(body),
            "LISTING" => {
                in_listing = true;
                if !body.trim().is_empty() {
                    listing_chunks.push(body.trim());
                }
            }
            other => panic!("Unknown export section {:?}", other),
        }
    }

    let name = {
        let line = program_section
            .expect("Export has no PROGRAM section")
            .lines()
            .next()
            .unwrap_or_default();
        match line.trim().split_once(' ') {
            Some(("name", n)) => n.trim().to_string(),
            _ => panic!("Expected `name <soname>`, got {:?}", line),
        }
    };

    let mut thread = ThreadLayout::with_default_offsets();
    if let Some(body) = thread_section {
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            parse_thread_line(&mut thread, line);
        }
    }

    let mut classes = ClassDb::new();
    if let Some(body) = classes_section {
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (cid_tok, cls_name) = line
                .split_once(' ')
                .unwrap_or_else(|| panic!("Bad class line {:?}", line));
            classes.register(DartClass::new(
                cid_tok.parse().unwrap_or_else(|_| panic!("Bad cid {:?}", cid_tok)),
                cls_name.trim(),
            ));
        }
    }

    let mut functions = FunctionDb::new();
    if let Some(body) = functions_section {
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            functions.register(parse_function_line(line));
        }
    }

    let mut pool = ObjectPool::new();
    if let Some(body) = pool_section {
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (offset, value) = parse_pool_line(line, &classes, &functions);
            pool.insert(offset, value);
        }
    }

    let fns = listing_chunks
        .iter()
        .map(|chunk| {
            let (head, rest) = chunk.split_once('\n').unwrap_or((chunk.trim(), ""));
            let (addr_tok, fn_name) = head
                .trim()
                .split_once(' ')
                .unwrap_or_else(|| panic!("Bad function header {:?}", head));
            AsmFunction {
                name: fn_name.trim().to_string(),
                entry: parse_hex(addr_tok),
                insns: rest
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(parse_instruction)
                    .collect(),
            }
        })
        .collect::<Vec<_>>();

    info!("Loaded export";
          "program" => %name,
          "functions" => fns.len(),
          "pool_entries" => pool.len());

    AotDump {
        name,
        env: LiftEnv {
            pool,
            thread,
            classes,
            functions,
        },
        functions: fns,
    }
}

/// `<hex-offset> <name>` or `<hex-offset> <name> leaf <ret> (<params>)`.
fn parse_thread_line(thread: &mut ThreadLayout, line: &str) {
    let mut toks = line.split_whitespace();
    let offset = parse_hex(toks.next().unwrap()) as i64;
    let name = toks
        .next()
        .unwrap_or_else(|| panic!("Thread line without a name: {:?}", line));
    match toks.next() {
        None => thread.register(offset, name),
        Some("leaf") => {
            let ret = toks
                .next()
                .unwrap_or_else(|| panic!("Leaf entry without a return type: {:?}", line));
            let params = line
                .split_once('(')
                .and_then(|(_, rest)| rest.rsplit_once(')'))
                .map(|(params, _)| params.trim().to_string())
                .unwrap_or_else(|| panic!("Leaf entry without a parameter list: {:?}", line));
            thread.register_leaf(offset, name, ret, params);
        }
        Some(other) => panic!("Bad thread line token {:?} in {:?}", other, line),
    }
}

/// `<hex-addr> <name>` with an optional `stub <kind> [<cid>]` suffix.
fn parse_function_line(line: &str) -> DartFn {
    let mut toks = line.split_whitespace();
    let addr = parse_hex(toks.next().unwrap());
    let name = toks
        .next()
        .unwrap_or_else(|| panic!("Function line without a name: {:?}", line))
        .to_string();
    let kind = match toks.next() {
        None => FnKind::Function,
        Some("stub") => {
            let kind_tok = toks
                .next()
                .unwrap_or_else(|| panic!("Stub without a kind: {:?}", line));
            FnKind::Stub(match kind_tok {
                "allocateobject" => {
                    let cid_tok = toks
                        .next()
                        .unwrap_or_else(|| panic!("Allocation stub without a cid: {:?}", line));
                    StubKind::AllocateObject(cid_tok.parse().unwrap())
                }
                "writebarrier" => StubKind::WriteBarrier,
                "arraywritebarrier" => StubKind::ArrayWriteBarrier,
                "typecheck" => StubKind::TypeCheck,
                "initasync" => StubKind::InitAsync,
                "initlatestaticfield" => StubKind::InitLateStaticField,
                "boxint64" => StubKind::BoxInt64,
                other => panic!("Unknown stub kind {:?} in {:?}", other, line),
            })
        }
        Some(other) => panic!("Bad function line token {:?} in {:?}", other, line),
    };
    DartFn { addr, name, kind }
}

/// `<hex-offset> <kind> <payload...>`.
fn parse_pool_line(line: &str, classes: &ClassDb, functions: &FunctionDb) -> (i64, PoolValue) {
    let (off_tok, rest) = line.split_once(' ').unwrap_or((line, ""));
    let offset = parse_hex(off_tok) as i64;
    let (kind, payload) = match rest.trim().split_once(' ') {
        Some((k, p)) => (k, p.trim()),
        None => (rest.trim(), ""),
    };
    let value = match kind {
        "null" => PoolValue::Null,
        "bool" => PoolValue::Bool(payload == "true"),
        "int" => PoolValue::smi(payload.parse().unwrap()),
        "mint" => PoolValue::mint(payload.parse().unwrap()),
        "double" => PoolValue::Double(payload.parse().unwrap()),
        "string" => PoolValue::Str(
            payload
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(payload)
                .to_string(),
        ),
        "array" => PoolValue::Array {
            addr: parse_hex(payload),
        },
        "growablearray" => PoolValue::GrowableArray,
        "class" => {
            let id = payload.parse().unwrap();
            let cls = classes
                .get(id)
                .unwrap_or_else(|| Rc::new(DartClass::new(id, format!("cls_{}", id))));
            PoolValue::Class(cls)
        }
        "type" => PoolValue::Type(Rc::new(DartType {
            name: payload.to_string(),
        })),
        "functiontype" => PoolValue::FunctionType(Rc::new(DartFunctionType {
            text: payload.to_string(),
        })),
        "typeparam" => PoolValue::TypeParameter(Rc::new(DartTypeParameter {
            text: payload.to_string(),
        })),
        "typeargs" => PoolValue::TypeArguments(Rc::new(DartTypeArguments {
            text: payload.to_string(),
        })),
        "recordtype" => PoolValue::RecordType(Rc::new(DartRecordType {
            text: payload.to_string(),
        })),
        "field" => {
            let (off_tok, field_name) = payload
                .split_once(' ')
                .unwrap_or_else(|| panic!("Bad field pool entry {:?}", line));
            PoolValue::Field(Rc::new(DartField {
                offset: off_tok.parse().unwrap(),
                name: field_name.trim().to_string(),
                owner: None,
            }))
        }
        "function" => {
            let addr = parse_hex(payload);
            let fun = functions.get(addr).unwrap_or_else(|| {
                Rc::new(DartFn {
                    addr,
                    name: format!("fn_{:x}", addr),
                    kind: FnKind::Function,
                })
            });
            PoolValue::Function(fun)
        }
        "unlinkedcall" => {
            let (addr_tok, stub_name) = payload.split_once(' ').unwrap_or((payload, "switchable"));
            PoolValue::UnlinkedCall(Rc::new(DartFn {
                addr: parse_hex(addr_tok),
                name: stub_name.trim().to_string(),
                kind: FnKind::Function,
            }))
        }
        "sentinel" => PoolValue::Sentinel,
        "subtypetestcache" => PoolValue::SubtypeTestCache,
        "argsdesc" => {
            let mut toks = payload.split_whitespace();
            PoolValue::ArgsDesc {
                num_args: toks.next().map(|t| t.parse().unwrap()).unwrap_or(0),
                num_type_args: toks.next().map(|t| t.parse().unwrap()).unwrap_or(0),
            }
        }
        other => {
            warn!("Unknown pool entry kind in export"; "kind" => other, "offset" => offset);
            PoolValue::Unknown(other.to_string())
        }
    };
    (offset, value)
}
