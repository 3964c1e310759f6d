use crate::dart_meta::{DartClass, DartField, DartFn, DartType, FnKind, StubKind};
use crate::disasm::{parse_instruction, AsmInstruction};
use crate::il::ILInstr;
use crate::lifter::{lift_insns, LiftEnv};
use crate::pool::PoolValue;
use std::rc::Rc;

#[cfg(test)]
use crate::dart_meta::cid;
#[cfg(test)]
use crate::disasm::Register;
#[cfg(test)]
use crate::il::{ArrayOp, ArrayType, ILKind, ILOp};
#[cfg(test)]
use crate::values::{VarItem, VarStorage, VarValue};

/// An environment with a handful of pool slots, one class, and the usual
/// stubs, enough to drive every recognizer.
pub fn test_env() -> LiftEnv {
    let mut env = LiftEnv::new();

    env.pool.insert(0x28, PoolValue::smi(42));
    env.pool.insert(0x30, PoolValue::Str("hello".into()));
    env.pool.insert(0x38, PoolValue::Null);
    env.pool.insert(
        0x40,
        PoolValue::Type(Rc::new(DartType {
            name: "String".into(),
        })),
    );
    env.pool.insert(0x48, PoolValue::SubtypeTestCache);
    env.pool.insert(0x50, PoolValue::Sentinel);
    env.pool.insert(
        0x58,
        PoolValue::Field(Rc::new(DartField {
            offset: 0x10,
            name: "counter".into(),
            owner: None,
        })),
    );
    env.pool.insert(0x60, PoolValue::Array { addr: 0x7f1230 });
    env.pool.insert(
        0x68,
        PoolValue::ArgsDesc {
            num_args: 2,
            num_type_args: 0,
        },
    );
    env.pool
        .insert(0x70, PoolValue::Unknown("weakserializationreference".into()));
    env.pool.insert(0x78, PoolValue::Double(2.5));

    env.classes.register(DartClass::new(100, "Point"));

    env.functions.register(DartFn {
        addr: 0x5000,
        name: "foo".into(),
        kind: FnKind::Function,
    });
    env.functions.register(DartFn {
        addr: 0x8000,
        name: "stub_AllocatePoint".into(),
        kind: FnKind::Stub(StubKind::AllocateObject(100)),
    });
    env.functions.register(DartFn {
        addr: 0x8100,
        name: "stub_WriteBarrier".into(),
        kind: FnKind::Stub(StubKind::WriteBarrier),
    });
    env.functions.register(DartFn {
        addr: 0x8200,
        name: "stub_ArrayWriteBarrier".into(),
        kind: FnKind::Stub(StubKind::ArrayWriteBarrier),
    });
    env.functions.register(DartFn {
        addr: 0x8300,
        name: "stub_TypeCheck".into(),
        kind: FnKind::Stub(StubKind::TypeCheck),
    });
    env.functions.register(DartFn {
        addr: 0x8400,
        name: "stub_InitLateStaticField".into(),
        kind: FnKind::Stub(StubKind::InitLateStaticField),
    });
    env.functions.register(DartFn {
        addr: 0x8500,
        name: "stub_InitAsync".into(),
        kind: FnKind::Stub(StubKind::InitAsync),
    });
    env.functions.register(DartFn {
        addr: 0x8600,
        name: "stub_BoxInt64".into(),
        kind: FnKind::Stub(StubKind::BoxInt64),
    });

    env
}

pub fn asm(lines: &[&str]) -> Vec<AsmInstruction> {
    lines.iter().map(|l| parse_instruction(l)).collect()
}

pub fn lift(env: &LiftEnv, lines: &[&str]) -> Vec<ILInstr> {
    lift_insns(env, &asm(lines))
}

#[cfg(test)]
fn strings(ils: &[ILInstr]) -> Vec<String> {
    ils.iter().map(|il| il.to_string()).collect()
}

#[test]
fn prolog_collapses_to_enter_frame() {
    let env = test_env();
    let ils = lift(&env, &["1000 stp fp, lr, [sp, #-0x10]!", "1004 mov fp, sp"]);
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].kind(), ILKind::EnterFrame);
    assert_eq!(ils[0].start(), 0x1000);
    assert_eq!(ils[0].end(), 0x1008);
    assert_eq!(ils[0].to_string(), "EnterFrame");

    // Numbered register spellings decode the same way.
    let ils = lift(&env, &["1000 stp x29, x30, [sp, #-16]!", "1004 mov x29, sp"]);
    assert_eq!(ils[0].kind(), ILKind::EnterFrame);
}

#[test]
fn epilog_collapses_to_leave_frame() {
    let env = test_env();
    let ils = lift(
        &env,
        &["1000 mov sp, fp", "1004 ldp fp, lr, [sp], #0x10", "1008 ret"],
    );
    assert_eq!(
        ils.iter().map(|il| il.kind()).collect::<Vec<_>>(),
        vec![ILKind::LeaveFrame, ILKind::Return]
    );
    assert_eq!(ils[1].to_string(), "ret");
}

#[test]
fn stack_allocation_and_overflow_check() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 stp fp, lr, [sp, #-0x10]!",
            "1004 mov fp, sp",
            "1008 sub sp, sp, #0x20",
            "100c ldr x16, [x26, #0x38]",
            "1010 cmp sp, x16",
            "1014 b.ls 0x2000",
        ],
    );
    assert_eq!(
        strings(&ils),
        vec!["EnterFrame", "AllocStack(0x20)", "CheckStackOverflow"]
    );
    assert_eq!(ils[2].start(), 0x100c);
    assert_eq!(ils[2].end(), 0x1018);
    match ils[2].op() {
        ILOp::CheckStackOverflow { overflow_branch } => assert_eq!(*overflow_branch, 0x2000),
        other => panic!("Expected CheckStackOverflow, got {:?}", other),
    }
}

#[test]
fn pool_load_of_smi_integer() {
    let env = test_env();
    let ils = lift(&env, &["1000 ldr x0, [x27, #0x28]"]);
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].to_string(), "x0 = 42");
    match ils[0].op() {
        ILOp::LoadValue { dst, item } => {
            assert_eq!(*dst, Register::x(0));
            assert_eq!(item.storage(), VarStorage::Pool(0x28));
            let (raw, int_type, known) = item.value().unwrap().as_integer().unwrap();
            assert_eq!(raw, 84);
            assert_eq!(int_type, cid::SMI);
            assert!(known);
            assert_eq!(item.value().unwrap().integer_value(), Some(42));
        }
        other => panic!("Expected LoadValue, got {:?}", other),
    }
}

#[test]
fn pool_load_of_string_and_double() {
    let env = test_env();
    let ils = lift(
        &env,
        &["1000 ldr x1, [x27, #0x30]", "1004 ldr d0, [x27, #0x78]"],
    );
    assert_eq!(strings(&ils), vec!["x1 = \"hello\"", "d0 = 2.5"]);
}

#[test]
fn unknown_pool_kind_becomes_expression() {
    let env = test_env();
    let ils = lift(&env, &["1000 ldr x5, [x27, #0x70]"]);
    match ils[0].op() {
        ILOp::LoadValue { item, .. } => {
            let v = item.value().unwrap();
            assert_eq!(v.type_id(), cid::ILLEGAL);
            assert_eq!(v.to_string(), "Obj_weakserializationreference");
        }
        other => panic!("Expected LoadValue, got {:?}", other),
    }
}

#[test]
fn tagged_cid_composite_consumes_all_three_parts() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 movz w1, #0xc",
            "1004 tbz x0, #0, 0x100c",
            "1008 ldur w1, [x0, #-1]",
        ],
    );
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].kind(), ILKind::LoadTaggedClassIdMayBeSmi);
    assert_eq!(ils[0].start(), 0x1000);
    assert_eq!(ils[0].end(), 0x100c);
    assert_eq!(ils[0].to_string(), "w1 = LoadTaggedClassIdMayBeSmi(x0)");
    match ils[0].op() {
        ILOp::LoadTaggedClassIdMayBeSmi {
            tagged_cid_reg,
            obj,
            load_imm,
            branch_if_smi,
            load_class_id,
        } => {
            assert_eq!(*tagged_cid_reg, Register::w(1));
            assert_eq!(*obj, Register::x(0));
            assert_eq!(load_imm.kind(), ILKind::LoadValue);
            assert_eq!(load_imm.to_string(), "w1 = TaggedCid_6");
            assert_eq!(branch_if_smi.kind(), ILKind::BranchIfSmi);
            assert_eq!(load_class_id.kind(), ILKind::LoadClassId);
            for child in [load_imm, branch_if_smi, load_class_id] {
                assert!(ils[0].range().contains(&child.range()));
            }
        }
        other => panic!("Expected the composite, got {:?}", other),
    }
}

#[test]
fn broken_tagged_cid_sequence_stands_alone() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 movz w1, #0xc",
            "1004 mov x5, x6",
            "1008 tbz x0, #0, 0x1010",
            "100c ldur w1, [x0, #-1]",
        ],
    );
    assert_eq!(
        ils.iter().map(|il| il.kind()).collect::<Vec<_>>(),
        vec![
            ILKind::LoadValue,
            ILKind::MoveReg,
            ILKind::BranchIfSmi,
            ILKind::LoadClassId,
        ]
    );
    assert_eq!(ils[2].to_string(), "branchIfSmi(x0, 0x1010)");
    assert_eq!(ils[3].to_string(), "w1 = LoadClassId(x0)");
}

#[test]
fn leaf_runtime_call_folds_parameter_moves() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 mov x0, x3",
            "1004 mov x1, x4",
            "1008 ldr x16, [x26, #0x680]",
            "100c blr x16",
        ],
    );
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].kind(), ILKind::CallLeafRuntime);
    assert_eq!(ils[0].start(), 0x1000);
    assert_eq!(ils[0].end(), 0x1010);
    assert_eq!(
        ils[0].to_string(),
        "CallRuntime_double_to_int(double x) -> int64_t"
    );
    match ils[0].op() {
        ILOp::CallLeafRuntime { moves, .. } => {
            assert_eq!(
                moves.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                vec!["x0 = x3", "x1 = x4"]
            );
        }
        other => panic!("Expected CallLeafRuntime, got {:?}", other),
    }
}

#[test]
fn leaf_runtime_call_with_unknown_offset_still_renders() {
    let env = test_env();
    let ils = lift(&env, &["1000 ldr x17, [x26, #0x7f0]", "1004 blr x17"]);
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].to_string(), "CallRuntime_thr_0x7f0(?) -> ?");
}

#[test]
fn field_store_followed_by_write_barrier() {
    let env = test_env();
    let ils = lift(&env, &["1000 str x1, [x0, #0x10]", "1004 bl 0x8100"]);
    assert_eq!(
        strings(&ils),
        vec![
            "StoreField: x0->field_10 = x1",
            "WriteBarrier(obj = x0, val = x1)",
        ]
    );
}

#[test]
fn unresolved_direct_call_keeps_raw_address() {
    let env = test_env();
    let ils = lift(&env, &["1000 bl 0xdeadbeef"]);
    assert_eq!(ils[0].to_string(), "r0 = call 0xdeadbeef");
    match ils[0].op() {
        ILOp::Call { target, addr } => {
            assert!(target.is_none());
            assert_eq!(*addr, 0xdeadbeef);
        }
        other => panic!("Expected Call, got {:?}", other),
    }
}

#[test]
fn resolved_direct_call_names_the_target() {
    let env = test_env();
    let ils = lift(&env, &["1000 bl 0x5000"]);
    assert_eq!(ils[0].to_string(), "r0 = foo()");
}

#[test]
fn allocation_stub_call_becomes_inline_allocate() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 bl 0x8000",
            "1004 str x1, [x0, #0xb]",
            "1008 bl 0x8100",
        ],
    );
    assert_eq!(
        strings(&ils),
        vec![
            "x0 = inline_AllocatePoint()",
            "StoreField: x0->field_b = x1",
            "WriteBarrier(obj = x0, val = x1)",
        ]
    );
}

#[test]
fn array_load_through_computed_address() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 ldr x2, [x27, #0x60]",
            "1004 add x16, x2, x3, lsl #2",
            "1008 ldur w0, [x16, #0xf]",
        ],
    );
    assert_eq!(ils.len(), 2);
    assert_eq!(ils[1].to_string(), "ArrayLoad: w0 = x2[x3]  ; List_4");
    match ils[1].op() {
        ILOp::LoadArrayElement { idx, op, .. } => {
            assert_eq!(*idx, VarStorage::Register(Register::x(3)));
            assert_eq!(op.size, 4);
            assert!(op.is_load);
            assert_eq!(op.arr_type, ArrayType::List);
            assert_eq!(op.size_log2(), 2);
        }
        other => panic!("Expected LoadArrayElement, got {:?}", other),
    }
}

#[test]
fn array_store_with_constant_index() {
    let env = test_env();
    let ils = lift(
        &env,
        &["1000 ldr x2, [x27, #0x60]", "1004 str w1, [x2, #0x13]"],
    );
    assert_eq!(ils[1].to_string(), "ArrayStore: x2[smallimm(1)] = w1  ; List_4");
    match ils[1].op() {
        ILOp::StoreArrayElement { idx, op, .. } => {
            assert_eq!(*idx, VarStorage::SmallImm(1));
            assert!(!op.is_load);
        }
        other => panic!("Expected StoreArrayElement, got {:?}", other),
    }
}

#[test]
fn array_op_size_log2_table() {
    for (size, log2) in [(1u8, 0u8), (2, 1), (4, 2), (8, 3)] {
        assert_eq!(ArrayOp::new(size, true, ArrayType::List).size_log2(), log2);
    }
    assert_eq!(ArrayOp::new(3, true, ArrayType::List).size_log2(), 255);
    assert_eq!(ArrayOp::new(16, true, ArrayType::List).size_log2(), 255);
    assert!(!ArrayOp::new(0, true, ArrayType::Unknown).is_array_op());
    assert_eq!(ArrayOp::new(8, false, ArrayType::TypedUnsigned).to_string(), "TypedUnsigned_8");
}

#[test]
fn gdt_call_with_selector_in_tmp2() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 movz x17, #0x138",
            "1004 add x16, x0, x17",
            "1008 ldr x16, [x21, x16, lsl #3]",
            "100c blr x16",
        ],
    );
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].kind(), ILKind::GdtCall);
    assert_eq!(ils[0].start(), 0x1000);
    assert_eq!(ils[0].end(), 0x1010);
    assert_eq!(ils[0].to_string(), "r0 = GDT[cid_x0 + 0x138]()");
}

#[test]
fn gdt_call_with_immediate_selector() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 add x16, x0, #0x30",
            "1004 ldr x16, [x21, x16, lsl #3]",
            "1008 blr x16",
        ],
    );
    assert_eq!(ils[0].to_string(), "r0 = GDT[cid_x0 + 0x30]()");
}

#[test]
fn type_test_sequence() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 ldr x8, [x27, #0x40]",
            "1004 ldr x3, [x27, #0x48]",
            "1008 bl 0x8300",
        ],
    );
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].to_string(), "x0 as String");
    assert_eq!(ils[0].end(), 0x100c);
}

#[test]
fn closure_call_sequence() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 ldr x4, [x27, #0x68]",
            "1004 ldur x2, [x0, #0x37]",
            "1008 blr x2",
        ],
    );
    assert_eq!(ils.len(), 1);
    assert_eq!(ils[0].to_string(), "ClosureCall");
    match ils[0].op() {
        ILOp::ClosureCall {
            num_args,
            num_type_args,
        } => {
            assert_eq!(*num_args, 2);
            assert_eq!(*num_type_args, 0);
        }
        other => panic!("Expected ClosureCall, got {:?}", other),
    }
}

#[test]
fn static_field_load_and_store() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 ldr x2, [x26, #0xa0]",
            "1004 ldr x0, [x2, #0x30]",
            "1008 ldr x2, [x26, #0xa0]",
            "100c str x1, [x2, #0x30]",
        ],
    );
    assert_eq!(
        strings(&ils),
        vec!["x0 = LoadStaticField(0x30)", "StoreStaticField(0x30, x1)"]
    );
}

#[test]
fn late_static_field_initialization() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 ldr x2, [x26, #0xa0]",
            "1004 ldr x0, [x2, #0x40]",
            "1008 ldr x16, [x27, #0x50]",
            "100c cmp w0, w16",
            "1010 b.ne 0x1020",
            "1014 ldr x2, [x27, #0x58]",
            "1018 bl 0x8400",
        ],
    );
    assert_eq!(
        strings(&ils),
        vec![
            "x0 = LoadStaticField(0x40)",
            "w0 = InitLateStaticField(0x10) // counter",
        ]
    );
    assert_eq!(ils[1].start(), 0x1008);
    assert_eq!(ils[1].end(), 0x101c);
}

#[test]
fn compressed_field_load_then_decompress() {
    let env = test_env();
    let ils = lift(
        &env,
        &["1000 ldur w0, [x1, #0xb]", "1004 add x0, x0, x28, lsl #32"],
    );
    assert_eq!(
        strings(&ils),
        vec!["LoadField: w0 = x1->field_b", "DecompressPointer x0"]
    );
}

#[test]
fn box_and_unbox_int64() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 adds x0, x2, x2",
            "1004 b.vc 0x100c",
            "1008 bl 0x8600",
            "100c sbfx x3, x0, #1, #31",
        ],
    );
    assert_eq!(strings(&ils), vec!["x0 = BoxInt64(x2)", "x3 = LoadInt32(x0)"]);
    assert_eq!(ils[0].start(), 0x1000);
    assert_eq!(ils[0].end(), 0x100c);
}

#[test]
fn parameter_setup_collapses_at_prologue() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 stp fp, lr, [sp, #-0x10]!",
            "1004 mov fp, sp",
            "1008 ldr x1, [fp, #0x10]",
            "100c ldr x2, [fp, #0x18]",
            "1010 ret",
        ],
    );
    assert_eq!(
        strings(&ils),
        vec![
            "EnterFrame",
            "SetupParameters(arg0 = x1, arg1 = x2)",
            "ret",
        ]
    );
}

#[test]
fn lone_argument_load_outside_prologue() {
    let env = test_env();
    let ils = lift(&env, &["1000 ldr x1, [fp, #0x10]"]);
    assert_eq!(ils[0].to_string(), "x1 = arg0");
    match ils[0].op() {
        ILOp::LoadValue { item, .. } => {
            assert_eq!(item.storage(), VarStorage::Argument(0));
            assert_eq!(item.value().unwrap().as_param(), Some(0));
        }
        other => panic!("Expected LoadValue, got {:?}", other),
    }
}

#[test]
fn save_and_restore_registers() {
    let env = test_env();
    let ils = lift(
        &env,
        &["1000 stur x20, [fp, #-0x20]", "1004 ldur x20, [fp, #-0x20]"],
    );
    assert_eq!(strings(&ils), vec!["SaveReg x20", "RestoreReg x20"]);
}

#[test]
fn pool_store_and_move() {
    let env = test_env();
    let ils = lift(&env, &["1000 str x0, [x27, #0x100]", "1004 mov x5, x6"]);
    assert_eq!(strings(&ils), vec!["[PP+0x100] = x0", "x5 = x6"]);
}

#[test]
fn unrecognized_instruction_becomes_unknown() {
    let env = test_env();
    let ils = lift(&env, &["1000 brk #0", "1004 ret"]);
    assert_eq!(ils[0].kind(), ILKind::Unknown);
    assert_eq!(ils[0].to_string(), "unknown");
    assert_eq!(ils[1].kind(), ILKind::Return);
}

#[test]
fn empty_stream_lifts_to_empty_il() {
    let env = test_env();
    assert!(lift(&env, &[]).is_empty());
}

#[test]
fn emitted_ranges_are_monotone_and_word_sized() {
    let env = test_env();
    let ils = lift(
        &env,
        &[
            "1000 stp fp, lr, [sp, #-0x10]!",
            "1004 mov fp, sp",
            "1008 sub sp, sp, #0x10",
            "100c ldr x16, [x26, #0x38]",
            "1010 cmp sp, x16",
            "1014 b.ls 0x2000",
            "1018 ldr x0, [x27, #0x28]",
            "101c movz w1, #0xc",
            "1020 tbz x0, #0, 0x1028",
            "1024 ldur w1, [x0, #-1]",
            "1028 bl 0x5000",
            "102c mov sp, fp",
            "1030 ldp fp, lr, [sp], #0x10",
            "1034 ret",
        ],
    );
    assert!(!ils.is_empty());
    for il in &ils {
        assert!(il.start() < il.end());
        assert_eq!((il.end() - il.start()) % 4, 0);
    }
    for pair in ils.windows(2) {
        assert!(pair[0].start() <= pair[1].start());
    }
}

#[test]
fn storage_equality_and_predicates() {
    let x3 = VarStorage::Register(Register::x(3));
    assert!(x3 == Register::x(3));
    assert!(x3 == Register::w(3));
    assert!(x3 != Register::x(4));
    assert!(VarStorage::Pool(0x28) != Register::x(3));

    assert!(VarStorage::Immediate.is_immediate());
    assert!(VarStorage::Immediate.is_predefined_value());
    assert!(VarStorage::Pool(0x28).is_predefined_value());
    assert!(!VarStorage::Call.is_predefined_value());

    assert_eq!(VarStorage::Pool(0x28).name(), "PP+0x28");
    assert_eq!(VarStorage::Thread(0x30).name(), "THR+0x30");
    assert_eq!(VarStorage::Local(0x10).name(), "fp+0x10");
    assert_eq!(VarStorage::Local(-0x8).name(), "fp-0x8");
    assert_eq!(VarStorage::Argument(0).name(), "arg0");
    assert_eq!(VarStorage::Call.name(), "ret");
}

#[test]
fn integer_value_unshifts_smis_only() {
    let smi = VarValue::known_smi(42);
    assert_eq!(smi.as_integer(), Some((84, cid::SMI, true)));
    assert_eq!(smi.integer_value(), Some(42));

    let mint = VarValue::Integer {
        val: 84,
        int_type_id: cid::MINT,
        known: true,
    };
    assert_eq!(mint.integer_value(), Some(84));

    let mut broad = VarValue::Integer {
        val: 84,
        int_type_id: cid::INT,
        known: true,
    };
    assert_eq!(broad.integer_value(), Some(84));
    broad.set_smi_if_int();
    assert_eq!(broad.integer_value(), Some(42));
    // Already narrowed; narrowing again changes nothing.
    broad.set_smi_if_int();
    assert_eq!(broad.integer_value(), Some(42));

    let mut narrowed = VarValue::Integer {
        val: 84,
        int_type_id: cid::MINT,
        known: true,
    };
    narrowed.set_smi_if_int();
    assert_eq!(narrowed.integer_value(), Some(84));
    narrowed.set_int_type(cid::SMI);
    assert_eq!(narrowed.integer_value(), Some(42));
}

#[test]
fn cid_value_law_and_display() {
    let unknown = VarValue::Cid {
        cid: 0,
        is_smi: false,
    };
    assert!(!unknown.has_value());

    let tagged = VarValue::Cid {
        cid: 12,
        is_smi: true,
    };
    assert!(tagged.has_value());
    assert_eq!(tagged.to_string(), "TaggedCid_6");

    let raw = VarValue::Cid {
        cid: 6,
        is_smi: false,
    };
    assert_eq!(raw.to_string(), "cid_6");
    assert_eq!(raw.raw_type_id(), cid::CLASS);
}

#[test]
fn missing_value_renders_diagnostic_marker() {
    let item = VarItem::unassigned(VarStorage::Register(Register::x(0)));
    assert_eq!(item.value_string(), "BUG_NO_ASSIGN_VALUE");
    assert_eq!(item.name(), "BUG_NO_ASSIGN_VALUE");
}

#[test]
fn type_ids_are_class_ids_outside_custom_kinds() {
    let values = [
        VarValue::Null,
        VarValue::Boolean(Some(true)),
        VarValue::known_smi(1),
        VarValue::Str(Some("x".into())),
        VarValue::Sentinel,
        VarValue::SubtypeTestCache,
        VarValue::GrowableArray { ele_type: None },
    ];
    for v in &values {
        assert!(v.type_id() >= 0, "{:?} reported a negative type id", v);
        // Display must be total.
        let _ = v.to_string();
    }
    assert!(VarValue::expression("e").raw_type_id() < 0);
    assert!(VarValue::Param { idx: 1 }.raw_type_id() < 0);
}

#[cfg(test)]
const SAMPLE_EXPORT: &str = "\
PROGRAM
name libapp.so

THREAD
0x700 bigint_mul leaf uint32_t (uint32_t* digits, uint32_t n)

POOL
0x28 int 42
0x30 string \"hi\"

CLASSES
100 Point

FUNCTIONS
0x5000 foo
0x8000 stub_AllocatePoint stub allocateobject 100

LISTING
0x1000 main
1000 stp fp, lr, [sp, #-0x10]!
1004 mov fp, sp
1008 ldr x0, [x27, #0x28]
100c mov sp, fp
1010 ldp fp, lr, [sp], #0x10
1014 ret

0x2000 helper
2000 ret
";

#[test]
fn loader_builds_environment_and_functions() {
    let dump = crate::asm_loader::load_from(SAMPLE_EXPORT);
    assert_eq!(dump.name, "libapp.so");
    assert_eq!(dump.functions.len(), 2);
    assert_eq!(dump.functions[0].name, "main");
    assert_eq!(dump.functions[0].entry, 0x1000);
    assert_eq!(dump.functions[0].insns.len(), 6);
    assert_eq!(dump.env.pool.len(), 2);
    assert_eq!(dump.env.thread.offset_name(0x700), Some("bigint_mul"));
    assert_eq!(
        dump.env
            .thread
            .leaf_function(0x700)
            .map(|i| i.return_type.as_str()),
        Some("uint32_t")
    );
    // Defaults survive alongside the override.
    assert_eq!(dump.env.thread.offset_name(0x38), Some("stack_limit"));
    assert!(dump.env.thread.max_offset() >= 0x700);

    let ils = crate::lifter::lift_function(&dump.env, &dump.functions[0]);
    assert_eq!(
        ils.iter().map(|il| il.kind()).collect::<Vec<_>>(),
        vec![
            ILKind::EnterFrame,
            ILKind::LoadValue,
            ILKind::LeaveFrame,
            ILKind::Return,
        ]
    );
}
