//! End-to-end interpreter scenarios
//!
//! Programs are assembled in memory and observed through the
//! `std::panic` channel (the message carries the computed value) or
//! through heap statistics after the run.

use conch_bytecode::{FunctionBuilder, Opcode as Op, Unit, UnitBuilder};
use conch_vm::{Obj, Vm, VmConfig, VmError};

/// Build a unit whose `<main>` is assembled by `build`, run it, and
/// return the error that ended the run
fn run_unit(build: impl FnOnce(&mut FunctionBuilder, &mut UnitBuilder)) -> VmError {
    let mut builder = Unit::builder();
    let mut main = builder.function("e2e::<main>");
    build(&mut main, &mut builder);
    builder.add_function(main.build());
    let unit = builder.build().expect("test unit must validate");
    let mut vm = Vm::new(&unit, VmConfig::default());
    vm.run().expect_err("scenario ends in an error")
}

/// Run a program expected to finish by `std::panic`, returning the message
fn run_expect_panic(build: impl FnOnce(&mut FunctionBuilder, &mut UnitBuilder)) -> String {
    match run_unit(build) {
        VmError::Panic(message) => message,
        other => panic!("expected a runtime panic, got {other:?}"),
    }
}

/// Emit `IntToStr` + `INVOKE std::panic`, the observation idiom
fn panic_top_int(main: &mut FunctionBuilder, builder: &mut UnitBuilder) {
    let panic = builder.string("std::panic");
    main.op(Op::IntToStr).op_u32(Op::Invoke, panic);
}

#[test]
fn arithmetic_reaches_the_panic_channel() {
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 7)
            .op_i64(Op::PushInt, 5)
            .op(Op::IntSub);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "2");
}

#[test]
fn branching_takes_the_fallthrough_on_zero() {
    let message = run_expect_panic(|main, builder| {
        main.op_u8(Op::PushByte, 0);
        let to_then = main.forward_jump(Op::IfJump);
        main.op_i64(Op::PushInt, 1);
        let to_end = main.forward_jump(Op::Jump);
        let then = main.here();
        main.op_i64(Op::PushInt, 2);
        let end = main.here();
        main.patch_u32(to_then, then);
        main.patch_u32(to_end, end);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "1");
}

#[test]
fn branching_jumps_on_one() {
    let message = run_expect_panic(|main, builder| {
        main.op_u8(Op::PushByte, 1);
        let to_then = main.forward_jump(Op::IfJump);
        main.op_i64(Op::PushInt, 1);
        let to_end = main.forward_jump(Op::Jump);
        let then = main.here();
        main.op_i64(Op::PushInt, 2);
        let end = main.here();
        main.patch_u32(to_then, then);
        main.patch_u32(to_end, end);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "2");
}

#[test]
fn if_not_jump_inverts_the_test() {
    let message = run_expect_panic(|main, builder| {
        main.op_u8(Op::PushByte, 0);
        let to_then = main.forward_jump(Op::IfNotJump);
        main.op_i64(Op::PushInt, 1);
        let to_end = main.forward_jump(Op::Jump);
        let then = main.here();
        main.op_i64(Op::PushInt, 2);
        let end = main.here();
        main.patch_u32(to_then, then);
        main.patch_u32(to_end, end);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "2");
}

#[test]
fn cross_frame_call_marshals_arguments_and_return() {
    let mut builder = Unit::builder();

    // add(a, b) -> a + b
    let mut add = builder.function("e2e::add").locals(16).parameters(16).returns(8);
    add.op_u32(Op::GetQWord, 0)
        .op_u32(Op::GetQWord, 8)
        .op(Op::IntAdd)
        .op(Op::Return);
    builder.add_function(add.build());

    let add_name = builder.string("e2e::add");
    let panic = builder.string("std::panic");
    let mut main = builder.function("e2e::<main>");
    main.op_i64(Op::PushInt, 3)
        .op_i64(Op::PushInt, 4)
        .op_u32(Op::Invoke, add_name)
        .op(Op::IntToStr)
        .op_u32(Op::Invoke, panic);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    assert_eq!(vm.run().unwrap_err(), VmError::Panic("7".to_string()));
}

#[test]
fn byte_wide_return_values_marshal() {
    let mut builder = Unit::builder();

    let mut yes = builder.function("e2e::yes").locals(1).returns(1);
    yes.op_u8(Op::PushByte, 1).op(Op::Return);
    builder.add_function(yes.build());

    let yes_name = builder.string("e2e::yes");
    let panic = builder.string("std::panic");
    let taken = builder.string("taken");
    let skipped = builder.string("skipped");
    let mut main = builder.function("e2e::<main>");
    main.op_u32(Op::Invoke, yes_name);
    let to_then = main.forward_jump(Op::IfJump);
    main.op_u32(Op::PushString, skipped).op_u32(Op::Invoke, panic);
    let then = main.here();
    main.patch_u32(to_then, then);
    main.op_u32(Op::PushString, taken).op_u32(Op::Invoke, panic);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    assert_eq!(vm.run().unwrap_err(), VmError::Panic("taken".to_string()));
}

#[test]
fn split_then_drop_lets_gc_collect_everything() {
    let mut builder = Unit::builder();
    let subject = builder.string("a b c d e");
    let space = builder.string(" ");
    let split = builder.string("lang::String::split");
    let gc = builder.string("std::memory::gc");

    let mut main = builder.function("e2e::<main>").locals(8);
    main.op_u32(Op::PushString, subject)
        .op_u32(Op::PushString, space)
        .op_u32(Op::Invoke, split)
        .op_u32(Op::SetRef, 0)
        // overwrite the only reference to the vector
        .op_i64(Op::PushInt, 0)
        .op_u32(Op::SetQWord, 0)
        .op_u32(Op::Invoke, gc)
        .op(Op::Return);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    vm.run().unwrap();
    // five split strings plus the vector, all collected
    assert!(vm.heap().is_empty());
}

#[test]
fn rooted_vector_survives_gc() {
    let mut builder = Unit::builder();
    let subject = builder.string("a b c d e");
    let space = builder.string(" ");
    let split = builder.string("lang::String::split");
    let gc = builder.string("std::memory::gc");

    let mut main = builder.function("e2e::<main>").locals(8);
    main.op_u32(Op::PushString, subject)
        .op_u32(Op::PushString, space)
        .op_u32(Op::Invoke, split)
        .op_u32(Op::SetRef, 0)
        .op_u32(Op::Invoke, gc)
        .op(Op::Return);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    vm.run().unwrap();
    assert_eq!(vm.heap().len(), 6);
}

#[test]
fn empty_operands_observes_an_empty_stack() {
    let message = run_expect_panic(|main, builder| {
        let empty_operands = builder.string("std::memory::empty_operands");
        let panic = builder.string("std::panic");
        let empty = builder.string("empty");
        let leftover = builder.string("leftover");

        main.op_u32(Op::Invoke, empty_operands);
        let to_then = main.forward_jump(Op::IfJump);
        main.op_u32(Op::PushString, leftover).op_u32(Op::Invoke, panic);
        let then = main.here();
        main.patch_u32(to_then, then);
        main.op_u32(Op::PushString, empty).op_u32(Op::Invoke, panic);
    });
    assert_eq!(message, "empty");
}

#[test]
fn parse_int_radix_boxes_the_result() {
    let mut builder = Unit::builder();
    let hex = builder.string("ff");
    let parse = builder.string("std::convert::parse_int_radix");

    let mut main = builder.function("e2e::<main>").locals(8);
    main.op_u32(Op::PushString, hex)
        .op_i64(Op::PushInt, 16)
        .op_u32(Op::Invoke, parse)
        .op_u32(Op::SetRef, 0)
        .op(Op::Return);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    vm.run().unwrap();
    assert_eq!(vm.heap().len(), 1);
    assert!(vm.heap().iter().any(|(_, obj)| *obj == Obj::Int(255)));
}

#[test]
fn parse_int_radix_rejects_invalid_base() {
    let err = run_unit(|main, builder| {
        let hex = builder.string("ff");
        let parse = builder.string("std::convert::parse_int_radix");
        main.op_u32(Op::PushString, hex)
            .op_i64(Op::PushInt, 37)
            .op_u32(Op::Invoke, parse);
    });
    assert_eq!(err, VmError::Panic("Invalid base: 37.".to_string()));
}

#[test]
fn push_int_immediate_is_big_endian_on_the_wire() {
    // 0x0102030405060708 survives the wire conversion byte-exact
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 0x0102030405060708);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "72623859790382856");
}

#[test]
fn float_pipeline_divides() {
    let message = run_expect_panic(|main, builder| {
        let panic = builder.string("std::panic");
        main.op_f64(Op::PushFloat, 5.0)
            .op_f64(Op::PushFloat, 2.0)
            .op(Op::FloatDiv)
            .op(Op::FloatToStr)
            .op_u32(Op::Invoke, panic);
    });
    assert_eq!(message, "2.5");
}

#[test]
fn swap2_rotates_the_deepest_to_the_top() {
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 1)
            .op_i64(Op::PushInt, 2)
            .op_i64(Op::PushInt, 3)
            .op(Op::Swap2);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "1");
}

#[test]
fn swap_exchanges_the_two_top_qwords() {
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 1)
            .op_i64(Op::PushInt, 2)
            .op(Op::Swap);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "1");
}

#[test]
fn int_to_byte_truncates_twos_complement() {
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 300)
            .op(Op::IntToByte)
            .op(Op::ByteToInt);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "44");

    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, -1)
            .op(Op::IntToByte)
            .op(Op::ByteToInt);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "-1");
}

#[test]
fn concat_is_associative() {
    let message = run_expect_panic(|main, builder| {
        let a = builder.string("sea ");
        let b = builder.string("shell ");
        let c = builder.string("song");
        let panic = builder.string("std::panic");
        let equal = builder.string("equal");
        let differ = builder.string("differ");

        // (a + b) + c
        main.op_u32(Op::PushString, a)
            .op_u32(Op::PushString, b)
            .op(Op::Concat)
            .op_u32(Op::PushString, c)
            .op(Op::Concat);
        // a + (b + c)
        main.op_u32(Op::PushString, a)
            .op_u32(Op::PushString, b)
            .op_u32(Op::PushString, c)
            .op(Op::Concat)
            .op(Op::Concat);
        main.op(Op::StrEq);
        let to_then = main.forward_jump(Op::IfJump);
        main.op_u32(Op::PushString, differ).op_u32(Op::Invoke, panic);
        let then = main.here();
        main.patch_u32(to_then, then);
        main.op_u32(Op::PushString, equal).op_u32(Op::Invoke, panic);
    });
    assert_eq!(message, "equal");
}

#[test]
fn unbounded_recursion_overflows_the_call_stack() {
    let mut builder = Unit::builder();
    let loop_name = builder.string("e2e::loop");

    let mut looper = builder.function("e2e::loop").locals(64);
    looper.op_u32(Op::Invoke, loop_name);
    builder.add_function(looper.build());

    let mut main = builder.function("e2e::<main>");
    main.op_u32(Op::Invoke, loop_name);
    builder.add_function(main.build());

    let unit = builder.build().unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    assert_eq!(vm.run().unwrap_err(), VmError::StackOverflow);
}

#[test]
fn locals_access_is_bounds_checked() {
    let err = run_unit(|main, _| {
        main.op_u32(Op::GetQWord, 100);
    });
    assert!(matches!(err, VmError::LocalsOutOfBound { offset: 100, .. }));
}

#[test]
fn pop_on_empty_stack_underflows() {
    let err = run_unit(|main, _| {
        main.op(Op::PopQWord);
    });
    assert!(matches!(err, VmError::OperandStackUnderflow { .. }));
}

#[test]
fn str_eq_compares_content_not_identity() {
    let message = run_expect_panic(|main, builder| {
        let one = builder.string("abc");
        let panic = builder.string("std::panic");
        let equal = builder.string("equal");
        let differ = builder.string("differ");
        let concat_a = builder.string("ab");
        let concat_b = builder.string("c");

        main.op_u32(Op::PushString, one);
        main.op_u32(Op::PushString, concat_a)
            .op_u32(Op::PushString, concat_b)
            .op(Op::Concat);
        main.op(Op::StrEq);
        let to_then = main.forward_jump(Op::IfJump);
        main.op_u32(Op::PushString, differ).op_u32(Op::Invoke, panic);
        let then = main.here();
        main.patch_u32(to_then, then);
        main.op_u32(Op::PushString, equal).op_u32(Op::Invoke, panic);
    });
    assert_eq!(message, "equal");
}

#[test]
fn byte_xor_and_byte_eq() {
    let message = run_expect_panic(|main, builder| {
        main.op_u8(Op::PushByte, 0b1010)
            .op_u8(Op::PushByte, 0b0110)
            .op(Op::ByteXor)
            .op(Op::ByteToInt);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "12");

    let message = run_expect_panic(|main, builder| {
        main.op_u8(Op::PushByte, 3)
            .op_u8(Op::PushByte, 3)
            .op(Op::ByteEq)
            .op(Op::ByteToInt);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "1");
}

#[test]
fn modulo_and_division() {
    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 10)
            .op_i64(Op::PushInt, 3)
            .op(Op::IntMod);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "1");

    let message = run_expect_panic(|main, builder| {
        main.op_i64(Op::PushInt, 10)
            .op_i64(Op::PushInt, 3)
            .op(Op::IntDiv);
        panic_top_int(main, builder);
    });
    assert_eq!(message, "3");
}

#[test]
fn comparisons_push_bytes() {
    for (op, a, b, expected) in [
        (Op::IntEq, 2, 2, 1),
        (Op::IntLt, 1, 2, 1),
        (Op::IntLe, 2, 2, 1),
        (Op::IntGt, 2, 2, 0),
        (Op::IntGe, 3, 2, 1),
    ] {
        let message = run_expect_panic(|main, builder| {
            main.op_i64(Op::PushInt, a)
                .op_i64(Op::PushInt, b)
                .op(op)
                .op(Op::ByteToInt);
            panic_top_int(main, builder);
        });
        assert_eq!(message, expected.to_string(), "{op:?} {a} {b}");
    }
}
