mod common;

use common::Harness;
use scriptvm_core::{Pointer, ProgramState, Value};

#[test]
fn arithmetic_follows_the_coercion_rules() {
    let mut harness = Harness::new();
    harness.script(
        "math",
        r#"
.proc start
    push 2
    push 3
    add
    print
    push 1.5
    push 2
    mul
    print
    push "n="
    push 7
    add
    print
    push 7
    push 2
    div
    print
    push -7
    push 2
    mod
    print
    push 2147483647
    push 1
    add
    print
    push 7
    push 2.0
    div
    print
    push 6
    push 3
    bitwise_xor
    print
    push 2.9
    floor
    print
    push "abc"
    push "abd"
    less
    print
    push 0
    not
    print
    exit
.end
"#,
    );
    harness.start("math");
    assert_eq!(
        harness.output(),
        vec![
            "5",
            "3.00000",
            "n=7",
            "3",
            "-1",
            "2147483648.00000",
            "3.50000",
            "5",
            "2",
            "1",
            "1",
        ]
    );
}

#[test]
fn branches_and_globals_drive_a_loop() {
    let mut harness = Harness::new();
    harness.script(
        "counter",
        r#"
.proc start
    set_global
    push 0
top:
    push @done
    push 0
    fetch_global
    push 3
    less
    if
    push 0
    fetch_global
    print
    push 0
    fetch_global
    push 1
    add
    push 0
    store_global
    push @top
    jump
done:
    push @end
    push 0
    while
    push "skipped"
    print
end:
    push "done"
    print
    exit
.end
"#,
    );
    let id = harness.start("counter");
    assert_eq!(harness.output(), vec!["0", "1", "2", "done"]);
    assert!(harness.program(id).is_exited());
}

#[test]
fn local_calls_use_frames_and_return_values() {
    let mut harness = Harness::new();
    harness
        .dispatcher
        .register(0x8074, |ctx| {
            let depth = ctx.program().data().len() as i32;
            ctx.push(depth)
        })
        .expect("slot is free");
    harness.script(
        "caller",
        r#"
.opcode depth 0x8074
.proc start
    push "kept"
    depth
    print
    push @back
    d_to_a
    push 4
    push 5
    push 2
    push #sum
    call
back:
    print
    depth
    print
    print
    push "SUM"
    lookup_procedure_by_name
    print
    exit
.end
.proc sum args=2
    push_base
    push 0
    fetch
    push 1
    fetch
    add
    d_to_a
    pop_to_base
    a_to_d
    pop_base
    pop_return
.end
"#,
    );
    let id = harness.start("caller");
    assert_eq!(harness.output(), vec!["1", "9", "1", "kept", "1"]);
    let program = harness.program(id);
    assert!(program.control().is_empty());
    assert_eq!(program.frame_pointer(), -1);
}

#[test]
fn strings_concatenate_with_host_pointers() {
    let mut harness = Harness::new();
    harness
        .dispatcher
        .register(0x8073, |ctx| ctx.push(Value::Pointer(Pointer::new(0x10))))
        .expect("slot is free");
    harness.script(
        "ptr",
        r#"
.opcode ptr 0x8073
.proc start
    push "p="
    ptr
    add
    print
    ptr
    push "<"
    add
    print
    exit
.end
"#,
    );
    let id = harness.start("ptr");
    assert_eq!(harness.output(), vec!["p=0x10", "0x10<"]);
    assert!(harness.program(id).is_exited());
}

#[test]
fn fetch_procedure_address_reads_the_directory() {
    let mut harness = Harness::new();
    harness.script(
        "lookup",
        r#"
.proc start
    push #other
    fetch_procedure_address
    exit
.end
.proc other
    noop
.end
"#,
    );
    let id = harness.start("lookup");
    let program = harness.program(id);
    let expected = program.procedures()[1].entry_address as i32;
    assert_eq!(program.data().peek(), Ok(Value::Int(expected)));
}

#[test]
fn argument_count_mismatch_is_a_script_error() {
    let mut harness = Harness::new();
    harness.script(
        "checked",
        r#"
.proc start
    push #two
    push 3
    check_arg_count
    push "unreachable"
    print
.end
.proc two args=2
    pop_return
.end
"#,
    );
    let id = harness.start("checked");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
    assert!(harness.output().is_empty());
}

#[test]
fn the_entry_procedure_cannot_be_looked_up_by_name() {
    let mut harness = Harness::new();
    harness.script(
        "selfref",
        r#"
.proc start
    push "start"
    lookup_procedure_by_name
    print
.end
"#,
    );
    let id = harness.start("selfref");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
}

#[test]
fn division_by_zero_errors_and_the_program_is_reaped() {
    let mut harness = Harness::new();
    harness.script(
        "broken",
        r#"
.proc start
    push "before"
    print
    push 1
    push 0
    div
    push "after"
    print
.end
"#,
    );
    let id = harness.start("broken");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
    assert_eq!(harness.output(), vec!["before"]);

    harness.tick();
    assert!(harness.runtime.program(id).is_none());
    assert!(harness.runtime.is_empty());
}

#[test]
fn modulo_rejects_float_operands() {
    let mut harness = Harness::new();
    harness.script(
        "fmod",
        r#"
.proc start
    push 5
    push 2.0
    mod
    push "after"
    print
.end
"#,
    );
    let id = harness.start("fmod");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
    assert!(harness.output().is_empty());
}

#[test]
fn undefined_opcodes_stop_the_program() {
    let mut harness = Harness::new();
    harness.script(
        "bogus",
        r#"
.opcode bogus 0x8100
.proc start
    bogus
    push "after"
    print
.end
"#,
    );
    let id = harness.start("bogus");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
    assert!(harness.output().is_empty());
}

#[test]
fn stack_underflow_is_reported_as_an_error() {
    let mut harness = Harness::new();
    harness.script(
        "empty",
        r#"
.proc start
    add
.end
"#,
    );
    let id = harness.start("empty");
    assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError);
}

#[test]
fn frames_cannot_reach_past_the_stack() {
    for argc in ["0x80000000", "3", "-1"] {
        let mut harness = Harness::new();
        harness.script(
            "frame",
            &format!(
                r#"
.proc start
    push 1
    push {argc}
    push_base
    push "opened"
    print
.end
"#
            ),
        );
        let id = harness.start("frame");
        assert_eq!(harness.program(id).state(), ProgramState::ExitedWithError, "argc {argc}");
        assert!(harness.output().is_empty(), "argc {argc}");
        assert!(harness.program(id).control().is_empty(), "argc {argc}");
    }
}

#[test]
fn strings_built_at_run_time_live_in_the_program_heap() {
    let mut harness = Harness::new();
    harness.script(
        "concat",
        r#"
.proc start
    push "a"
    push 1.5
    add
    dup
    print
    exit
.end
"#,
    );
    let id = harness.start("concat");
    assert_eq!(harness.output(), vec!["a1.50000"]);
    let program = harness.program(id);
    let top = program.data().peek().expect("result left on the stack");
    assert!(matches!(top, Value::DynamicString(_)));
    assert_eq!(program.resolve_string(&top), Ok("a1.50000"));
}
