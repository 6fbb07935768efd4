mod common;

use common::{printing_procedure, Harness, IDLE};
use scriptvm_core::{ExportedValue, ProgramState};

fn bank() -> String {
    format!(
        r#"
.proc start
    push $gold
    export_variable
    push 100
    push $gold
    store_external
    push $motd
    export_variable
    push "open"
    push $motd
    store_external
    push 1
    push #deposit
    export_procedure
    push 1
    push #greet
    export_procedure
    push 0
    push #ping
    export_procedure
{IDLE}
.end
.proc deposit args=1
    push_base
    push $gold
    fetch_external
    push 0
    fetch
    add
    dup
    push $gold
    store_external
    d_to_a
    pop_to_base
    a_to_d
    pop_base
    pop_return
.end
.proc greet args=1
    push_base
    push "hi "
    push 0
    fetch
    add
    d_to_a
    pop_to_base
    a_to_d
    pop_base
    pop_return
.end
{ping}
"#,
        ping = printing_procedure("ping", "pong")
    )
}

const SHOP: &str = r#"
.proc start
    push @back
    d_to_a
    push 25
    push 1
    push #deposit
    call
back:
    print
    push $gold
    fetch_external
    print
    push $motd
    fetch_external
    print
    push @greeted
    d_to_a
    push "bob"
    push 1
    push #greet
    call
greeted:
    print
    exit
.end
.import deposit args=1
.import greet args=1
"#;

#[test]
fn programs_share_variables_and_procedures() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.script("shop", SHOP);
    let bank = harness.start("bank");
    let shop = harness.start("shop");

    assert_eq!(harness.output(), vec!["125", "125", "open", "hi bob"]);
    assert!(harness.program(shop).is_exited());
    assert_eq!(harness.program(shop).state(), ProgramState::Exited);

    let program = harness.program(bank);
    assert_eq!(program.state(), ProgramState::Waiting);
    assert!(program.data().is_empty());
    assert!(program.control().is_empty());
    assert_eq!(
        harness.runtime.exports().fetch("GOLD"),
        Ok(&ExportedValue::Int(125))
    );
}

#[test]
fn a_second_owner_cannot_take_a_variable() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.script(
        "rival",
        r#"
.proc start
    push $gold
    export_variable
    exit
.end
"#,
    );
    harness.start("bank");
    let rival = harness.start("rival");
    assert_eq!(harness.program(rival).state(), ProgramState::ExitedWithError);

    let variables = harness.runtime.exports().variables();
    let gold = variables
        .iter()
        .find(|variable| variable.name == "gold")
        .expect("gold stays exported");
    assert_eq!(gold.owner_name, "bank");
}

#[test]
fn exports_are_revoked_when_the_owner_goes_away() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.script("shop", SHOP);
    let bank = harness.start("bank");
    assert!(!harness.runtime.exports().is_empty());

    harness.runtime.free_program(bank);
    assert!(harness.runtime.exports().is_empty());

    let shop = harness.start("shop");
    assert_eq!(harness.program(shop).state(), ProgramState::ExitedWithError);
    assert!(harness.output().is_empty());
}

#[test]
fn external_calls_check_the_argument_count() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.script(
        "greedy",
        r#"
.proc start
    push @back
    d_to_a
    push 1
    push 2
    push 2
    push #deposit
    call
back:
    print
.end
.import deposit args=1
"#,
    );
    harness.start("bank");
    let greedy = harness.start("greedy");
    assert_eq!(harness.program(greedy).state(), ProgramState::ExitedWithError);
    assert_eq!(
        harness.runtime.exports().fetch("gold"),
        Ok(&ExportedValue::Int(100))
    );
}

#[test]
fn hosts_can_invoke_imported_procedures() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.script(
        "listener",
        &format!(
            "
.proc start
{IDLE}
.end
.import ping args=0
"
        ),
    );
    let bank = harness.start("bank");
    let listener = harness.start("listener");
    let index = harness
        .runtime
        .find_procedure(listener, "ping")
        .expect("ping is imported");

    harness
        .runtime
        .execute_procedure(&harness.dispatcher, &mut harness.host, listener, index)
        .expect("import forwards to the exporter");
    assert_eq!(harness.output(), vec!["pong"]);
    assert_eq!(harness.program(listener).state(), ProgramState::Waiting);
    assert_eq!(harness.program(bank).state(), ProgramState::Waiting);
    assert!(harness.program(bank).control().is_empty());
}

#[test]
fn clearing_variables_leaves_procedures() {
    let mut harness = Harness::new();
    harness.script("bank", &bank());
    harness.start("bank");

    harness.runtime.exports_mut().clear_all_variables();
    assert!(harness.runtime.exports().variables().is_empty());
    assert!(harness.runtime.exports().procedure("deposit").is_some());
}
