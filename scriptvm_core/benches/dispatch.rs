use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use scriptvm_core::{assemble, Burst, Dispatcher, Image, MemoryHost, Runtime};

const COUNTDOWN: &str = r#"
.proc start
    set_global
    push 1000
top:
    push @done
    push 0
    fetch_global
    if
    push 0
    fetch_global
    push 1
    sub
    push 0
    store_global
    push @top
    jump
done:
    exit
.end
"#;

const SLEEPER: &str = r#"
.proc start
idle:
    push 1000
    wait
    push @idle
    jump
.end
"#;

fn bench_countdown(c: &mut Criterion) {
    let bytes = assemble(COUNTDOWN).expect("assemble");
    let dispatcher = Dispatcher::new();
    let mut host = MemoryHost::new();
    c.bench_function("countdown_1000", |b| {
        b.iter(|| {
            let mut runtime = Runtime::default();
            runtime
                .run_image(&dispatcher, &mut host, "countdown", bytes.clone())
                .expect("runs");
            runtime.tick(&dispatcher, &mut host);
        })
    });
}

fn bench_idle_tick(c: &mut Criterion) {
    let bytes = assemble(SLEEPER).expect("assemble");
    let image = Arc::new(Image::parse("sleeper", bytes).expect("parse"));
    let dispatcher = Dispatcher::new();
    let mut host = MemoryHost::new();
    let mut runtime = Runtime::default();
    for _ in 0..100 {
        let id = runtime.insert(Arc::clone(&image));
        runtime.execute(&dispatcher, &mut host, id, Burst::Unlimited);
    }
    c.bench_function("tick_100_waiting", |b| {
        b.iter(|| runtime.tick(&dispatcher, &mut host))
    });
}

criterion_group!(benches, bench_countdown, bench_idle_tick);
criterion_main!(benches);
