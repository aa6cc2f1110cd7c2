//! Benchmarks for submission and dispatch overhead

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossbeam_channel::{bounded, Sender};
use errand::prelude::*;

struct Echo {
    done: Sender<u64>,
}

impl Task for Echo {
    type Params = u64;
    type Progress = ();
    type Output = u64;

    fn execute(&self, params: Vec<u64>, _cx: &TaskContext<'_, Self>) -> Result<u64, TaskError> {
        Ok(params.into_iter().sum())
    }

    fn on_task_success(&self, output: u64) {
        let _ = self.done.send(output);
    }
}

fn bench_execute_round_trip(c: &mut Criterion) {
    let cx = Context::with_dispatch_thread(Config::default()).unwrap();

    c.bench_function("execute_background", |b| {
        b.iter(|| {
            let (tx, rx) = bounded(1);
            cx.execute(PoolClass::Background, move || {
                let _ = tx.send(black_box(1u64));
            })
            .unwrap();
            rx.recv().unwrap()
        });
    });
}

fn bench_task_round_trip(c: &mut Criterion) {
    let cx = Context::with_dispatch_thread(Config::default()).unwrap();
    let tag = Tag::labeled("bench");

    c.bench_function("task_interactive", |b| {
        b.iter(|| {
            let (tx, rx) = bounded(1);
            let task = TaskHandle::with_params(Echo { done: tx }, vec![1, 2, 3]);
            cx.submit_interactive(&tag, &task).unwrap();
            black_box(rx.recv().unwrap())
        });
    });
}

fn bench_main_thread_post(c: &mut Criterion) {
    let cx = Context::with_dispatch_thread(Config::default()).unwrap();

    c.bench_function("post_on_main_thread", |b| {
        b.iter(|| {
            let (tx, rx) = bounded(1);
            cx.post_on_main_thread(MainJob::new(move || {
                let _ = tx.send(());
            }));
            rx.recv().unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_execute_round_trip,
    bench_task_round_trip,
    bench_main_thread_post
);
criterion_main!(benches);
