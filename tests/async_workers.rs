//! Many prompts, each round-robin resumed with a once-resumption, peak
//! memory bounded by active (not total) prompts.
//!
//! `Resumption` is `!Send`, so a pending worker's resumption is stashed in
//! a thread-local slot keyed by worker id rather than carried through the
//! `Send`-bound `R` the yield handler returns (same technique as
//! `n_queens.rs`). Scaled down from a much larger worker count / total
//! iteration count for the default run; the full-scale variant runs behind
//! `#[ignore]` (see `DESIGN.md`).

use std::cell::RefCell;
use std::collections::HashMap;

enum WorkerStep {
    Running,
    Finished(u64),
}

thread_local! {
    static PENDING: RefCell<HashMap<u64, mprompt::Resumption<u64, WorkerStep>>> =
        RefCell::new(HashMap::new());
}

fn worker_body(p: mprompt::Prompt<u64, WorkerStep>, id: u64, rounds: u64) -> WorkerStep {
    let mut total = id;
    for _ in 0..rounds {
        let delta: u64 = p.yield_(
            move |resumption, ()| {
                PENDING.with(|m| m.borrow_mut().insert(id, resumption));
                WorkerStep::Running
            },
            (),
        );
        total += delta;
    }
    WorkerStep::Finished(total)
}

fn run_round_robin(workers: u64, rounds: u64) {
    let mut totals = vec![0u64; workers as usize];

    for id in 0..workers {
        match mprompt::prompt(move |p, arg: u64| worker_body(p, arg, rounds), id) {
            WorkerStep::Running => {}
            WorkerStep::Finished(total) => totals[id as usize] = total,
        }
    }

    for round in 1..=rounds {
        for id in 0..workers {
            let pending = PENDING.with(|m| m.borrow_mut().remove(&id));
            if let Some(resumption) = pending {
                match mprompt::resume(resumption, round) {
                    WorkerStep::Running => {}
                    WorkerStep::Finished(total) => totals[id as usize] = total,
                }
            }
        }
    }

    let rounds_sum: u64 = (1..=rounds).sum();
    for id in 0..workers {
        assert_eq!(totals[id as usize], id + rounds_sum);
    }
}

#[test]
fn async_workers_round_robin_resume_bounded() {
    mprompt::init_default().ok();
    run_round_robin(50, 20);
}

#[test]
#[ignore = "stress test: runs the full-scale 10,000-worker round robin"]
fn async_workers_round_robin_resume_full_scale() {
    mprompt::init_default().ok();
    run_round_robin(10_000, 1_000);
}
