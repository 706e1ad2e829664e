//! N-queens via a `choose`/`fail` effect built on multi-shot resumptions,
//! collecting all solutions for N=8.
//!
//! `MResumption` is `!Send` and `myield`'s handler return type must be
//! `Send`, so a pending choice point's resumption cannot be carried inside
//! the yielded value itself. Instead each yield stashes its resumption in a
//! thread-local slot and returns a plain `QStep::Need` marker; the driver
//! pulls it back out, replays it once per candidate column via
//! `mresume_dup`, and recurses into whatever each replay produces.

use std::cell::RefCell;

enum QStep {
    Need,
    Solved(Vec<u32>),
    Fail,
}

thread_local! {
    static PENDING: RefCell<Option<(u32, mprompt::MResumption<u32, QStep>)>> = RefCell::new(None);
}

fn is_safe(placed: &[u32], candidate: u32) -> bool {
    let row = placed.len() as i64;
    let candidate = candidate as i64;
    placed.iter().enumerate().all(|(r, &c)| {
        let r = r as i64;
        let c = c as i64;
        c != candidate && (row - r).abs() != (candidate - c).abs()
    })
}

fn queens_body(p: mprompt::Prompt<u32, QStep>, n: u32) -> QStep {
    let mut placed: Vec<u32> = Vec::new();
    loop {
        if placed.len() as u32 == n {
            return QStep::Solved(placed);
        }
        let candidate: u32 = p.myield(
            move |resumption, board_size: u32| {
                PENDING.with(|slot| *slot.borrow_mut() = Some((board_size, resumption)));
                QStep::Need
            },
            n,
        );
        if is_safe(&placed, candidate) {
            placed.push(candidate);
        } else {
            return QStep::Fail;
        }
    }
}

fn explore(step: QStep, solutions: &mut Vec<Vec<u32>>) {
    match step {
        QStep::Solved(cols) => solutions.push(cols),
        QStep::Fail => {}
        QStep::Need => {
            let (n, resumption) = PENDING
                .with(|slot| slot.borrow_mut().take())
                .expect("a Need step always stashes exactly one pending choice");
            for candidate in 0..n {
                let replay = mprompt::mresume_dup(&resumption);
                let next = mprompt::mresume(replay, candidate);
                explore(next, solutions);
            }
            // `resumption` drops here as the last live handle, but
            // `resume_count` is `n`, not 0: every `mresume` above ran on a
            // shared clone minted by `mresume_dup`, and all clones bump the
            // one `resume_count` field inside the shared `MState`. So this
            // drop takes the non-unwinding `destroy_prompt` path, not the
            // abandon path.
        }
    }
}

#[test]
fn n_queens_multi_shot_finds_92_solutions_for_eight() {
    mprompt::init_default().ok();
    let first = mprompt::prompt(queens_body, 8u32);
    let mut solutions = Vec::new();
    explore(first, &mut solutions);
    assert_eq!(solutions.len(), 92);
    for solution in &solutions {
        assert_eq!(solution.len(), 8);
    }
}
