//! A `state`-like effect implemented with once-resumed `Resumption`s,
//! counting down to 0 and reporting how many ticks ran.
//!
//! Every tick tail-resumes from inside its own yield handler. `resume_tail`
//! drives through a trampoline rather than recursing (see `DESIGN.md`), so
//! this million-deep chain runs in bounded native stack.

fn countdown(p: mprompt::Prompt<(), i64>, start: i64) -> i64 {
    let mut n = start;
    let mut ticks: i64 = 0;
    while n > 0 {
        n = p.yield_(move |r, current: i64| mprompt::resume_tail(r, current - 1), n);
        ticks += 1;
    }
    ticks
}

#[test]
fn single_shot_countdown_ticks_match_start_value() {
    mprompt::init_default().ok();
    const START: i64 = 1_000_000;
    let ticks = mprompt::prompt(countdown, START);
    assert_eq!(ticks, START);
}
