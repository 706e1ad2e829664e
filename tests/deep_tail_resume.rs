//! A reader-like effect that tail-resumes many times in a row and completes.
//!
//! `resume_tail` drives through a trampoline rather than recursing into a
//! fresh `resume_raw`/dispatch pair (see `DESIGN.md`), so this runs the full
//! ten-million-deep chain in bounded native stack.

fn reader(p: mprompt::Prompt<(), i64>, total: i64) -> i64 {
    let mut i: i64 = 0;
    let mut sum: i64 = 0;
    while i < total {
        let v = p.yield_(move |r, idx: i64| mprompt::resume_tail(r, idx), i);
        sum += v;
        i += 1;
    }
    sum
}

#[test]
fn deep_tail_resume_reads_every_value_and_completes() {
    mprompt::init_default().ok();
    const TOTAL: i64 = 10_000_000;
    let sum = mprompt::prompt(reader, TOTAL);
    assert_eq!(sum, TOTAL * (TOTAL - 1) / 2);
}
