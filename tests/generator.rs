//! A generator of 10 values driven with `resume_tail`.
//!
//! Each `yield_` call threads the accumulator through as the resume
//! argument itself, rather than handing the resumption back out to an
//! external driver: `Resumption`/`MResumption` are deliberately `!Send`
//! (see `resumption.rs`), and `yield_`'s own handler return value `R` must
//! be `Send`, so a handler can drive its resumption inline but can never
//! smuggle it out inside `R`.

fn generate_ten(p: mprompt::Prompt<(), Vec<i32>>, _: ()) -> Vec<i32> {
    let mut acc: Vec<i32> = Vec::new();
    for i in 0..10 {
        let collected = std::mem::take(&mut acc);
        acc = p.yield_(
            move |r, v: i32| {
                let mut collected = collected;
                collected.push(v);
                mprompt::resume_tail(r, collected)
            },
            i,
        );
    }
    acc
}

#[test]
fn generator_of_ten_values_observes_exact_sequence() {
    mprompt::init_default().ok();
    let observed = mprompt::prompt(generate_ten, ());
    assert_eq!(observed, (0..10).collect::<Vec<_>>());
}
