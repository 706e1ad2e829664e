//! A panic raised inside a prompt and not caught there is re-raised at the
//! resume site, and the inner frame's destructors ran exactly once before
//! that happens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct DropProbe(Arc<AtomicUsize>);

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn panics_inside_prompt(_p: mprompt::Prompt<Arc<AtomicUsize>, ()>, probe: Arc<AtomicUsize>) {
    let _guard = DropProbe(probe);
    panic!("boom: exception raised inside a prompt");
}

#[test]
fn exception_crosses_prompt_boundary_and_runs_destructor_once() {
    mprompt::init_default().ok();
    let drops = Arc::new(AtomicUsize::new(0));
    let probe = drops.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        mprompt::prompt(panics_inside_prompt, probe)
    }));

    assert!(result.is_err(), "panic inside the prompt must surface at the call site");
    assert_eq!(drops.load(Ordering::SeqCst), 1, "the inner destructor must run exactly once");
}
