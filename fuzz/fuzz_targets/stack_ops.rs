#![no_main]

use arbitrary::Arbitrary;
use hazard_epoch::LockFreeStack;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Push(u32),
    Pop,
    Sweep,
}

// Replays an arbitrary operation sequence against a model Vec; any
// divergence means the stack lost, duplicated, or corrupted a value.
fuzz_target!(|ops: Vec<Op>| {
    let stack = LockFreeStack::new().unwrap();
    let mut model = Vec::new();

    for op in ops {
        match op {
            Op::Push(value) => {
                stack.push(value);
                model.push(value);
            }
            Op::Pop => {
                assert_eq!(stack.pop().unwrap(), model.pop());
            }
            Op::Sweep => {
                stack.domain().sweep().unwrap();
            }
        }
    }

    while let Some(value) = stack.pop().unwrap() {
        assert_eq!(Some(value), model.pop());
    }
    assert!(model.is_empty());
});
