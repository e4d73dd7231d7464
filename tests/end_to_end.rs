// Whole-pipeline scenarios (spec.md SS8): source text in, in-memory
// invocation result out, with nothing short-circuited in between.

use stackc::lower::lower_program;
use stackc::reader::parse_program;
use stackc::runtime::run_in_memory;

fn run(body: &str) -> i64 {
    let tree = parse_program(body).unwrap();
    let table = lower_program(&tree).unwrap();
    run_in_memory(&table, 16).unwrap()
}

#[test]
fn scenario_a_addition() {
    assert_eq!(run("(return (+ 2 3))"), 5);
}

#[test]
fn scenario_b_subtraction_of_locals() {
    assert_eq!(run("(var x 10) (var y 4) (return (- x y))"), 6);
}

#[test]
fn scenario_c_string_first_byte() {
    assert_eq!(run("(var s \"hi\") (return (cast int (peek8 s)))"), 104);
}

#[test]
fn scenario_d_loop_accumulator() {
    assert_eq!(
        run(
            "(var n 0) (var i 1) \
             (loop (le i 10) (do (set n (+ n i)) (set i (+ i 1)))) \
             (return n)"
        ),
        55
    );
}

#[test]
fn scenario_e_recursive_factorial() {
    assert_eq!(
        run(
            "(def (fact int) ((n int)) (if (le n 1) 1 (* n (call fact (- n 1))))) \
             (return (call fact 5))"
        ),
        120
    );
}

#[cfg(target_os = "linux")]
#[test]
fn scenario_f_mmap_syscall_roundtrip() {
    assert_eq!(
        run(
            "(var buf (syscall 9 0 4096 3 0x22 -1 0)) \
             (poke8 (cast (ptr byte) buf) 'A'u8) \
             (return (cast int (peek8 (cast (ptr byte) buf))))"
        ),
        65
    );
}

#[test]
fn literal_round_trip() {
    for n in [0i64, 1, -1, 0x7FFFFFFF, 0x80000000, -0x80000000, 0x7FFFFFFFFFFFFFFF] {
        assert_eq!(run(&format!("(return {n})")), n, "round-trip failed for {n}");
    }
}
