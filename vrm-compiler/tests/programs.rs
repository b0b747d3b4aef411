use vrm_compiler::vm::{self, Machine};
use vrm_compiler::{compile_to_code, compile_to_program};

fn run(source: &str, input: &[u64]) -> Vec<u64> {
    let code = compile_to_code(source).expect("program should compile");
    vm::run(&code, input).expect("program should run to HALT")
}

// ── Straight-line arithmetic ─────────────────────────────────────────────

#[test]
fn three_plus_four_writes_seven() {
    assert_eq!(run("PROGRAM IS a IN a := 3 + 4; WRITE a; END", &[]), vec![7]);
}

#[test]
fn subtraction_truncates_at_zero() {
    assert_eq!(
        run(
            "PROGRAM IS a, b IN READ a; READ b; a := a - b; WRITE a; END",
            &[3, 10]
        ),
        vec![0]
    );
}

#[test]
fn general_multiplication() {
    let src = "PROGRAM IS a, b, c IN READ a; READ b; c := a * b; WRITE c; END";
    assert_eq!(run(src, &[13, 11]), vec![143]);
    assert_eq!(run(src, &[1, 999]), vec![999]);
    assert_eq!(run(src, &[0, 999]), vec![0]);
    assert_eq!(run(src, &[999, 0]), vec![0]);
}

#[test]
fn division_and_modulo() {
    let src = "PROGRAM IS a, b, q, r IN \
               READ a; READ b; q := a / b; r := a % b; \
               WRITE q; WRITE r; END";
    assert_eq!(run(src, &[17, 5]), vec![3, 2]);
    assert_eq!(run(src, &[5, 17]), vec![0, 5]);
    assert_eq!(run(src, &[18, 3]), vec![6, 0]);
    // division by zero yields zero for both quotient and remainder
    assert_eq!(run(src, &[7, 0]), vec![0, 0]);
}

#[test]
fn power_of_two_division_and_modulo() {
    let src = "PROGRAM IS a, q, r IN READ a; q := a / 4; r := a % 4; WRITE q; WRITE r; END";
    assert_eq!(run(src, &[22]), vec![5, 2]);
    assert_eq!(run(src, &[3]), vec![0, 3]);
}

#[test]
fn modulo_by_one_is_zero() {
    assert_eq!(
        run("PROGRAM IS a, r IN READ a; r := a % 1; WRITE r; END", &[9]),
        vec![0]
    );
}

// ── Control flow ─────────────────────────────────────────────────────────

#[test]
fn if_else_picks_the_larger_number() {
    let src = "PROGRAM IS a, b IN \
               READ a; READ b; \
               IF a > b THEN WRITE a; ELSE WRITE b; ENDIF END";
    assert_eq!(run(src, &[7, 3]), vec![7]);
    assert_eq!(run(src, &[3, 7]), vec![7]);
    assert_eq!(run(src, &[5, 5]), vec![5]);
}

#[test]
fn if_without_else_falls_through() {
    let src = "PROGRAM IS a IN READ a; IF a = 0 THEN a := 100; ENDIF WRITE a; END";
    assert_eq!(run(src, &[0]), vec![100]);
    assert_eq!(run(src, &[42]), vec![42]);
}

#[test]
fn while_loop_sums_an_arithmetic_series() {
    let src = "PROGRAM IS i, sum IN \
               i := 0; sum := 0; \
               WHILE 5 >= i DO sum := sum + i; i := i + 1; ENDWHILE \
               WRITE sum; END";
    assert_eq!(run(src, &[]), vec![15]);
}

#[test]
fn repeat_loop_counts_up() {
    let src = "PROGRAM IS x IN \
               x := 0; \
               REPEAT x := x + 1; UNTIL x = 3; \
               WRITE x; END";
    assert_eq!(run(src, &[]), vec![3]);
}

#[test]
fn nested_loops_multiply_by_repeated_addition() {
    let src = "PROGRAM IS i, j, acc IN \
               acc := 0; i := 0; \
               WHILE 3 > i DO \
                 j := 0; \
                 WHILE 4 > j DO acc := acc + 1; j := j + 1; ENDWHILE \
                 i := i + 1; \
               ENDWHILE \
               WRITE acc; END";
    assert_eq!(run(src, &[]), vec![12]);
}

#[test]
fn all_comparators_including_normalized_ones() {
    let src = "PROGRAM IS a, b IN \
               READ a; READ b; \
               IF a = b THEN WRITE 1; ENDIF \
               IF a != b THEN WRITE 2; ENDIF \
               IF a > b THEN WRITE 3; ENDIF \
               IF a >= b THEN WRITE 4; ENDIF \
               IF a < b THEN WRITE 5; ENDIF \
               IF a <= b THEN WRITE 6; ENDIF \
               END";
    assert_eq!(run(src, &[4, 4]), vec![1, 4, 6]);
    assert_eq!(run(src, &[9, 2]), vec![2, 3, 4]);
    assert_eq!(run(src, &[2, 9]), vec![2, 5, 6]);
}

// ── Arrays ───────────────────────────────────────────────────────────────

#[test]
fn constant_and_variable_indexing_agree() {
    let src = "PROGRAM IS t[4], i, sum IN \
               t[0] := 3; t[1] := 5; t[2] := 7; t[3] := 11; \
               i := 0; sum := 0; \
               WHILE 4 > i DO sum := sum + t[i]; i := i + 1; ENDWHILE \
               WRITE sum; WRITE t[2]; END";
    assert_eq!(run(src, &[]), vec![26, 7]);
}

#[test]
fn reading_into_an_indexed_cell() {
    let src = "PROGRAM IS t[3], i IN \
               i := 0; \
               WHILE 3 > i DO READ t[i]; i := i + 1; ENDWHILE \
               WRITE t[0]; WRITE t[1]; WRITE t[2]; END";
    assert_eq!(run(src, &[10, 20, 30]), vec![10, 20, 30]);
}

// ── Procedures ───────────────────────────────────────────────────────────

#[test]
fn by_reference_increment_persists_to_the_home_cell() {
    let source = "PROCEDURE p(a) IS IN a := a + 1; END \
                  PROGRAM IS x IN x := 5; p(x); WRITE x; END";
    let program = compile_to_program(source).unwrap();
    let code = vrm_compiler::backend::generate(&program);
    let mut machine = Machine::new(&[]);
    machine.run(&code).expect("program should run to HALT");
    assert_eq!(machine.output, vec![6]);
    // the new value lives in x's home memory cell, not just a register
    let x = program.main.symbols.expect("x").mem_start;
    assert_eq!(machine.cell(x), 6);
}

#[test]
fn procedures_forward_parameters_to_other_procedures() {
    let src = "PROCEDURE double(a) IS IN a := a + a; END \
               PROCEDURE quad(a) IS IN double(a); double(a); END \
               PROGRAM IS x IN x := 3; quad(x); WRITE x; END";
    assert_eq!(run(src, &[]), vec![12]);
}

#[test]
fn array_parameters_are_shared_with_the_caller() {
    let src = "PROCEDURE swap(T t, i, j) IS tmp IN \
                 tmp := t[i]; t[i] := t[j]; t[j] := tmp; \
               END \
               PROGRAM IS d[2], a, b IN \
                 d[0] := 10; d[1] := 20; a := 0; b := 1; \
                 swap(d, a, b); \
                 WRITE d[0]; WRITE d[1]; \
               END";
    assert_eq!(run(src, &[]), vec![20, 10]);
}

#[test]
fn a_procedure_can_be_called_in_a_loop() {
    let src = "PROCEDURE bump(a) IS IN a := a + 2; END \
               PROGRAM IS x, i IN \
                 x := 0; i := 0; \
                 WHILE 5 > i DO bump(x); i := i + 1; ENDWHILE \
                 WRITE x; END";
    assert_eq!(run(src, &[]), vec![10]);
}

#[test]
fn gcd_of_two_inputs() {
    let src = "PROGRAM IS a, b, t IN \
               READ a; READ b; \
               WHILE b > 0 DO t := a % b; a := b; b := t; ENDWHILE \
               WRITE a; END";
    assert_eq!(run(src, &[48, 36]), vec![12]);
    assert_eq!(run(src, &[17, 5]), vec![1]);
}
