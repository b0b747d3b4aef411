use vrm_compiler::{compile_to_text, CompileError, SemanticErrorKind};

fn expect_semantic(source: &str) -> (SemanticErrorKind, usize) {
    match compile_to_text(source) {
        Err(CompileError::Semantic { kind, line, .. }) => (kind, line),
        Err(other) => panic!("expected a semantic error, got: {other}"),
        Ok(_) => panic!("expected a semantic error, program compiled"),
    }
}

#[test]
fn lexical_errors_carry_a_position() {
    match compile_to_text("PROGRAM IS x IN\nx := 1 ? 2;\nEND") {
        Err(CompileError::Lexical(e)) => {
            assert_eq!(e.line, 2);
            assert_eq!(e.unexpected, '?');
        }
        other => panic!("expected a lexical error, got: {other:?}"),
    }
}

#[test]
fn parse_errors_carry_a_line() {
    match compile_to_text("PROGRAM IS x IN\nx := ;\nEND") {
        Err(CompileError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected a parse error, got: {other:?}"),
    }
}

#[test]
fn uninitialized_variables_are_reported_where_used() {
    let (kind, line) = expect_semantic("PROGRAM IS x, y IN\ny := x;\nEND");
    assert_eq!(kind, SemanticErrorKind::Uninitialized);
    assert_eq!(line, 2);
}

#[test]
fn unknown_procedures_are_reported() {
    let (kind, _) = expect_semantic("PROGRAM IS x IN\nnope(x);\nEND");
    assert_eq!(kind, SemanticErrorKind::UndeclaredProcedure);
}

#[test]
fn out_of_bounds_constant_indices_are_reported() {
    let (kind, line) = expect_semantic("PROGRAM IS t[10] IN\nt[10] := 1;\nEND");
    assert_eq!(kind, SemanticErrorKind::IndexOutOfBounds);
    assert_eq!(line, 2);
}

#[test]
fn passing_a_scalar_where_an_array_is_expected_is_reported() {
    let (kind, _) = expect_semantic(
        "PROCEDURE fill(T t) IS IN t[0] := 1; END\nPROGRAM IS x IN\nfill(x);\nEND",
    );
    assert_eq!(kind, SemanticErrorKind::ArgumentKindMismatch);
}

#[test]
fn error_messages_name_the_offender() {
    let err = compile_to_text("PROGRAM IS x IN x := mystery; END").unwrap_err();
    assert!(err.to_string().contains("mystery"));
}
