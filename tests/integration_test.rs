use std::{cell::RefCell, rc::Rc};

use hsl::{
    interpreter::{ExecutionError, Interpreter},
    parser::Parser,
    resolver::Resolver,
    tokenizer::Tokenizer,
};

fn test_valid_program(source: &str, expected_output: &str) {
    let tokens = Tokenizer::new(source)
        .scan_tokens()
        .expect("Tokenize should work on valid program");
    let statements = Parser::new(&tokens)
        .parse()
        .expect("Parse should work on valid program");
    let output = Rc::new(RefCell::new(Vec::<u8>::new()));
    let mut interpreter = Interpreter::new(output.clone());
    Resolver::new(&mut interpreter)
        .resolve(&statements)
        .expect("Resolve should work on valid program");
    interpreter
        .interpret(&statements)
        .expect("Interpret should work on valid program");
    let output = String::from_utf8(output.take()).expect("Output should be valid UTF-8");
    assert_eq!(output, expected_output);
}

fn test_runtime_error(source: &str, expected_message: &str) {
    let tokens = Tokenizer::new(source)
        .scan_tokens()
        .expect("Tokenize should work on this program");
    let statements = Parser::new(&tokens)
        .parse()
        .expect("Parse should work on this program");
    let output = Rc::new(RefCell::new(Vec::<u8>::new()));
    let mut interpreter = Interpreter::new(output);
    Resolver::new(&mut interpreter)
        .resolve(&statements)
        .expect("Resolve should work on this program");
    let error = interpreter
        .interpret(&statements)
        .expect_err("Interpret should fail on this program");
    assert!(matches!(error, ExecutionError::Runtime(_)));
    assert_eq!(error.to_string(), expected_message);
}

#[test]
fn test_arithmetic_precedence() {
    test_valid_program("print 1 + 2 * 3;", "7\n");
    test_valid_program("print (1 + 2) * 3;", "9\n");
    test_valid_program("print 10 % 4 - 6 / 3;", "0\n");
}

#[test]
fn test_fib() {
    let source = r#"
    fun fib(n) {
        if (n <= 1) return n;
        return fib(n - 1) + fib(n - 2);
    }

    for (var i = 0; i < 10; i = i + 1) {
        print fib(i);
    }
    "#;
    let expected_output = "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_closure() {
    let source = r#"
    fun makeCounter() {
        var i = 0;
        fun count() {
            i = i + 1;
            return i;
        }
        return count;
    }

    var counter = makeCounter();
    print counter(); // 1
    print counter(); // 2
    "#;
    let expected_output = "1\n2\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_functions_cant_break_scope() {
    let source = r#"
    var a = "global";
    {
        fun showA() {
            print a;
        }
        showA(); // global
        var a = "block";
        showA(); // global
    }
    "#;
    let expected_output = "global\nglobal\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_class_fields_and_constructor() {
    let source = r#"
    class Counter {
        var count = 0;

        constructor(start) {
            this.count = start;
        }

        fun increment() {
            this.count = this.count + 1;
            return this.count;
        }
    }

    var counter = Counter(10);
    print counter.increment(); // 11
    print counter.increment(); // 12
    print counter.count;       // 12
    "#;
    let expected_output = "11\n12\n12\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_class_without_constructor_seeds_field_defaults() {
    let source = r#"
    class Point {
        var x = 1;
        var y = x() * 2;
    }

    fun x() {
        return 3;
    }

    var p = Point();
    print p.x;
    print p.y;
    "#;
    let expected_output = "1\n6\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_inheritance_and_super() {
    let source = r#"
    class Counter {
        var count = 0;

        fun increment() {
            this.count = this.count + 1;
            return this.count;
        }
    }

    class DoubleCounter extends Counter {
        fun increment() {
            super.increment();
            return super.increment();
        }
    }

    var counter = DoubleCounter();
    print counter.increment(); // 2
    print counter.increment(); // 4
    "#;
    let expected_output = "2\n4\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_switch_does_not_fall_through() {
    let source = r#"
    var x = 2;
    switch (x) {
        case 1: print "one";
        case 2: print "two";
        case 3: print "three";
        default: print "other";
    }
    "#;
    test_valid_program(source, "two\n");
}

#[test]
fn test_break_leaves_the_switch_not_the_enclosing_loop() {
    let source = r#"
    var n = 0;
    while (n < 3) {
        switch (n) {
            case 0: print "zero"; break;
            default: print "more";
        }
        n = n + 1;
    }
    print n;
    "#;
    test_valid_program(source, "zero\nmore\nmore\n3\n");
}

#[test]
fn test_break_at_top_level_of_a_switch() {
    let source = r#"
    switch (1) {
        case 1:
            print "before";
            break;
            print "after";
    }
    "#;
    test_valid_program(source, "before\n");
}

#[test]
fn test_switch_default_case() {
    let source = r#"
    switch (9) {
        case 1: print "one";
        default: print "other";
    }
    "#;
    test_valid_program(source, "other\n");
}

#[test]
fn test_switch_arrow_body() {
    let source = r#"
    fun announce(what) {
        print what;
    }
    switch ("b") {
        case "a" -> announce("first");
        case "b" -> announce("second");
    }
    "#;
    test_valid_program(source, "second\n");
}

#[test]
fn test_break_and_continue_in_every_loop_form() {
    let source = r#"
    var i = 0;
    while (true) {
        i = i + 1;
        if (i == 3) break;
    }
    print i; // 3

    for (var j = 0; j < 5; j = j + 1) {
        if (j % 2 == 0) continue;
        print j; // 1, 3
    }

    var k = 0;
    do {
        k = k + 1;
        if (k == 2) break;
    } while (k < 10);
    print k; // 2

    for (var value in [10, 20, 30]) {
        if (value == 20) continue;
        print value; // 10, 30
    }

    var seen = 0;
    repeat (5) {
        seen = seen + 1;
        if (seen == 2) break;
    }
    print seen; // 2
    "#;
    let expected_output = "3\n1\n3\n2\n10\n30\n2\n";
    test_valid_program(source, expected_output);
}

#[test]
fn test_for_increment_runs_after_continue() {
    let source = r#"
    for (var i = 0; i < 3; i = i + 1) {
        if (i == 1) continue;
        print i;
    }
    "#;
    test_valid_program(source, "0\n2\n");
}

#[test]
fn test_custom_prefix_and_infix_operators() {
    let source = r#"
    prefix fun negate(value) {
        return -value;
    }

    infix fun plus(left, right) {
        return left + right;
    }

    print negate 5;  // -5
    print 1 plus 2;  // 3
    "#;
    test_valid_program(source, "-5\n3\n");
}

#[test]
fn test_nan_is_equal_to_itself() {
    test_valid_program("var nan = 0 / 0; print nan == nan;", "true\n");
    test_valid_program("var nan = 0 / 0; print nan != nan;", "false\n");
}

#[test]
fn test_string_concatenation() {
    test_valid_program("print \"foo\" + \"bar\";", "foobar\n");
    test_valid_program("print \"count: \" + 3;", "count: 3\n");
    test_valid_program("print 'a' + 'b';", "ab\n");
}

#[test]
fn test_ranges_are_inclusive_both_directions() {
    test_valid_program("print 1..5;", "[1, 2, 3, 4, 5]\n");
    test_valid_program("print 5..1;", "[5, 4, 3, 2, 1]\n");
    test_valid_program("print 3..3;", "[3]\n");
}

#[test]
fn test_array_access_and_assignment() {
    let source = r#"
    var values = [1, 2, 3];
    values[1] = 20;
    print values[1];
    print values;
    "#;
    test_valid_program(source, "20\n[1, 20, 3]\n");
}

#[test]
fn test_array_comprehension() {
    test_valid_program("print [x * 2 for x in 1..3];", "[2, 4, 6]\n");
    test_valid_program("print [x for x in 1..4 if x % 2 == 0];", "[2, 4]\n");
    test_valid_program(
        "print [x for x in 1..4 if x % 2 == 0 else 0];",
        "[0, 2, 0, 4]\n",
    );
}

#[test]
fn test_elvis_and_ternary() {
    test_valid_program("print nil ?: 3;", "3\n");
    test_valid_program("print 2 ?: 3;", "2\n");
    test_valid_program("print false ?: 3;", "false\n");
    test_valid_program("print true ? 1 : 2;", "1\n");
    test_valid_program("print nil ? 1 : 2;", "2\n");
}

#[test]
fn test_bitwise_and_shift_operators() {
    test_valid_program("print 5 & 3;", "1\n");
    test_valid_program("print 5 | 2;", "7\n");
    test_valid_program("print 1 << 3;", "8\n");
    test_valid_program("print 8 >> 2;", "2\n");
    test_valid_program("print ~0;", "-1\n");
}

#[test]
fn test_closure_captures_the_shadowing_declaration() {
    let source = r#"
    var x = "outer";
    {
        var x = "inner";
        fun show() {
            print x;
        }
        show();
    }
    "#;
    test_valid_program(source, "inner\n");
}

#[test]
fn test_logical_operators() {
    test_valid_program("print false or true;", "true\n");
    test_valid_program("print true and false;", "false\n");
    test_valid_program("print true xor true;", "false\n");
    test_valid_program("print true xor false;", "true\n");
}

#[test]
fn test_compound_assignment_and_steps() {
    let source = r#"
    var x = 1;
    x += 2;
    print x; // 3
    x *= 3;
    print x; // 9
    x -= 4;
    x /= 5;
    print x; // 1
    print x++; // 1
    print x;   // 2
    print ++x; // 3
    print --x; // 2
    "#;
    test_valid_program(source, "3\n9\n1\n1\n2\n3\n2\n");
}

#[test]
fn test_for_each_over_string() {
    test_valid_program("for (var c in \"hi\") print c;", "h\ni\n");
}

#[test]
fn test_repeat_runs_body_count_times() {
    test_valid_program("repeat (3) print \"tick\";", "tick\ntick\ntick\n");
    test_valid_program("repeat (0) print \"never\";", "");
}

#[test]
fn test_shift_amount_is_range_checked() {
    test_runtime_error(
        "print 1 << 100;",
        "Shift amount must be between 0 and 63, got 100.",
    );
    test_runtime_error(
        "print 1 << -1;",
        "Shift amount must be between 0 and 63, got -1.",
    );
    test_runtime_error(
        "print 1 >> 64;",
        "Shift amount must be between 0 and 63, got 64.",
    );
}

#[test]
fn test_undefined_variable_is_a_runtime_error() {
    test_runtime_error("print missing;", "Undefined variable 'missing'.");
    test_runtime_error("missing = 1;", "Undefined variable 'missing'.");
}

#[test]
fn test_calling_a_non_callable_is_a_runtime_error() {
    test_runtime_error(
        "var x = 1; x();",
        "Can only call functions and classes, got 1.",
    );
}

#[test]
fn test_arity_is_checked() {
    test_runtime_error(
        "fun pair(a, b) { return a; } pair(1);",
        "Expected 2 arguments to 'pair' but got 1.",
    );
}

#[test]
fn test_array_index_out_of_bounds() {
    test_runtime_error(
        "var values = [1, 2]; print values[2];",
        "Index 2 is out of bounds for array 'values' of length 2.",
    );
}

#[test]
fn test_superclass_must_be_a_class() {
    test_runtime_error(
        "var NotAClass = 1; class B extends NotAClass {}",
        "Superclass must be a class, got 1.",
    );
}

#[test]
fn test_class_cannot_extend_itself() {
    // The superclass reference is evaluated before the class is defined.
    test_runtime_error("class A extends A {}", "Undefined variable 'A'.");
}

#[test]
fn test_repeat_count_must_be_a_whole_number() {
    test_runtime_error(
        "repeat (-1) print \"no\";",
        "Repeat count must be a non-negative whole number, got -1.",
    );
}
