// Integration tests for Lexer + Parser + Compiler + Evaluator
//
// These tests run complete filters through the public API and check the
// observable behaviour of the engine end to end.

use jqlite::{jvalue, CompileError, CompiledFilter, JValue, RuntimeError};

fn run(filter: &str, input: JValue) -> Result<Vec<JValue>, RuntimeError> {
    CompiledFilter::compile(filter).unwrap().run(input).collect()
}

fn run_ok(filter: &str, input: JValue) -> Vec<JValue> {
    run(filter, input).unwrap()
}

fn run_json(filter: &str, json: &str) -> Vec<JValue> {
    run_ok(filter, JValue::from_json_str(json).unwrap())
}

#[test]
fn test_identity_round_trip() {
    let json = r#"{"a":[1,2.5,"x",null,true,{"b":{}}],"c":[]}"#;
    let outputs = run_json(".", json);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].to_json_string().unwrap(), json);
}

#[test]
fn test_comma_is_additive() {
    let input = jvalue!([1, 2, 3]);
    let a = run_ok(".[]", input.clone());
    let b = run_ok(".[0], .[1]", input.clone());
    let both = run_ok("(.[]), (.[0], .[1])", input);
    assert_eq!(both.len(), a.len() + b.len());
    assert_eq!(both, a.into_iter().chain(b).collect::<Vec<_>>());
}

#[test]
fn test_pipe_is_flat_map() {
    assert_eq!(
        run_ok(".[] | (., . * 10)", jvalue!([1, 2])),
        vec![jvalue!(1), jvalue!(10), jvalue!(2), jvalue!(20)]
    );
}

#[test]
fn test_pipe_is_lazy() {
    // Only as much of the infinite generator runs as the caller pulls.
    let filter = CompiledFilter::compile("range(infinite) | . * 2").unwrap();
    let first: Vec<JValue> = filter.run(JValue::Null).take(3).map(|r| r.unwrap()).collect();
    assert_eq!(first, vec![jvalue!(0), jvalue!(2), jvalue!(4)]);

    // An error later in the sequence is never reached.
    let filter = CompiledFilter::compile("1, error(\"late\")").unwrap();
    let mut outputs = filter.run(JValue::Null);
    assert_eq!(outputs.next().unwrap().unwrap(), jvalue!(1));
}

#[test]
fn test_select() {
    assert_eq!(run_ok(".[] | select(. > 2)", jvalue!([1, 2, 3, 4])), vec![jvalue!(3), jvalue!(4)]);
}

#[test]
fn test_try_catch_division_by_zero() {
    assert_eq!(run_ok("try (1/0) catch \"err\"", JValue::Null), vec![jvalue!("err")]);

    let filter = CompiledFilter::compile("1/0").unwrap();
    let mut outputs = filter.run(JValue::Null);
    assert!(outputs.next().unwrap().is_err());
    assert!(outputs.next().is_none());
}

#[test]
fn test_error_ends_the_sequence_after_partial_outputs() {
    let filter = CompiledFilter::compile(".[] | 10 / .").unwrap();
    let outputs: Vec<_> = filter.run(jvalue!([2, 0, 5])).collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].as_ref().unwrap(), &jvalue!(5));
    assert!(outputs[1].is_err());
}

#[test]
fn test_try_only_catches_its_branch() {
    assert_eq!(
        run_ok("[.[] | try (if . == 2 then error(\"x\") else . end) catch \"caught\"]", jvalue!([1, 2, 3])),
        vec![jvalue!([1, "caught", 3])]
    );
    assert_eq!(run_ok("[.[] | (1 / .)?]", jvalue!([1, 0, 2])), vec![jvalue!([1, 0.5])]);
}

#[test]
fn test_empty() {
    assert!(run_ok("empty", jvalue!({"a": 1})).is_empty());
    assert_eq!(run_ok("[empty]", JValue::Null), vec![jvalue!([])]);
}

#[test]
fn test_compile_errors_precede_evaluation() {
    assert!(CompiledFilter::compile(". @@@ .").is_err());
    match CompiledFilter::compile("[1,2,3") {
        Err(CompileError::Syntax(e)) => assert!(e.to_string().contains("unclosed '['"), "{}", e),
        other => panic!("expected a syntax error, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        CompiledFilter::compile("$nope"),
        Err(CompileError::UndefinedVariable(_))
    ));
}

#[test]
fn test_reduce_and_foreach() {
    assert_eq!(run_ok("reduce .[] as $x (0; . + $x)", jvalue!([1, 2, 3])), vec![jvalue!(6)]);
    assert_eq!(
        run_ok("[foreach .[] as $x (0; . + $x)]", jvalue!([1, 2, 3])),
        vec![jvalue!([1, 3, 6])]
    );
    assert_eq!(
        run_ok("[foreach .[] as $x (0; . + $x; [$x, .])]", jvalue!([1, 2])),
        vec![jvalue!([[1, 1], [2, 3]])]
    );
}

#[test]
fn test_total_order() {
    let ordered = ["null", "false", "true", "0", "\"a\"", "[]", "{}"];
    for (i, lhs) in ordered.iter().enumerate() {
        for (j, rhs) in ordered.iter().enumerate() {
            let filter = format!("{} < {}", lhs, rhs);
            assert_eq!(run_ok(&filter, JValue::Null), vec![JValue::Bool(i < j)], "{}", filter);
        }
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let source = "[.[] | {k: ., v: (. * 2)}] | group_by(.v % 3) | map(length)";
    let input = jvalue!([1, 2, 3, 4, 5, 6, 7]);
    let first = run_ok(source, input.clone());
    let second = run_ok(source, input);
    assert_eq!(first, second);
}

#[test]
fn test_user_functions_and_closures() {
    assert_eq!(
        run_ok("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; [.[] | fac]", jvalue!([1, 5])),
        vec![jvalue!([1, 120])]
    );
    assert_eq!(
        run_ok("def apply(f; $n): [range($n) | f]; apply(. * .; 4)", JValue::Null),
        vec![jvalue!([0, 1, 4, 9])]
    );
    assert_eq!(
        run_ok("1 as $x | def f: $x; 2 as $x | [f, $x]", JValue::Null),
        vec![jvalue!([1, 2])]
    );
    assert_eq!(run_ok("def length: 42; [1] | length", JValue::Null), vec![jvalue!(42)]);
}

#[test]
fn test_destructuring() {
    assert_eq!(
        run_ok(". as [$a, {b: $c}] | [$a, $c]", jvalue!([1, {"b": 2}])),
        vec![jvalue!([1, 2])]
    );
    assert_eq!(
        run_ok(". as {$a, \"k\": [$b]} | $a + $b", jvalue!({"a": 1, "k": [2]})),
        vec![jvalue!(3)]
    );
}

#[test]
fn test_label_break() {
    assert_eq!(
        run_ok("[label $out | .[] | if . > 2 then ., break $out else . end]", jvalue!([1, 2, 3, 4])),
        vec![jvalue!([1, 2, 3])]
    );
}

#[test]
fn test_assignment_family() {
    let input = jvalue!({"a": [1, 2], "b": null});
    assert_eq!(run_ok(".a[] |= . + 1", input.clone()), vec![jvalue!({"a": [2, 3], "b": null})]);
    assert_eq!(run_ok(".b = .a", input.clone()), vec![jvalue!({"a": [1, 2], "b": [1, 2]})]);
    assert_eq!(run_ok(".a[0] += 10", input.clone()), vec![jvalue!({"a": [11, 2], "b": null})]);
    assert_eq!(run_ok(".b //= 5", input.clone()), vec![jvalue!({"a": [1, 2], "b": 5})]);
    assert_eq!(run_ok("del(.a[0])", input.clone()), vec![jvalue!({"a": [2], "b": null})]);
    assert_eq!(run_ok("[path(..)]", jvalue!({"a": [1]})), vec![jvalue!([[], ["a"], ["a", 0]])]);
    assert_eq!(
        run_ok("(.[] | select(. == 2)) |= empty", jvalue!([1, 2, 3])),
        vec![jvalue!([1, 3])]
    );
}

#[test]
fn test_string_features() {
    assert_eq!(run_ok("\"x=\\(.x), y=\\(.y)\"", jvalue!({"x": 1, "y": "a"})), vec![jvalue!("x=1, y=a")]);
    assert_eq!(run_ok("@base64 \"v:\\(.)\"", jvalue!("hi")), vec![jvalue!("v:aGk=")]);
    assert_eq!(run_ok("@csv", jvalue!([1, "a"])), vec![jvalue!("1,\"a\"")]);
    assert_eq!(run_ok(".[2:4]", jvalue!("abcdef")), vec![jvalue!("cd")]);
    assert_eq!(run_ok("$__loc__", JValue::Null), vec![jvalue!({"file": "<stdin>", "line": 1})]);
}

#[test]
fn test_optional_and_alternative() {
    assert_eq!(run_ok("[.[] | .a?]", jvalue!([1, {"a": 2}])), vec![jvalue!([2])]);
    assert_eq!(run_ok(".a // \"d\"", jvalue!({"a": false})), vec![jvalue!("d")]);
    assert_eq!(run_ok("(.a, .b) // 3", jvalue!({"a": null, "b": 1})), vec![jvalue!(1)]);
    assert_eq!(run_ok("[.. | numbers]", jvalue!([1, [2, {"a": 3}]])), vec![jvalue!([1, 2, 3])]);
}

#[test]
fn test_deep_recursion_does_not_overflow() {
    assert_eq!(
        run_ok("[limit(3; repeat(. + 1))] | last", jvalue!(0)),
        vec![jvalue!(2)]
    );
    assert_eq!(run_ok("reduce range(100000) as $i (0; . + 1)", JValue::Null), vec![jvalue!(100000)]);
    assert_eq!(run_ok("last(range(200000))", JValue::Null), vec![jvalue!(199999)]);
}

#[test]
fn test_deep_user_recursion() {
    assert_eq!(
        run_ok("def f: if . < 30000 then . + 1 | f else . end; f", jvalue!(0)),
        vec![jvalue!(30000)]
    );
    assert_eq!(
        run_ok("def f: ., (. + 1 | f); [limit(3; f)]", jvalue!(0)),
        vec![jvalue!([0, 1, 2])]
    );
}

#[test]
fn test_runaway_recursion_is_an_error() {
    match run("def f: f; f", JValue::Null) {
        Err(e) => assert_eq!(e.to_string(), "f/0 exceeded the maximum call depth of 100000"),
        Ok(v) => panic!("expected an error, got {:?}", v),
    }
    assert_eq!(
        run_ok("def f: 1 + f; try f catch \"caught\"", JValue::Null),
        vec![jvalue!("caught")]
    );
}

#[test]
fn test_foreach_is_lazy() {
    assert_eq!(
        run_ok("first(foreach (1, 2) as $x (0; range(infinite)))", JValue::Null),
        vec![jvalue!(0)]
    );
    assert_eq!(
        run_ok("[limit(3; foreach (1, 2) as $x (0; range(1e7)))]", JValue::Null),
        vec![jvalue!([0, 1, 2])]
    );
    // Every update output is emitted; the last one carries over.
    assert_eq!(
        run_ok("[foreach (1, 2) as $x (1; . + $x, . * 10)]", JValue::Null),
        vec![jvalue!([2, 10, 12, 100])]
    );
    assert_eq!(
        run_ok("[foreach (1, 2, 3) as $x (0; if $x == 2 then empty else . + $x end; [$x, .])]", JValue::Null),
        vec![jvalue!([[1, 1], [3, 4]])]
    );
}
