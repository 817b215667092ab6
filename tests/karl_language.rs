use karl::{Context, EvalSettings, KnowledgeBase, KnowledgeBaseConfig, KnowledgeUpdateSettings, Record, RecordKind};

fn eval(ctx: &Context, text: &str) -> Record {
    let expr = ctx.compile(text).unwrap();
    ctx.evaluate(&expr, &KnowledgeUpdateSettings::default()).unwrap()
}

#[test]
fn test_sequence_runs_both_sides_and_yields_right() {
    let ctx = Context::new();
    let result = eval(&ctx, "(x=1);>(y=2);>x");
    assert_eq!(result.to_integer(), 1);
    assert_eq!(ctx.get("x").to_integer(), 1);
    assert_eq!(ctx.get("y").to_integer(), 2);
}

#[test]
fn test_both_operator_yields_greater_side() {
    let ctx = Context::new();
    assert_eq!(eval(&ctx, "(a = 3) ; (b = 7)").to_integer(), 7);
    assert_eq!(eval(&ctx, "b ; a").to_integer(), 7);
    assert_eq!(ctx.get("a").to_integer(), 3);
}

#[test]
fn test_implies_only_runs_right_side_when_true() {
    let ctx = Context::new();
    let result = eval(&ctx, "0 => (x=5)");
    assert_eq!(result.to_integer(), 0);
    assert!(!ctx.get("x").is_created());

    eval(&ctx, "1 => (x=5)");
    assert_eq!(ctx.get("x").to_integer(), 5);

    ctx.set("ready", 0, &KnowledgeUpdateSettings::default()).unwrap();
    eval(&ctx, "ready => (y = 1)");
    assert!(!ctx.exists("y"));
}

#[test]
fn test_literals_round_trip_through_source() {
    let ctx = Context::new();
    let values = vec![
        Record::integer(42),
        Record::integer(-17),
        Record::integer(i64::MIN),
        Record::double(2.5),
        Record::double(-1e300),
        Record::double(f64::INFINITY),
        Record::string("quote \" and \\ and\nnewline"),
        Record::from(vec![1i64, -2, 3]),
        Record::from(Vec::<i64>::new()),
        Record::from(vec![0.5, -2.0]),
        Record::from(Vec::<f64>::new()),
    ];
    for value in values {
        let source = value.to_karl_source();
        let back = eval(&ctx, &source);
        assert_eq!(back.kind(), value.kind(), "kind of {source}");
        assert!(back.equals(&value), "{source} evaluated to {back}");
    }
}

#[test]
fn test_arithmetic_promotes_and_wraps() {
    let ctx = Context::new();
    assert_eq!(eval(&ctx, "7 / 2").to_integer(), 3);
    assert_eq!(eval(&ctx, "7 / 2.0").kind(), RecordKind::Double);
    assert_eq!(eval(&ctx, "7 % 0").to_integer(), 0);
    assert_eq!(eval(&ctx, "-(3 - 5) * 2").to_integer(), 4);
    assert_eq!(eval(&ctx, "!0 + !5").to_integer(), 1);
    assert_eq!(eval(&ctx, "\"10\" + 5").to_integer(), 15);
}

#[test]
fn test_comparisons_and_logic() {
    let ctx = Context::new();
    assert!(eval(&ctx, "1 < 2 && 2 <= 2 && 3 > 2 && 3 >= 3 && 1 != 2 && 2 == 2.0").is_true());
    assert!(eval(&ctx, "\"abc\" < \"abd\"").is_true());
    assert!(eval(&ctx, "0 || 0").is_false());
    // short-circuit: the assignment never runs
    eval(&ctx, "0 && (z = 1)");
    eval(&ctx, "1 || (z = 1)");
    assert!(!ctx.exists("z"));
}

#[test]
fn test_compound_assignment_and_increments() {
    let ctx = Context::new();
    eval(&ctx, "n = 10 ;> n += 5 ;> n -= 3 ;> n *= 2 ;> n /= 4");
    assert_eq!(ctx.get("n").to_integer(), 6);

    assert_eq!(eval(&ctx, "++n").to_integer(), 7);
    assert_eq!(eval(&ctx, "--n ;> --n").to_integer(), 5);

    eval(&ctx, "greeting = \"hello\" ;> greeting += \" world\"");
    assert_eq!(ctx.get("greeting").to_string(), "hello world");
}

#[test]
fn test_array_indexing() {
    let ctx = Context::new();
    eval(&ctx, "arr = [1, 2, 3] ;> arr[1] = 20 ;> arr[4] += 5");
    assert_eq!(ctx.get("arr").to_integers(), vec![1, 20, 3, 0, 5]);
    assert_eq!(eval(&ctx, "arr[1] + arr[9]").to_integer(), 20);
    assert!(!eval(&ctx, "arr[-1]").is_created());

    eval(&ctx, "arr[0] = 1.5");
    assert_eq!(ctx.get("arr").kind(), RecordKind::DoubleArray);
}

#[test]
fn test_indexed_assignment_evaluates_index_once() {
    let ctx = Context::new();
    eval(&ctx, "arr = [10, 20, 30, 40] ;> i = 0 ;> arr[++i] += 5");
    assert_eq!(ctx.get("i").to_integer(), 1);
    assert_eq!(ctx.get("arr").to_integers(), vec![10, 25, 30, 40]);

    assert_eq!(eval(&ctx, "++arr[++i]").to_integer(), 31);
    assert_eq!(ctx.get("i").to_integer(), 2);

    eval(&ctx, "arr[++i] = 7");
    assert_eq!(ctx.get("i").to_integer(), 3);
    assert_eq!(ctx.get("arr").to_integers(), vec![10, 25, 31, 7]);
}

#[test]
fn test_oversized_index_is_dropped() {
    let ctx = Context::new();
    let result = eval(&ctx, "a[4611686018427387904] = 1 ;> b = 2");
    assert_eq!(result.to_integer(), 2);
    assert!(!ctx.exists("a"));
    assert!(!eval(&ctx, "a[4611686018427387904] += 1").is_created());

    let small = Context::with_config(&KnowledgeBaseConfig {
        max_array_size: 4,
        ..Default::default()
    });
    assert_eq!(eval(&small, "arr[3] = 9").to_integer(), 9);
    assert!(!eval(&small, "arr[4] = 9").is_created());
    assert_eq!(small.get("arr").to_integers(), vec![0, 0, 0, 9]);
}

#[test]
fn test_array_truthiness_requires_every_element() {
    let ctx = Context::new();
    assert!(eval(&ctx, "[1, 2] && 1").is_true());
    assert!(eval(&ctx, "[1, 0] || 0").is_false());
    assert!(eval(&ctx, "[] || 0").is_false());
}

#[test]
fn test_dynamic_variable_names_expand_at_evaluation() {
    let ctx = Context::new();
    let expr = ctx.compile("agent{.id}.ready = 1").unwrap();
    let settings = KnowledgeUpdateSettings::default();
    for id in 0..3 {
        ctx.set(".id", id, &settings).unwrap();
        ctx.evaluate(&expr, &settings).unwrap();
    }
    assert_eq!(ctx.to_map("agent*.ready").unwrap().len(), 3);
}

#[test]
fn test_system_calls() {
    let ctx = Context::new();
    ctx.set("name", "karl", &KnowledgeUpdateSettings::default()).unwrap();
    assert_eq!(eval(&ctx, "#expand(\"hi {name}\")").to_string(), "hi karl");
    assert_eq!(eval(&ctx, "#size(name)").to_integer(), 4);
    assert_eq!(eval(&ctx, "#type(1.5)").to_string(), "double");
    assert_eq!(eval(&ctx, "#fragment(name, 1, 2)").to_string(), "ar");
    assert_eq!(eval(&ctx, "#to_string([1, 2], \"-\")").to_string(), "1-2");
    assert!(eval(&ctx, "#isinf(#to_double(\"inf\"))").is_true());
    assert!(eval(&ctx, "#get_time_seconds()").to_integer() > 0);

    eval(&ctx, "code = \"v = 41 ;> ++v\"");
    assert_eq!(eval(&ctx, "#eval(code)").to_integer(), 42);
    assert!(!eval(&ctx, "#eval(\"1 +\")").is_created());

    assert!(eval(&ctx, "#delete_variable(\"v\")").is_true());
    assert!(!ctx.exists("v"));
}

#[test]
fn test_karl_functions_receive_arguments_as_locals() {
    let ctx = Context::new();
    ctx.define_function_karl("add", ".0 + .1").unwrap();
    assert_eq!(eval(&ctx, "add(2, 3) * 10").to_integer(), 50);
    // locals never show up as modified
    assert!(ctx.get_modified().is_empty());
}

#[test]
fn test_native_functions_can_touch_the_context() {
    let ctx = Context::new();
    ctx.define_native("bump", |args, guard| {
        let by = args.first().map_or(1, Record::to_integer);
        let next = guard.get("counter").to_integer() + by;
        guard
            .set("counter", next, &KnowledgeUpdateSettings::default())
            .unwrap();
        Record::integer(next)
    });
    eval(&ctx, "bump(5) ;> bump()");
    assert_eq!(ctx.get("counter").to_integer(), 6);
}

#[test]
fn test_undefined_functions_do_not_abort_siblings() {
    let ctx = Context::new();
    let result = eval(&ctx, "(a = 1) ;> (b = missing(1)) ;> (c = 3)");
    assert_eq!(result.to_integer(), 3);
    assert_eq!(ctx.get("a").to_integer(), 1);
    assert_eq!(ctx.get("c").to_integer(), 3);
}

#[test]
fn test_runaway_recursion_is_bounded() {
    let ctx = Context::with_config(&KnowledgeBaseConfig {
        max_call_depth: 16,
        ..KnowledgeBaseConfig::default()
    });
    ctx.define_function_karl("forever", "forever()").unwrap();
    assert!(!eval(&ctx, "forever()").is_created());
}

#[test]
fn test_treat_as_local_suppresses_propagation() {
    let kb = KnowledgeBase::new();
    let settings = EvalSettings::default().with_update(KnowledgeUpdateSettings::local());
    kb.evaluate("quiet = 1", &settings).unwrap();
    assert_eq!(kb.get("quiet").to_integer(), 1);
    assert!(kb.get_modified().is_empty());
}

#[test]
fn test_compile_errors_report_position() {
    let ctx = Context::new();
    let err = ctx.compile("x = 1 +* 2").unwrap_err();
    assert!(err.is_compile());
    assert_eq!(err.position(), Some(7));
}

#[test]
fn test_deep_nesting_is_a_compile_error() {
    let ctx = Context::new();
    let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
    let err = ctx.compile(&deep).unwrap_err();
    assert!(err.is_compile());
    assert!(err.to_string().contains("nested too deeply"));

    assert!(ctx.compile(&format!("{}1", "!".repeat(100_000))).unwrap_err().is_compile());

    ctx.set("source", deep.as_str(), &KnowledgeUpdateSettings::default()).unwrap();
    assert!(!eval(&ctx, "#eval(source)").is_created());
}

#[test]
fn test_to_karl_rebuilds_the_store() {
    let source = Context::new();
    let settings = KnowledgeUpdateSettings::default();
    source.set("count", 3, &settings).unwrap();
    source.set("ratio", 0.25, &settings).unwrap();
    source.set("label", "a \"b\"", &settings).unwrap();
    source.set("samples", vec![1.5, 2.5], &settings).unwrap();

    let copy = Context::new();
    eval(&copy, &source.to_karl());
    assert_eq!(copy.keys(), source.keys());
    for key in source.keys() {
        assert!(copy.get(&key).equals(&source.get(&key)), "{key}");
    }
}
