use serde_json::json;
use sluice::query::{
    FieldFunction, Function, FunctionContext, Literal, Operator, ParamValue, QueryError,
    TargetPath, TargetsContext, init_method, new_arithmetic_expression,
};
use sluice::{MessageBatch, Part, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn v(doc: serde_json::Value) -> Value {
    Value::from_json(doc)
}

fn lit(value: impl Into<Value>) -> Arc<dyn Function> {
    Arc::new(Literal::new(value.into()))
}

fn field(path: &str) -> Arc<dyn Function> {
    Arc::new(FieldFunction::new(path))
}

fn method(name: &str, target: Arc<dyn Function>, args: Vec<ParamValue>) -> Arc<dyn Function> {
    init_method(name, target, args).unwrap()
}

fn expr(fns: Vec<Arc<dyn Function>>, ops: Vec<Operator>) -> Arc<dyn Function> {
    new_arithmetic_expression(fns, ops).unwrap()
}

fn exec(f: &dyn Function) -> Result<Value, QueryError> {
    let batch = MessageBatch::new();
    let vars = HashMap::new();
    let maps = HashMap::new();
    f.exec(FunctionContext::new(&batch, &vars, &maps))
}

fn exec_value(f: &dyn Function, value: &Value) -> Result<Value, QueryError> {
    let batch = MessageBatch::new();
    let vars = HashMap::new();
    let maps = HashMap::new();
    f.exec(FunctionContext::new(&batch, &vars, &maps).with_value(value))
}

fn sorted_strings(value: Value) -> Vec<String> {
    let Value::Array(items) = value else {
        panic!("expected array")
    };
    let mut out: Vec<String> = items.into_iter().map(|i| i.coerce_string()).collect();
    out.sort();
    out
}

#[test]
fn bool_coerces_numbers_and_strings() {
    for (input, want) in [
        (v(json!(1)), true),
        (v(json!(0)), false),
        (v(json!(-2.5)), true),
        (v(json!("TRUE")), true),
        (v(json!("f")), false),
    ] {
        let f = method("bool", lit(input), vec![]);
        assert_eq!(exec(f.as_ref()).unwrap(), Value::from(want));
    }

    let f = method("bool", lit("nope"), vec![]);
    assert!(exec(f.as_ref()).is_err());

    let f = method("bool", lit("nope"), vec![Value::from(true).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));
}

#[test]
fn number_coerces_strings_with_fallback() {
    let f = method("number", lit("12"), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(12i64));

    let f = method("number", lit("12.5"), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(12.5));

    let f = method("number", lit("nope"), vec![]);
    assert!(exec(f.as_ref()).is_err());

    let f = method("number", lit("nope"), vec![Value::from(5.0).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(5.0));
}

#[test]
fn catch_recovers_failures_only() {
    let failing = method("not_null", lit(Value::Null), vec![]);
    let f = method("catch", failing, vec![Value::from("recovered").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("recovered"));

    let f = method("catch", lit("fine"), vec![Value::from("unused").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("fine"));

    // Null is not a failure for catch.
    let f = method("catch", lit(Value::Null), vec![Value::from("unused").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::Null);
}

#[test]
fn or_recovers_failures_and_null() {
    let f = method("or", lit(Value::Null), vec![Value::from("fallback").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("fallback"));

    let failing = method("not_null", lit(Value::Null), vec![]);
    let f = method("or", failing, vec![Value::from("fallback").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("fallback"));

    let f = method("or", lit("kept"), vec![Value::from("unused").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("kept"));
}

#[test]
fn not_null_rejects_null() {
    let f = method("not_null", lit(Value::Null), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap_err().to_string(), "value is null");

    let f = method("not_null", lit("foobar"), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("foobar"));
}

#[test]
fn not_empty_names_the_kind() {
    let cases = [
        (v(json!("")), "string value is empty"),
        (v(json!([])), "array value is empty"),
        (v(json!({})), "object value is empty"),
    ];
    for (input, want) in cases {
        let f = method("not_empty", lit(input), vec![]);
        assert_eq!(exec(f.as_ref()).unwrap_err().to_string(), want);
    }

    let f = method("not_empty", lit(v(json!(["foo"]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["foo"])));
}

#[test]
fn type_reports_value_kinds() {
    let cases = [
        (v(json!("x")), "string"),
        (v(json!(10)), "number"),
        (v(json!(true)), "bool"),
        (v(json!([1])), "array"),
        (v(json!({"a": 1})), "object"),
        (Value::Null, "null"),
        (Value::Bytes(vec![1]), "bytes"),
    ];
    for (input, want) in cases {
        let f = method("type", lit(input), vec![]);
        assert_eq!(exec(f.as_ref()).unwrap(), Value::from(want));
    }
}

#[test]
fn string_renders_values() {
    let cases = [
        (v(json!(10)), "10"),
        (v(json!(true)), "true"),
        (Value::Bytes(b"raw".to_vec()), "raw"),
    ];
    for (input, want) in cases {
        let f = method("string", lit(input), vec![]);
        assert_eq!(exec(f.as_ref()).unwrap(), Value::from(want));
    }
}

fn two_part_batch() -> MessageBatch {
    MessageBatch::from(vec![
        Part::new(json!({"foo": "first"}).to_string().into_bytes()),
        Part::new(json!({"foo": "second"}).to_string().into_bytes()),
    ])
}

#[test]
fn from_shifts_the_batch_perspective() {
    let batch = two_part_batch();
    let vars = HashMap::new();
    let maps = HashMap::new();
    let ctx = FunctionContext::new(&batch, &vars, &maps);

    let json_foo = sluice::query::init_function("json", vec![Value::from("foo").into()]).unwrap();
    let f = method("from", json_foo, vec![Value::from(1i64).into()]);
    assert_eq!(f.exec(ctx).unwrap(), Value::from("second"));
}

#[test]
fn from_all_collects_every_message() {
    let batch = two_part_batch();
    let vars = HashMap::new();
    let maps = HashMap::new();
    let ctx = FunctionContext::new(&batch, &vars, &maps);

    let json_foo = sluice::query::init_function("json", vec![Value::from("foo").into()]).unwrap();
    let f = method("from_all", json_foo, vec![]);
    assert_eq!(f.exec(ctx).unwrap(), v(json!(["first", "second"])));
}

#[test]
fn from_all_partial_failures_are_recoverable() {
    let batch = MessageBatch::from(vec![
        Part::new(json!({"foo": 5}).to_string().into_bytes()),
        Part::new(b"not json".to_vec()),
    ]);
    let vars = HashMap::new();
    let maps = HashMap::new();
    let ctx = FunctionContext::new(&batch, &vars, &maps);

    let json_foo = sluice::query::init_function("json", vec![Value::from("foo").into()]).unwrap();
    let f = method("from_all", json_foo, vec![]);
    let err = f.exec(ctx).unwrap_err();
    let recovered = err.recover().expect("recoverable error");
    assert_eq!(recovered, v(json!([5, null])));
}

#[test]
fn get_descends_and_defaults_to_null() {
    let doc = v(json!({"foo": {"bar": "from bar"}}));
    let f = method("get", lit(doc.clone()), vec![Value::from("foo.bar").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("from bar"));

    let f = method("get", lit(doc), vec![Value::from("foo.missing").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::Null);
}

#[test]
fn chained_gets_collapse_paths() {
    let doc = v(json!({"foo": {"bar": "deep"}}));
    let inner = method("get", lit(doc), vec![Value::from("foo").into()]);
    let outer = method("get", inner, vec![Value::from("bar").into()]);
    assert_eq!(outer.annotation(), "path `foo.bar`");
    assert_eq!(exec(outer.as_ref()).unwrap(), Value::from("deep"));
}

#[test]
fn get_accepts_a_dynamic_path() {
    let doc = v(json!({"foo": {"bar": "from bar", "baz": "from baz"}, "target": "baz"}));
    let arg: Arc<dyn Function> = Arc::new(FieldFunction::new("target"));
    let f = method("get", field("foo"), vec![arg.into()]);
    assert_eq!(exec_value(f.as_ref(), &doc).unwrap(), Value::from("from baz"));
}

#[test]
fn exists_checks_paths() {
    let doc = v(json!({"foo": {"bar": {"baz": "yep"}}}));
    let f = method("exists", lit(doc.clone()), vec![Value::from("foo.bar.baz").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));
    let f = method("exists", lit(doc), vec![Value::from("foo.nope").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(false));
}

#[test]
fn explode_arrays_duplicate_the_document() {
    let doc = v(json!({"id": 1, "value": ["foo", "bar", "baz"]}));
    let f = method("explode", lit(doc), vec![Value::from("value").into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!([
            {"id": 1, "value": "foo"},
            {"id": 1, "value": "bar"},
            {"id": 1, "value": "baz"}
        ]))
    );
}

#[test]
fn explode_objects_key_the_documents() {
    let doc = v(json!({"id": 1, "value": {"foo": 2, "bar": [3, 4]}}));
    let f = method("explode", lit(doc), vec![Value::from("value").into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({
            "foo": {"id": 1, "value": 2},
            "bar": {"id": 1, "value": [3, 4]}
        }))
    );
}

#[test]
fn explode_rejects_scalars_at_the_path() {
    let doc = v(json!({"id": 1, "value": 7}));
    let f = method("explode", lit(doc), vec![Value::from("value").into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "expected array or object value at path 'value', found: number"
    );
}

#[test]
fn filter_keeps_passing_elements() {
    let over_ten = expr(vec![field(""), lit(10i64)], vec![Operator::Gt]);
    let f = method("filter", lit(v(json!([3, 11, 4, 17]))), vec![over_ten.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([11, 17])));
}

#[test]
fn filter_objects_see_key_value_pairs() {
    let has_foo = method("contains", field("value"), vec![Value::from("foo").into()]);
    let doc = v(json!({"first": "hello foo", "second": "world", "third": "foo again"}));
    let f = method("filter", lit(doc), vec![has_foo.into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({"first": "hello foo", "third": "foo again"}))
    );
}

#[test]
fn flatten_removes_exactly_one_level() {
    let f = method("flatten", lit(v(json!(["foo", ["bar", "baz"], "buz"]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["foo", "bar", "baz", "buz"])));

    let f = method("flatten", lit(v(json!([[[1]]]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([[1]])));
}

#[test]
fn fold_accumulates_with_tally() {
    let step = expr(vec![field("tally"), field("value")], vec![Operator::Add]);
    let f = method(
        "fold",
        lit(v(json!([3, 8, 11]))),
        vec![Value::from(0i64).into(), step.into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(22i64));

    let step = expr(vec![field("tally"), field("value")], vec![Operator::Add]);
    let f = method(
        "fold",
        lit(v(json!(["hello ", "world"]))),
        vec![Value::from("").into(), step.into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("hello world"));
}

#[test]
fn index_wraps_negative_offsets() {
    let names = lit(v(json!(["rachel", "stevens"])));
    let f = method("index", names, vec![Value::from(-1i64).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("stevens"));

    let f = method(
        "index",
        lit(v(json!(["a"]))),
        vec![Value::from(3i64).into()],
    );
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "index '3' was out of bounds for array size: 1"
    );
}

#[test]
fn index_on_bytes_yields_integers() {
    let f = method(
        "index",
        lit(Value::Bytes(b"foobar".to_vec())),
        vec![Value::from(-1i64).into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(b'r' as i64));
}

#[test]
fn json_schema_passes_values_through() {
    let schema = json!({
        "type": "object",
        "properties": {"foo": {"type": "string"}}
    })
    .to_string();

    let f = method(
        "json_schema",
        lit(v(json!({"foo": "bar"}))),
        vec![Value::from(schema.clone()).into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!({"foo": "bar"})));

    let f = method(
        "json_schema",
        lit(v(json!({"foo": 5}))),
        vec![Value::from(schema).into()],
    );
    let err = exec(f.as_ref()).unwrap_err().to_string();
    assert!(err.contains("foo"), "unexpected error: {err}");
}

#[test]
fn json_schema_rejects_bad_schemas_at_construction() {
    let err = init_method(
        "json_schema",
        lit(Value::Null),
        vec![Value::from("not json").into()],
    )
    .unwrap_err();
    assert!(
        err.to_string()
            .starts_with("failed to parse json schema definition")
    );
}

#[test]
fn keys_are_sorted_and_complete() {
    let doc = v(json!({"baz": 2, "bar": 1, "foo": 3}));
    let f = method("keys", lit(doc.clone()), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["bar", "baz", "foo"])));

    let keys_len = method("length", method("keys", lit(doc.clone()), vec![]), vec![]);
    let obj_len = method("length", lit(doc), vec![]);
    assert_eq!(exec(keys_len.as_ref()).unwrap(), exec(obj_len.as_ref()).unwrap());
}

#[test]
fn values_and_key_values_cover_the_object() {
    let doc = v(json!({"bar": 1, "baz": 2}));
    let f = method("values", lit(doc.clone()), vec![]);
    assert_eq!(sorted_strings(exec(f.as_ref()).unwrap()), vec!["1", "2"]);

    let f = method("key_values", lit(doc), vec![]);
    let Value::Array(pairs) = exec(f.as_ref()).unwrap() else {
        panic!("expected array")
    };
    assert_eq!(pairs.len(), 2);
    for pair in &pairs {
        let Value::Object(fields) = pair else {
            panic!("expected object pair")
        };
        assert!(fields.contains_key("key"));
        assert!(fields.contains_key("value"));
    }
}

#[test]
fn length_counts_elements_and_bytes() {
    let cases = [
        (v(json!("hello world")), 11i64),
        (Value::Bytes(vec![0, 1, 2]), 3),
        (v(json!(["first", "second"])), 2),
        (v(json!({"a": 1, "b": 2})), 2),
    ];
    for (input, want) in cases {
        let f = method("length", lit(input), vec![]);
        assert_eq!(exec(f.as_ref()).unwrap(), Value::from(want));
    }
}

// A test-only node evaluating a plain function pointer over the context
// value.
struct Probe(fn(Option<&Value>) -> Result<Value, QueryError>);

impl Function for Probe {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        (self.0)(ctx.value())
    }
    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }
    fn annotation(&self) -> String {
        "probe".to_owned()
    }
}

#[test]
fn map_each_applies_delete_and_nothing() {
    let step: Arc<dyn Function> = Arc::new(Probe(|value| {
        let n = value.unwrap().as_number().map_err(QueryError::from)?;
        if n.as_i64() < 10 {
            Ok(Value::Delete)
        } else {
            Ok(Value::from(n.as_i64() - 10))
        }
    }));
    let f = method("map_each", lit(v(json!([3, 11, 4, 17]))), vec![step.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([1, 7])));

    let keep: Arc<dyn Function> = Arc::new(Probe(|_| Ok(Value::Nothing)));
    let f = method("map_each", lit(v(json!([3, 11]))), vec![keep.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([3, 11])));
}

#[test]
fn map_each_transforms_object_values() {
    let bang = expr(vec![field("value"), lit("!")], vec![Operator::Add]);
    let doc = v(json!({"foo": "hello", "bar": "world"}));
    let f = method("map_each", lit(doc), vec![bang.into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({"foo": "hello!", "bar": "world!"}))
    );
}

#[test]
fn map_each_key_replaces_keys() {
    let suffixed = expr(vec![field(""), lit("_x")], vec![Operator::Add]);
    let doc = v(json!({"a": 1, "b": 2}));
    let f = method("map_each_key", lit(doc), vec![suffixed.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!({"a_x": 1, "b_x": 2})));

    let keep: Arc<dyn Function> = Arc::new(Probe(|_| Ok(Value::Nothing)));
    let doc = v(json!({"a": 1}));
    let f = method("map_each_key", lit(doc), vec![keep.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!({"a": 1})));
}

#[test]
fn map_each_key_requires_string_results() {
    let doc = v(json!({"a": 1}));
    let bad: Arc<dyn Function> = Arc::new(Probe(|_| Ok(Value::from(5i64))));
    let f = method("map_each_key", lit(doc), vec![bad.into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "unexpected result from key mapping: expected string value, found number"
    );
}

#[test]
fn merge_combines_objects_and_collides_into_arrays() {
    let foo = v(json!({"first_name": "fooer", "likes": "bars"}));
    let bar = v(json!({"second_name": "barer", "likes": "foos"}));
    let f = method("merge", lit(foo), vec![ParamValue::Query(lit(bar))]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({
            "first_name": "fooer",
            "second_name": "barer",
            "likes": ["bars", "foos"]
        }))
    );
}

#[test]
fn merge_appends_to_array_destinations() {
    let f = method(
        "merge",
        lit(v(json!([1, 2]))),
        vec![ParamValue::Query(lit(v(json!([3]))))],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([1, 2, 3])));

    let f = method(
        "merge",
        lit(v(json!([1, 2]))),
        vec![ParamValue::Query(lit(v(json!("solo"))))],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([1, 2, "solo"])));
}

#[test]
fn slice_selects_half_open_ranges() {
    let f = method(
        "slice",
        lit(v(json!("foo bar"))),
        vec![Value::from(0i64).into(), Value::from(2i64).into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("fo"));

    let f = method("slice", lit(v(json!("foo bar"))), vec![Value::from(4i64).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from("bar"));

    let f = method("slice", lit(v(json!("foo bar"))), vec![Value::from(-4i64).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(" bar"));

    let f = method(
        "slice",
        lit(v(json!(["foo", "bar", "baz", "buz", "bev"]))),
        vec![Value::from(0i64).into(), Value::from(-2i64).into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["foo", "bar", "baz"])));
}

#[test]
fn slice_length_matches_the_bound_formula() {
    let data = v(json!(["a", "b", "c", "d", "e"]));
    for (low, high) in [(0i64, 3i64), (1, 5), (-3, 5), (2, 3)] {
        let f = method(
            "slice",
            lit(data.clone()),
            vec![Value::from(low).into(), Value::from(high).into()],
        );
        let Value::Array(items) = exec(f.as_ref()).unwrap() else {
            panic!("expected array")
        };
        let n = 5i64;
        let lo = if low < 0 { (n + low).max(0) } else { low };
        let hi = high.min(n);
        assert_eq!(items.len() as i64, (hi - lo).max(0));
    }
}

#[test]
fn slice_validates_static_bounds() {
    let err = init_method(
        "slice",
        lit(Value::Null),
        vec![Value::from(4i64).into(), Value::from(2i64).into()],
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "lower slice bound 4 must be lower than upper (2)"
    );
}

#[test]
fn slice_validates_dynamic_bounds() {
    let f = method("slice", lit(v(json!("a"))), vec![Value::from(2i64).into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "lower slice bound 2 must be lower than or equal to upper bound (1) and target length (1)"
    );
}

#[test]
fn sort_orders_numbers_and_strings() {
    let f = method("sort", lit(v(json!(["bbb", "ccc", "aaa"]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["aaa", "bbb", "ccc"])));

    let f = method("sort", lit(v(json!([3, 1.5, 2]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([1.5, 2, 3])));
}

#[test]
fn sort_rejects_mixed_kinds() {
    let f = method("sort", lit(v(json!([3, "a"]))), vec![]);
    let err = exec(f.as_ref()).unwrap_err().to_string();
    assert!(err.contains("sort element"), "unexpected error: {err}");
}

#[test]
fn sort_is_idempotent() {
    let once = method("sort", lit(v(json!([4, 1, 3, 2]))), vec![]);
    let twice = method("sort", method("sort", lit(v(json!([4, 1, 3, 2]))), vec![]), vec![]);
    assert_eq!(exec(once.as_ref()).unwrap(), exec(twice.as_ref()).unwrap());
}

#[test]
fn sort_accepts_a_comparison_query() {
    let less = expr(
        vec![field("left.v"), field("right.v")],
        vec![Operator::Lt],
    );
    let doc = v(json!([
        {"id": "foo", "v": "bbb"},
        {"id": "bar", "v": "ccc"},
        {"id": "baz", "v": "aaa"}
    ]));
    let f = method("sort", lit(doc), vec![less.into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!([
            {"id": "baz", "v": "aaa"},
            {"id": "foo", "v": "bbb"},
            {"id": "bar", "v": "ccc"}
        ]))
    );
}

#[test]
fn sort_by_orders_by_emitted_keys() {
    let doc = v(json!([
        {"id": "bbb"},
        {"id": "aaa"},
        {"id": "ccc"}
    ]));
    let f = method("sort_by", lit(doc), vec![field("id").into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!([{"id": "aaa"}, {"id": "bbb"}, {"id": "ccc"}]))
    );
}

#[test]
fn sum_totals_arrays_as_floats() {
    let f = method("sum", lit(v(json!([3, 8, 4]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(15.0));

    let f = method("sum", lit(v(json!([3, "x"]))), vec![]);
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "index 1: expected number value, found string"
    );
}

#[test]
fn unique_preserves_first_occurrences() {
    let f = method("unique", lit(v(json!(["a", "b", "a", "c"]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["a", "b", "c"])));

    // Numbers dedupe across representations, strings separately.
    let f = method("unique", lit(v(json!([5, 5.0, "5"]))), vec![]);
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!([5, "5"])));
}

#[test]
fn unique_is_idempotent() {
    let once = method("unique", lit(v(json!(["b", "a", "b"]))), vec![]);
    let twice = method(
        "unique",
        method("unique", lit(v(json!(["b", "a", "b"]))), vec![]),
        vec![],
    );
    assert_eq!(exec(once.as_ref()).unwrap(), exec(twice.as_ref()).unwrap());
}

#[test]
fn unique_accepts_a_key_query() {
    let doc = v(json!([
        {"id": 1, "tag": "x"},
        {"id": 1, "tag": "y"},
        {"id": 2, "tag": "z"}
    ]));
    let f = method("unique", lit(doc), vec![field("id").into()]);
    let Value::Array(items) = exec(f.as_ref()).unwrap() else {
        panic!("expected array")
    };
    assert_eq!(items.len(), 2);
}

#[test]
fn without_removes_nested_paths() {
    let doc = v(json!({
        "inner": {"a": "first", "b": "second", "c": "third"},
        "d": "fourth",
        "e": "fifth"
    }));
    let f = method(
        "without",
        lit(doc),
        vec![
            Value::from("inner.a").into(),
            Value::from("inner.c").into(),
            Value::from("d").into(),
        ],
    );
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({"e": "fifth", "inner": {"b": "second"}}))
    );
}

#[test]
fn contains_matches_substrings_and_elements() {
    let f = method("contains", lit(v(json!("this foo that"))), vec![Value::from("foo").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));

    let f = method("contains", lit(v(json!(["this", "bar"]))), vec![Value::from("foo").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(false));

    // Numeric equality ignores representation.
    let f = method("contains", lit(v(json!([10.3, 20.0, "huh"]))), vec![Value::from(20i64).into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));

    let f = method("contains", lit(v(json!({"a": "foo"}))), vec![Value::from("foo").into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));
}

#[test]
fn apply_runs_declared_maps_with_isolated_variables() {
    let batch = MessageBatch::new();
    let mut vars = HashMap::new();
    vars.insert("x".to_owned(), Value::from("outer"));
    let mut maps: HashMap<String, Arc<dyn Function>> = HashMap::new();
    maps.insert("first_of".to_owned(), field("first"));
    maps.insert(
        "read_var".to_owned(),
        sluice::query::init_function("var", vec![Value::from("x").into()]).unwrap(),
    );

    let ctx = FunctionContext::new(&batch, &vars, &maps);

    let doc = v(json!({"first": "hello world"}));
    let f = method("apply", lit(doc), vec![Value::from("first_of").into()]);
    assert_eq!(f.exec(ctx).unwrap(), Value::from("hello world"));

    // The outer variable must not leak into the mapping.
    let f = method("apply", lit(Value::Null), vec![Value::from("read_var").into()]);
    assert_eq!(f.exec(ctx).unwrap_err().to_string(), "variable x undefined");

    let f = method("apply", lit(Value::Null), vec![Value::from("nope").into()]);
    assert_eq!(f.exec(ctx).unwrap_err().to_string(), "map nope was not found");
}

#[test]
fn apply_without_maps_is_an_error() {
    let f = method("apply", lit(Value::Null), vec![Value::from("thing").into()]);
    assert_eq!(exec(f.as_ref()).unwrap_err().to_string(), "no maps were found");
}

#[test]
fn all_and_any_test_every_element() {
    let over_21 = expr(vec![field("age"), lit(21i64)], vec![Operator::Gte]);
    let patrons = v(json!([{"age": 18}, {"age": 23}]));
    let f = method("all", lit(patrons.clone()), vec![over_21.clone().into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(false));
    let f = method("any", lit(patrons), vec![over_21.clone().into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(true));

    // Empty arrays are false for both.
    let f = method("all", lit(v(json!([]))), vec![over_21.clone().into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(false));
    let f = method("any", lit(v(json!([]))), vec![over_21.into()]);
    assert_eq!(exec(f.as_ref()).unwrap(), Value::from(false));
}

#[test]
fn all_rejects_non_boolean_test_results() {
    let identity: Arc<dyn Function> = field("");
    let f = method("all", lit(v(json!([5]))), vec![identity.into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap_err().to_string(),
        "element 0: expected bool value, found number"
    );
}

#[test]
fn enumerated_pairs_indices_with_values() {
    let f = method("enumerated", lit(v(json!(["bar", "baz"]))), vec![]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!([
            {"index": 0, "value": "bar"},
            {"index": 1, "value": "baz"}
        ]))
    );
}

#[test]
fn collapse_flattens_to_dot_paths() {
    let doc = v(json!({"foo": [{"bar": "1"}, {"bar": {}}, {"bar": "2"}, {"bar": []}]}));
    let f = method("collapse", lit(doc.clone()), vec![]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({"foo.0.bar": "1", "foo.2.bar": "2"}))
    );

    let f = method("collapse", lit(doc), vec![Value::from(true).into()]);
    assert_eq!(
        exec(f.as_ref()).unwrap(),
        v(json!({"foo.0.bar": "1", "foo.1.bar": {}, "foo.2.bar": "2", "foo.3.bar": []}))
    );
}

#[test]
fn append_extends_arrays() {
    let f = method(
        "append",
        lit(v(json!(["bar", "baz"]))),
        vec![Value::from("and").into(), Value::from("this").into()],
    );
    assert_eq!(exec(f.as_ref()).unwrap(), v(json!(["bar", "baz", "and", "this"])));
}
