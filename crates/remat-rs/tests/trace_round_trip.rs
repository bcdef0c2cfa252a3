use remat_rs::io::{dump_trace, dump_trace_string, load_trace, load_trace_str, TraceLoadError};
use remat_rs::units::{parse_byte_size, pretty_bytes, UnitParseError, GIB, KIB, MIB};
use remat_rs::OperandId;

fn chain_trace() -> String {
    serde_json::json!({
        "data": [
            {"id": 0, "size": 4096, "dtype": "f32"},
            {"id": 1, "size": 8192, "dtype": "f32"},
            {"id": 2, "size": 4096, "dtype": "f32"}
        ],
        "code": [
            {"name": "conv", "ins": [0], "outs": [1], "workspace": 1024, "time": 1.5, "attr": {"kernel": 3}},
            {"name": "relu", "ins": [1], "outs": [2], "workspace": 0, "time": 0.5, "attr": null},
            {"name": ".dealloc", "ins": [], "outs": [1], "workspace": 0, "time": 0.0, "attr": null},
            {"name": "sum", "ins": [2], "outs": [], "workspace": 0, "time": 0.25, "attr": null}
        ]
    })
    .to_string()
}

#[test]
fn loading_discovers_placement_and_elides_deallocs() {
    let schedule = load_trace_str(&chain_trace()).expect("trace loads");

    // The weight is consumed before anything produces it.
    assert!(schedule.common().already_on.contains(&OperandId(0)));
    assert!(schedule.common().not_dealloc.contains(&OperandId(0)));
    assert!(!schedule.common().not_dealloc.contains(&OperandId(1)));

    // Pseudo-ops are gone from the working schedule.
    assert_eq!(schedule.tasks().len(), 3);
    assert!(schedule.tasks().iter().all(|t| !t.name.starts_with('.')));

    // Microseconds in the file, nanoseconds in memory.
    assert_eq!(schedule.tasks()[0].duration, 1_500);
    assert_eq!(schedule.total_time(), 2_250);
    // weight + conv output + relu output, all live while relu runs.
    assert_eq!(schedule.peak_memory(), 4096 + 8192 + 4096);
}

#[test]
fn dump_and_reload_preserve_peak_time_and_attributes() {
    let schedule = load_trace_str(&chain_trace()).expect("trace loads");
    let dumped = dump_trace_string(&schedule).expect("dump succeeds");
    let reloaded = load_trace_str(&dumped).expect("dump reloads");

    assert_eq!(reloaded.peak_memory(), schedule.peak_memory());
    assert_eq!(reloaded.total_time(), schedule.total_time());
    assert_eq!(reloaded.structural_hash(), schedule.structural_hash());

    // Operand descriptors and task attributes survive verbatim.
    let parsed: serde_json::Value = serde_json::from_str(&dumped).expect("valid json");
    assert_eq!(parsed["data"][1]["dtype"], "f32");
    assert_eq!(parsed["code"][0]["attr"]["kernel"], 3);
    // The elided dealloc is re-synthesized after the last use of operand 1.
    assert_eq!(parsed["code"][2]["name"], ".dealloc");
}

#[test]
fn round_trip_through_files() {
    let schedule = load_trace_str(&chain_trace()).expect("trace loads");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("trace.json");
    dump_trace(&schedule, &path).expect("dump to file");
    let reloaded = load_trace(&path).expect("load from file");
    assert_eq!(reloaded.peak_memory(), schedule.peak_memory());
    assert_eq!(reloaded.total_time(), schedule.total_time());
}

#[test]
fn share_outputs_alias_their_source() {
    let text = serde_json::json!({
        "data": [
            {"id": 0, "size": 4096},
            {"id": 1, "size": 4096},
            {"id": 2, "size": 4096}
        ],
        "code": [
            {"name": "gen", "ins": [], "outs": [0], "workspace": 0, "time": 1.0, "attr": null},
            {"name": ".share", "ins": [0], "outs": [1], "workspace": 0, "time": 0.0, "attr": null},
            {"name": "use", "ins": [1], "outs": [2], "workspace": 0, "time": 1.0, "attr": null}
        ]
    })
    .to_string();
    let schedule = load_trace_str(&text).expect("trace loads");

    // The aliased id is rewritten to its source; no extra allocation.
    assert_eq!(schedule.tasks().len(), 2);
    assert_eq!(schedule.tasks()[1].ins[0].operand, OperandId(0));
    assert_eq!(schedule.peak_memory(), 8192);
}

#[test]
fn forbidden_pseudo_ops_fail_the_load() {
    for name in [".host2device", ".device2host", ".sync", ".alloc"] {
        let text = serde_json::json!({
            "data": [{"id": 0, "size": 16}],
            "code": [
                {"name": name, "ins": [], "outs": [0], "workspace": 0, "time": 0.0, "attr": null}
            ]
        })
        .to_string();
        let err = load_trace_str(&text).expect_err("forbidden op rejected");
        assert!(matches!(err, TraceLoadError::ForbiddenOp(n) if n == name));
    }
}

#[test]
fn consuming_a_freed_operand_fails_validation() {
    let text = serde_json::json!({
        "data": [{"id": 0, "size": 16}],
        "code": [
            {"name": "gen", "ins": [], "outs": [0], "workspace": 0, "time": 1.0, "attr": null},
            {"name": ".dealloc", "ins": [], "outs": [0], "workspace": 0, "time": 0.0, "attr": null},
            {"name": "use", "ins": [0], "outs": [], "workspace": 0, "time": 1.0, "attr": null}
        ]
    })
    .to_string();
    let err = load_trace_str(&text).expect_err("stale use rejected");
    assert!(matches!(err, TraceLoadError::Invalid(_)));
}

#[test]
fn unknown_operand_references_fail_the_load() {
    let text = serde_json::json!({
        "data": [{"id": 0, "size": 16}],
        "code": [
            {"name": "gen", "ins": [], "outs": [5], "workspace": 0, "time": 1.0, "attr": null}
        ]
    })
    .to_string();
    let err = load_trace_str(&text).expect_err("dangling id rejected");
    assert!(matches!(err, TraceLoadError::UnknownOperand { id: 5, .. }));
}

#[test]
fn byte_quantities_parse_with_binary_factors() {
    assert_eq!(parse_byte_size("123B").unwrap(), 123);
    assert_eq!(parse_byte_size("4K").unwrap(), 4 * KIB);
    assert_eq!(parse_byte_size("4KiB").unwrap(), 4 * KIB);
    assert_eq!(parse_byte_size("512M").unwrap(), 512 * MIB);
    assert_eq!(parse_byte_size("512MiB").unwrap(), 512 * MIB);
    assert_eq!(parse_byte_size("8G").unwrap(), 8 * GIB);
    assert_eq!(parse_byte_size("8GiB").unwrap(), 8 * GIB);

    assert!(matches!(
        parse_byte_size("GiB"),
        Err(UnitParseError::MissingNumber(_))
    ));
    assert!(matches!(
        parse_byte_size("512"),
        Err(UnitParseError::MissingUnit(_))
    ));
    assert!(matches!(
        parse_byte_size("512Q"),
        Err(UnitParseError::UnknownUnit(_))
    ));
}

#[test]
fn bytes_pretty_print_with_binary_prefixes() {
    assert_eq!(pretty_bytes(512), "512 B");
    assert_eq!(pretty_bytes(2 * KIB), "2.00 KiB");
    assert_eq!(pretty_bytes(3 * MIB + MIB / 2), "3.50 MiB");
}
