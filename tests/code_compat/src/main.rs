fn main() {
    println!("Run `cargo test -p code-compat` to check error codes and wire names against the fixtures.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde::Deserialize;
    use smpflow_protocol::{
        Advertisement, CodeDomain, EngineError, ErrorRecord, FailureCause, InstallFatalErrorType,
        LifecycleState, LogLevel, OperationKind, Verdict, classify, describe,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON numbers so that `65` and `65.0` compare equal.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes `value`, re-serializes it and compares the JSON.
    fn assert_roundtrip<T>(label: &str, value: &serde_json::Value)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let parsed: T = serde_json::from_value(value.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {label}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {label}: {e}"));
        assert_eq!(
            normalize_value(value),
            normalize_value(&reserialized),
            "roundtrip mismatch for {label}:\n  fixture: {value}\n  rust:    {reserialized}"
        );
    }

    // --- Error codes ---

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CodeCase {
        cause: FailureCause,
        global_code: i32,
    }

    #[test]
    fn error_codes_match_fixture() {
        let cases: Vec<CodeCase> =
            serde_json::from_value(load_fixture("error_codes.json")).unwrap();
        assert!(!cases.is_empty());

        for case in cases {
            let error = EngineError {
                message: "fixture".into(),
                cause: case.cause.clone(),
            };
            assert_eq!(
                classify(&error),
                case.global_code,
                "classify mismatch for {:?}",
                case.cause
            );
        }
    }

    #[test]
    fn global_codes_decode_back() {
        let cases: Vec<CodeCase> =
            serde_json::from_value(load_fixture("error_codes.json")).unwrap();

        for case in cases {
            let decoded = describe(case.global_code);
            match &case.cause {
                FailureCause::Transport | FailureCause::Timeout => {
                    assert_eq!(decoded, CodeDomain::Unset);
                }
                FailureCause::Device { code, group: None } if *code < 0 => {
                    assert_eq!(decoded, CodeDomain::Generic);
                }
                FailureCause::Device { code, group: None } => {
                    assert_eq!(decoded, CodeDomain::Flat(*code));
                }
                FailureCause::Device {
                    group: Some(g), ..
                } => {
                    assert_eq!(
                        decoded,
                        CodeDomain::Group {
                            group: g.group,
                            rc: g.rc
                        }
                    );
                }
            }
        }
    }

    // --- Wire names ---

    #[test]
    fn state_names_match_fixture() {
        let names = load_fixture("names.json");
        let states: Vec<LifecycleState> =
            serde_json::from_value(names["states"].clone()).unwrap();
        assert_eq!(states.len(), 15);

        for (state, wire) in states.iter().zip(names["states"].as_array().unwrap()) {
            assert_eq!(state.as_str(), wire.as_str().unwrap());
        }

        // Every state some kind admits has a wire name.
        for kind in OperationKind::ALL {
            for state in kind.states() {
                assert!(states.contains(state), "{kind}: {state} missing from fixture");
            }
        }
    }

    #[test]
    fn verdict_and_level_names_match_fixture() {
        let names = load_fixture("names.json");
        let verdicts: Vec<Verdict> = serde_json::from_value(names["verdicts"].clone()).unwrap();
        assert_eq!(verdicts.first(), Some(&Verdict::Success));
        assert_eq!(verdicts.len(), 5);

        let levels: Vec<LogLevel> = serde_json::from_value(names["logLevels"].clone()).unwrap();
        assert!(levels.windows(2).all(|w| w[0] < w[1]), "levels out of order");
        assert_roundtrip::<Vec<LogLevel>>("logLevels", &names["logLevels"]);
    }

    #[test]
    fn fatal_error_type_codes_match_fixture() {
        let names = load_fixture("names.json");
        let table = names["fatalErrorTypes"].as_object().unwrap();
        assert_eq!(table.len(), 11);

        for (wire, code) in table {
            let fatal: InstallFatalErrorType =
                serde_json::from_value(serde_json::Value::String(wire.clone()))
                    .unwrap_or_else(|e| panic!("unknown fatal error type {wire}: {e}"));
            assert_eq!(i64::from(fatal.code()), code.as_i64().unwrap(), "{wire}");
        }
    }

    // --- Payload shapes ---

    #[test]
    fn advertisements_roundtrip() {
        let fixture = load_fixture("advertisements.json");
        for (i, ad) in fixture.as_array().unwrap().iter().enumerate() {
            assert_roundtrip::<Advertisement>(&format!("advertisement #{i}"), ad);
        }
    }

    #[test]
    fn error_record_roundtrip() {
        let fixture = load_fixture("error_record.json");
        assert_roundtrip::<ErrorRecord>("error_record", &fixture);

        let record: ErrorRecord = serde_json::from_value(fixture).unwrap();
        assert_eq!(
            record.fatal_error_type,
            Some(InstallFatalErrorType::InstallationInitializationFailed)
        );
        assert_eq!(describe(record.global_code), CodeDomain::Unset);
    }
}
