//! Tests for import binding.

use super::*;

fn environment() -> Environment {
    let symbols = SymbolTable::from_symbols([
        ("__gate_get_abi_version", 0x1000),
        ("__gate_func_ptr", 0x1100),
        ("__gate_exit", 0x1200),
        ("__gate_recv_full", 0x1300),
        ("__gate_send_full", 0x1400),
        ("_start", 0x2000),
    ]);
    let loader = tempfile::tempfile().expect("failed to create loader stand-in");
    Environment::from_parts(PathBuf::from("/usr/lib/gate/executor"), loader, symbols)
}

#[test]
fn test_import_function_exact_signature() {
    let env = environment();

    let addr = env
        .import_function("env", "__gate_send_full", &Signature::new(&[ValueType::I32, ValueType::I32], None))
        .unwrap();
    assert_eq!(addr, 0x1400);

    let addr = env
        .import_function("env", "__gate_func_ptr", &Signature::new(&[ValueType::I32], Some(ValueType::I32)))
        .unwrap();
    assert_eq!(addr, 0x1100);
}

#[test]
fn test_import_function_wrong_signature() {
    let env = environment();
    let requested = Signature::new(&[ValueType::I64], None);

    let err = env.import_function("env", "__gate_exit", &requested).unwrap_err();
    assert!(err.is_abi_mismatch());

    match err {
        SandboxError::WrongSignature {
            field,
            expected,
            requested: got,
        } => {
            assert_eq!(field, "__gate_exit");
            assert_eq!(expected, Signature::new(&[ValueType::I32], None));
            assert_eq!(got, requested);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_import_function_result_mismatch() {
    let env = environment();
    let err = env
        .import_function("env", "__gate_exit", &Signature::new(&[ValueType::I32], Some(ValueType::I32)))
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("(i32) -> i32"));
    assert!(message.contains("wrong signature"));
}

#[test]
fn test_import_function_wrong_namespace() {
    let env = environment();
    let sig = Signature::new(&[ValueType::I32], None);

    for module in ["", "wasi_snapshot_preview1", "ENV", "env "] {
        let err = env.import_function(module, "__gate_exit", &sig).unwrap_err();
        assert!(
            matches!(err, SandboxError::FunctionNotFound { .. }),
            "module {:?} should not resolve",
            module
        );
    }
}

#[test]
fn test_import_function_unknown_field() {
    let env = environment();

    // Allow-listed but absent from this loader
    let err = env
        .import_function("env", "__gate_get_arg", &Signature::new(&[], Some(ValueType::I32)))
        .unwrap_err();
    assert!(matches!(err, SandboxError::FunctionNotFound { .. }));

    // Present in the loader but not part of the ABI
    let err = env
        .import_function("env", "_start", &Signature::default())
        .unwrap_err();
    assert!(!err.is_abi_mismatch());
    assert_eq!(err.to_string(), "imported function not found: env _start ()");
}

#[test]
fn test_import_global() {
    let env = environment();

    assert_eq!(
        env.import_global("env", "__gate_abi_version", ValueType::I32).unwrap(),
        abi::ABI_VERSION
    );
    assert_eq!(
        env.import_global("env", "__gate_max_packet_size", ValueType::I32).unwrap(),
        abi::MAX_PACKET_SIZE
    );

    let err = env.import_global("env", "__gate_arg", ValueType::I32).unwrap_err();
    assert!(matches!(err, SandboxError::GlobalNotFound { .. }));

    let err = env
        .import_global("other", "__gate_abi_version", ValueType::I32)
        .unwrap_err();
    assert_eq!(err.to_string(), "imported global not found: other __gate_abi_version i32");
}

#[test]
fn test_import_global_injected_constants() {
    let env = environment().with_abi(AbiConstants {
        version: 7,
        max_packet_size: 4096,
    });

    assert_eq!(env.import_global("env", "__gate_abi_version", ValueType::I32).unwrap(), 7);
    assert_eq!(env.import_global("env", "__gate_max_packet_size", ValueType::I64).unwrap(), 4096);
}

#[test]
fn test_entry_points() {
    let env = environment();
    assert_eq!(env.entry_points().count(), 5);
    assert_eq!(env.entry_point("__gate_get_abi_version").unwrap().addr, 0x1000);
    assert!(env.entry_point("_start").is_none());
    assert_eq!(env.executor(), Path::new("/usr/lib/gate/executor"));
}

#[test]
fn test_environment_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Environment>();
}

#[test]
fn test_close() {
    let env = environment();
    env.close().unwrap();
}
