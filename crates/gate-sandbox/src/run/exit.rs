//! Loader exit codes.

/// Describe an exit code reserved by the loader for setup failures.
///
/// The loader runs before any module code and reports each failed setup step
/// with its own code, so these never collide with module exit statuses.
pub fn loader_diagnosis(code: i32) -> Option<&'static str> {
    match code {
        48 => Some("loader could not make itself non-dumpable"),
        49 => Some("loader could not reset its execution domain"),
        50 => Some("loader could not read the payload descriptor"),
        51 => Some("loader rejected the payload descriptor"),
        52 => Some("loader could not map read-only data"),
        53 => Some("loader could not map code"),
        54 => Some("loader could not map globals and linear memory"),
        55 => Some("loader could not map the stack"),
        56 => Some("loader could not close the payload descriptor"),
        58 => Some("loader could not unmap its initial stack"),
        59 => Some("loader could not install its signal handler"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert!(loader_diagnosis(50).unwrap().contains("descriptor"));
        assert!(loader_diagnosis(55).unwrap().contains("stack"));
    }

    #[test]
    fn test_module_codes_pass_through() {
        for code in [0, 1, 2, 47, 57, 60, 127] {
            assert_eq!(loader_diagnosis(code), None);
        }
    }
}
