//! Output line classification.
//!
//! Matches encoder output lines against known failure signatures. This is a
//! pure step: it never decides whether the process should be stopped.

use serde::{Deserialize, Serialize};

/// Case-insensitive substrings that mark a line as a failure diagnostic.
const FATAL_SIGNATURES: &[&str] = &[
    "[error]",
    "error",
    "failed",
    "impossible",
    "could not",
    "cannot",
    "invalid",
    "not found",
    "permission denied",
    "no such file",
    "hardware is lacking",
    "function not implemented",
];

/// Case-insensitive substrings meaning the hardware encoder cannot run here.
const HARDWARE_UNAVAILABLE_SIGNATURES: &[&str] = &[
    "nvencodeapi",
    "no nvenc capable devices",
    "cannot load libcuda",
    "cuda_error_no_device",
];

/// Classification of a single output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineClass {
    /// Line matches a failure signature.
    pub fatal: bool,
    /// Line matches the hardware-encoder-unavailable signature.
    pub hardware_unavailable: bool,
}

/// Stateless matcher for encoder output lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        ErrorClassifier
    }

    pub fn classify(&self, line: &str) -> LineClass {
        let lower = line.to_lowercase();
        LineClass {
            fatal: contains_any(&lower, FATAL_SIGNATURES),
            hardware_unavailable: contains_any(&lower, HARDWARE_UNAVAILABLE_SIGNATURES),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Human-readable meaning of an encoder exit code.
///
/// `None` means the process ended without an exit code (killed by a signal).
pub fn describe_exit_code(code: Option<i32>) -> String {
    let code = match code {
        Some(code) => code,
        None => return "terminated by signal".to_string(),
    };

    let known = match code {
        0 => "Success",
        1 => "Unknown error",
        -1 => "Process terminated",
        -2 => "Invalid argument",
        -3 => "No such file or directory",
        -4 => "Permission denied",
        -5 => "I/O error",
        -6 => "No space left on device",
        -7 => "Out of memory",
        -8 => "Invalid data found",
        -9 => "Operation not permitted",
        -10 => "Protocol error",
        -11 => "Not found",
        -12 => "Not available",
        -13 => "Invalid",
        -14 => "EOF",
        -15 => "Not implemented",
        -16 => "Bug",
        -17 => "Unknown error",
        -18 => "Experimental",
        -19 => "Input changed",
        -20 => "Output changed",
        -22 => "Invalid argument",
        -40 => "Function not implemented",
        -50 => "Invalid argument",
        -100 => "Unknown error",
        _ => return format!("Unknown error code: {}", code),
    };
    known.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fatal(line: &str) -> bool {
        ErrorClassifier::new().classify(line).fatal
    }

    fn hardware_unavailable(line: &str) -> bool {
        ErrorClassifier::new().classify(line).hardware_unavailable
    }

    #[test]
    fn test_common_failures_are_fatal() {
        for line in [
            "[error] something broke",
            "Error opening input file in.mp4",
            "Conversion FAILED!",
            "in.mp4: No such file or directory",
            "Invalid data found when processing input",
            "Could not write header for output file #0",
            "out.mp4: Permission denied",
            "Encoder not found",
            "[h264_nvenc @ 0x1] Hardware is lacking required capabilities",
            "Function not implemented",
        ] {
            assert!(fatal(line), "expected fatal: {}", line);
        }
    }

    #[test]
    fn test_progress_lines_are_clean() {
        let classifier = ErrorClassifier::new();
        for line in [
            "frame=120",
            "fps=59.94",
            "out_time_us=4000000",
            "speed=2.01x",
            "progress=continue",
            "progress=end",
            "",
        ] {
            assert_eq!(classifier.classify(line), LineClass::default(), "expected clean: {}", line);
        }
    }

    #[test]
    fn test_nvenc_dll_line_is_hardware_unavailable() {
        let class = ErrorClassifier::new()
            .classify("[h264_nvenc @ 000001] Cannot load nvEncodeAPI64.dll");
        assert!(class.hardware_unavailable);
        assert!(class.fatal);
    }

    #[test]
    fn test_other_hardware_signatures() {
        assert!(hardware_unavailable("No NVENC capable devices found"));
        assert!(hardware_unavailable("Cannot load libcuda.so.1"));
        assert!(!hardware_unavailable("Error while decoding stream #0:0"));
    }

    #[test]
    fn test_exit_code_descriptions() {
        assert_eq!(describe_exit_code(Some(0)), "Success");
        assert_eq!(describe_exit_code(Some(-4)), "Permission denied");
        assert_eq!(describe_exit_code(Some(-40)), "Function not implemented");
        assert_eq!(describe_exit_code(Some(187)), "Unknown error code: 187");
        assert_eq!(describe_exit_code(None), "terminated by signal");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_classification_ignores_case(
            signature in prop::sample::select(FATAL_SIGNATURES.to_vec()),
            prefix in "[a-z ]{0,10}",
            upper in proptest::bool::ANY,
        ) {
            let line = format!("{}{}", prefix, signature);
            let line = if upper { line.to_uppercase() } else { line };
            prop_assert!(fatal(&line));
        }

        #[test]
        fn prop_digits_and_keys_never_fatal(frame in 0u64..10_000_000) {
            let line = format!("frame={}", frame);
            prop_assert_eq!(ErrorClassifier::new().classify(&line), LineClass::default());
        }
    }
}
