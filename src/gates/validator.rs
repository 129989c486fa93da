/// Checks a worker's raw output for its completion marker.
///
/// Matching is exact and verbatim: no case folding, no trimming, no fuzzy
/// acceptance. An empty marker never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateValidator;

impl GateValidator {
    pub fn check(raw_output: &str, marker: &str) -> bool {
        !marker.is_empty() && raw_output.contains(marker)
    }

    /// True if any of `markers` occurs verbatim.
    pub fn check_any(raw_output: &str, markers: &[&str]) -> bool {
        markers.iter().any(|m| Self::check(raw_output, m))
    }
}
