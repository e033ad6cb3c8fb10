//! Deterministically maps analyzer output to `{verdict, confidence,
//! indicators}`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ClassifierConfig;
use crate::domain::{Indicator, Verdict};

/// Fixed contribution of a non-zero exit code toward confidence.
pub const EXIT_CODE_WEIGHT: f64 = 0.5;

struct Pattern {
    tag: &'static str,
    weight: f64,
    regex: Lazy<Regex>,
}

macro_rules! pattern {
    ($tag:literal, $weight:expr, $re:literal) => {
        Pattern {
            tag: $tag,
            weight: $weight,
            regex: Lazy::new(|| Regex::new($re).expect("classifier pattern must compile")),
        }
    };
}

/// Critical indicators (weight >= 0.6): packet-format violations, invalid
/// bitstream, truncation, decode errors, missing reference pictures,
/// corrupt packets.
static CRITICAL_PATTERNS: &[Pattern] = &[
    pattern!("invalid_nal", 0.7, r"(?i)invalid nal unit"),
    pattern!("packet_format_violation", 0.65, r"(?i)invalid data found when processing input|packet format"),
    pattern!("frame_corrupt", 0.7, r"(?i)frame corrupt|truncated"),
    pattern!("decode_error", 0.75, r"(?i)error while decoding|decode.?error"),
    pattern!("missing_reference_picture", 0.6, r"(?i)missing reference picture|no reference picture"),
    pattern!("corrupt_input_packet", 0.65, r"(?i)corrupt(?:ed)? input packet|concealing \d+ dc"),
];

/// Warning indicators (weight 0.2-0.5): minor stream irregularities.
static WARNING_PATTERNS: &[Pattern] = &[
    pattern!("dts_non_monotonic", 0.3, r"(?i)non-?monoton(?:ous|ic) dts"),
    pattern!("timestamp_discontinuity", 0.25, r"(?i)timestamp discontinuity"),
    pattern!("frame_skipped", 0.2, r"(?i)frame skipped"),
    pattern!("buffer_underflow", 0.35, r"(?i)buffer underflow"),
    pattern!("invalid_frame_size", 0.3, r"(?i)invalid frame size"),
];

fn all_patterns() -> impl Iterator<Item = &'static Pattern> {
    CRITICAL_PATTERNS.iter().chain(WARNING_PATTERNS.iter())
}

/// Result of classification: verdict, confidence, and matched indicators.
#[derive(Debug, Clone)]
pub struct Classification {
    pub verdict: Verdict,
    pub confidence: f64,
    pub indicators: Vec<Indicator>,
}

/// Input to the classifier: analyzer exit code and diagnostic text.
pub struct ClassifierInput<'a> {
    pub exit_code: Option<i32>,
    pub diagnostic_text: &'a str,
    /// True when the probe succeeded with a video stream (step 4).
    pub probe_succeeded_with_video: bool,
}

/// Deterministically classify one analyzer invocation's output.
pub fn classify(input: &ClassifierInput<'_>, config: &ClassifierConfig) -> Classification {
    let mut confidence = 0.0_f64;
    let mut indicators: Vec<Indicator> = Vec::new();

    let exit_nonzero = input.exit_code.map(|c| c != 0).unwrap_or(false);
    if exit_nonzero {
        confidence += EXIT_CODE_WEIGHT;
    }

    for pattern in all_patterns() {
        let match_count = pattern.regex.find_iter(input.diagnostic_text).count();
        if match_count == 0 {
            continue;
        }
        let frequency_term = (0.05 * (1.0 + match_count as f64).log2()).min(0.2);
        confidence += pattern.weight + frequency_term;
        indicators.push(Indicator {
            tag: pattern.tag.to_string(),
            weight: pattern.weight,
        });
    }

    // Step 4: a clean probe with no diagnostics and exit 0 contributes
    // nothing further — confidence is never manufactured from silence.
    confidence = confidence.min(1.0);

    // Empty diagnostics but non-zero exit still floors the verdict at
    // `suspicious` rather than reporting healthy on silence.
    let corrupt_threshold = config.corrupt_threshold;
    let low_threshold = config.low_threshold;
    let mut verdict = if confidence >= corrupt_threshold {
        Verdict::Corrupt
    } else if confidence >= low_threshold {
        Verdict::Suspicious
    } else {
        Verdict::Healthy
    };
    if exit_nonzero && indicators.is_empty() && verdict == Verdict::Healthy {
        verdict = Verdict::Suspicious;
        confidence = confidence.max(low_threshold);
    }

    indicators.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });

    Classification {
        verdict,
        confidence,
        indicators,
    }
}
