//! Line parser for the acquisition device's serial log.
//!
//! Recognised lines:
//! - `[<ms> ms] ECG= <mV> mV`
//! - a bare decimal sample with a fractional part, e.g. `-0.125` or `.5`
//! - `Sinus = <p>, AFib = <p>` (trailing text allowed) or
//!   `Sinus prob: <p>, AFib prob: <p>` (nothing after the last value)
//!
//! Anything else is boot chatter and is ignored.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireLine {
    Sample {
        /// Device uptime stamp, when the line carried one.
        device_ms: Option<u64>,
        millivolts: f64,
    },
    Classification {
        p_normal: f64,
        p_abnormal: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelForm {
    Equals,
    Prob,
}

pub fn parse_line(line: &str) -> Option<WireLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix('[') {
        return parse_stamped_sample(rest);
    }
    if line.starts_with("Sinus") {
        return parse_classification(line);
    }
    // Integers on their own are counters and status codes, not samples.
    parse_decimal(line, true).map(|millivolts| WireLine::Sample {
        device_ms: None,
        millivolts,
    })
}

fn parse_stamped_sample(rest: &str) -> Option<WireLine> {
    let (stamp, rest) = rest.split_once(']')?;
    let device_ms = stamp.trim().strip_suffix("ms")?.trim().parse().ok()?;
    let value = rest.trim_start().strip_prefix("ECG=")?;
    let millivolts = parse_decimal(value.split_whitespace().next()?, false)?;
    Some(WireLine::Sample {
        device_ms: Some(device_ms),
        millivolts,
    })
}

fn parse_classification(line: &str) -> Option<WireLine> {
    let (normal, abnormal) = line.split_once(',')?;
    let (p_normal, form, rest) = labelled_value(normal, "Sinus")?;
    if !rest.trim().is_empty() {
        return None;
    }
    let (p_abnormal, abnormal_form, rest) = labelled_value(abnormal, "AFib")?;
    if abnormal_form != form || (form == LabelForm::Prob && !rest.trim().is_empty()) {
        return None;
    }
    Some(WireLine::Classification {
        p_normal,
        p_abnormal,
    })
}

/// `<name> = <v>` or `<name> prob: <v>`; returns the value, the form and
/// whatever follows the number.
fn labelled_value<'a>(part: &'a str, name: &str) -> Option<(f64, LabelForm, &'a str)> {
    let rest = part.trim_start().strip_prefix(name)?.trim_start();
    let (form, value) = match rest.strip_prefix('=') {
        Some(value) => (LabelForm::Equals, value),
        None => (LabelForm::Prob, rest.strip_prefix("prob:")?),
    };
    let value = value.trim_start();
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(value.len());
    let (number, rest) = value.split_at(end);
    Some((parse_decimal(number, false)?, form, rest))
}

/// `[-+]?\d*\.\d+`, or `[-+]?\d+` as well when no fraction is required.
/// `inf`, `nan`, exponents and a trailing `.` are not wire values.
fn parse_decimal(text: &str, fraction_required: bool) -> Option<f64> {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let valid = match unsigned.split_once('.') {
        Some((int, frac)) => all_digits(int) && !frac.is_empty() && all_digits(frac),
        None => !fraction_required && !unsigned.is_empty() && all_digits(unsigned),
    };
    if !valid {
        return None;
    }
    text.parse().ok()
}
