//! Step expansion.
//!
//! Turns a parameter's stepping specification plus its range into the concrete,
//! ordered values the scan will visit. Values are generated once here and then
//! carried unchanged into the results, so what is reported is exactly what was
//! evaluated.

use crate::domain::{ParamSpec, Spacing, StepSpec};
use crate::error::{Result, ScanError};

/// Upper bound on the values one parameter may be stepped through.
pub const MAX_STEPS: usize = 1_000_000;

/// Expand `steps` over `range = (min, max)`.
///
/// For counted specifications the first value is `min`, the last is `max`
/// (when `count > 1`) and a single step yields `[min]`.
pub fn expand(range: (f64, f64), steps: &StepSpec) -> Result<Vec<f64>> {
    let (min, max) = range;
    if !(min.is_finite() && max.is_finite()) {
        return Err(ScanError::Config(format!("non-finite range [{min}, {max}]")));
    }
    if min > max {
        return Err(ScanError::InvalidRange { min, max });
    }

    match steps {
        StepSpec::Count(count) => linear_space(min, max, *count),
        StepSpec::Spaced { count, spacing } => match spacing {
            Spacing::Linear => linear_space(min, max, *count),
            Spacing::Log => log_space(min, max, *count),
        },
        StepSpec::Values { values } => explicit_values(min, max, values),
    }
}

/// Expand the stepping specification carried by a parameter.
pub fn expand_param(name: &str, spec: &ParamSpec) -> Result<Vec<f64>> {
    let steps = spec
        .steps
        .as_ref()
        .ok_or_else(|| ScanError::Config("no stepping specification".to_string()).for_param(name))?;
    let range = spec
        .range
        .ok_or_else(|| ScanError::Config("scanned parameter has no range".to_string()).for_param(name))?;
    expand(range, steps).map_err(|e| e.for_param(name))
}

/// Generate `count` evenly spaced points between `min` and `max` (inclusive).
pub fn linear_space(min: f64, max: f64, count: usize) -> Result<Vec<f64>> {
    check_count(count)?;
    if count == 1 {
        return Ok(vec![min]);
    }

    let step = (max - min) / (count as f64 - 1.0);
    let mut out = Vec::with_capacity(count);
    for i in 0..count - 1 {
        out.push(min + step * i as f64);
    }
    // Pin the endpoint instead of accumulating rounding error into it.
    out.push(max);
    Ok(out)
}

/// Generate `count` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, count: usize) -> Result<Vec<f64>> {
    check_count(count)?;
    if !(min > 0.0 && max > 0.0) {
        return Err(ScanError::Config(format!(
            "log spacing needs a strictly positive range, got [{min}, {max}]"
        )));
    }
    if count == 1 {
        return Ok(vec![min]);
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (count as f64 - 1.0);

    let mut out = Vec::with_capacity(count);
    out.push(min);
    for i in 1..count - 1 {
        out.push((ln_min + step * i as f64).exp());
    }
    out.push(max);
    Ok(out)
}

fn check_count(count: usize) -> Result<()> {
    if (1..=MAX_STEPS).contains(&count) {
        Ok(())
    } else {
        Err(ScanError::InvalidStepCount { count })
    }
}

fn explicit_values(min: f64, max: f64, values: &[f64]) -> Result<Vec<f64>> {
    check_count(values.len())?;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(ScanError::InvalidStepValues(format!("value #{i} is not finite")));
        }
        if v < min || v > max {
            return Err(ScanError::InvalidStepValues(format!(
                "value {v} lies outside the range [{min}, {max}]"
            )));
        }
        if i > 0 && v < values[i - 1] {
            return Err(ScanError::InvalidStepValues(format!(
                "values must be non-decreasing ({} then {v})",
                values[i - 1]
            )));
        }
    }
    Ok(values.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_five_steps_over_unit_range() {
        let v = expand((0.0, 1.0), &StepSpec::Count(5)).unwrap();
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn linear_includes_endpoints_and_is_sorted() {
        for n in 2..40 {
            let v = linear_space(0.35, 0.65, n).unwrap();
            assert_eq!(v.len(), n);
            assert_eq!(v[0], 0.35);
            assert_eq!(v[n - 1], 0.65);
            assert!(v.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn single_step_is_range_min() {
        assert_eq!(expand((0.002, 0.003), &StepSpec::Count(1)).unwrap(), vec![0.002]);
        let log = StepSpec::Spaced {
            count: 1,
            spacing: Spacing::Log,
        };
        assert_eq!(expand((0.1, 10.0), &log).unwrap(), vec![0.1]);
    }

    #[test]
    fn zero_steps_is_rejected() {
        assert!(matches!(
            expand((0.0, 1.0), &StepSpec::Count(0)),
            Err(ScanError::InvalidStepCount { count: 0 })
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            expand((1.0, 0.0), &StepSpec::Count(3)),
            Err(ScanError::InvalidRange { .. })
        ));
    }

    #[test]
    fn log_space_includes_endpoints() {
        let spec = StepSpec::Spaced {
            count: 3,
            spacing: Spacing::Log,
        };
        let v = expand((0.1, 10.0), &spec).unwrap();
        assert_eq!(v[0], 0.1);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-12);
        assert_eq!(v[2], 10.0);
    }

    #[test]
    fn log_space_needs_positive_range() {
        let spec = StepSpec::Spaced {
            count: 3,
            spacing: Spacing::Log,
        };
        assert!(expand((-0.003, -0.002), &spec).is_err());
    }

    #[test]
    fn explicit_values_pass_through_unchanged() {
        let spec = StepSpec::Values {
            values: vec![0.4, 0.45, 0.6],
        };
        assert_eq!(expand((0.35, 0.65), &spec).unwrap(), vec![0.4, 0.45, 0.6]);
    }

    #[test]
    fn explicit_values_must_be_sorted_and_in_range() {
        let unsorted = StepSpec::Values {
            values: vec![0.5, 0.4],
        };
        let outside = StepSpec::Values { values: vec![0.9] };
        assert!(matches!(
            expand((0.35, 0.65), &unsorted),
            Err(ScanError::InvalidStepValues(_))
        ));
        assert!(matches!(
            expand((0.35, 0.65), &outside),
            Err(ScanError::InvalidStepValues(_))
        ));
    }

    #[test]
    fn expand_param_names_the_parameter() {
        let spec = ParamSpec::new(0.5)
            .with_range(0.35, 0.65)
            .with_steps(StepSpec::Count(0));
        let err = expand_param("theta23", &spec).unwrap_err();
        assert!(err.to_string().contains("theta23"));
    }

    #[test]
    fn oversized_step_count_is_rejected_before_allocating() {
        for count in [MAX_STEPS + 1, usize::MAX / 4, usize::MAX] {
            assert!(matches!(
                expand((0.0, 1.0), &StepSpec::Count(count)),
                Err(ScanError::InvalidStepCount { .. })
            ));
            let log = StepSpec::Spaced {
                count,
                spacing: Spacing::Log,
            };
            assert!(matches!(
                expand((1.0, 10.0), &log),
                Err(ScanError::InvalidStepCount { .. })
            ));
        }
        assert_eq!(linear_space(0.0, 1.0, MAX_STEPS).unwrap().len(), MAX_STEPS);
    }
}
