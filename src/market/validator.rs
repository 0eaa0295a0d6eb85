use crate::market::types::RawNumber;

/// Gatekeeper for price candidates. Anything it refuses never reaches the calculator,
/// the history buffer or the stats.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    min_price: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Validator {
    pub fn new(min_price: f64) -> Self {
        Self { min_price }
    }

    /// Returns the price when it is finite and strictly above the configured floor.
    pub fn validate(&self, raw: Option<&RawNumber>) -> Option<f64> {
        raw.and_then(RawNumber::as_finite)
            .filter(|price| *price > self.min_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::IgnoredAny;

    #[test]
    fn accepts_numbers_and_numeric_text() {
        let validator = Validator::default();
        assert_eq!(validator.validate(Some(&RawNumber::Number(2400.5))), Some(2400.5));
        assert_eq!(
            validator.validate(Some(&RawNumber::Text(" 2400.5 ".to_string()))),
            Some(2400.5)
        );
    }

    #[test]
    fn rejects_non_finite_and_garbage() {
        let validator = Validator::default();
        for raw in [
            RawNumber::Number(f64::NAN),
            RawNumber::Number(f64::INFINITY),
            RawNumber::Number(f64::NEG_INFINITY),
            RawNumber::Text("NaN".to_string()),
            RawNumber::Text("Infinity".to_string()),
            RawNumber::Text("abc".to_string()),
            RawNumber::Text(String::new()),
            RawNumber::Other(IgnoredAny),
        ] {
            assert_eq!(validator.validate(Some(&raw)), None, "{raw:?} should be rejected");
        }
        assert_eq!(validator.validate(None), None);
    }

    #[test]
    fn enforces_lower_bound() {
        let validator = Validator::new(100.0);
        assert_eq!(validator.validate(Some(&RawNumber::Number(100.0))), None);
        assert_eq!(validator.validate(Some(&RawNumber::Number(-5.0))), None);
        assert_eq!(validator.validate(Some(&RawNumber::Number(100.01))), Some(100.01));
    }
}
