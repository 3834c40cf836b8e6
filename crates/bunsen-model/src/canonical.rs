//! Canonical JSON encoding.
//!
//! Every stored representation of a testrun (commit message, index entry,
//! full testrun file) must be byte-identical, so serialization is pinned
//! down: UTF-8, object keys sorted at every level, no insignificant
//! whitespace, numbers in shortest round-trip form.

use serde::Serialize;

use crate::ModelError;

/// Serialize `value` to its canonical JSON form.
///
/// Routing through `serde_json::Value` re-keys every object into a sorted
/// map, so field declaration order never leaks into the output.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ModelError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testrun::Testrun;

    #[test]
    fn keys_are_sorted_at_every_level() {
        let run = Testrun {
            year_month: Some("2020-01".into()),
            arch: Some("x86_64".into()),
            ..Default::default()
        };
        let json = canonical_json(&run).unwrap();
        let arch = json.find("\"arch\"").unwrap();
        let ym = json.find("\"year_month\"").unwrap();
        assert!(arch < ym, "keys not sorted: {json}");
    }

    #[test]
    fn no_insignificant_whitespace() {
        let run = Testrun {
            pass_count: Some(3),
            ..Default::default()
        };
        let json = canonical_json(&run).unwrap();
        assert!(!json.contains(": "));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn reserialization_is_stable() {
        let json = r#"{"fail_count":1,"pass_count":2,"zz_custom":"v"}"#;
        let run = Testrun::from_json(json).unwrap();
        assert_eq!(run.to_json().unwrap(), json);
        let again = Testrun::from_json(&run.to_json().unwrap()).unwrap();
        assert_eq!(again, run);
    }
}
