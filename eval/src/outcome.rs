use pilot::exit_codes;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Ceiling,
    Error,
}

/// Classify a run from the pilot exit code and the verdict, if one was made.
pub fn classify_outcome(pilot_exit_code: Option<i32>, judgment: Option<&Judgment>) -> Outcome {
    match (pilot_exit_code, judgment) {
        (Some(exit_codes::OK), Some(judgment)) if judgment.guideline_met => Outcome::Success,
        (Some(exit_codes::OK), Some(_)) => Outcome::Fail,
        (Some(exit_codes::CEILING), _) => Outcome::Ceiling,
        _ => Outcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgment(met: bool) -> Judgment {
        Judgment {
            guideline_met: met,
            reason: "because".to_string(),
        }
    }

    #[test]
    fn success_when_finished_and_guideline_met() {
        let outcome = classify_outcome(Some(0), Some(&judgment(true)));
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn fail_when_finished_but_guideline_missed() {
        let outcome = classify_outcome(Some(0), Some(&judgment(false)));
        assert_eq!(outcome, Outcome::Fail);
    }

    #[test]
    fn ceiling_regardless_of_verdict() {
        assert_eq!(
            classify_outcome(Some(4), Some(&judgment(true))),
            Outcome::Ceiling
        );
        assert_eq!(classify_outcome(Some(4), None), Outcome::Ceiling);
    }

    #[test]
    fn error_otherwise() {
        assert_eq!(classify_outcome(Some(0), None), Outcome::Error);
        assert_eq!(classify_outcome(Some(1), Some(&judgment(true))), Outcome::Error);
        assert_eq!(classify_outcome(Some(3), None), Outcome::Error);
        assert_eq!(classify_outcome(None, Some(&judgment(true))), Outcome::Error);
    }
}
