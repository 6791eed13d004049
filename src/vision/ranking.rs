//! Softmax ranking of raw model scores

use std::fmt;

use super::error::RecognizeError;

/// Top class for one inference call
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Class symbol
    pub label: String,
    /// Index in the model's output order
    pub index: usize,
    /// Softmax probability (0.0 - 1.0)
    pub confidence: f32,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}%)", self.label, self.confidence * 100.0)
    }
}

/// Numerically stable softmax
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; ties go to the first occurrence
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, best_v)) if v <= best_v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

fn check_scores(scores: &[f32], labels: &[String]) -> Result<(), RecognizeError> {
    if scores.is_empty() {
        return Err(RecognizeError::Inference("model returned no scores".to_string()));
    }
    if scores.len() != labels.len() {
        return Err(RecognizeError::ContractViolation {
            what: "class count",
            expected: labels.len().to_string(),
            actual: scores.len().to_string(),
        });
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(RecognizeError::Inference(format!(
            "model returned a non-finite score ({})",
            bad
        )));
    }
    Ok(())
}

/// Pick the most probable class
pub fn top_prediction(scores: &[f32], labels: &[String]) -> Result<Prediction, RecognizeError> {
    check_scores(scores, labels)?;
    let probs = softmax(scores);
    // check_scores guarantees a non-empty vector
    let index = argmax(&probs).unwrap_or(0);

    Ok(Prediction {
        label: labels[index].clone(),
        index,
        confidence: probs[index],
    })
}

/// All classes ordered by probability, ties by lower index
pub fn rank(scores: &[f32], labels: &[String]) -> Result<Vec<Prediction>, RecognizeError> {
    check_scores(scores, labels)?;
    let mut ranked: Vec<Prediction> = softmax(scores)
        .into_iter()
        .enumerate()
        .map(|(index, confidence)| Prediction {
            label: labels[index].clone(),
            index,
            confidence,
        })
        .collect();
    // Stable sort keeps index order among equal probabilities
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits() -> Vec<String> {
        (0..10).map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        for scores in [
            vec![1.0, 2.0, 3.0],
            vec![-50.0, 0.0, 50.0, 1e-3],
            vec![1000.0, 1000.0, 999.0],
            vec![0.0],
        ] {
            let sum: f32 = softmax(&scores).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum {} for {:?}", sum, scores);
        }
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let scores = [0.3, -1.2, 2.5, 0.0];
        let shifted: Vec<f32> = scores.iter().map(|s| s + 100.0).collect();
        for (a, b) in softmax(&scores).iter().zip(softmax(&shifted)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_large_scores_do_not_overflow() {
        let probs = softmax(&[10_000.0, 0.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_first_occurrence() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_top_prediction_from_stub_scores() {
        let mut scores = vec![0.0f32; 10];
        scores[0] = 1.0;
        scores[1] = 2.0;
        scores[2] = 3.0;

        let prediction = top_prediction(&scores, &digits()).unwrap();
        assert_eq!(prediction.index, 2);
        assert_eq!(prediction.label, "2");
        assert!((prediction.confidence - softmax(&scores)[2]).abs() < 1e-7);
    }

    #[test]
    fn test_uniform_scores_pick_first_class() {
        let prediction = top_prediction(&[0.0; 10], &digits()).unwrap();
        assert_eq!(prediction.index, 0);
        assert!((prediction.confidence - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_rank_orders_by_probability() {
        let labels: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let ranked = rank(&[0.5, 2.0, 0.5, -1.0], &labels).unwrap();
        let order: Vec<usize> = ranked.iter().map(|p| p.index).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_bad_scores_are_rejected() {
        assert!(matches!(top_prediction(&[], &[]), Err(RecognizeError::Inference(_))));
        assert!(matches!(
            top_prediction(&[1.0, f32::NAN], &["x".to_string(), "y".to_string()]),
            Err(RecognizeError::Inference(_))
        ));
        assert!(matches!(
            top_prediction(&[1.0, 2.0], &digits()),
            Err(RecognizeError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_display() {
        let prediction = Prediction {
            label: "၃".to_string(),
            index: 3,
            confidence: 0.973,
        };
        assert_eq!(prediction.to_string(), "၃ (97.3%)");
    }
}
