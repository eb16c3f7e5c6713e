use crate::core::recognizer::Embedding;
use crate::storage::Gallery;

/// Outcome of matching one face embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known { name: String, distance: f32, index: usize },
    Unknown,
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Known { name, .. } => Some(name),
            MatchOutcome::Unknown => None,
        }
    }

    pub fn label(&self) -> &str {
        self.name().unwrap_or("Unknown")
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Nearest-neighbour matcher over gallery embeddings.
///
/// An entry is a candidate when its distance is within `threshold`
/// (inclusive). With at least one candidate, the closest entry across the
/// whole gallery wins, provided it is itself within the threshold. Equal
/// distances resolve to the lowest gallery index.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    threshold: f32,
}

impl Matcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn match_embedding(&self, embedding: &Embedding, gallery: &Gallery) -> MatchOutcome {
        let mut any_candidate = false;
        let mut best: Option<(usize, f32)> = None;

        for (index, (encoding, _)) in gallery.entries().enumerate() {
            if encoding.len() != embedding.len() {
                continue;
            }
            let distance = euclidean_distance(embedding, encoding);
            if distance <= self.threshold {
                any_candidate = true;
            }
            // strict `<` keeps the first index on ties
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        if !any_candidate {
            return MatchOutcome::Unknown;
        }

        match best {
            Some((index, distance)) if distance <= self.threshold => MatchOutcome::Known {
                name: gallery.names()[index].clone(),
                distance,
                index,
            },
            _ => MatchOutcome::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(entries: Vec<(Vec<f32>, &str)>) -> Gallery {
        let (encodings, names) = entries.into_iter().map(|(e, n)| (e, n.to_string())).unzip();
        Gallery::from_parts(encodings, names).unwrap()
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let matcher = Matcher::new(0.5);
        assert_eq!(matcher.match_embedding(&vec![0.0, 0.0], &Gallery::default()), MatchOutcome::Unknown);
    }

    #[test]
    fn test_picks_closest_identity() {
        let g = gallery(vec![(vec![1.0, 0.0], "bob"), (vec![0.1, 0.0], "ada"), (vec![0.3, 0.0], "ada")]);
        let outcome = Matcher::new(0.5).match_embedding(&vec![0.0, 0.0], &g);
        assert_eq!(outcome.name(), Some("ada"));
        assert!(matches!(outcome, MatchOutcome::Known { index: 1, .. }));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let g = gallery(vec![(vec![0.0, 0.0], "ada")]);
        let matcher = Matcher::new(0.5);

        let at = matcher.match_embedding(&vec![0.5, 0.0], &g);
        assert_eq!(at.name(), Some("ada"));

        let beyond = matcher.match_embedding(&vec![0.500_1, 0.0], &g);
        assert_eq!(beyond, MatchOutcome::Unknown);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let g = gallery(vec![(vec![0.2, 0.0], "first"), (vec![-0.2, 0.0], "second"), (vec![0.0, 0.2], "third")]);
        let matcher = Matcher::new(0.5);
        for _ in 0..10 {
            let outcome = matcher.match_embedding(&vec![0.0, 0.0], &g);
            assert_eq!(outcome.name(), Some("first"));
        }
    }

    #[test]
    fn test_dimension_mismatch_is_skipped() {
        let g = gallery(vec![(vec![0.0, 0.0, 0.0], "wrong_dim"), (vec![0.1, 0.0], "ada")]);
        let outcome = Matcher::new(0.5).match_embedding(&vec![0.0, 0.0], &g);
        assert_eq!(outcome.name(), Some("ada"));
    }

    #[test]
    fn test_no_candidate_is_unknown_even_when_closest_exists() {
        let g = gallery(vec![(vec![3.0, 0.0], "far"), (vec![2.0, 0.0], "less_far")]);
        assert_eq!(Matcher::new(0.5).match_embedding(&vec![0.0, 0.0], &g).label(), "Unknown");
    }
}
