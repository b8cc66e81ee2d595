//! Language detection
//!
//! A [`CandidateSource`] ranks languages for a piece of text; the
//! [`LanguageDetector`] picks one of them, preferring the destination
//! language whenever it scores above the configured threshold. This keeps
//! noisy destination-language text (slang, typos, short replies) from being
//! mistaken for a foreign language.

use lingua::{Language, LanguageDetectorBuilder};
use tracing::debug;

/// Returned when no language could be detected.
pub const UNKNOWN_LANGUAGE: &str = "?";

/// One ranked detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// ISO 639-1 code, lowercase
    pub language: String,
    /// Probability in `0.0..=1.0`
    pub probability: f64,
}

impl Candidate {
    /// Create a candidate.
    #[must_use]
    pub fn new(language: impl Into<String>, probability: f64) -> Self {
        Self {
            language: language.into(),
            probability,
        }
    }
}

/// Statistical model that ranks candidate languages for a text.
pub trait CandidateSource: Send + Sync {
    /// Candidates ordered from most to least likely. May be empty.
    fn candidates(&self, text: &str) -> Vec<Candidate>;
}

/// [`CandidateSource`] backed by the `lingua` n-gram models.
pub struct LinguaSource {
    detector: lingua::LanguageDetector,
}

impl LinguaSource {
    /// Build a detector over every language `lingua` knows.
    ///
    /// All models are loaded up front, which blocks for several seconds;
    /// call from a blocking context or use [`LinguaSource::load`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            detector: LanguageDetectorBuilder::from_all_languages()
                .with_preloaded_language_models()
                .build(),
        }
    }

    /// Build a detector restricted to `languages`, models preloaded.
    #[must_use]
    pub fn with_languages(languages: &[Language]) -> Self {
        Self {
            detector: LanguageDetectorBuilder::from_languages(languages)
                .with_preloaded_language_models()
                .build(),
        }
    }

    /// Build on the blocking pool so model loading never stalls the runtime.
    ///
    /// `None` selects every language.
    ///
    /// # Errors
    ///
    /// Returns an error if the loading task panicked.
    pub async fn load(languages: Option<Vec<Language>>) -> Result<Self, tokio::task::JoinError> {
        tokio::task::spawn_blocking(move || match languages {
            Some(languages) => Self::with_languages(&languages),
            None => Self::new(),
        })
        .await
    }
}

impl Default for LinguaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSource for LinguaSource {
    fn candidates(&self, text: &str) -> Vec<Candidate> {
        self.detector
            .compute_language_confidence_values(text)
            .into_iter()
            .filter(|(_, probability)| *probability > 0.0)
            .map(|(language, probability)| {
                Candidate::new(language.iso_code_639_1().to_string(), probability)
            })
            .collect()
    }
}

/// Detector biased toward the destination language.
pub struct LanguageDetector {
    source: Box<dyn CandidateSource>,
    destination_language: String,
    probability_threshold: f64,
}

impl LanguageDetector {
    /// Create a detector.
    ///
    /// `probability_threshold` is the minimum score the destination language
    /// needs to override the top-ranked candidate.
    #[must_use]
    pub fn new(
        source: Box<dyn CandidateSource>,
        destination_language: impl Into<String>,
        probability_threshold: f64,
    ) -> Self {
        Self {
            source,
            destination_language: destination_language.into(),
            probability_threshold,
        }
    }

    /// Best-guess language code for `text`, or [`UNKNOWN_LANGUAGE`].
    #[must_use]
    pub fn detect(&self, text: &str) -> String {
        let candidates = self.source.candidates(text);
        let detected = self.pick(&candidates);
        debug!(detected = %detected, ?candidates, "Language detected");
        detected
    }

    /// Apply the selection rule to an already ranked list.
    #[must_use]
    pub fn pick(&self, candidates: &[Candidate]) -> String {
        let destination_wins = candidates.iter().any(|c| {
            c.language == self.destination_language && c.probability >= self.probability_threshold
        });
        if destination_wins {
            return self.destination_language.clone();
        }
        candidates
            .first()
            .map_or_else(|| UNKNOWN_LANGUAGE.to_string(), |c| c.language.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Candidate>);

    impl CandidateSource for Fixed {
        fn candidates(&self, _text: &str) -> Vec<Candidate> {
            self.0.clone()
        }
    }

    fn detector(candidates: Vec<Candidate>) -> LanguageDetector {
        LanguageDetector::new(Box::new(Fixed(candidates)), "uk", 0.1)
    }

    #[test]
    fn test_destination_overrides_top_candidate() {
        let d = detector(vec![Candidate::new("fr", 0.6), Candidate::new("uk", 0.15)]);
        assert_eq!(d.detect("whatever"), "uk");
    }

    #[test]
    fn test_destination_below_threshold_does_not_override() {
        let d = detector(vec![Candidate::new("fr", 0.6), Candidate::new("uk", 0.05)]);
        assert_eq!(d.detect("whatever"), "fr");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let d = detector(vec![Candidate::new("ru", 0.9), Candidate::new("uk", 0.1)]);
        assert_eq!(d.detect("whatever"), "uk");
    }

    #[test]
    fn test_top_candidate_wins_without_destination() {
        let d = detector(vec![Candidate::new("de", 0.5), Candidate::new("nl", 0.5)]);
        assert_eq!(d.detect("whatever"), "de");
    }

    #[test]
    fn test_no_candidates_is_unknown() {
        let d = detector(Vec::new());
        assert_eq!(d.detect(""), UNKNOWN_LANGUAGE);
    }

    #[test]
    fn test_lingua_detects_clear_text() {
        let source = LinguaSource::with_languages(&[
            Language::English,
            Language::French,
            Language::Ukrainian,
        ]);
        let d = LanguageDetector::new(Box::new(source), "uk", 0.1);
        assert_eq!(
            d.detect("Bonjour tout le monde, comment allez-vous aujourd'hui ?"),
            "fr"
        );
        assert_eq!(d.detect("Добрий день, як справи у вас сьогодні?"), "uk");
    }

    #[tokio::test]
    async fn test_load_builds_on_blocking_pool() {
        let source = LinguaSource::load(Some(vec![Language::English, Language::German]))
            .await
            .expect("models loaded");
        let d = LanguageDetector::new(Box::new(source), "en", 0.1);
        assert_eq!(
            d.detect("Guten Morgen, wie geht es dir heute?"),
            "de"
        );
    }
}
