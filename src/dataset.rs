//! Registry of the datasets the application persists.
//!
//! Every dataset has exactly one local slot key and at most one cloud
//! collection. Datasets without a collection stay on the device even for
//! authenticated users (UI settings, theme).

use std::fmt::Display;
use std::str::FromStr;

/// Name of a per-user cloud collection (`userData/{user}/{collection}/data`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(&'static str);

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A named, independently persisted piece of application state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetKey {
    FlashcardSets,
    FlashcardHistory,
    LearnHistory,
    SavedLearnQuizzes,
    TestHistory,
    SavedTestQuizzes,
    MatchHistory,
    SavedMatchGames,
    MixedHistory,
    SavedMixedQuizzes,
    GuidedHistory,
    /// Local-only application settings
    AppSettings,
    /// Local-only theme preference
    Theme,
}

impl DatasetKey {
    pub const ALL: [DatasetKey; 13] = [
        DatasetKey::FlashcardSets,
        DatasetKey::FlashcardHistory,
        DatasetKey::LearnHistory,
        DatasetKey::SavedLearnQuizzes,
        DatasetKey::TestHistory,
        DatasetKey::SavedTestQuizzes,
        DatasetKey::MatchHistory,
        DatasetKey::SavedMatchGames,
        DatasetKey::MixedHistory,
        DatasetKey::SavedMixedQuizzes,
        DatasetKey::GuidedHistory,
        DatasetKey::AppSettings,
        DatasetKey::Theme,
    ];

    /// Literal key of the local slot holding this dataset.
    pub fn local_key(&self) -> &'static str {
        match self {
            DatasetKey::FlashcardSets => "flashcardSets",
            DatasetKey::FlashcardHistory => "flashcardHistory",
            DatasetKey::LearnHistory => "learnHistory",
            DatasetKey::SavedLearnQuizzes => "savedLearnQuizzes",
            DatasetKey::TestHistory => "testHistory",
            DatasetKey::SavedTestQuizzes => "savedTestQuizzes",
            DatasetKey::MatchHistory => "matchHistory",
            DatasetKey::SavedMatchGames => "savedMatchGames",
            DatasetKey::MixedHistory => "mixedHistory",
            DatasetKey::SavedMixedQuizzes => "savedMixedQuizzes",
            DatasetKey::GuidedHistory => "guidedHistory",
            DatasetKey::AppSettings => "appSettings",
            DatasetKey::Theme => "theme",
        }
    }

    /// Cloud collection for this dataset, or `None` when it is not cloud-syncable.
    ///
    /// The names are part of the stored document paths and must not change.
    pub fn collection(&self) -> Option<CollectionName> {
        let name = match self {
            DatasetKey::FlashcardSets => "flashcardSets",
            DatasetKey::FlashcardHistory => "flashcardHistory",
            DatasetKey::LearnHistory => "learnHistory",
            DatasetKey::SavedLearnQuizzes => "savedLearnQuizzes",
            DatasetKey::TestHistory => "testHistory",
            DatasetKey::SavedTestQuizzes => "savedTestQuizzes",
            DatasetKey::MatchHistory => "matchHistory",
            DatasetKey::SavedMatchGames => "savedMatchGames",
            DatasetKey::MixedHistory => "mixedHistory",
            DatasetKey::SavedMixedQuizzes => "savedMixedQuizzes",
            DatasetKey::GuidedHistory => "guidedHistory",
            DatasetKey::AppSettings | DatasetKey::Theme => return None,
        };
        Some(CollectionName(name))
    }

    pub fn is_syncable(&self) -> bool {
        self.collection().is_some()
    }

    /// Datasets that have a cloud collection, in registry order.
    pub fn syncable() -> impl Iterator<Item = DatasetKey> {
        Self::ALL.into_iter().filter(DatasetKey::is_syncable)
    }

    pub fn from_local_key(key: &str) -> Option<DatasetKey> {
        Self::ALL.into_iter().find(|k| k.local_key() == key)
    }
}

impl Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.local_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dataset key: {0}")]
pub struct UnknownDatasetKey(pub String);

impl FromStr for DatasetKey {
    type Err = UnknownDatasetKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetKey::from_local_key(s).ok_or_else(|| UnknownDatasetKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn collection_table_is_preserved() {
        let expected = [
            ("flashcardSets", "flashcardSets"),
            ("flashcardHistory", "flashcardHistory"),
            ("learnHistory", "learnHistory"),
            ("savedLearnQuizzes", "savedLearnQuizzes"),
            ("testHistory", "testHistory"),
            ("savedTestQuizzes", "savedTestQuizzes"),
            ("matchHistory", "matchHistory"),
            ("savedMatchGames", "savedMatchGames"),
            ("mixedHistory", "mixedHistory"),
            ("savedMixedQuizzes", "savedMixedQuizzes"),
            ("guidedHistory", "guidedHistory"),
        ];

        let actual: Vec<(&str, &str)> = DatasetKey::syncable()
            .map(|k| (k.local_key(), k.collection().unwrap().as_str()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn local_keys_and_collections_are_injective() {
        let locals: HashSet<_> = DatasetKey::ALL.iter().map(|k| k.local_key()).collect();
        assert_eq!(locals.len(), DatasetKey::ALL.len());

        let collections: HashSet<_> = DatasetKey::syncable().filter_map(|k| k.collection()).collect();
        assert_eq!(collections.len(), DatasetKey::syncable().count());
    }

    #[test]
    fn settings_and_theme_are_local_only() {
        assert!(DatasetKey::AppSettings.collection().is_none());
        assert!(DatasetKey::Theme.collection().is_none());
        assert!(!DatasetKey::Theme.is_syncable());
        assert_eq!(DatasetKey::syncable().count(), 11);
    }

    #[test]
    fn parse_round_trips_through_local_key() {
        for key in DatasetKey::ALL {
            assert_eq!(key.to_string().parse::<DatasetKey>(), Ok(key));
        }
        assert_eq!(
            "nope".parse::<DatasetKey>(),
            Err(UnknownDatasetKey("nope".to_string()))
        );
    }
}
