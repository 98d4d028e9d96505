//! Topic selection for the animal photo feeds
//!
//! The broker publishes one feed per animal below a fixed prefix:
//!
//! ```text
//! animal/photos/cachorro
//! animal/photos/boi
//! animal/photos/cavalo
//! animal/photos/capivara
//! ```
//!
//! Only these four suffixes can be selected, so no further validation of user
//! input is needed once a value is an [`AnimalTopic`].

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix shared by all photo feeds
pub const TOPIC_PREFIX: &str = "animal/photos/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Unknown animal topic: {0}")]
    Unknown(String),
}

/// One of the subscribable photo feeds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimalTopic {
    #[default]
    Cachorro,
    Boi,
    Cavalo,
    Capivara,
}

impl AnimalTopic {
    /// All topics in picker order. The first entry is the fallback selection.
    pub const ALL: [AnimalTopic; 4] = [
        AnimalTopic::Cachorro,
        AnimalTopic::Boi,
        AnimalTopic::Cavalo,
        AnimalTopic::Capivara,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalTopic::Cachorro => "cachorro",
            AnimalTopic::Boi => "boi",
            AnimalTopic::Cavalo => "cavalo",
            AnimalTopic::Capivara => "capivara",
        }
    }

    /// Full MQTT topic for this feed, e.g. `animal/photos/cavalo`
    pub fn full_topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.as_str())
    }
}

impl fmt::Display for AnimalTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnimalTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnimalTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| TopicError::Unknown(s.to_string()))
    }
}

/// Holds the user's current feed choice
///
/// Exactly one topic is selected at any time. Clearing the selection (or an
/// index outside the list) falls back to the first enumerated topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopicSelector {
    selected: AnimalTopic,
}

impl TopicSelector {
    pub fn topics(&self) -> &'static [AnimalTopic] {
        &AnimalTopic::ALL
    }

    pub fn selected(&self) -> AnimalTopic {
        self.selected
    }

    pub fn select(&mut self, topic: AnimalTopic) {
        debug!("Selected topic: {}", topic);
        self.selected = topic;
    }

    /// Selects by picker position; `None` means nothing is selected
    pub fn select_index(&mut self, index: Option<usize>) {
        let topic = index
            .and_then(|i| AnimalTopic::ALL.get(i).copied())
            .unwrap_or_default();
        self.select(topic);
    }

    /// Selects by name, falling back to the first topic for unknown names
    pub fn select_name(&mut self, name: &str) -> Result<(), TopicError> {
        match name.parse::<AnimalTopic>() {
            Ok(topic) => {
                self.select(topic);
                Ok(())
            }
            Err(e) => {
                warn!("{}, selecting {}", e, AnimalTopic::default());
                self.select_index(None);
                Err(e)
            }
        }
    }

    pub fn full_topic(&self) -> String {
        self.selected.full_topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_topic_is_prefix_plus_suffix_for_every_topic() {
        for topic in AnimalTopic::ALL {
            assert_eq!(topic.full_topic(), format!("animal/photos/{}", topic.as_str()));
        }
        assert_eq!(AnimalTopic::Cavalo.full_topic(), "animal/photos/cavalo");
    }

    #[test]
    fn default_selection_is_cachorro() {
        let selector = TopicSelector::default();
        assert_eq!(selector.selected(), AnimalTopic::Cachorro);
        assert_eq!(selector.full_topic(), "animal/photos/cachorro");
    }

    #[test]
    fn nothing_selected_falls_back_to_first_topic() {
        let mut selector = TopicSelector::default();
        selector.select_index(Some(3));
        assert_eq!(selector.selected(), AnimalTopic::Capivara);

        selector.select_index(None);
        assert_eq!(selector.selected(), AnimalTopic::Cachorro);

        selector.select_index(Some(2));
        selector.select_index(Some(42));
        assert_eq!(selector.selected(), AnimalTopic::Cachorro);
    }

    #[test]
    fn parses_only_enumerated_names() {
        assert_eq!("boi".parse::<AnimalTopic>(), Ok(AnimalTopic::Boi));
        assert_eq!(
            "gato".parse::<AnimalTopic>(),
            Err(TopicError::Unknown("gato".to_string()))
        );
        assert!("Boi".parse::<AnimalTopic>().is_err());
    }

    #[test]
    fn select_by_name_falls_back_on_unknown_names() {
        let mut selector = TopicSelector::default();
        assert_eq!(selector.select_name("capivara"), Ok(()));
        assert_eq!(selector.full_topic(), "animal/photos/capivara");

        assert_eq!(
            selector.select_name("gato"),
            Err(TopicError::Unknown("gato".to_string()))
        );
        assert_eq!(selector.selected(), AnimalTopic::Cachorro);
    }

    #[test]
    fn topics_keep_picker_order() {
        let names: Vec<&str> = TopicSelector::default()
            .topics()
            .iter()
            .map(AnimalTopic::as_str)
            .collect();
        assert_eq!(names, vec!["cachorro", "boi", "cavalo", "capivara"]);
    }
}
