//! Object label vocabulary for the detection model.
//!
//! The on-device model emits numeric class codes; everything downstream of
//! the intake works with named labels. The code assignment is fixed by the
//! model and must not be reordered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The 20 object classes the detection model can report, keyed by the
/// model's numeric class codes 1 through 20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Aeroplane,
    Bicycle,
    Bird,
    Boat,
    Bottle,
    Bus,
    Car,
    Cat,
    Chair,
    Cow,
    #[serde(rename = "dining table")]
    DiningTable,
    Dog,
    Horse,
    Motorbike,
    Person,
    #[serde(rename = "potted plant")]
    PottedPlant,
    Sheep,
    Sofa,
    Train,
    Tvmonitor,
}

impl Label {
    /// Maps a raw model class code to its label. Codes outside 1..=20 are
    /// unknown and yield `None`; callers decide whether that is an error.
    pub fn from_code(code: u32) -> Option<Label> {
        match code {
            1 => Some(Label::Aeroplane),
            2 => Some(Label::Bicycle),
            3 => Some(Label::Bird),
            4 => Some(Label::Boat),
            5 => Some(Label::Bottle),
            6 => Some(Label::Bus),
            7 => Some(Label::Car),
            8 => Some(Label::Cat),
            9 => Some(Label::Chair),
            10 => Some(Label::Cow),
            11 => Some(Label::DiningTable),
            12 => Some(Label::Dog),
            13 => Some(Label::Horse),
            14 => Some(Label::Motorbike),
            15 => Some(Label::Person),
            16 => Some(Label::PottedPlant),
            17 => Some(Label::Sheep),
            18 => Some(Label::Sofa),
            19 => Some(Label::Train),
            20 => Some(Label::Tvmonitor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Aeroplane => "aeroplane",
            Label::Bicycle => "bicycle",
            Label::Bird => "bird",
            Label::Boat => "boat",
            Label::Bottle => "bottle",
            Label::Bus => "bus",
            Label::Car => "car",
            Label::Cat => "cat",
            Label::Chair => "chair",
            Label::Cow => "cow",
            Label::DiningTable => "dining table",
            Label::Dog => "dog",
            Label::Horse => "horse",
            Label::Motorbike => "motorbike",
            Label::Person => "person",
            Label::PottedPlant => "potted plant",
            Label::Sheep => "sheep",
            Label::Sofa => "sofa",
            Label::Train => "train",
            Label::Tvmonitor => "tvmonitor",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(Label::from_code(1), Some(Label::Aeroplane));
        assert_eq!(Label::from_code(15), Some(Label::Person));
        assert_eq!(Label::from_code(20), Some(Label::Tvmonitor));
    }

    #[test]
    fn rejects_unknown_codes() {
        assert_eq!(Label::from_code(0), None);
        assert_eq!(Label::from_code(21), None);
        assert_eq!(Label::from_code(999), None);
    }

    #[test]
    fn two_word_labels_keep_their_spacing() {
        assert_eq!(Label::DiningTable.as_str(), "dining table");
        assert_eq!(Label::PottedPlant.as_str(), "potted plant");
    }

    #[test]
    fn serializes_as_label_name() {
        let encoded = serde_json::to_string(&Label::Person).expect("serialize");
        assert_eq!(encoded, "\"person\"");
        let encoded = serde_json::to_string(&Label::DiningTable).expect("serialize");
        assert_eq!(encoded, "\"dining table\"");
        let decoded: Label = serde_json::from_str("\"potted plant\"").expect("parse");
        assert_eq!(decoded, Label::PottedPlant);
    }

    #[test]
    fn displays_label_name() {
        assert_eq!(Label::Person.to_string(), "person");
    }
}
