//! Indirect object references
//!
//! A [`Specifier`] names "which object, optionally which facet of it" as a
//! small serializable record: type tag + UUID + optional property. It is the
//! only cross-entity reference mechanism that ever persists; resolving one to
//! a live handle happens through a resolution context, never by stored
//! pointer.
//!
//! Wire shape: `{"version": 1, "type": "...", "uuid": "...", "property": "..."}`
//! with `uuid` and `property` optional. Round-tripping is lossless.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const SPECIFIER_VERSION: u32 = 1;

/// Fixed vocabulary of specifier type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecifierType {
    DataItem,
    DisplayItem,
    DataSource,
    Graphic,
    Structure,
    Variable,
    Xdata,
    DisplayXdata,
    CroppedXdata,
    CroppedDisplayXdata,
    FilterXdata,
    FilteredXdata,
}

impl SpecifierType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecifierType::DataItem => "data_item",
            SpecifierType::DisplayItem => "display_item",
            SpecifierType::DataSource => "data_source",
            SpecifierType::Graphic => "graphic",
            SpecifierType::Structure => "structure",
            SpecifierType::Variable => "variable",
            SpecifierType::Xdata => "xdata",
            SpecifierType::DisplayXdata => "display_xdata",
            SpecifierType::CroppedXdata => "cropped_xdata",
            SpecifierType::CroppedDisplayXdata => "cropped_display_xdata",
            SpecifierType::FilterXdata => "filter_xdata",
            SpecifierType::FilteredXdata => "filtered_xdata",
        }
    }

    /// True for the facet-qualified forms that target a display data channel.
    pub fn is_data_source_facet(self) -> bool {
        matches!(
            self,
            SpecifierType::Xdata
                | SpecifierType::DisplayXdata
                | SpecifierType::CroppedXdata
                | SpecifierType::CroppedDisplayXdata
                | SpecifierType::FilterXdata
                | SpecifierType::FilteredXdata
        )
    }
}

/// Immutable, serializable indirect reference. Replaced on re-point, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specifier {
    pub version: u32,
    #[serde(rename = "type")]
    pub specifier_type: SpecifierType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl Specifier {
    pub fn new(specifier_type: SpecifierType, uuid: Uuid) -> Self {
        Self {
            version: SPECIFIER_VERSION,
            specifier_type,
            uuid: Some(uuid),
            property: None,
        }
    }

    pub fn with_property(specifier_type: SpecifierType, uuid: Uuid, property: &str) -> Self {
        Self {
            version: SPECIFIER_VERSION,
            specifier_type,
            uuid: Some(uuid),
            property: Some(property.to_string()),
        }
    }

    /// A specifier carrying only its type tag; the state a variable holds
    /// while being re-pointed at a new target.
    pub fn untargeted(specifier_type: SpecifierType) -> Self {
        Self {
            version: SPECIFIER_VERSION,
            specifier_type,
            uuid: None,
            property: None,
        }
    }

    /// Specifier naming a computation's own variable.
    pub fn variable(uuid: Uuid) -> Self {
        Self::new(SpecifierType::Variable, uuid)
    }

    pub fn to_dict(&self) -> JsonValue {
        serde_json::to_value(self).expect("specifier serialization is infallible")
    }

    pub fn from_dict(dict: &JsonValue) -> Option<Self> {
        serde_json::from_value(dict.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_to_wire_shape() {
        let uuid = Uuid::new_v4();
        let specifier = Specifier::new(SpecifierType::DataItem, uuid);
        assert_eq!(
            specifier.to_dict(),
            json!({"version": 1, "type": "data_item", "uuid": uuid.to_string()})
        );
    }

    #[test]
    fn property_qualifier_round_trips() {
        let uuid = Uuid::new_v4();
        let specifier = Specifier::with_property(SpecifierType::Structure, uuid, "offset");
        let decoded = Specifier::from_dict(&specifier.to_dict()).unwrap();
        assert_eq!(decoded, specifier);
        assert_eq!(decoded.property.as_deref(), Some("offset"));
    }

    #[test]
    fn untargeted_specifier_omits_uuid() {
        let specifier = Specifier::untargeted(SpecifierType::DataSource);
        let dict = specifier.to_dict();
        assert_eq!(dict, json!({"version": 1, "type": "data_source"}));
        assert_eq!(Specifier::from_dict(&dict), Some(specifier));
    }

    #[test]
    fn facet_tags_use_wire_names() {
        assert_eq!(SpecifierType::CroppedXdata.as_str(), "cropped_xdata");
        assert_eq!(
            serde_json::to_value(SpecifierType::CroppedDisplayXdata).unwrap(),
            json!("cropped_display_xdata")
        );
        assert!(SpecifierType::FilteredXdata.is_data_source_facet());
        assert!(!SpecifierType::Graphic.is_data_source_facet());
    }

    #[test]
    fn unknown_type_tag_fails_decode() {
        let dict = json!({"version": 1, "type": "widget", "uuid": Uuid::new_v4().to_string()});
        assert_eq!(Specifier::from_dict(&dict), None);
    }
}
