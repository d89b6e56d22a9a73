use helio_kernel::{Specifier, SpecifierType};
use proptest::prelude::*;
use uuid::Uuid;

const ALL_TYPES: [SpecifierType; 12] = [
    SpecifierType::DataItem,
    SpecifierType::DisplayItem,
    SpecifierType::DataSource,
    SpecifierType::Graphic,
    SpecifierType::Structure,
    SpecifierType::Variable,
    SpecifierType::Xdata,
    SpecifierType::DisplayXdata,
    SpecifierType::CroppedXdata,
    SpecifierType::CroppedDisplayXdata,
    SpecifierType::FilterXdata,
    SpecifierType::FilteredXdata,
];

fn specifier_strategy() -> impl Strategy<Value = Specifier> {
    (
        0..ALL_TYPES.len(),
        proptest::option::of(any::<u128>()),
        proptest::option::of("[a-z_]{1,16}"),
    )
        .prop_map(|(type_index, uuid_bits, property)| {
            let specifier_type = ALL_TYPES[type_index];
            match (uuid_bits, property) {
                (Some(bits), Some(property)) => {
                    Specifier::with_property(specifier_type, Uuid::from_u128(bits), &property)
                }
                (Some(bits), None) => Specifier::new(specifier_type, Uuid::from_u128(bits)),
                (None, property) => {
                    let mut specifier = Specifier::untargeted(specifier_type);
                    specifier.property = property;
                    specifier
                }
            }
        })
}

proptest! {
    #[test]
    fn prop_specifier_round_trip(specifier in specifier_strategy()) {
        let dict = specifier.to_dict();
        prop_assert_eq!(Specifier::from_dict(&dict), Some(specifier));
    }

    #[test]
    fn prop_wire_shape_is_stable(specifier in specifier_strategy()) {
        let dict = specifier.to_dict();
        prop_assert_eq!(dict.get("version").and_then(|value| value.as_u64()), Some(1));
        prop_assert!(dict.get("type").and_then(|value| value.as_str()).is_some());
        // uuid and property are present exactly when set
        prop_assert_eq!(dict.get("uuid").is_some(), specifier.uuid.is_some());
        prop_assert_eq!(dict.get("property").is_some(), specifier.property.is_some());
    }
}

#[test]
fn test_wire_type_vocabulary_is_fixed() {
    let names: Vec<&str> = ALL_TYPES.iter().map(|tag| tag.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "data_item",
            "display_item",
            "data_source",
            "graphic",
            "structure",
            "variable",
            "xdata",
            "display_xdata",
            "cropped_xdata",
            "cropped_display_xdata",
            "filter_xdata",
            "filtered_xdata",
        ]
    );
}
