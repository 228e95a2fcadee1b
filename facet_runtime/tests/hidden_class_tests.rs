//! End-to-end hidden-class scenarios.

use facet_runtime::{GcRef, HiddenClass, PropertyFlags, Runtime};

fn default_flags() -> PropertyFlags {
    PropertyFlags::default_new()
}

/// Two fresh objects receiving the same properties in the same order end up
/// with the same hidden-class identity.
#[test]
fn shape_sharing_across_objects() {
    let mut rt = Runtime::new();
    let x = rt.intern("x");
    let y = rt.intern("y");
    let root = rt.create_root_class().unwrap();

    // First object.
    let (class_a, _) = HiddenClass::add_property(&root, &rt, x, default_flags()).unwrap();
    let (class_a, _) = HiddenClass::add_property(&class_a, &rt, y, default_flags()).unwrap();

    // Second object, same additions.
    let (class_b, _) = HiddenClass::add_property(&root, &rt, x, default_flags()).unwrap();
    let (class_b, _) = HiddenClass::add_property(&class_b, &rt, y, default_flags()).unwrap();

    assert!(GcRef::ptr_eq(&class_a, &class_b));
    assert_eq!(class_a.num_properties(), 2);
}

/// Deleting a property converts to a dictionary and preserves the order of
/// the remaining properties.
#[test]
fn dictionary_conversion_via_delete() {
    let mut rt = Runtime::new();
    let a = rt.intern("a");
    let b = rt.intern("b");
    let c = rt.intern("c");
    let root = rt.create_root_class().unwrap();

    let mut class = root;
    for &name in &[a, b, c] {
        class = HiddenClass::add_property(&class, &rt, name, default_flags())
            .unwrap()
            .0;
    }

    let (pos, _) = HiddenClass::find_property(&class, b, PropertyFlags::invalid()).unwrap();
    let dict = HiddenClass::delete_property(&class, &rt, pos).unwrap();

    assert!(dict.is_dictionary());
    assert_eq!(dict.num_properties(), 2);

    let mut order = Vec::new();
    HiddenClass::for_each_property(&dict, |name, _| order.push(name));
    assert_eq!(order, vec![a, c]);
}

/// `make_all_read_only` produces a class with the same ordered names, fully
/// read-only flags, and the original's family.
#[test]
fn flag_transition_family() {
    let mut rt = Runtime::new();
    let a = rt.intern("a");
    let b = rt.intern("b");
    let root = rt.create_root_class().unwrap();

    let (class, _) = HiddenClass::add_property(&root, &rt, a, default_flags()).unwrap();
    let (class, _) = HiddenClass::add_property(&class, &rt, b, default_flags()).unwrap();

    let frozen = HiddenClass::make_all_read_only(&class, &rt).unwrap();

    let mut original_names = Vec::new();
    HiddenClass::for_each_property(&class, |name, _| original_names.push(name));
    let mut frozen_names = Vec::new();
    HiddenClass::for_each_property(&frozen, |name, desc| {
        frozen_names.push(name);
        assert!(!desc.flags.is_writable());
        assert!(!desc.flags.is_configurable());
    });

    assert_eq!(original_names, frozen_names);
    assert!(GcRef::ptr_eq(
        &HiddenClass::family(&frozen),
        &HiddenClass::family(&class)
    ));
}

/// Sequences below the dictionary threshold with no deletes never produce a
/// dictionary; the add crossing the threshold does.
#[test]
fn dictionary_threshold_boundary() {
    let mut rt = Runtime::new();
    let names: Vec<_> = (0..=HiddenClass::DICTIONARY_THRESHOLD)
        .map(|i| rt.intern(&format!("p{}", i)))
        .collect();
    let root = rt.create_root_class().unwrap();

    let mut class = root;
    for (i, &name) in names.iter().enumerate() {
        class = HiddenClass::add_property(&class, &rt, name, default_flags())
            .unwrap()
            .0;
        let within_threshold = (i as u32) < HiddenClass::DICTIONARY_THRESHOLD;
        assert_eq!(class.is_dictionary(), !within_threshold, "at add {}", i);
    }
}

/// The read-only predicate implies the non-configurable one.
#[test]
fn read_only_implies_non_configurable() {
    let mut rt = Runtime::new();
    let a = rt.intern("a");
    let root = rt.create_root_class().unwrap();
    let (class, _) =
        HiddenClass::add_property(&root, &rt, a, PropertyFlags::frozen()).unwrap();

    if HiddenClass::are_all_read_only(&class) {
        assert!(HiddenClass::are_all_non_configurable(&class));
    }
}

/// Repeating `make_all_non_configurable` is idempotent on the class object.
#[test]
fn seal_twice_returns_same_class() {
    let mut rt = Runtime::new();
    let a = rt.intern("a");
    let root = rt.create_root_class().unwrap();
    let (class, _) = HiddenClass::add_property(&root, &rt, a, default_flags()).unwrap();

    let sealed = HiddenClass::make_all_non_configurable(&class, &rt).unwrap();
    let sealed_again = HiddenClass::make_all_non_configurable(&sealed, &rt).unwrap();
    assert!(GcRef::ptr_eq(&sealed, &sealed_again));
}
