use helio_kernel::{
    Computation, ComputationItem, Connection, DataItem, DataStructure, DisplayDataChannel,
    DisplayItem, Graphic, Project, ProjectItem, Value, ValueKind,
};
use std::sync::Arc;

fn project_with_computation() -> (Arc<Project>, Arc<DataItem>, Arc<Computation>) {
    let project = Project::new();
    let data_item = DataItem::new();
    data_item.set_data(Some(Value::Integral(5)));
    project.append_data_item(data_item.clone());

    let computation = Computation::new_with_processing("multiply");
    computation.create_input_item(
        "a",
        ComputationItem::new(ProjectItem::Data(data_item.clone())),
        None,
    );
    computation.create_variable("k", ValueKind::Integral, Some(Value::Integral(2)));
    project.append_computation(computation.clone());
    (project, data_item, computation)
}

#[test]
fn test_cascade_completeness_sole_input() {
    let (project, data_item, computation) = project_with_computation();
    assert_eq!(project.computations().len(), 1);

    let log = project.remove_data_item(&data_item);
    // no orphaned computation survives pointing at nothing
    assert!(project.computations().is_empty());
    assert!(project.data_items().is_empty());
    assert!(!computation.is_resolved());
    assert_eq!(log.len(), 2);
    log.close();
}

#[test]
fn test_undo_symmetry_restores_uuids_and_resolution() {
    let (project, data_item, computation) = project_with_computation();
    let data_uuid = data_item.uuid();
    let computation_uuid = computation.uuid();

    let log = project.remove_data_item(&data_item);
    assert!(project.data_item(data_uuid).is_none());
    assert!(project.computation(computation_uuid).is_none());

    log.undelete_all(&project);

    let restored_item = project.data_item(data_uuid).expect("data item restored");
    assert_eq!(restored_item.data(), Some(Value::Integral(5)));
    let restored_computation = project
        .computation(computation_uuid)
        .expect("computation restored");
    // the caller did not re-specify anything; binding re-resolved on restore
    assert!(restored_computation.is_resolved());
    assert_eq!(
        restored_computation
            .get_input("a")
            .and_then(|input| input.data_item())
            .map(|item| item.uuid()),
        Some(data_uuid)
    );
    assert_eq!(
        restored_computation.variable("k").unwrap().value(),
        Some(Value::Integral(2))
    );
}

#[test]
fn test_undo_restores_insertion_order() {
    let project = Project::new();
    let first = DataItem::new();
    let second = DataItem::new();
    let third = DataItem::new();
    project.append_data_item(first.clone());
    project.append_data_item(second.clone());
    project.append_data_item(third.clone());

    let log = project.remove_data_item(&second);
    log.undelete_all(&project);

    let order: Vec<_> = project.data_items().iter().map(|item| item.uuid()).collect();
    assert_eq!(order, vec![first.uuid(), second.uuid(), third.uuid()]);
}

#[test]
fn test_display_item_cascades_with_its_data_item() {
    let project = Project::new();
    let data_item = DataItem::new();
    project.append_data_item(data_item.clone());
    let display_item = DisplayItem::new();
    let channel = DisplayDataChannel::new(Some(data_item.uuid()));
    display_item.append_display_data_channel(channel.clone());
    project.append_display_item(display_item.clone());

    let computation = Computation::new_with_processing("multiply");
    computation.create_input_item(
        "a",
        ComputationItem::new(ProjectItem::Channel(channel.clone())),
        None,
    );
    project.append_computation(computation.clone());
    assert!(computation.is_resolved());

    let log = project.remove_data_item(&data_item);
    assert!(project.display_items().is_empty());
    assert!(project.computations().is_empty());

    log.undelete_all(&project);
    assert_eq!(project.display_items().len(), 1);
    let restored = project.computation(computation.uuid()).unwrap();
    assert!(restored.is_resolved());
}

#[test]
fn test_structure_cascades_and_restores_with_proxy() {
    let project = Project::new();
    let data_item = DataItem::new();
    project.append_data_item(data_item.clone());
    let structure = DataStructure::new("calibration");
    structure.set_referenced_object("source", &ProjectItem::Data(data_item.clone()));
    project.append_data_structure(structure.clone());

    let log = project.remove_data_item(&data_item);
    assert!(project.data_structures().is_empty());

    log.undelete_all(&project);
    let restored = project.data_structure(structure.uuid()).expect("restored");
    assert_eq!(
        restored
            .get_referenced_object("source")
            .map(|item| item.uuid()),
        Some(data_item.uuid())
    );
}

#[test]
fn test_connection_cascades_with_endpoint() {
    let project = Project::new();
    let display_a = DisplayItem::new();
    let graphic_a = Graphic::new("interval-graphic");
    display_a.add_graphic(graphic_a.clone());
    let display_b = DisplayItem::new();
    let graphic_b = Graphic::new("interval-graphic");
    display_b.add_graphic(graphic_b.clone());
    project.append_display_item(display_a.clone());
    project.append_display_item(display_b.clone());

    let connection = Connection::new(
        &ProjectItem::Graphic(graphic_a.clone()),
        "start",
        &ProjectItem::Graphic(graphic_b.clone()),
        "start",
    );
    project.append_connection(connection.clone());
    assert!(connection.is_bound());

    let log = project.remove_display_item(&display_a);
    assert!(project.connections().is_empty());
    assert_eq!(project.display_items().len(), 1);

    log.undelete_all(&project);
    assert_eq!(project.display_items().len(), 2);
    let restored = project.connection(connection.uuid()).expect("restored");
    assert!(restored.is_bound());
}

#[test]
fn test_provenance_source_cascades_derived_item() {
    let project = Project::new();
    let source = DataItem::new();
    project.append_data_item(source.clone());
    let derived = DataItem::new();
    derived.set_source_uuid(Some(source.uuid()));
    project.append_data_item(derived.clone());

    let log = project.remove_data_item(&source);
    assert!(project.data_items().is_empty());
    log.undelete_all(&project);
    assert_eq!(project.data_items().len(), 2);
}

#[test]
fn test_list_input_shrinks_instead_of_cascading() {
    let project = Project::new();
    let first = DataItem::new();
    let second = DataItem::new();
    project.append_data_item(first.clone());
    project.append_data_item(second.clone());

    let computation = Computation::new_with_processing("sum");
    let variable = computation.create_input_item(
        "src",
        ComputationItem::list(vec![
            ProjectItem::Data(first.clone()),
            ProjectItem::Data(second.clone()),
        ]),
        None,
    );
    project.append_computation(computation.clone());

    let log = project.remove_data_item(&first);
    // the computation survives with a shrunken list
    assert_eq!(project.computations().len(), 1);
    assert_eq!(variable.objects().unwrap().len(), 1);
    assert!(computation.is_resolved());

    log.undelete_all(&project);
    let objects = variable.objects().unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(
        objects.get(0).and_then(|specifier| specifier.uuid),
        Some(first.uuid())
    );
    assert!(computation.is_resolved());
}

#[test]
fn test_emptied_list_cascades_the_computation() {
    let project = Project::new();
    let only = DataItem::new();
    project.append_data_item(only.clone());

    let computation = Computation::new_with_processing("sum");
    computation.create_input_item(
        "src",
        ComputationItem::list(vec![ProjectItem::Data(only.clone())]),
        None,
    );
    project.append_computation(computation.clone());

    let log = project.remove_data_item(&only);
    assert!(project.computations().is_empty());
    log.undelete_all(&project);
    assert_eq!(project.computations().len(), 1);
    let restored = project.computation(computation.uuid()).unwrap();
    assert!(restored.is_resolved());
}

#[test]
fn test_output_reference_cascades_computation() {
    let project = Project::new();
    let input = DataItem::new();
    let output = DataItem::new();
    project.append_data_item(input.clone());
    project.append_data_item(output.clone());

    let computation = Computation::new_with_processing("multiply");
    computation.create_input_item(
        "a",
        ComputationItem::new(ProjectItem::Data(input.clone())),
        None,
    );
    computation.create_output_item(
        "out",
        Some(ComputationItem::new(ProjectItem::Data(output.clone()))),
    );
    project.append_computation(computation.clone());
    assert!(computation.is_resolved());

    // deleting the output target takes the computation, not the input
    let log = project.remove_data_item(&output);
    assert!(project.computations().is_empty());
    assert!(project.data_item(input.uuid()).is_some());

    log.undelete_all(&project);
    let restored = project.computation(computation.uuid()).unwrap();
    assert!(restored.is_resolved());
    assert_eq!(
        restored
            .get_referenced_object("out")
            .and_then(|value| value.data_item())
            .map(|item| item.uuid()),
        Some(output.uuid())
    );
}

#[test]
fn test_unused_log_close_is_clean() {
    let (project, data_item, _computation) = project_with_computation();
    let log = project.remove_data_item(&data_item);
    assert!(!log.is_empty());
    log.close();
    // nothing came back
    assert!(project.data_items().is_empty());
    assert!(project.computations().is_empty());
}

#[test]
fn test_specifier_survives_removal_for_later_rebind() {
    // removal unbinds watchers but never clears the persisted specifier;
    // re-inserting an item with the same uuid re-resolves it
    let (project, data_item, computation) = project_with_computation();
    let data_uuid = data_item.uuid();
    project.remove_data_item(&data_item).close();

    let replacement = DataItem::with_uuid(data_uuid);
    replacement.set_data(Some(Value::Integral(9)));
    project.append_data_item(replacement);

    // the computation was cascade-removed; re-append a restored copy
    let revived = Computation::from_dict(&{
        use helio_persist::PersistentObject;
        computation.write_to_dict()
    });
    project.append_computation(revived.clone());
    assert!(revived.is_resolved());
}
