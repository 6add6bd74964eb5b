//! Graph export through both strategies.

mod common;

use common::*;
use hsm_deploy::inference::prepare_pair;
use hsm_deploy::prelude::*;
use hsm_deploy::Error;

fn setup() -> (ModelHandle<MockNet>, hsm_deploy::inference::StereoInput) {
    let handle = load_model::<MockNet, _, _>(&cpu_config(None), &CpuRuntime, &mut RecordingSink::new())
        .unwrap()
        .handle;
    let frame = frame(96, 48);
    let input = prepare_pair(&frame.left, &frame.right, 1.0, 64).unwrap();
    (handle, input)
}

#[test]
fn trace_runs_without_gradients_or_trace_check() {
    let (handle, input) = setup();

    let artifact = export_graph(&handle, ExportStrategy::Trace, &input).unwrap();
    let graph = String::from_utf8(artifact.bytes.clone()).unwrap();

    assert_eq!(artifact.strategy, ExportStrategy::Trace);
    assert!(graph.starts_with("Trace { check_trace: false }"));
    assert_eq!(artifact.input_shapes, [vec![1, 3, 64, 128], vec![1, 3, 64, 128]]);
    assert_eq!(handle.module().grad_seen.get(), Some(false));
    assert!(hsm_deploy::runtime::is_grad_enabled());
}

#[test]
fn script_uses_the_example_for_shapes() {
    let (handle, input) = setup();

    let artifact = export_graph(&handle, ExportStrategy::Script, &input).unwrap();
    let graph = String::from_utf8(artifact.bytes).unwrap();
    assert_eq!(graph, "Script [1, 3, 64, 128] [1, 3, 64, 128]");
}

#[test]
fn failure_names_the_strategy() {
    let (mut handle, input) = setup();
    handle.module_mut().fail_capture = true;

    let err = export_graph(&handle, ExportStrategy::Script, &input).unwrap_err();
    assert!(matches!(
        err,
        Error::Export { strategy: ExportStrategy::Script, .. }
    ));
    assert!(err.to_string().starts_with("script export failed"));
    assert!(err.to_string().contains("grid_sampler"));
}

#[test]
fn artifacts_are_written_once() -> Result<(), Box<dyn std::error::Error>> {
    let (handle, input) = setup();
    let dir = tempfile::tempdir()?;

    let artifact = export_graph(&handle, ExportStrategy::Trace, &input)?;
    let path = dir.path().join(artifact.file_name("model_graph"));
    artifact.write_to(&path)?;

    assert_eq!(std::fs::read(&path)?, artifact.bytes);
    assert!(matches!(artifact.write_to(&path), Err(Error::ArtifactExists(_))));
    Ok(())
}
