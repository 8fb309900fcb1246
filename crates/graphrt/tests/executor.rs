mod common;

use std::sync::Arc;

use graphrt::backend::spec::{Device, DeviceBackend};
use graphrt::graph::{liveness, Graph};
use graphrt::tensor::view::TensorView;
use graphrt::GraphExecutor;
use graphrt_backend_ref_cpu::{CpuBackend, CpuKernelModule};
use serde_json::json;

use common::{chain_graph_json, identity_graph_json, RecordingBackend};

fn cpu_executor(graph_json: &str, module: &CpuKernelModule) -> GraphExecutor {
    let backend: Arc<dyn DeviceBackend> = Arc::new(CpuBackend::new());
    GraphExecutor::new(graph_json, module, backend, Device::cpu(), false)
        .expect("executor construction")
}

#[test]
fn identity_graph_forwards_input() {
    let module = CpuKernelModule::new();
    let mut exec = cpu_executor(&identity_graph_json(), &module);

    let mut input = vec![1f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    exec.set_input(0, &TensorView::of_slice(&mut input, &[2, 3]).unwrap())
        .unwrap();
    exec.run().unwrap();

    let mut output = vec![0f32; 6];
    exec.get_output(0, &TensorView::of_slice(&mut output, &[2, 3]).unwrap())
        .unwrap();
    assert_eq!(output, input);
}

#[test]
fn chain_graph_computes_a_plus_b_times_c() {
    let module = CpuKernelModule::with_reference_kernels();
    let mut exec = cpu_executor(&chain_graph_json(), &module);

    let mut a = vec![1f32, 2.0, 3.0, 4.0];
    let mut b = vec![10f32, 20.0, 30.0, 40.0];
    let mut c = vec![2f32, 2.0, 2.0, 2.0];
    exec.set_input_by_name("a", &TensorView::of_slice(&mut a, &[4]).unwrap())
        .unwrap();
    exec.set_input_by_name("b", &TensorView::of_slice(&mut b, &[4]).unwrap())
        .unwrap();
    exec.set_input_by_name("c", &TensorView::of_slice(&mut c, &[4]).unwrap())
        .unwrap();
    exec.run().unwrap();

    let mut out = vec![0f32; 4];
    exec.get_output(0, &TensorView::of_slice(&mut out, &[4]).unwrap())
        .unwrap();
    assert_eq!(out, vec![22.0, 44.0, 66.0, 88.0]);
}

#[test]
fn run_is_idempotent_for_fixed_inputs() {
    let module = CpuKernelModule::with_reference_kernels();
    let mut exec = cpu_executor(&chain_graph_json(), &module);

    let mut a = vec![1f32, -2.0, 0.5, 4.0];
    let mut b = vec![3f32, 5.0, -1.5, 0.0];
    let mut c = vec![2f32, 0.0, 4.0, -1.0];
    exec.set_input(0, &TensorView::of_slice(&mut a, &[4]).unwrap())
        .unwrap();
    exec.set_input(1, &TensorView::of_slice(&mut b, &[4]).unwrap())
        .unwrap();
    exec.set_input(2, &TensorView::of_slice(&mut c, &[4]).unwrap())
        .unwrap();

    exec.run().unwrap();
    let mut first = vec![0f32; 4];
    exec.get_output(0, &TensorView::of_slice(&mut first, &[4]).unwrap())
        .unwrap();

    exec.run().unwrap();
    let mut second = vec![0f32; 4];
    exec.get_output(0, &TensorView::of_slice(&mut second, &[4]).unwrap())
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn set_get_input_round_trips() {
    let module = CpuKernelModule::new();
    let mut exec = cpu_executor(&identity_graph_json(), &module);

    let mut written = vec![0.25f32, -1.0, 7.5, 0.0, 3.0, -9.0];
    exec.set_input(0, &TensorView::of_slice(&mut written, &[2, 3]).unwrap())
        .unwrap();

    let mut read = vec![0f32; 6];
    exec.get_input(0, &TensorView::of_slice(&mut read, &[2, 3]).unwrap())
        .unwrap();
    assert_eq!(read, written);
}

#[test]
fn aliased_entries_share_one_pool_buffer() {
    // Two entries with storage id 0, 16 and 64 bytes: the pool must hold the
    // larger and both views must land on the same pointer.
    let graph_json = json!({
        "nodes": [
            {"op": "null", "name": "x", "inputs": []},
            {
                "op": "tvm_op",
                "name": "expand0",
                "inputs": [[0, 0, 0]],
                "attrs": {
                    "func_name": "__nop",
                    "num_inputs": "1",
                    "num_outputs": "1",
                    "flatten_data": "0"
                }
            }
        ],
        "arg_nodes": [0],
        "node_row_ptr": [0, 1, 2],
        "heads": [[1, 0, 0]],
        "attrs": {
            "dltype": ["list_str", ["float32", "float32"]],
            "storage_id": ["list_int", [0, 0]],
            "shape": ["list_shape", [[4], [16]]]
        }
    })
    .to_string();

    let module = CpuKernelModule::new();
    let backend = Arc::new(RecordingBackend::new());
    let erased: Arc<dyn DeviceBackend> = backend.clone();
    let exec =
        GraphExecutor::new(&graph_json, &module, erased, Device::cpu(), false).unwrap();

    assert_eq!(backend.allocated_shapes(), vec![vec![16]]);
    let first = exec.entry_view(0).unwrap();
    let second = exec.entry_view(1).unwrap();
    assert_eq!(first.data_ptr(), second.data_ptr());
    assert_eq!(first.shape(), &[4]);
    assert_eq!(second.shape(), &[16]);
}

#[test]
fn unknown_input_name_warns_and_changes_nothing() {
    let module = CpuKernelModule::new();
    let mut exec = cpu_executor(&identity_graph_json(), &module);

    let mut bogus = vec![9f32; 6];
    exec.set_input_by_name(
        "not_a_real_name",
        &TensorView::of_slice(&mut bogus, &[2, 3]).unwrap(),
    )
    .unwrap();
    exec.run().unwrap();

    // The input entry was never written, so the run sees freshly zeroed
    // pool memory.
    let mut out = vec![5f32; 6];
    exec.get_output(0, &TensorView::of_slice(&mut out, &[2, 3]).unwrap())
        .unwrap();
    assert_eq!(out, vec![0.0; 6]);
}

#[test]
fn input_indices_out_of_range_are_fatal() {
    let module = CpuKernelModule::new();
    let mut exec = cpu_executor(&identity_graph_json(), &module);

    let mut data = vec![0f32; 6];
    let view = TensorView::of_slice(&mut data, &[2, 3]).unwrap();
    assert!(exec.set_input(1, &view).is_err());
    assert!(exec.get_input(3, &view).is_err());
    assert!(exec.get_output(1, &view).is_err());
}

#[test]
fn every_reported_name_resolves() {
    let module = CpuKernelModule::with_reference_kernels();
    let exec = cpu_executor(&chain_graph_json(), &module);

    let names = exec.input_names();
    assert_eq!(names, "a;b;c");
    for name in names.split(';') {
        assert!(exec.input_index(name).is_some(), "name '{name}' not accepted");
    }
    assert_eq!(exec.output_names(), "mul0");
}

#[test]
fn zero_dim_entries_hold_one_element() {
    let graph_json = json!({
        "nodes": [
            {"op": "null", "name": "x", "inputs": []},
            {
                "op": "tvm_op",
                "name": "identity0",
                "inputs": [[0, 0, 0]],
                "attrs": {
                    "func_name": "__nop",
                    "num_inputs": "1",
                    "num_outputs": "1",
                    "flatten_data": "0"
                }
            }
        ],
        "arg_nodes": [0],
        "node_row_ptr": [0, 1, 2],
        "heads": [[1, 0, 0]],
        "attrs": {
            "dltype": ["list_str", ["float32", "float32"]],
            "storage_id": ["list_int", [0, 0]],
            "shape": ["list_shape", [[], []]]
        }
    })
    .to_string();

    let module = CpuKernelModule::new();
    let mut exec = cpu_executor(&graph_json, &module);

    let mut scalar = [42.5f32];
    exec.set_input(0, &TensorView::of_slice(&mut scalar, &[]).unwrap())
        .unwrap();
    exec.run().unwrap();

    let mut out = [0f32];
    exec.get_output(0, &TensorView::of_slice(&mut out, &[]).unwrap())
        .unwrap();
    assert_eq!(out[0], 42.5);
}

fn unary_graph_json(flatten: bool, func_name: &str) -> String {
    let flatten = if flatten { "1" } else { "0" };
    json!({
        "nodes": [
            {"op": "null", "name": "x", "inputs": []},
            {
                "op": "tvm_op",
                "name": format!("{func_name}0"),
                "inputs": [[0, 0, 0]],
                "attrs": {
                    "func_name": func_name,
                    "num_inputs": "1",
                    "num_outputs": "1",
                    "flatten_data": flatten
                }
            }
        ],
        "arg_nodes": [0],
        "node_row_ptr": [0, 1, 2],
        "heads": [[1, 0, 0]],
        "attrs": {
            "dltype": ["list_str", ["float32", "float32"]],
            "storage_id": ["list_int", [0, 1]],
            "shape": ["list_shape", [[2, 3], [2, 3]]]
        }
    })
    .to_string()
}

fn doubling_kernel(module: &mut CpuKernelModule, name: &str, expected_ndim: usize) {
    module.register_fn(name.to_owned(), move |args| {
        for view in args.tensors() {
            if view.ndim() != expected_ndim {
                return Err(graphrt::BackendError::kernel(
                    "double",
                    format!("expected rank {expected_ndim}, got {}", view.ndim()),
                ));
            }
        }
        let src = args.tensor(0)?;
        let dst = args.tensor(1)?;
        let n = dst.num_elements();
        let src = src.data_ptr() as *const f32;
        let dst = dst.data_ptr() as *mut f32;
        unsafe {
            for i in 0..n {
                *dst.add(i) = *src.add(i) * 2.0;
            }
        }
        Ok(())
    });
}

#[test]
fn flatten_data_binds_rank_one_views() {
    let mut module = CpuKernelModule::new();
    doubling_kernel(&mut module, "double", 1);
    let mut exec = cpu_executor(&unary_graph_json(true, "double"), &module);

    let mut input = vec![1f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    exec.set_input(0, &TensorView::of_slice(&mut input, &[2, 3]).unwrap())
        .unwrap();
    exec.run().unwrap();

    let mut out = vec![0f32; 6];
    exec.get_output(0, &TensorView::of_slice(&mut out, &[2, 3]).unwrap())
        .unwrap();
    assert_eq!(out, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
}

#[test]
fn unflattened_kernels_see_planned_ranks() {
    let mut module = CpuKernelModule::new();
    doubling_kernel(&mut module, "double", 2);
    let mut exec = cpu_executor(&unary_graph_json(false, "double"), &module);

    let mut input = vec![1f32; 6];
    exec.set_input(0, &TensorView::of_slice(&mut input, &[2, 3]).unwrap())
        .unwrap();
    exec.run().unwrap();
}

#[test]
fn observer_sees_executed_entries_in_order() {
    let module = CpuKernelModule::with_reference_kernels();
    let mut exec = cpu_executor(&chain_graph_json(), &module);

    let mut a = vec![1f32; 4];
    exec.set_input(0, &TensorView::of_slice(&mut a, &[4]).unwrap())
        .unwrap();

    let mut visited = Vec::new();
    exec.run_with_observer(|entry_id, view| {
        visited.push((entry_id, view.shape().to_vec()));
    })
    .unwrap();

    // Placeholders a, b, c occupy entries 0..=2; the kernels produce 3 and 4.
    assert_eq!(visited, vec![(3, vec![4]), (4, vec![4])]);
}

#[test]
fn debug_get_node_output_runs_the_prefix() {
    let module = CpuKernelModule::with_reference_kernels();
    let mut exec = cpu_executor(&chain_graph_json(), &module);

    let mut a = vec![1f32, 2.0, 3.0, 4.0];
    let mut b = vec![10f32, 10.0, 10.0, 10.0];
    exec.set_input(0, &TensorView::of_slice(&mut a, &[4]).unwrap())
        .unwrap();
    exec.set_input(1, &TensorView::of_slice(&mut b, &[4]).unwrap())
        .unwrap();

    let mut sum = vec![0f32; 4];
    exec.debug_get_node_output(3, &TensorView::of_slice(&mut sum, &[4]).unwrap())
        .unwrap();
    assert_eq!(sum, vec![11.0, 12.0, 13.0, 14.0]);

    assert_eq!(exec.node_index("add0"), Some(3));
    assert_eq!(exec.node_index("nope"), None);
}

#[test]
fn pool_buffers_are_released_on_drop() {
    let module = CpuKernelModule::with_reference_kernels();
    let backend = Arc::new(CpuBackend::new());
    let erased: Arc<dyn DeviceBackend> = backend.clone();

    let exec =
        GraphExecutor::new(&chain_graph_json(), &module, erased, Device::cpu(), false).unwrap();
    assert!(backend.live_allocations() > 0);
    drop(exec);
    assert_eq!(backend.live_allocations(), 0);
}

#[test]
fn failed_binding_releases_the_pool() {
    // Kernel resolution happens after allocation; the pool must not leak.
    let module = CpuKernelModule::new();
    let backend = Arc::new(CpuBackend::new());
    let erased: Arc<dyn DeviceBackend> = backend.clone();

    let result =
        GraphExecutor::new(&chain_graph_json(), &module, erased, Device::cpu(), false);
    assert!(result.is_err());
    assert_eq!(backend.live_allocations(), 0);
}

#[test]
fn liveness_validator_judges_plans() {
    let graph = Graph::parse(&chain_graph_json()).unwrap();
    liveness::validate_plan(&graph).unwrap();

    // Rewrite the plan so the add output steals c's buffer while c is still
    // pending its read by mul.
    let mut bad = graph;
    bad.attrs.storage_id = vec![0, 1, 2, 2, 3];
    bad.validate().unwrap();
    assert!(liveness::validate_plan(&bad).is_err());
}

#[test]
fn executor_debug_reports_shape_of_the_machine() {
    let module = CpuKernelModule::with_reference_kernels();
    let exec = cpu_executor(&chain_graph_json(), &module);
    let dump = format!("{exec:?}");
    assert!(dump.contains("nodes: 5"));
    assert!(dump.contains("pool_buffers: 4"));
    assert!(dump.contains("bound_ops: 2"));
}
