//! Integration tests for hypervctl.
//!
//! These tests require:
//! - Windows with Hyper-V enabled
//! - Administrator privileges
//! - The `integration` feature enabled
//!
//! Tests that touch a VM use the one named by `HYPERVCTL_TEST_VM` (it must be
//! off and disposable). Disk tests also need `HYPERVCTL_TEST_VHD`, and switch
//! tests `HYPERVCTL_TEST_SWITCH`. Provisioning tests create and delete their
//! own objects under `HYPERVCTL_TEST_DIR`. Tests whose variables are unset
//! return early.
//!
//! Run with: cargo test -p hypervctl --features integration -- --test-threads=1

#![cfg(all(windows, feature = "integration"))]

use hypervctl::wmi::WmiTransport;
use hypervctl::{
    DiskRole, Error, Generation, HyperV, SwitchType, Transition, VhdType, VirtualMachine,
    VmSettings, VmState,
};

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn connect() -> HyperV<WmiTransport> {
    let hyperv = HyperV::connect().expect("Failed to connect to Hyper-V");
    hyperv.init_logging();
    hyperv
}

fn test_vm(hyperv: &HyperV<WmiTransport>) -> Option<VirtualMachine> {
    let name = env("HYPERVCTL_TEST_VM")?;
    Some(hyperv.get_vm(&name).expect("test VM not found"))
}

#[test]
fn test_connect() {
    let result = HyperV::connect();
    assert!(result.is_ok(), "Failed to connect to Hyper-V: {:?}", result.err());
}

#[test]
fn test_list_vms() {
    let hyperv = connect();
    let vms = hyperv.list_vms().expect("Failed to list VMs");
    for vm in &vms {
        assert!(!vm.name().is_empty());
        assert!(!vm.id().is_empty());
    }
}

#[test]
fn test_get_missing_vm() {
    let hyperv = connect();
    let err = hyperv.get_vm("hypervctl-no-such-vm").unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "VM", .. }));
}

#[test]
fn test_list_switches() {
    let hyperv = connect();
    hyperv.list_switches().expect("Failed to list switches");
}

#[test]
fn test_start_pause_resume_stop() {
    let hyperv = connect();
    let Some(mut vm) = test_vm(&hyperv) else {
        return;
    };
    let reconciler = hyperv.reconciler();

    hyperv.start(&mut vm).unwrap();
    assert!(reconciler.refresh(&mut vm).unwrap().matches(VmState::Running));
    assert_eq!(hyperv.start(&mut vm).unwrap(), Transition::AlreadyInState);

    hyperv.pause(&mut vm).unwrap();
    assert!(reconciler.refresh(&mut vm).unwrap().matches(VmState::Paused));
    hyperv.resume(&mut vm).unwrap_err();

    hyperv.stop(&mut vm, true).unwrap();
    assert!(reconciler.refresh(&mut vm).unwrap().matches(VmState::Off));
    assert_eq!(hyperv.stop(&mut vm, true).unwrap(), Transition::AlreadyInState);
}

#[test]
fn test_save_and_resume() {
    let hyperv = connect();
    let Some(mut vm) = test_vm(&hyperv) else {
        return;
    };

    hyperv.start(&mut vm).unwrap();
    hyperv.suspend(&mut vm).unwrap();
    assert!(hyperv.reconciler().refresh(&mut vm).unwrap().is_suspended());
    hyperv.resume(&mut vm).unwrap();
    hyperv.stop(&mut vm, true).unwrap();
}

#[test]
fn test_attach_and_detach_vhd() {
    let hyperv = connect();
    let (Some(vm), Some(vhd)) = (test_vm(&hyperv), env("HYPERVCTL_TEST_VHD")) else {
        return;
    };

    let attachment = hyperv.attach_vhd(&vm, &vhd, DiskRole::Data).unwrap();
    assert!(attachment.disk.host_resource().iter().any(|r| r.eq_ignore_ascii_case(&vhd)));

    hyperv.detach_vhd(&vm, &vhd).unwrap();
    assert!(hyperv
        .resources()
        .find_virtual_hard_disk(vm.path(), &vhd)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_network_adapter_flow() {
    let hyperv = connect();
    let (Some(vm), Some(switch)) = (test_vm(&hyperv), env("HYPERVCTL_TEST_SWITCH")) else {
        return;
    };
    let adapter = "hypervctl-test-nic";

    hyperv.add_network_adapter(&vm, adapter).unwrap();
    hyperv.connect_adapter(&vm, adapter, &switch).unwrap();
    let bandwidth = hyperv.set_adapter_bandwidth(&vm, adapter, 100, 10).unwrap();
    assert_eq!(bandwidth.get("Limit").and_then(|v| v.as_u64()), Some(100_000_000));

    assert_eq!(hyperv.disconnect_adapter(&vm, adapter).unwrap(), Transition::Completed);
    assert_eq!(
        hyperv.disconnect_adapter(&vm, adapter).unwrap(),
        Transition::AlreadyInState
    );
    assert_eq!(hyperv.remove_network_adapter(&vm, adapter).unwrap(), 1);
}

#[test]
fn test_create_size_and_delete_vm() {
    let Some(dir) = env("HYPERVCTL_TEST_DIR") else {
        return;
    };
    let hyperv = connect();

    let settings = VmSettings::new("hypervctl-provision", Generation::Gen2)
        .with_processor_count(2)
        .with_memory_mb(1024)
        .with_config_path(dir);
    let mut vm = hyperv.create_vm(&settings).expect("create failed");

    hyperv.set_processor_count(&mut vm, 1).expect("processor change failed");
    hyperv.set_memory_mb(&vm, 2048).expect("memory change failed");
    hyperv.delete_vm(&mut vm).expect("delete failed");
}

#[test]
fn test_vhd_lifecycle() {
    let Some(dir) = env("HYPERVCTL_TEST_DIR") else {
        return;
    };
    let hyperv = connect();
    let path = format!(r"{}\hypervctl-scratch.vhdx", dir);

    hyperv.create_vhd(&path, 1 << 30, VhdType::Dynamic).expect("create failed");
    hyperv.resize_vhd(&path, 2 << 30).expect("resize failed");
    hyperv.delete_vhd(&path).expect("delete failed");
}

#[test]
fn test_private_switch_lifecycle() {
    if env("HYPERVCTL_TEST_DIR").is_none() {
        return;
    }
    let hyperv = connect();

    hyperv
        .create_switch("hypervctl-private", SwitchType::Private, None)
        .expect("create failed");
    hyperv
        .change_switch_type("hypervctl-private", SwitchType::Internal, None)
        .expect("change failed");
    assert_eq!(
        hyperv.switch_type("hypervctl-private").unwrap(),
        SwitchType::Internal
    );
    hyperv.delete_switch("hypervctl-private").expect("delete failed");
}
