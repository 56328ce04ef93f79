mod common;

use common::FakeTpm;
use veritrust_core::tpm::{
    AlgId, Capability, EccCurve, PcrSelection, RcBase, Session, SessionType, StartupType,
    TpmDevice, TpmError, TpmHandle, TpmtPublic,
};

fn device() -> TpmDevice {
    let mut device = TpmDevice::with_transport(Box::new(FakeTpm::new().into_transport()));
    device.startup(StartupType::Clear).unwrap();
    device
}

#[test]
fn commands_before_startup_fail_with_initialize() {
    let mut device = TpmDevice::with_transport(Box::new(FakeTpm::new().into_transport()));
    let err = device.self_test(true).unwrap_err();
    match err {
        TpmError::Tpm { rc } => assert_eq!(rc.base(), RcBase::Initialize),
        other => panic!("unexpected error: {other}"),
    }
    device.startup(StartupType::Clear).unwrap();
    device.self_test(true).unwrap();
}

#[test]
fn get_capability_paginates_through_fixed_properties() {
    let mut device = device();
    // Walk from PT_FIXED one property per page, following moreData.
    let properties = device.read_tpm_properties(0x100, 1).unwrap();
    assert_eq!(properties.len(), 6);
    assert_eq!(properties.first().unwrap().property, 0x100);
    assert_eq!(properties.last().unwrap().property, 0x105);
    // Strictly increasing walk.
    for pair in properties.windows(2) {
        assert!(pair[0].property < pair[1].property);
    }
}

#[test]
fn get_capability_single_page() {
    let mut device = device();
    let response = device.get_capability(Capability::TpmProperties, 0x105, 8).unwrap();
    assert!(!response.more_data);
}

#[test]
fn get_random_loops_over_short_reads() {
    let mut device = device();
    // The fake caps each response at 8 bytes.
    let first = device.get_random(32).unwrap();
    assert_eq!(first.len(), 8);

    let exact = device.get_random_exact(32).unwrap();
    assert_eq!(exact.len(), 32);
    // Deterministic counter stream never repeats a chunk.
    assert_ne!(&exact[0..8], &exact[8..16]);
}

#[test]
fn pcr_read_rerequests_the_remainder() {
    let mut device = device();
    let selection = vec![PcrSelection::new(AlgId::Sha256, &[0, 4, 7, 10, 16])];
    let values = device.pcr_read_all(selection).unwrap();
    assert_eq!(values.len(), 5);
    let pcrs: Vec<u32> = values.iter().map(|(_, pcr, _)| *pcr).collect();
    assert_eq!(pcrs, vec![0, 4, 7, 10, 16]);
    for (alg, pcr, value) in values {
        assert_eq!(value, common::pcr_value(alg as u16, pcr));
    }
}

#[test]
fn create_primary_is_deterministic() {
    let mut device = device();
    let template = TpmtPublic::ecc_storage_template(EccCurve::NistP256);

    let mut auth1 = Session::password(b"");
    let first = device
        .create_primary(TpmHandle::OWNER, template.clone(), &mut auth1)
        .unwrap();

    let mut auth2 = Session::password(b"");
    let second = device
        .create_primary(TpmHandle::OWNER, template.clone(), &mut auth2)
        .unwrap();

    // Identical template and hierarchy: identical name and public area,
    // distinct transient handles.
    assert_eq!(first.name, second.name);
    assert_eq!(first.out_public, second.out_public);
    assert_ne!(first.object_handle, second.object_handle);

    // The name commits to the public area by construction.
    assert_eq!(first.name, first.out_public.name().unwrap());

    // A different hierarchy produces a different key.
    let mut auth3 = Session::password(b"");
    let third = device
        .create_primary(TpmHandle::ENDORSEMENT, template, &mut auth3)
        .unwrap();
    assert_ne!(first.name, third.name);
}

#[test]
fn flush_context_is_idempotent_at_the_caller() {
    let mut device = device();
    let mut auth = Session::password(b"");
    let created = device
        .create_primary(
            TpmHandle::OWNER,
            TpmtPublic::ecc_storage_template(EccCurve::NistP256),
            &mut auth,
        )
        .unwrap();

    device.flush_context(created.object_handle).unwrap();
    let err = device.flush_context(created.object_handle).unwrap_err();
    match err {
        TpmError::Tpm { rc } => {
            assert_eq!(rc.base(), RcBase::Handle);
            assert!(rc.is_format_one());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn scoped_handle_flushes_on_drop() {
    let (tpm, transport) = FakeTpm::new().shared();
    let mut device = TpmDevice::with_transport(Box::new(transport));
    device.startup(StartupType::Clear).unwrap();

    let mut auth = Session::password(b"");
    let created = device
        .create_primary(
            TpmHandle::OWNER,
            TpmtPublic::rsa_signing_template(),
            &mut auth,
        )
        .unwrap();
    let handle = created.object_handle;

    {
        let _scoped = device.scoped(handle);
        // Dropped here; the flush goes out on the wire.
    }
    let err = device.flush_context(handle).unwrap_err();
    assert!(matches!(err, TpmError::Tpm { rc } if rc.base() == RcBase::Handle));
    drop(tpm);
}

#[test]
fn hmac_session_chains_nonces_across_commands() {
    let (tpm, transport) = FakeTpm::new().shared();
    let mut device = TpmDevice::with_transport(Box::new(transport));
    device.startup(StartupType::Clear).unwrap();

    let mut session = device
        .start_plain_session(SessionType::Hmac, AlgId::Sha256)
        .unwrap();
    let handle = session.handle();
    assert_eq!(session.nonce_tpm().len(), 32);

    // First authorized command: the session absorbs a fresh nonce-TPM.
    let before = session.nonce_tpm().to_vec();
    let template = TpmtPublic::ecc_storage_template(EccCurve::NistP256);
    device
        .create_primary(TpmHandle::OWNER, template.clone(), &mut session)
        .unwrap();
    let after_first = session.nonce_tpm().to_vec();
    assert_ne!(before, after_first);

    // The session's view matches the TPM's view of the chain.
    {
        let tpm = tpm.lock().unwrap();
        assert_eq!(tpm.session_nonce(handle.0).unwrap(), after_first.as_slice());
    }

    // Second authorized command continues the chain.
    device
        .create_primary(TpmHandle::OWNER, template, &mut session)
        .unwrap();
    let after_second = session.nonce_tpm().to_vec();
    assert_ne!(after_first, after_second);
    assert!(session.is_active());

    // Flushing retires the session on both sides.
    device.flush_session(&mut session).unwrap();
    assert!(!session.is_active());
    assert!(tpm.lock().unwrap().session_nonce(handle.0).is_none());
}

#[test]
fn shutdown_requires_a_new_startup() {
    let mut device = device();
    device.shutdown(StartupType::Clear).unwrap();
    let err = device.self_test(false).unwrap_err();
    assert!(matches!(err, TpmError::Tpm { rc } if rc.base() == RcBase::Initialize));
    device.startup(StartupType::Clear).unwrap();
    device.self_test(false).unwrap();
}

#[test]
fn self_test_reporting() {
    let mut device = device();
    let incremental = device
        .incremental_self_test(vec![AlgId::Sha256, AlgId::Rsa])
        .unwrap();
    assert!(incremental.to_do_list.is_empty());

    let result = device.get_test_result().unwrap();
    assert!(result.test_result.is_success());
    assert!(!result.out_data.is_empty());
}

#[test]
fn stir_random_perturbs_the_stream() {
    let mut device = device();
    let before = device.get_random(8).unwrap().into_vec();
    device.stir_random(b"caller entropy").unwrap();
    let after = device.get_random(8).unwrap().into_vec();
    assert_ne!(before, after);
}

#[test]
fn read_public_round_trips_the_created_object() {
    let mut device = device();
    let mut auth = Session::password(b"");
    let created = device
        .create_primary(
            TpmHandle::OWNER,
            TpmtPublic::rsa_signing_template(),
            &mut auth,
        )
        .unwrap();

    let read = device.read_public(created.object_handle).unwrap();
    assert_eq!(read.out_public, created.out_public);
    assert_eq!(read.name, created.name);

    device.flush_context(created.object_handle).unwrap();
    let err = device.read_public(created.object_handle).unwrap_err();
    assert!(matches!(err, TpmError::Tpm { rc } if rc.base() == RcBase::Handle));
}

#[test]
fn pcr_extend_changes_the_read_value() {
    let mut device = device();
    let selection = vec![PcrSelection::new(AlgId::Sha256, &[7])];
    let initial = device.pcr_read_all(selection.clone()).unwrap();

    let mut auth = Session::password(b"");
    device
        .pcr_extend(7, AlgId::Sha256, &[0xAB; 32], &mut auth)
        .unwrap();

    let extended = device.pcr_read_all(selection).unwrap();
    assert_ne!(initial[0].2, extended[0].2);
    // Extension is a running hash, so a second identical extend moves it
    // again.
    let mut auth = Session::password(b"");
    device
        .pcr_extend(7, AlgId::Sha256, &[0xAB; 32], &mut auth)
        .unwrap();
    let twice = device.pcr_read_all(vec![PcrSelection::new(AlgId::Sha256, &[7])]).unwrap();
    assert_ne!(extended[0].2, twice[0].2);
}

#[test]
fn policy_session_lifecycle() {
    let mut device = device();
    let mut session = device
        .start_plain_session(SessionType::Policy, AlgId::Sha256)
        .unwrap();
    assert_eq!(
        session.handle().class(),
        Some(veritrust_core::tpm::HandleClass::PolicySession)
    );
    device.flush_session(&mut session).unwrap();
    let err = device.flush_session(&mut session).unwrap_err();
    assert!(matches!(err, TpmError::Tpm { rc } if rc.base() == RcBase::Handle));
}
