use anyhow::Result;
use tempfile::tempdir;

use qsc_core::{
    asymmetric::{self, KeyPair},
    channel::{ChannelHandle, ChannelMode, SymmetricChannel},
    config::QscConfig,
    session,
    signing::{self, RsaPssSigner, Signer as _, Verification},
    util,
};

#[test]
fn full_pipeline_smoke() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("qsc.toml");
    std::fs::write(
        &config_path,
        r#"
[session]
bit_count = 2048
seed = 31337
output_bits = 128

[keys]
rsa_bits = 2048
"#,
    )?;
    let cfg = QscConfig::load(Some(config_path.as_path()))?;
    cfg.validate()?;

    let outcome = session::run_session(&cfg.session)?;
    let report = &outcome.report;
    assert!(report.sifted_bits <= report.raw_bits);
    assert!(report.reconciled_bits <= report.sifted_bits);
    assert!(report.final_key_bits <= report.reconciled_bits - report.leaked_bits);
    assert_eq!(outcome.key.expose_secret().len(), 16);

    let channel = SymmetricChannel::from_final_key(&outcome.key, cfg.channel.mode)?;
    let wire = channel.encrypt(b"This is a secret message for AES.")?;

    let pair = KeyPair::generate(cfg.keys.rsa_bits)?;
    let signer = RsaPssSigner::from_key_pair(&pair)?;
    let sig = signer.sign(wire.as_bytes())?;
    assert_eq!(
        signing::verify(wire.as_bytes(), &sig, pair.public_key()),
        Verification::Valid
    );

    // The peer receives the wrapped key, the ciphertext and the signature.
    let wrapped = asymmetric::wrap_channel_key(outcome.key.expose_secret(), pair.public_key())?;
    let peer = asymmetric::unwrap_channel(&wrapped, pair.private_key(), ChannelMode::Authenticated)?;
    let public_pem = pair.public_key_pem()?;
    let verdict = signing::verify_b64_pem(wire.as_bytes(), &util::b64_encode(&sig), &public_pem)?;
    assert!(verdict.is_valid());
    assert_eq!(peer.decrypt(&wire)?, b"This is a secret message for AES.");
    Ok(())
}

#[test]
fn rotation_to_a_fresh_session_key() -> Result<()> {
    let mut cfg = QscConfig::default();
    cfg.session.seed = Some(1);
    let first = session::run_session(&cfg.session)?;
    cfg.session.seed = Some(2);
    let second = session::run_session(&cfg.session)?;

    let handle = ChannelHandle::new(SymmetricChannel::from_final_key(
        &first.key,
        ChannelMode::Authenticated,
    )?);
    let old_wire = handle.current().encrypt(b"epoch 1")?;

    let retired = handle.rotate(SymmetricChannel::from_final_key(
        &second.key,
        ChannelMode::Authenticated,
    )?);
    let new_wire = handle.current().encrypt(b"epoch 2")?;

    assert_eq!(retired.decrypt(&old_wire)?, b"epoch 1");
    assert!(handle.current().decrypt(&old_wire).is_err());
    assert_eq!(handle.current().decrypt(&new_wire)?, b"epoch 2");
    Ok(())
}

#[test]
fn legacy_cbc_interop_round_trip() -> Result<()> {
    let mut cfg = QscConfig::default();
    cfg.session.seed = Some(5);
    let outcome = session::run_session(&cfg.session)?;
    let ours = SymmetricChannel::from_final_key(&outcome.key, ChannelMode::LegacyCbc)?;
    let theirs = SymmetricChannel::legacy_cbc(outcome.key.expose_secret())?;
    let wire = ours.encrypt(b"legacy peer")?;
    assert_eq!(theirs.decrypt(&wire)?, b"legacy peer");
    Ok(())
}

#[test]
fn concurrent_sessions_are_independent() -> Result<()> {
    let fingerprints = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                s.spawn(move || -> qsc_core::error::Result<String> {
                    let mut cfg = QscConfig::default();
                    cfg.session.seed = Some(500 + i);
                    Ok(session::run_session(&cfg.session)?.key.fingerprint().to_string())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("session thread panicked"))
            .collect::<qsc_core::error::Result<Vec<_>>>()
    })?;
    let mut unique = fingerprints.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), fingerprints.len());
    Ok(())
}
