use console_pkg::{AudioInfo, Package};
use dlcpack_core::crypto::{DrmDirection, DrmTool};
use dlcpack_core::metadata::AudioLevels;
use dlcpack_core::{
    ArrangementType, ChartCompiler, Collaborators, DirectoryWalk, GamePlatform, GameVersion, PackError, PackOptions,
    Packer, Platform, PlatformCryptoAdapter,
};
use psarc::LegacyCipher;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::Result;

const KEY: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";
const ENCRYPTED_MAGIC: &[u8] = b"EDAT";

/// Stands in for the EDAT tool: prefixes/strips a marker on every staged file.
struct FakeDrmTool {
    report_success: bool,
    produce_output: bool,
}

impl FakeDrmTool {
    fn working() -> Self {
        Self { report_success: true, produce_output: true }
    }
}

impl DrmTool for FakeDrmTool {
    fn run(&self, direction: DrmDirection, staging_dir: &Path) -> Result<String> {
        for entry in fs::read_dir(staging_dir)? {
            let path = entry?.path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if !self.produce_output {
                continue;
            }
            match direction {
                DrmDirection::Encrypt if name.ends_with(".psarc") => {
                    let mut data = ENCRYPTED_MAGIC.to_vec();
                    data.extend(fs::read(&path)?);
                    fs::write(staging_dir.join(format!("{}.edat", name)), data)?;
                }
                DrmDirection::Decrypt if name.ends_with(".edat") => {
                    let data = fs::read(&path)?;
                    let plain = data.strip_prefix(ENCRYPTED_MAGIC).unwrap_or(&data);
                    fs::write(staging_dir.join(format!("{}.dat", name.trim_end_matches(".edat"))), plain)?;
                }
                _ => {}
            }
        }
        Ok(match (self.report_success, direction) {
            (true, DrmDirection::Encrypt) => "Encrypt all EDAT files successfully".to_string(),
            (true, DrmDirection::Decrypt) => "Decrypt all EDAT files successfully".to_string(),
            (false, _) => "error: klicensee mismatch".to_string(),
        })
    }
}

/// Writes `SNG(<arrangement>)` followed by the chart XML.
struct FakeChartCompiler;

impl ChartCompiler for FakeChartCompiler {
    fn compile(&self, xml: &Path, sng: &Path, arrangement: ArrangementType, _platform: Platform) -> Result<()> {
        let mut data = format!("SNG({})", arrangement).into_bytes();
        data.extend(fs::read(xml)?);
        fs::write(sng, data)?;
        Ok(())
    }

    fn normalize_showlights(&self, xml: &Path) -> Result<()> {
        let text = fs::read_to_string(xml)?;
        fs::write(xml, text.trim())?;
        Ok(())
    }
}

fn packer(root: &Path, drm: FakeDrmTool) -> Result<Packer> {
    let crypto = PlatformCryptoAdapter::new(root.join("edat"))
        .with_cipher(LegacyCipher::from_hex(KEY, None)?)
        .with_drm_tool(drm);
    Ok(Packer::new(Collaborators::new(crypto).with_chart_compiler(FakeChartCompiler)))
}

fn write_tree(root: &Path, files: &[(&str, &[u8])]) -> Result<()> {
    for (name, data) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(path, data)?;
    }
    Ok(())
}

fn snapshot(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in &DirectoryWalk::new(root) {
        let entry = entry?;
        files.insert(entry.name, fs::read(&entry.path)?);
    }
    Ok(files)
}

fn options(platform: GamePlatform, version: GameVersion) -> PackOptions {
    PackOptions {
        platform: Some(Platform::new(platform, version)),
        ..PackOptions::default()
    }
}

fn current_tree(root: &Path) -> Result<PathBuf> {
    let source = root.join("song");
    write_tree(
        &source,
        &[
            ("appid.appid", b"248750"),
            ("song.nt", b"{\"platform\": \"dx9\"}"),
            ("songs/arr/song_lead.xml", b"<song>lead</song>"),
            ("songs/arr/song_bass.xml", b"<song>bass</song>"),
            ("audio/windows/song.wem", &[7u8; 70_000]),
            ("manifests/song/song_lead.json", b"{}"),
        ],
    )?;
    Ok(source)
}

fn assert_pack_error(err: &anyhow::Error, check: impl Fn(&PackError) -> bool) {
    match err.downcast_ref::<PackError>() {
        Some(kind) => assert!(check(kind), "unexpected error kind: {:#}", err),
        None => panic!("not a PackError: {:#}", err),
    }
}

#[test]
fn test_pc_current_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let package = packer.pack(&source, &dir.path().join("out/song_p"), &PackOptions::default())?;
    assert_eq!(package, dir.path().join("out/song_p.psarc"));

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(unpacked, dir.path().join("unpacked/song_p_Pc"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    Ok(())
}

#[test]
fn test_app_id_option_replaces_marker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        app_id: Some("221680".to_string()),
        ..PackOptions::default()
    };
    let package = packer.pack(&source, &dir.path().join("out/song_p"), &opts)?;
    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(fs::read(unpacked.join("appid.appid"))?, b"221680");
    assert_eq!(fs::read(source.join("appid.appid"))?, b"248750");

    let mut expected = snapshot(&source)?;
    expected.insert("appid.appid".to_string(), b"221680".to_vec());
    assert_eq!(snapshot(&unpacked)?, expected);
    Ok(())
}

#[test]
fn test_unset_manifest_volume_takes_decibels() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    write_tree(
        &source,
        &[(
            "manifests/song/song_bass.json",
            br#"{"Entries":{"id":{"Attributes":{"SongVolume":0,"PreviewVolume":-2.5}}}}"#,
        )],
    )?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        audio: AudioLevels {
            volume: -5,
            preview_volume: -5,
            quality: 4,
        },
        ..PackOptions::default()
    };
    let package = packer.pack(&source, &dir.path().join("out/song_p"), &opts)?;
    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;

    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(unpacked.join("manifests/song/song_bass.json"))?)?;
    assert_eq!(manifest["Entries"]["id"]["Attributes"]["SongVolume"], -5.0);
    assert_eq!(manifest["Entries"]["id"]["Attributes"]["PreviewVolume"], -2.5);
    assert_eq!(fs::read(unpacked.join("manifests/song/song_lead.json"))?, b"{}");
    Ok(())
}

#[test]
fn test_mac_current_roundtrip_with_regenerated_charts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    write_tree(&source, &[("songs/arr/song_showlights.xml", b"  <showlights/>\n")])?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        regenerate_sng: true,
        ..options(GamePlatform::Mac, GameVersion::Rs2014)
    };
    let package = packer.pack_into(&source, &dir.path().join("out"), &opts)?;
    assert_eq!(package, dir.path().join("out/song_v1_m.psarc"));

    assert_eq!(fs::read(source.join("songs/bin/macos/song_bass.sng"))?, b"SNG(bass)<song>bass</song>");
    assert_eq!(fs::read(source.join("songs/arr/song_showlights.xml"))?, b"<showlights/>");
    assert!(!source.join("songs/bin/macos/song_showlights.sng").exists());

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(unpacked, dir.path().join("unpacked/song_v1_m_Mac"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    Ok(())
}

fn legacy_tree(root: &Path) -> Result<PathBuf> {
    let source = root.join("legacy");
    write_tree(
        &source,
        &[
            ("APP_ID", b"206102"),
            ("NamesBlock.bin", b"stale"),
            ("dlc_song/GR/Behaviors/Songs/song_lead.xml", b"<song/>"),
            ("dlc_song/Audio/song.ogg", &[3u8; 40_000]),
            ("dlc_song/NamesBlock.bin", b"stale"),
            ("dlc_tone_clean/Manifests/tone.json", b"{}"),
        ],
    )?;
    Ok(source)
}

#[test]
fn test_pc_legacy_roundtrip_is_encrypted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = legacy_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let package = packer.pack(&source, &dir.path().join("out/legacy_p"), &PackOptions::default())?;
    assert_eq!(package, dir.path().join("out/legacy_p.dat"));
    assert_ne!(&fs::read(&package)?[..4], b"PSAR");
    assert!(!source.join("NamesBlock.bin").exists());
    assert!(!source.join("dlc_song/NamesBlock.bin").exists());

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(unpacked, dir.path().join("unpacked/legacy_p_Pc"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    Ok(())
}

#[test]
fn test_mac_legacy_roundtrip_is_encrypted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = legacy_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;
    let mac = Platform::new(GamePlatform::Mac, GameVersion::Rs2012);

    let package = packer.pack(&source, &dir.path().join("out/legacy_m"), &options(GamePlatform::Mac, GameVersion::Rs2012))?;
    assert_eq!(package, dir.path().join("out/legacy_m.dat"));
    assert_ne!(&fs::read(&package)?[..4], b"PSAR");

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), Some(mac))?;
    assert_eq!(unpacked, dir.path().join("unpacked/legacy_m_Mac"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    Ok(())
}

#[test]
fn test_mac_legacy_without_key_fails_before_writing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = legacy_tree(dir.path())?;
    let packer = Packer::new(Collaborators::new(PlatformCryptoAdapter::new(dir.path().join("edat"))));

    let err = packer
        .pack(&source, &dir.path().join("out/legacy_m"), &options(GamePlatform::Mac, GameVersion::Rs2012))
        .unwrap_err();
    assert_pack_error(&err, |e| matches!(e, PackError::MissingKey));
    assert!(!dir.path().join("out").exists());
    Ok(())
}

#[test]
fn test_legacy_charts_regenerate_for_pc_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = legacy_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        regenerate_sng: true,
        ..options(GamePlatform::Mac, GameVersion::Rs2012)
    };
    packer.pack(&source, &dir.path().join("out/legacy_m"), &opts)?;
    assert_eq!(
        fs::read(source.join("dlc_song/GRExports/Generic/song_lead.sng"))?,
        b"SNG(guitar)<song/>"
    );
    assert!(!source.join("dlc_song/GRExports/Mac").exists());
    assert!(!source.join("dlc_tone_clean/GRExports").exists());
    Ok(())
}

#[test]
fn test_pc_legacy_without_key_fails_before_writing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = legacy_tree(dir.path())?;
    let packer = Packer::new(Collaborators::new(PlatformCryptoAdapter::new(dir.path().join("edat"))));

    let err = packer.pack(&source, &dir.path().join("out/legacy_p"), &PackOptions::default()).unwrap_err();
    assert_pack_error(&err, |e| matches!(e, PackError::MissingKey));
    assert!(!dir.path().join("out").exists());
    Ok(())
}

fn console_header(title_id: &str) -> String {
    let mut lines = vec!["Package Type: LIVE".to_string(), format!("Title ID: {}", title_id)];
    for slot in 0..16u64 {
        let id = if slot < 2 { 0x1000 + slot } else { 0 };
        lines.push(format!("License {} ID: {:016X}", slot, id));
        lines.push(format!("License {} Bits: 1", slot));
        lines.push(format!("License {} Flags: 1", slot));
    }
    while lines.len() < 74 {
        lines.push(format!("Field {}: -", lines.len()));
    }
    lines.push("Song Title by Some Artist".to_string());
    lines.join("\n")
}

fn xbox_tree(root: &Path, title_id: &str) -> Result<PathBuf> {
    let source = root.join("song_xbox");
    let header = console_header(title_id);
    write_tree(
        &source,
        &[
            ("package.txt", header.as_bytes()),
            ("Root/song/songs/arr/song_lead.xml", b"<song/>"),
            ("Root/song/audio/xbox360/song.wem", &[9u8; 30_000]),
            ("Root/dlc_tone/manifests/tone.json", b"{}"),
            ("Root/readme.txt", b"root file"),
        ],
    )?;
    Ok(source)
}

#[test]
fn test_xbox360_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = xbox_tree(dir.path(), "555308C0")?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let package = packer.pack_into(&source, &dir.path().join("out"), &PackOptions::default())?;
    assert_eq!(package, dir.path().join("out/song_xbox_v1_xbox"));
    assert_eq!(&fs::read(&package)?[..4], b"LIVE");
    assert!(!source.join("Root/song.psarc").exists());
    assert!(!source.join("Root/dlc_tone.psarc").exists());

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(unpacked, dir.path().join("unpacked/song_xbox_v1_xbox_XBox360"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    Ok(())
}

#[test]
fn test_xbox360_unknown_version_skips_chart_regeneration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = xbox_tree(dir.path(), "555308C0")?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        regenerate_sng: true,
        ..options(GamePlatform::XBox360, GameVersion::None)
    };
    let package = packer.pack(&source, &dir.path().join("out/song_xbox"), &opts)?;
    assert!(!source.join("Root/song/songs/bin").exists());

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);

    let opts = PackOptions {
        regenerate_sng: true,
        ..options(GamePlatform::XBox360, GameVersion::Rs2014)
    };
    packer.pack(&source, &dir.path().join("out/song_xbox_2014"), &opts)?;
    assert!(source.join("Root/song/songs/bin/xbox360/song_lead.sng").is_file());
    Ok(())
}

#[test]
fn test_xbox360_header_records_app_id_and_audio() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = xbox_tree(dir.path(), "555308C0")?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let opts = PackOptions {
        app_id: Some("221680".to_string()),
        audio: AudioLevels {
            volume: -7,
            preview_volume: -7,
            quality: 6,
        },
        ..PackOptions::default()
    };
    let package = packer.pack(&source, &dir.path().join("out/song_xbox"), &opts)?;

    let opened = Package::open(&package)?;
    assert_eq!(opened.header().app_id.as_deref(), Some("221680"));
    assert_eq!(
        opened.header().audio,
        Some(AudioInfo {
            volume: -7,
            preview_volume: -7,
            quality: 6,
        })
    );
    opened.close();
    Ok(())
}

#[test]
fn test_xbox360_requires_single_header() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("song_xbox");
    write_tree(
        &source,
        &[
            ("a.txt", console_header("555308C0").as_bytes()),
            ("b.txt", b"second"),
            ("Root/song/a.xml", b"<song/>"),
        ],
    )?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let err = packer
        .pack(&source, &dir.path().join("out/song"), &options(GamePlatform::XBox360, GameVersion::Rs2014))
        .unwrap_err();
    assert_pack_error(&err, |e| matches!(e, PackError::MalformedHeader(_)));
    assert!(!dir.path().join("out/song").exists());
    Ok(())
}

#[test]
fn test_ps3_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let package = packer.pack(&source, &dir.path().join("out/song_ps3"), &options(GamePlatform::PS3, GameVersion::Rs2014))?;
    assert_eq!(package, dir.path().join("out/song_ps3.psarc.edat"));
    assert_eq!(&fs::read(&package)?[..4], ENCRYPTED_MAGIC);
    assert!(!dir.path().join("out/song_ps3.psarc").exists());
    assert_eq!(fs::read_dir(dir.path().join("edat"))?.count(), 0);

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(unpacked, dir.path().join("unpacked/song_ps3_PS3"));
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    assert_eq!(fs::read_dir(dir.path().join("edat"))?.count(), 0);
    Ok(())
}

#[test]
fn test_ps3_encrypt_failure_keeps_clean_archive() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool { report_success: false, produce_output: false })?;

    let err = packer
        .pack(&source, &dir.path().join("out/song_ps3"), &options(GamePlatform::PS3, GameVersion::Rs2014))
        .unwrap_err();
    let clean = dir.path().join("out/song_ps3.psarc");
    assert_pack_error(&err, |e| {
        matches!(e, PackError::EncryptionToolFailure { output, artifact } if output.contains("klicensee") && *artifact == clean)
    });
    assert_eq!(&fs::read(&clean)?[..4], b"PSAR");
    assert!(!dir.path().join("out/song_ps3.psarc.edat").exists());
    Ok(())
}

#[test]
fn test_ps3_decrypt_failure_still_extracts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let package = packer(dir.path(), FakeDrmTool::working())?.pack(
        &source,
        &dir.path().join("out/song_ps3"),
        &options(GamePlatform::PS3, GameVersion::Rs2014),
    )?;

    let unreliable = packer(dir.path(), FakeDrmTool { report_success: false, produce_output: true })?;
    let err = unreliable.unpack(&package, &dir.path().join("unpacked"), None).unwrap_err();
    let dest = dir.path().join("unpacked/song_ps3_PS3");
    assert_pack_error(&err, |e| matches!(e, PackError::EncryptionToolFailure { artifact, .. } if *artifact == dest));
    assert_eq!(snapshot(&dest)?, snapshot(&source)?);
    Ok(())
}

#[test]
fn test_ps3_corrupt_package_leaves_staging_clean() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;
    let package = packer.pack(&source, &dir.path().join("out/song_ps3"), &options(GamePlatform::PS3, GameVersion::Rs2014))?;

    let broken = dir.path().join("out/broken_ps3.psarc.edat");
    let mut data = ENCRYPTED_MAGIC.to_vec();
    data.extend_from_slice(b"not a psarc at all");
    fs::write(&broken, data)?;

    assert!(packer.unpack(&broken, &dir.path().join("unpacked"), None).is_err());
    assert_eq!(fs::read_dir(dir.path().join("edat"))?.count(), 0);

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    assert_eq!(fs::read_dir(dir.path().join("edat"))?.count(), 0);
    Ok(())
}

#[test]
fn test_ps3_stale_decrypted_archive_is_not_extracted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;
    let package = packer.pack(&source, &dir.path().join("out/song_ps3"), &options(GamePlatform::PS3, GameVersion::Rs2014))?;

    fs::write(dir.path().join("edat/left_over.psarc.dat"), b"not an archive")?;

    let unpacked = packer.unpack(&package, &dir.path().join("unpacked"), None)?;
    assert_eq!(snapshot(&unpacked)?, snapshot(&source)?);
    assert_eq!(fs::read_dir(dir.path().join("edat"))?.count(), 0);
    Ok(())
}

#[test]
fn test_too_many_combo_arrangements() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    write_tree(
        &source,
        &[
            ("songs/arr/song_combo.xml", b"<song/>"),
            ("songs/arr/song_combo2.xml", b"<song/>"),
            ("songs/arr/song_combo3.xml", b"<song/>"),
        ],
    )?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let err = packer.pack_into(&source, &dir.path().join("out"), &PackOptions::default()).unwrap_err();
    assert_pack_error(&err, |e| matches!(e, PackError::TooManyComboArrangements));
    assert!(!dir.path().join("out").exists());
    Ok(())
}

#[test]
fn test_unknown_package_is_unresolved() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let package = dir.path().join("song.zip");
    fs::write(&package, b"PK")?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;

    let err = packer.unpack(&package, &dir.path().join("unpacked"), None).unwrap_err();
    assert_pack_error(&err, |e| matches!(e, PackError::UnresolvedPlatform(_)));
    assert!(!dir.path().join("unpacked").exists());
    Ok(())
}

#[test]
fn test_unpack_batch_continues_after_failure() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = current_tree(dir.path())?;
    let packer = packer(dir.path(), FakeDrmTool::working())?;
    let package = packer.pack(&source, &dir.path().join("out/song_p"), &PackOptions::default())?;
    let broken = dir.path().join("out/broken_p.psarc");
    fs::write(&broken, b"not an archive")?;

    let report = packer.unpack_batch(&[broken.clone(), package], &dir.path().join("unpacked"), None, None);
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, broken);
    assert_eq!(report.completed, [dir.path().join("unpacked/song_p_Pc")]);
    Ok(())
}
