use bedleveler_core::{FlowControl, Parity, SerialSettings};
use bedleveler_settings::{
    list_printers, resolve_descriptor, Connection, ManualProbePoint, MoonrakerSettings,
    PrinterInfo, SettingsError,
};
use std::fs;
use tempfile::TempDir;

fn neptune() -> PrinterInfo {
    let mut info = PrinterInfo::new(
        "Elegoo Neptune 3 Plus",
        Connection::Marlin2(SerialSettings {
            baud_rate: 115200,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: 1,
            flow_control: FlowControl::Hardware,
        }),
    );
    info.manual_probe_points = vec![
        ManualProbePoint {
            name: "Front Left".to_string(),
            row: 0,
            column: 0,
            x: 30.0,
            y: 30.0,
        },
        ManualProbePoint {
            name: "Back Right".to_string(),
            row: 4,
            column: 4,
            x: 290.0,
            y: 290.0,
        },
    ];
    info
}

#[test]
fn test_json_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("neptune.json");
    let info = neptune();
    info.save_to_file(&path).unwrap();

    let loaded = PrinterInfo::load_from_file(&path).unwrap();
    assert_eq!(loaded, info);
    assert_eq!(
        loaded.manual_probe_point("Back Right").map(|p| (p.row, p.column)),
        Some((4, 4))
    );
}

#[test]
fn test_toml_descriptor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("n4max.toml");
    fs::write(
        &path,
        r#"
display_name = "Elegoo Neptune 4 Max"

[connection]
mode = "Moonraker"
host = "192.168.1.40:7125"

[[manual_probe_points]]
name = "Center"
row = 2
column = 2
x = 215.0
y = 215.0
"#,
    )
    .unwrap();

    let info = PrinterInfo::load_from_file(&path).unwrap();
    assert_eq!(info.connection.mode_name(), "Moonraker");
    assert_eq!(
        info.connection,
        Connection::Moonraker(MoonrakerSettings {
            host: Some("192.168.1.40:7125".to_string()),
        })
    );
    assert_eq!(info.manual_probe_points.len(), 1);
}

#[test]
fn test_serial_defaults_fill_missing_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ender.json");
    fs::write(
        &path,
        r#"{"display_name": "Ender 3", "connection": {"mode": "Marlin2", "baud_rate": 250000}}"#,
    )
    .unwrap();

    let info = PrinterInfo::load_from_file(&path).unwrap();
    assert_eq!(
        info.connection,
        Connection::Marlin2(SerialSettings {
            baud_rate: 250000,
            ..SerialSettings::default()
        })
    );
}

#[test]
fn test_invalid_descriptor_is_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(
        &path,
        r#"{"display_name": " ", "connection": {"mode": "Moonraker"}}"#,
    )
    .unwrap();

    assert!(matches!(
        PrinterInfo::load_from_file(&path),
        Err(SettingsError::InvalidSetting { .. })
    ));
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.yaml");
    assert!(matches!(
        neptune().save_to_file(&path),
        Err(SettingsError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_resolve_and_list() {
    let dir = TempDir::new().unwrap();
    neptune()
        .save_to_file(&dir.path().join("neptune.toml"))
        .unwrap();
    fs::write(dir.path().join("notes.txt"), "not a printer").unwrap();

    let resolved = resolve_descriptor("neptune", dir.path()).unwrap();
    assert_eq!(resolved, dir.path().join("neptune.toml"));
    assert_eq!(list_printers(dir.path()).unwrap(), vec![resolved.clone()]);

    let direct = resolve_descriptor(resolved.to_str().unwrap(), dir.path()).unwrap();
    assert_eq!(direct, resolved);

    assert!(matches!(
        resolve_descriptor("missing", dir.path()),
        Err(SettingsError::NotFound(_))
    ));
}
