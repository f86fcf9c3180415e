use bedleveler::cli::{run, Cli};
use bedleveler::{connect, Connection, PrinterInfo};
use bedleveler_core::SerialSettings;
use bedleveler_settings::MoonrakerSettings;
use clap::Parser;
use tempfile::TempDir;

#[test]
fn test_marlin2_requires_port() {
    let info = PrinterInfo::new("Ender 3", Connection::Marlin2(SerialSettings::default()));
    let err = connect(&info, None, None).err().unwrap();
    assert!(err.to_string().contains("--port"));
}

#[test]
fn test_moonraker_host_resolution() {
    let mut info = PrinterInfo::new(
        "Neptune 4",
        Connection::Moonraker(MoonrakerSettings::default()),
    );
    let err = connect(&info, None, None).err().unwrap();
    assert!(err.to_string().contains("--host"));

    assert!(connect(&info, None, Some("10.0.0.5:7125")).is_ok());

    info.connection = Connection::Moonraker(MoonrakerSettings {
        host: Some("neptune.local".to_string()),
    });
    assert!(connect(&info, None, None).is_ok());
}

#[tokio::test]
async fn test_run_reports_missing_descriptor() {
    let dir = TempDir::new().unwrap();
    let cli = Cli::try_parse_from([
        "bedleveler",
        "--printer",
        "missing",
        "--printers-dir",
        dir.path().to_str().unwrap(),
        "temperatures",
    ])
    .unwrap();
    assert!(run(cli).await.is_err());
}

#[tokio::test]
async fn test_run_rejects_unknown_manual_point_before_connecting() {
    let dir = TempDir::new().unwrap();
    let info = PrinterInfo::new("Ender 3", Connection::Marlin2(SerialSettings::default()));
    info.save_to_file(&dir.path().join("ender3.json")).unwrap();

    let cli = Cli::try_parse_from([
        "bedleveler",
        "-p",
        "ender3",
        "--printers-dir",
        dir.path().to_str().unwrap(),
        "manual-probe",
        "Center",
    ])
    .unwrap();
    let err = run(cli).await.unwrap_err();
    assert!(err.to_string().contains("no manual probe point 'Center'"));
}
